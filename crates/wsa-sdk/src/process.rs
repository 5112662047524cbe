//! Child process plumbing shared by the bridge client, the launcher and the
//! service controller.

use std::{
    io,
    path::PathBuf,
    process::Stdio,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::error::format_command_output;

pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// Upper bound for collecting the remaining output after a child has exited or was killed.
/// A daemon forked by the child can inherit the pipes and keep them open indefinitely.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub capture_output: bool,
    pub detached: bool,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            capture_output: false,
            detached: false,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Pipe stdout and stderr back to the caller.
    pub fn capture_output(mut self) -> Self {
        self.capture_output = true;
        self
    }

    /// Let the child outlive its handle.
    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

#[async_trait]
pub trait ProcessHandle: Send {
    fn id(&self) -> Option<u32>;

    fn take_stdout(&mut self) -> Option<OutputStream>;

    fn take_stderr(&mut self) -> Option<OutputStream>;

    /// Waits up to `timeout` for the child to exit. `Ok(None)` means it is still running.
    async fn wait_for_exit(&mut self, timeout: Duration) -> io::Result<Option<i32>>;

    async fn kill(&mut self) -> io::Result<()>;
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    fn start(&self, spec: &ProcessSpec) -> io::Result<Box<dyn ProcessHandle>>;

    /// Returns the pid of a running process with the given image name.
    async fn find_by_name(&self, name: &str) -> io::Result<Option<u32>>;
}

#[derive(Clone, Debug, Default)]
pub struct TokioProcessRunner;

struct TokioProcess {
    child: Child,
}

#[async_trait]
impl ProcessHandle for TokioProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn take_stdout(&mut self) -> Option<OutputStream> {
        self.child
            .stdout
            .take()
            .map(|stream| Box::new(stream) as OutputStream)
    }

    fn take_stderr(&mut self) -> Option<OutputStream> {
        self.child
            .stderr
            .take()
            .map(|stream| Box::new(stream) as OutputStream)
    }

    async fn wait_for_exit(&mut self, timeout: Duration) -> io::Result<Option<i32>> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => Ok(Some(status?.code().unwrap_or(-1))),
            Err(_) => Ok(None),
        }
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.child.kill().await
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    fn start(&self, spec: &ProcessSpec) -> io::Result<Box<dyn ProcessHandle>> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args).stdin(Stdio::null());
        if spec.capture_output {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        cmd.kill_on_drop(!spec.detached);
        let child = cmd.spawn()?;
        debug!(command = %spec.command_line(), pid = ?child.id(), "spawned process");
        Ok(Box::new(TokioProcess { child }))
    }

    async fn find_by_name(&self, name: &str) -> io::Result<Option<u32>> {
        if cfg!(windows) {
            let filter = format!("IMAGENAME eq {name}.exe");
            let output = Command::new("tasklist")
                .args(["/FO", "CSV", "/NH", "/FI", &filter])
                .stdin(Stdio::null())
                .output()
                .await?;
            let stdout = String::from_utf8_lossy(&output.stdout);
            Ok(stdout.lines().find_map(parse_tasklist_pid))
        } else {
            let output = Command::new("pgrep")
                .args(["-x", name])
                .stdin(Stdio::null())
                .output()
                .await?;
            if !output.status.success() {
                return Ok(None);
            }
            let stdout = String::from_utf8_lossy(&output.stdout);
            Ok(stdout
                .lines()
                .find_map(|line| line.trim().parse::<u32>().ok()))
        }
    }
}

/// Extracts the pid from one `tasklist /FO CSV /NH` row.
pub(crate) fn parse_tasklist_pid(line: &str) -> Option<u32> {
    let mut columns = line.split(',').map(|col| col.trim().trim_matches('"'));
    let image = columns.next()?;
    if image.is_empty() {
        return None;
    }
    columns.next()?.parse().ok()
}

/// Everything a finished (or killed) child produced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the child was killed after exceeding its timeout.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn timed_out(&self) -> bool {
        self.exit_code.is_none()
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn combined(&self) -> String {
        format_command_output(&self.stdout, &self.stderr)
    }
}

/// Drains both output streams concurrently while waiting for the child, killing it once
/// `timeout` elapses.
pub async fn run_to_completion(
    mut handle: Box<dyn ProcessHandle>,
    timeout: Duration,
) -> io::Result<CommandOutput> {
    let started = Instant::now();
    let stdout_task = drain(handle.take_stdout());
    let stderr_task = drain(handle.take_stderr());

    let exit_code = handle.wait_for_exit(timeout).await?;
    if exit_code.is_none() {
        warn!(pid = ?handle.id(), ?timeout, "process timed out; killing it");
        if let Err(err) = handle.kill().await {
            warn!(error = %err, "failed to kill timed out process");
        }
    }

    let stdout = join_drain(stdout_task).await;
    let stderr = join_drain(stderr_task).await;
    Ok(CommandOutput {
        exit_code,
        stdout,
        stderr,
        elapsed: started.elapsed(),
    })
}

fn drain(stream: Option<OutputStream>) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut data = Vec::new();
        if let Some(mut stream) = stream {
            if let Err(err) = stream.read_to_end(&mut data).await {
                debug!(error = %err, "output stream closed with error");
            }
        }
        String::from_utf8_lossy(&data).into_owned()
    })
}

async fn join_drain(task: JoinHandle<String>) -> String {
    let abort = task.abort_handle();
    match tokio::time::timeout(OUTPUT_DRAIN_GRACE, task).await {
        Ok(Ok(text)) => text,
        Ok(Err(err)) => {
            debug!(error = %err, "output reader task failed");
            String::new()
        }
        Err(_) => {
            abort.abort();
            warn!("output stream still open after process exit; dropping it");
            String::new()
        }
    }
}
