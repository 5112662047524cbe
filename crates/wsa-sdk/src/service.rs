//! Background service control over `sc.exe`.

use std::{io, path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::debug;

use crate::process::{run_to_completion, CommandOutput, ProcessRunner, ProcessSpec};

const SC_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceStatus {
    Stopped,
    StartPending,
    StopPending,
    Running,
    ContinuePending,
    PausePending,
    Paused,
    Unknown,
}

impl ServiceStatus {
    /// Maps the numeric `STATE` reported by the service control manager.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => ServiceStatus::Stopped,
            2 => ServiceStatus::StartPending,
            3 => ServiceStatus::StopPending,
            4 => ServiceStatus::Running,
            5 => ServiceStatus::ContinuePending,
            6 => ServiceStatus::PausePending,
            7 => ServiceStatus::Paused,
            _ => ServiceStatus::Unknown,
        }
    }
}

#[async_trait]
pub trait ServiceControl: Send + Sync {
    async fn status(&self, service: &str) -> io::Result<ServiceStatus>;

    /// Requests a start; does not wait for the service to report `Running`.
    async fn start(&self, service: &str) -> io::Result<()>;

    /// Whether the subsystem runtime is currently up.
    async fn is_subsystem_running(&self) -> bool;
}

pub struct ScServiceControl {
    runner: Arc<dyn ProcessRunner>,
    client_process_name: String,
    timeout: Duration,
}

impl ScServiceControl {
    pub fn new(runner: Arc<dyn ProcessRunner>, client_process_name: impl Into<String>) -> Self {
        Self {
            runner,
            client_process_name: client_process_name.into(),
            timeout: SC_TIMEOUT,
        }
    }

    async fn sc(&self, args: &[&str]) -> io::Result<CommandOutput> {
        let spec = ProcessSpec::new(PathBuf::from("sc.exe"))
            .args(args.iter().copied())
            .capture_output();
        let handle = self.runner.start(&spec)?;
        let output = run_to_completion(handle, self.timeout).await?;
        if output.timed_out() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{} timed out", spec.command_line()),
            ));
        }
        Ok(output)
    }
}

#[async_trait]
impl ServiceControl for ScServiceControl {
    async fn status(&self, service: &str) -> io::Result<ServiceStatus> {
        let output = self.sc(&["query", service]).await?;
        if !output.success() {
            return Err(io::Error::other(format!(
                "sc query {service} failed\n{}",
                output.combined()
            )));
        }
        let status = parse_sc_state(&output.stdout).unwrap_or(ServiceStatus::Unknown);
        debug!(service, ?status, "queried service");
        Ok(status)
    }

    async fn start(&self, service: &str) -> io::Result<()> {
        let output = self.sc(&["start", service]).await?;
        if !output.success() {
            return Err(io::Error::other(format!(
                "sc start {service} failed\n{}",
                output.combined()
            )));
        }
        Ok(())
    }

    async fn is_subsystem_running(&self) -> bool {
        match self.runner.find_by_name(&self.client_process_name).await {
            Ok(pid) => pid.is_some(),
            Err(err) => {
                debug!(error = %err, process = %self.client_process_name, "process lookup failed");
                false
            }
        }
    }
}

/// Reads the `STATE : 4  RUNNING` line of `sc query` output.
pub(crate) fn parse_sc_state(output: &str) -> Option<ServiceStatus> {
    output.lines().find_map(|line| {
        let (label, value) = line.split_once(':')?;
        if label.trim() != "STATE" {
            return None;
        }
        let code = value.split_whitespace().next()?.parse::<u32>().ok()?;
        Some(ServiceStatus::from_code(code))
    })
}
