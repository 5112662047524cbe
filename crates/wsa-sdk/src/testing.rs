//! Scripted stand-ins for the OS collaborators.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    io::{self, Cursor},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    adb::Adb,
    devices::{DeviceType, KnownDevice},
    endpoint::Endpoint,
    environment::{Environment, OsPlatform, OsVersion},
    error::{AdbErrorKind, AdbFailure, Result},
    packages::PackageInfo,
    process::{OutputStream, ProcessHandle, ProcessRunner, ProcessSpec},
    service::{ServiceControl, ServiceStatus},
};

#[derive(Clone, Debug, Default)]
pub(crate) struct ScriptedProcess {
    stdout: String,
    stderr: String,
    exit_code: Option<i32>,
}

impl ScriptedProcess {
    pub(crate) fn exits(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    pub(crate) fn fails(code: i32, stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: Some(code),
        }
    }

    pub(crate) fn times_out() -> Self {
        Self::default()
    }

    pub(crate) fn with_stdout(mut self, stdout: &str) -> Self {
        self.stdout = stdout.to_string();
        self
    }

    pub(crate) fn with_stderr(mut self, stderr: &str) -> Self {
        self.stderr = stderr.to_string();
        self
    }
}

enum Step {
    Process(ScriptedProcess),
    SpawnError,
}

#[derive(Default)]
pub(crate) struct FakeRunner {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<ProcessSpec>>,
    running: Mutex<HashSet<String>>,
    kills: Arc<AtomicUsize>,
}

impl FakeRunner {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn push(&self, process: ScriptedProcess) {
        self.steps
            .lock()
            .unwrap()
            .push_back(Step::Process(process));
    }

    pub(crate) fn push_spawn_error(&self) {
        self.steps.lock().unwrap().push_back(Step::SpawnError);
    }

    pub(crate) fn set_running(&self, name: &str) {
        self.running.lock().unwrap().insert(name.to_string());
    }

    pub(crate) fn calls(&self) -> Vec<ProcessSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn call_args(&self) -> Vec<Vec<String>> {
        self.calls().into_iter().map(|spec| spec.args).collect()
    }

    pub(crate) fn kill_count(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

struct FakeProcess {
    stdout: Option<String>,
    stderr: Option<String>,
    exit_code: Option<i32>,
    kills: Arc<AtomicUsize>,
}

fn stream(text: Option<String>) -> Option<OutputStream> {
    text.map(|text| Box::new(Cursor::new(text.into_bytes())) as OutputStream)
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(1)
    }

    fn take_stdout(&mut self) -> Option<OutputStream> {
        stream(self.stdout.take())
    }

    fn take_stderr(&mut self) -> Option<OutputStream> {
        stream(self.stderr.take())
    }

    async fn wait_for_exit(&mut self, _timeout: Duration) -> io::Result<Option<i32>> {
        Ok(self.exit_code)
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    fn start(&self, spec: &ProcessSpec) -> io::Result<Box<dyn ProcessHandle>> {
        self.calls.lock().unwrap().push(spec.clone());
        match self.steps.lock().unwrap().pop_front() {
            Some(Step::Process(process)) => Ok(Box::new(FakeProcess {
                stdout: Some(process.stdout),
                stderr: Some(process.stderr),
                exit_code: process.exit_code,
                kills: Arc::clone(&self.kills),
            })),
            Some(Step::SpawnError) => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "access denied",
            )),
            None => Err(io::Error::other(format!(
                "no scripted process for {}",
                spec.command_line()
            ))),
        }
    }

    async fn find_by_name(&self, name: &str) -> io::Result<Option<u32>> {
        Ok(self.running.lock().unwrap().contains(name).then_some(7))
    }
}

pub(crate) struct FakeEnvironment {
    pub(crate) vars: HashMap<String, String>,
    pub(crate) dirs: HashSet<PathBuf>,
    pub(crate) files: HashSet<PathBuf>,
    pub(crate) is_64bit_os: bool,
    pub(crate) is_64bit_process: bool,
    pub(crate) platform: OsPlatform,
    pub(crate) os_version: Option<OsVersion>,
}

impl Default for FakeEnvironment {
    fn default() -> Self {
        Self {
            vars: HashMap::new(),
            dirs: HashSet::new(),
            files: HashSet::new(),
            is_64bit_os: true,
            is_64bit_process: true,
            platform: OsPlatform::WindowsNt,
            os_version: Some(OsVersion {
                major: 10,
                minor: 0,
                build: 22621,
            }),
        }
    }
}

impl FakeEnvironment {
    pub(crate) fn with_var(mut self, name: &str, value: &str) -> Self {
        self.vars.insert(name.to_string(), value.to_string());
        self
    }

    pub(crate) fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dirs.insert(dir.into());
        self
    }

    pub(crate) fn with_files<I, S>(mut self, dir: impl AsRef<Path>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<Path>,
    {
        for name in names {
            self.files.insert(dir.as_ref().join(name));
        }
        self
    }
}

impl Environment for FakeEnvironment {
    fn var(&self, name: &str) -> String {
        self.vars.get(name).cloned().unwrap_or_default()
    }

    fn directory_exists(&self, path: &Path) -> bool {
        self.dirs.contains(path)
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.files.contains(path)
    }

    fn is_64bit_os(&self) -> bool {
        self.is_64bit_os
    }

    fn is_64bit_process(&self) -> bool {
        self.is_64bit_process
    }

    fn platform(&self) -> OsPlatform {
        self.platform
    }

    fn os_version(&self) -> Option<OsVersion> {
        self.os_version
    }
}

/// Bridge double for orchestrator tests: replays device lists and records mutations.
#[derive(Default)]
pub(crate) struct FakeAdb {
    lists: Mutex<VecDeque<Vec<KnownDevice>>>,
    last: Mutex<Vec<KnownDevice>>,
    calls: Mutex<Vec<String>>,
    list_calls: AtomicUsize,
    connect_refused: AtomicBool,
    installed: Mutex<Vec<PackageInfo>>,
}

impl FakeAdb {
    pub(crate) fn with_lists(lists: Vec<Vec<KnownDevice>>) -> Arc<Self> {
        let fake = Self::default();
        *fake.lists.lock().unwrap() = lists.into();
        Arc::new(fake)
    }

    pub(crate) fn install(&self, package: PackageInfo) {
        self.installed.lock().unwrap().push(package);
    }

    pub(crate) fn refuse_connect(&self) {
        self.connect_refused.store(true, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Adb for FakeAdb {
    fn is_installed(&self) -> bool {
        true
    }

    async fn install_package(&self, serial: &str, file_path: &str, _downgrade: bool) -> Result<()> {
        self.record(format!("install {serial} {file_path}"));
        Ok(())
    }

    async fn uninstall_package(&self, serial: &str, package: &str) -> Result<()> {
        self.record(format!("uninstall {serial} {package}"));
        Ok(())
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<()> {
        self.record(format!("connect {endpoint}"));
        if self.connect_refused.load(Ordering::SeqCst) {
            return Err(AdbFailure::new(
                AdbErrorKind::CommandFinishedWithInvalidOutput,
                format!("adb connect {endpoint}"),
                format!("cannot connect to {endpoint}"),
            )
            .into());
        }
        Ok(())
    }

    async fn disconnect(&self, endpoint: &Endpoint) -> Result<()> {
        self.record(format!("disconnect {endpoint}"));
        Ok(())
    }

    async fn list_devices(&self) -> Result<Vec<KnownDevice>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.record("list".to_string());
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.lists.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(last.clone())
    }

    async fn get_installed_packages(&self, serial: &str) -> Result<Vec<PackageInfo>> {
        self.record(format!("packages {serial}"));
        Ok(self.installed.lock().unwrap().clone())
    }

    async fn get_installed_package(
        &self,
        serial: &str,
        package: &str,
    ) -> Result<Option<PackageInfo>> {
        self.record(format!("package {serial} {package}"));
        Ok(self
            .installed
            .lock()
            .unwrap()
            .iter()
            .find(|info| info.package_name.eq_ignore_ascii_case(package))
            .cloned())
    }

    async fn launch_package(&self, serial: &str, package: &str) -> Result<()> {
        self.record(format!("launch {serial} {package}"));
        Ok(())
    }

    async fn execute_shell_command(&self, command: &str, args: &[String]) -> Result<String> {
        self.record(format!("shell {command} {}", args.join(" ")));
        Ok(String::new())
    }
}

pub(crate) struct FakeServiceControl {
    statuses: Mutex<VecDeque<ServiceStatus>>,
    running: AtomicBool,
    starts: AtomicUsize,
}

impl FakeServiceControl {
    /// `statuses` are returned by successive `status` calls; the last one repeats.
    pub(crate) fn new(running: bool, statuses: Vec<ServiceStatus>) -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(statuses.into()),
            running: AtomicBool::new(running),
            starts: AtomicUsize::new(0),
        })
    }

    pub(crate) fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceControl for FakeServiceControl {
    async fn status(&self, _service: &str) -> io::Result<ServiceStatus> {
        let mut statuses = self.statuses.lock().unwrap();
        let status = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().copied()
        };
        Ok(status.unwrap_or(ServiceStatus::Stopped))
    }

    async fn start(&self, _service: &str) -> io::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_subsystem_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub(crate) fn device(serial: &str, device_type: DeviceType, model: &str) -> KnownDevice {
    KnownDevice {
        serial_number: serial.to_string(),
        device_type,
        product_code: String::new(),
        model_number: model.to_string(),
        device_code: String::new(),
        transport_id: String::new(),
    }
}

pub(crate) fn package(name: &str) -> PackageInfo {
    PackageInfo {
        package_name: name.to_string(),
        display_name: String::new(),
        version_code: "1".to_string(),
        display_version: "1.0".to_string(),
        publisher: String::new(),
        display_icon: Vec::new(),
        install_date: chrono::NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
        capabilities: Vec::new(),
    }
}
