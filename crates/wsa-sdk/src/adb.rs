use std::{
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{
    devices::{parse_device_list, KnownDevice},
    endpoint::Endpoint,
    environment::Environment,
    error::{AdbErrorKind, AdbFailure, Result},
    packages::{parse_package_dump, parse_package_list, PackageInfo},
    process::{run_to_completion, ProcessRunner, ProcessSpec},
};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
pub const LIST_DEVICES_HEADER: &str = "List of devices attached";

/// The files that identify a platform-tools directory on this host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlatformTools {
    pub executable: &'static str,
    pub library: &'static str,
    pub companion: &'static str,
    pub path_separator: char,
}

impl PlatformTools {
    pub const WINDOWS: PlatformTools = PlatformTools {
        executable: "adb.exe",
        library: "AdbWinApi.dll",
        companion: "fastboot.exe",
        path_separator: ';',
    };

    pub const UNIX: PlatformTools = PlatformTools {
        executable: "adb",
        library: "source.properties",
        companion: "fastboot",
        path_separator: ':',
    };

    pub fn host() -> Self {
        if cfg!(windows) {
            Self::WINDOWS
        } else {
            Self::UNIX
        }
    }

    fn artifacts(&self) -> [&'static str; 3] {
        [self.executable, self.library, self.companion]
    }
}

/// Where the adb executable lives, as far as this client knows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdbLocation {
    Unresolved,
    Missing,
    Found(PathBuf),
}

/// Scans the `PATH` entries in order for the first platform-tools directory.
pub fn find_platform_tools(environment: &dyn Environment, tools: &PlatformTools) -> Option<PathBuf> {
    environment
        .var("PATH")
        .split(tools.path_separator)
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(PathBuf::from)
        .filter(|dir| environment.directory_exists(dir))
        .find(|dir| {
            tools
                .artifacts()
                .iter()
                .all(|name| environment.file_exists(&dir.join(name)))
        })
        .map(|dir| dir.join(tools.executable))
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    must_include: Option<String>,
    must_not_include: Option<String>,
    restart_on_timeout: Option<bool>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with `CommandFinishedWithInvalidOutput` unless stdout contains `text`
    /// (case-insensitive).
    pub fn must_include(mut self, text: impl Into<String>) -> Self {
        self.must_include = Some(text.into());
        self
    }

    /// Fail with `CommandFinishedWithInvalidOutput` if stdout contains `text`
    /// (case-insensitive).
    pub fn must_not_include(mut self, text: impl Into<String>) -> Self {
        self.must_not_include = Some(text.into());
        self
    }

    pub fn restart_on_timeout(mut self, enabled: bool) -> Self {
        self.restart_on_timeout = Some(enabled);
        self
    }
}

/// Operations the bridge exposes to applications.
#[async_trait]
pub trait Adb: Send + Sync {
    fn is_installed(&self) -> bool;

    async fn install_package(&self, serial: &str, file_path: &str, allow_downgrade: bool)
        -> Result<()>;

    async fn uninstall_package(&self, serial: &str, package: &str) -> Result<()>;

    async fn connect(&self, endpoint: &Endpoint) -> Result<()>;

    async fn disconnect(&self, endpoint: &Endpoint) -> Result<()>;

    async fn list_devices(&self) -> Result<Vec<KnownDevice>>;

    async fn get_installed_packages(&self, serial: &str) -> Result<Vec<PackageInfo>>;

    /// `Ok(None)` when the device does not know the package.
    async fn get_installed_package(&self, serial: &str, package: &str)
        -> Result<Option<PackageInfo>>;

    async fn launch_package(&self, serial: &str, package: &str) -> Result<()>;

    async fn execute_shell_command(&self, command: &str, args: &[String]) -> Result<String>;
}

pub struct AdbClient {
    runner: Arc<dyn ProcessRunner>,
    environment: Arc<dyn Environment>,
    tools: PlatformTools,
    location: Mutex<AdbLocation>,
    command_timeout: Duration,
    restart_on_timeout: bool,
}

impl AdbClient {
    pub fn new(runner: Arc<dyn ProcessRunner>, environment: Arc<dyn Environment>) -> Self {
        Self {
            runner,
            environment,
            tools: PlatformTools::host(),
            location: Mutex::new(AdbLocation::Unresolved),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            restart_on_timeout: true,
        }
    }

    pub fn with_platform_tools(mut self, tools: PlatformTools) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Default restart policy for commands that do not set one explicitly.
    pub fn with_restart_on_timeout(mut self, enabled: bool) -> Self {
        self.restart_on_timeout = enabled;
        self
    }

    pub fn location(&self) -> AdbLocation {
        self.location
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pins the adb executable, skipping `PATH` discovery.
    pub fn set_path_to_adb(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut location = self.location.lock().unwrap_or_else(PoisonError::into_inner);
        *location = if path.as_os_str().is_empty() {
            AdbLocation::Missing
        } else {
            AdbLocation::Found(path)
        };
    }

    /// Resolved adb path, running discovery once if nothing is known yet.
    pub fn path_to_adb(&self) -> Option<PathBuf> {
        let mut location = self.location.lock().unwrap_or_else(PoisonError::into_inner);
        if *location == AdbLocation::Unresolved {
            *location = match find_platform_tools(self.environment.as_ref(), &self.tools) {
                Some(path) => {
                    info!(adb = %path.display(), "found platform tools");
                    AdbLocation::Found(path)
                }
                None => {
                    warn!("no platform-tools directory found on PATH");
                    AdbLocation::Missing
                }
            };
        }
        match &*location {
            AdbLocation::Found(path) => Some(path.clone()),
            _ => None,
        }
    }

    /// Runs `adb <args>` and returns its stdout. A timeout triggers one server restart and a
    /// single retry unless the restart policy is off.
    pub async fn execute_command(
        &self,
        args: &[&str],
        options: &ExecuteOptions,
    ) -> Result<String, AdbFailure> {
        let restart = options
            .restart_on_timeout
            .unwrap_or(self.restart_on_timeout);
        match self.run_command(args, options).await {
            Err(failure) if restart && failure.kind() == AdbErrorKind::CommandTimedOut => {
                warn!(
                    command = failure.command().unwrap_or_default(),
                    "adb command timed out; restarting adb server and retrying once"
                );
                self.restart_server().await?;
                self.run_command(args, options).await
            }
            result => result,
        }
    }

    pub async fn kill_server(&self) -> Result<(), AdbFailure> {
        self.run_server_command("kill-server").await
    }

    pub async fn start_server(&self) -> Result<(), AdbFailure> {
        self.run_server_command("start-server").await
    }

    pub async fn restart_server(&self) -> Result<(), AdbFailure> {
        self.kill_server().await?;
        self.start_server().await
    }

    async fn run_server_command(&self, subcommand: &str) -> Result<(), AdbFailure> {
        let options = ExecuteOptions::new().restart_on_timeout(false);
        match self.run_command(&[subcommand], &options).await {
            Ok(_) => Ok(()),
            Err(failure) if failure.kind() == AdbErrorKind::CommandFailed => {
                // kill-server exits non-zero when no server was running
                debug!(subcommand, output = failure.output(), "adb server command failed");
                Ok(())
            }
            Err(failure) => Err(failure),
        }
    }

    async fn run_command(
        &self,
        args: &[&str],
        options: &ExecuteOptions,
    ) -> Result<String, AdbFailure> {
        let adb = self.path_to_adb().ok_or_else(AdbFailure::not_installed)?;
        let args: Vec<&str> = args.iter().copied().filter(|arg| !arg.is_empty()).collect();
        let command = format!("adb {}", args.join(" "));
        let spec = ProcessSpec::new(adb).args(args.iter().copied()).capture_output();

        debug!(command = %command, "running adb");
        let handle = self.runner.start(&spec).map_err(|err| {
            AdbFailure::new(AdbErrorKind::CannotStartAdb, &command, "").with_source(err)
        })?;
        let output = run_to_completion(handle, self.command_timeout)
            .await
            .map_err(|err| {
                AdbFailure::new(AdbErrorKind::CommandFailed, &command, "").with_source(err)
            })?;
        debug!(
            command = %command,
            exit_code = ?output.exit_code,
            elapsed_ms = output.elapsed.as_millis() as u64,
            "adb finished"
        );

        let Some(exit_code) = output.exit_code else {
            return Err(AdbFailure::new(
                AdbErrorKind::CommandTimedOut,
                command,
                output.combined(),
            ));
        };
        if exit_code != 0 {
            return Err(AdbFailure::new(
                AdbErrorKind::CommandFailed,
                command,
                output.combined(),
            ));
        }
        if let Some(expected) = options.must_include.as_deref() {
            if !contains_ignore_case(&output.stdout, expected) {
                return Err(AdbFailure::new(
                    AdbErrorKind::CommandFinishedWithInvalidOutput,
                    command,
                    output.combined(),
                ));
            }
        }
        if let Some(forbidden) = options.must_not_include.as_deref() {
            if contains_ignore_case(&output.stdout, forbidden) {
                return Err(AdbFailure::new(
                    AdbErrorKind::CommandFinishedWithInvalidOutput,
                    command,
                    output.combined(),
                ));
            }
        }

        Ok(output.stdout)
    }

    async fn package_dump(&self, serial: &str, package: &str) -> Result<String, AdbFailure> {
        self.execute_command(
            &["-s", serial, "shell", "dumpsys", "package", package],
            &ExecuteOptions::new().must_not_include(format!("Unable to find package: {package}")),
        )
        .await
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[async_trait]
impl Adb for AdbClient {
    fn is_installed(&self) -> bool {
        self.path_to_adb().is_some()
    }

    async fn install_package(
        &self,
        serial: &str,
        file_path: &str,
        allow_downgrade: bool,
    ) -> Result<()> {
        let downgrade = if allow_downgrade { "-d" } else { "" };
        self.execute_command(
            &["-s", serial, "install", file_path, downgrade],
            &ExecuteOptions::new().must_include("Success"),
        )
        .await?;
        info!(serial, file_path, "installed package");
        Ok(())
    }

    async fn uninstall_package(&self, serial: &str, package: &str) -> Result<()> {
        self.execute_command(
            &["-s", serial, "uninstall", package],
            &ExecuteOptions::new().must_include("Success"),
        )
        .await?;
        info!(serial, package, "uninstalled package");
        Ok(())
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<()> {
        let address = endpoint.address();
        self.execute_command(
            &["connect", &address],
            &ExecuteOptions::new().must_not_include(format!("cannot connect to {address}")),
        )
        .await?;
        Ok(())
    }

    async fn disconnect(&self, endpoint: &Endpoint) -> Result<()> {
        let address = endpoint.address();
        self.execute_command(
            &["disconnect", &address],
            &ExecuteOptions::new().must_include(format!("disconnected {address}")),
        )
        .await?;
        Ok(())
    }

    async fn list_devices(&self) -> Result<Vec<KnownDevice>> {
        let output = self
            .execute_command(
                &["devices", "-l"],
                &ExecuteOptions::new().must_include(LIST_DEVICES_HEADER),
            )
            .await?;
        Ok(parse_device_list(&output)?)
    }

    async fn get_installed_packages(&self, serial: &str) -> Result<Vec<PackageInfo>> {
        let output = self
            .execute_command(
                &["-s", serial, "shell", "pm", "list", "packages", "-3"],
                &ExecuteOptions::new(),
            )
            .await?;

        let names = parse_package_list(&output);
        let mut packages = Vec::with_capacity(names.len());
        for name in names {
            let dump = self.package_dump(serial, &name).await?;
            packages.push(parse_package_dump(serial, &name, &dump)?);
        }
        Ok(packages)
    }

    async fn get_installed_package(
        &self,
        serial: &str,
        package: &str,
    ) -> Result<Option<PackageInfo>> {
        let dump = match self.package_dump(serial, package).await {
            Ok(dump) => dump,
            Err(failure) if failure.kind() == AdbErrorKind::CommandFinishedWithInvalidOutput => {
                debug!(serial, package, "package not installed");
                return Ok(None);
            }
            Err(failure) => return Err(failure.into()),
        };
        Ok(Some(parse_package_dump(serial, package, &dump)?))
    }

    async fn launch_package(&self, serial: &str, package: &str) -> Result<()> {
        self.execute_command(
            &["-s", serial, "shell", "monkey", "-p", package, "1"],
            &ExecuteOptions::new().must_include("Events injected: 1"),
        )
        .await?;
        Ok(())
    }

    async fn execute_shell_command(&self, command: &str, args: &[String]) -> Result<String> {
        let mut full: Vec<&str> = vec!["shell", command];
        full.extend(args.iter().map(String::as_str));
        let output = self.execute_command(&full, &ExecuteOptions::new()).await?;
        Ok(output.trim().to_string())
    }
}
