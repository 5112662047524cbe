//! The subsystem's own helper executable (`WsaClient.exe`), used to launch and remove apps
//! without going through the bridge.

use std::{
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tracing::{debug, info};

use crate::{
    environment::Environment,
    error::LauncherFailure,
    process::{run_to_completion, ProcessRunner, ProcessSpec},
};

pub const DEFAULT_PACKAGE_FAMILY_NAME: &str =
    "MicrosoftCorporationII.WindowsSubsystemForAndroid_8wekyb3d8bbwe";
pub const CLIENT_EXECUTABLE: &str = "WsaClient.exe";
pub const LAUNCHER_TIMEOUT: Duration = Duration::from_secs(60);

pub struct WsaLauncher {
    runner: Arc<dyn ProcessRunner>,
    environment: Arc<dyn Environment>,
    package_family_name: String,
    program_path: Mutex<Option<PathBuf>>,
    timeout: Duration,
}

impl WsaLauncher {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        environment: Arc<dyn Environment>,
        package_family_name: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            environment,
            package_family_name: package_family_name.into(),
            program_path: Mutex::new(None),
            timeout: LAUNCHER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn package_family_name(&self) -> &str {
        &self.package_family_name
    }

    /// `<LocalAppData>/Microsoft/WindowsApps/<family>/WsaClient.exe`, cached once found.
    pub fn program_path(&self) -> Result<PathBuf, LauncherFailure> {
        let mut cached = self
            .program_path
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(path) = cached.as_ref() {
            return Ok(path.clone());
        }

        let family_dir = self
            .environment
            .local_app_data()
            .ok_or(LauncherFailure::NotInstalled)?
            .join("Microsoft")
            .join("WindowsApps")
            .join(&self.package_family_name);
        if !self.environment.directory_exists(&family_dir) {
            return Err(LauncherFailure::NotInstalled);
        }
        let program = family_dir.join(CLIENT_EXECUTABLE);
        if !self.environment.file_exists(&program) {
            return Err(LauncherFailure::ClientMissing(program));
        }

        *cached = Some(program.clone());
        Ok(program)
    }

    pub fn is_installed(&self) -> bool {
        self.program_path().is_ok()
    }

    pub async fn launch(&self, package: &str) -> Result<(), LauncherFailure> {
        self.run(&["/launch", &format!("wsa://{package}")]).await
    }

    pub async fn uninstall(&self, package: &str) -> Result<(), LauncherFailure> {
        self.run(&["/uninstall", package]).await
    }

    pub async fn launch_deep_link(&self, link: &str) -> Result<(), LauncherFailure> {
        self.run(&["/deeplink", link]).await
    }

    async fn run(&self, args: &[&str]) -> Result<(), LauncherFailure> {
        let program = self.program_path()?;
        let command = args.join(" ");
        let spec = ProcessSpec::new(program)
            .args(args.iter().copied())
            .capture_output();

        debug!(command = %spec.command_line(), "running wsa client");
        let handle = self
            .runner
            .start(&spec)
            .map_err(LauncherFailure::CannotStart)?;
        let output = run_to_completion(handle, self.timeout)
            .await
            .map_err(LauncherFailure::CannotStart)?;

        match output.exit_code {
            None => Err(LauncherFailure::TimedOut { command }),
            Some(0) => {
                info!(command = %command, "wsa client finished");
                Ok(())
            }
            Some(code) => Err(LauncherFailure::Exit { command, code }),
        }
    }
}
