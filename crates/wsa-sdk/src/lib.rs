//! Host-side SDK for the Windows Subsystem for Android: an adb bridge client, the
//! subsystem's helper client and a readiness orchestrator.

use std::sync::Arc;

pub mod adb;
pub mod config;
pub mod devices;
pub mod endpoint;
pub mod environment;
pub mod error;
pub mod launcher;
pub mod package_manager;
pub mod packages;
pub mod process;
pub mod service;
pub mod subsystem;

#[cfg(test)]
mod testing;

pub use adb::{Adb, AdbClient, AdbLocation, ExecuteOptions, PlatformTools};
pub use config::SdkConfig;
pub use devices::{DeviceType, KnownDevice};
pub use endpoint::Endpoint;
pub use environment::{Environment, SystemEnvironment};
pub use error::{
    AdbErrorKind, AdbFailure, Error, LauncherFailure, ParseError, Result, ServiceErrorKind,
    ServiceFailure,
};
pub use launcher::WsaLauncher;
pub use package_manager::{AdbPackageManager, PackageManager};
pub use packages::PackageInfo;
pub use process::{ProcessRunner, TokioProcessRunner};
pub use service::{ScServiceControl, ServiceControl};
pub use subsystem::{Progress, ReadinessState, Subsystem, SubsystemSettings};

/// The OS-facing collaborators everything else is built on.
#[derive(Clone)]
pub struct Host {
    pub runner: Arc<dyn ProcessRunner>,
    pub environment: Arc<dyn Environment>,
    pub services: Arc<dyn ServiceControl>,
}

impl Host {
    pub fn system(config: &SdkConfig) -> Self {
        let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner);
        Self {
            services: Arc::new(ScServiceControl::new(
                runner.clone(),
                config.client_process_name.clone(),
            )),
            environment: Arc::new(SystemEnvironment),
            runner,
        }
    }
}

/// Fully wired SDK: bridge client, helper client, package manager and orchestrator.
pub struct Sdk {
    pub adb: Arc<AdbClient>,
    pub launcher: Arc<WsaLauncher>,
    pub packages: AdbPackageManager,
    pub subsystem: Subsystem,
}

impl Sdk {
    pub fn new(host: &Host, config: &SdkConfig) -> Self {
        let adb = AdbClient::new(host.runner.clone(), host.environment.clone())
            .with_command_timeout(config.command_timeout())
            .with_restart_on_timeout(config.restart_on_timeout);
        if let Some(path) = &config.adb_path {
            adb.set_path_to_adb(path);
        }
        let adb = Arc::new(adb);
        let launcher = Arc::new(WsaLauncher::new(
            host.runner.clone(),
            host.environment.clone(),
            config.package_family_name.clone(),
        ));
        let subsystem = Subsystem::new(
            adb.clone(),
            launcher.clone(),
            host.services.clone(),
            host.runner.clone(),
            host.environment.clone(),
            config.settings(),
        );

        Self {
            packages: AdbPackageManager::new(adb.clone()),
            adb,
            launcher,
            subsystem,
        }
    }

    pub fn system() -> Self {
        let config = SdkConfig::load();
        Self::new(&Host::system(&config), &config)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::testing::{FakeEnvironment, FakeRunner, FakeServiceControl, ScriptedProcess};

    #[tokio::test]
    async fn configured_adb_path_skips_discovery() {
        let runner = FakeRunner::new();
        runner.push(ScriptedProcess::exits("List of devices attached\n"));
        let host = Host {
            runner: runner.clone(),
            environment: Arc::new(FakeEnvironment::default()),
            services: FakeServiceControl::new(true, Vec::new()),
        };
        let config = SdkConfig {
            adb_path: Some(PathBuf::from("/opt/pt/adb")),
            ..SdkConfig::default()
        };

        let sdk = Sdk::new(&host, &config);

        assert!(sdk.adb.list_devices().await.unwrap().is_empty());
        assert_eq!(runner.calls()[0].program, PathBuf::from("/opt/pt/adb"));
        assert_eq!(sdk.subsystem.settings().endpoint.address(), "localhost:58526");
    }
}
