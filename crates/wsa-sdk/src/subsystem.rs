//! Readiness orchestration: service start, port wait, device reconciliation.

use std::{
    error::Error as StdError,
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::{net::TcpStream, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    adb::Adb,
    devices::KnownDevice,
    endpoint::Endpoint,
    environment::{Environment, OsPlatform, OsVersion},
    error::{Result, ServiceErrorKind, ServiceFailure},
    launcher::WsaLauncher,
    process::{ProcessRunner, ProcessSpec},
    service::{ServiceControl, ServiceStatus},
};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 58526;
pub const DEFAULT_MODEL_NUMBER: &str = "Subsystem_for_Android_TM_";
pub const DEFAULT_SERVICE_NAME: &str = "WsaService";
pub const DEFAULT_CLIENT_PROCESS_NAME: &str = "WsaClient";

const MINIMUM_OS_VERSION: OsVersion = OsVersion {
    major: 10,
    minor: 0,
    build: 22000,
};
const PORT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const UNSUPPORTED_SYSTEM: &str =
    "Windows Subsystems for Android requires 64-bit system and Windows 11 or higher";
const NOT_INSTALLED: &str = "This system does not have WSA installed.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadinessState {
    NotRunning,
    ServiceStarting,
    PortWaiting,
    DeviceReconciling,
    Connected,
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReadinessState::NotRunning => "not-running",
            ReadinessState::ServiceStarting => "service-starting",
            ReadinessState::PortWaiting => "port-waiting",
            ReadinessState::DeviceReconciling => "device-reconciling",
            ReadinessState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Receives human-readable progress messages from `ensure_ready`.
pub trait Progress: Send + Sync {
    fn report(&self, message: &str);
}

impl<F> Progress for F
where
    F: Fn(&str) + Send + Sync,
{
    fn report(&self, message: &str) {
        self(message)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubsystemSettings {
    pub endpoint: Endpoint,
    pub model_number: String,
    pub service_name: String,
    pub client_process_name: String,
    pub poll_interval: Duration,
    pub port_attempts: u32,
    pub service_start_timeout: Duration,
}

impl Default for SubsystemSettings {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::new(DEFAULT_HOST, DEFAULT_PORT),
            model_number: DEFAULT_MODEL_NUMBER.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            client_process_name: DEFAULT_CLIENT_PROCESS_NAME.to_string(),
            poll_interval: Duration::from_secs(1),
            port_attempts: 60,
            service_start_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Reconcile {
    Connect,
    Reconnect,
    Wait,
    Done,
    GiveUp,
}

/// One step of the device reconciliation loop. `tried_to_connect` never resets, so a
/// device that is missing twice is a failure even if it was briefly seen in between.
fn next_action(device: Option<&KnownDevice>, tried_to_connect: bool) -> Reconcile {
    match device {
        None if tried_to_connect => Reconcile::GiveUp,
        None => Reconcile::Connect,
        Some(device) if device.is_offline() => Reconcile::Reconnect,
        Some(device) if device.is_device() => Reconcile::Done,
        Some(_) => Reconcile::Wait,
    }
}

fn find_device<'a>(devices: &'a [KnownDevice], model_number: &str) -> Option<&'a KnownDevice> {
    devices
        .iter()
        .find(|device| device.model_number.eq_ignore_ascii_case(model_number))
}

fn report(progress: Option<&dyn Progress>, message: &str) {
    if let Some(progress) = progress {
        progress.report(message);
    }
}

type BoxError = Box<dyn StdError + Send + Sync>;

pub struct Subsystem {
    adb: Arc<dyn Adb>,
    launcher: Arc<WsaLauncher>,
    services: Arc<dyn ServiceControl>,
    runner: Arc<dyn ProcessRunner>,
    environment: Arc<dyn Environment>,
    settings: SubsystemSettings,
    state: Mutex<ReadinessState>,
}

impl Subsystem {
    pub fn new(
        adb: Arc<dyn Adb>,
        launcher: Arc<WsaLauncher>,
        services: Arc<dyn ServiceControl>,
        runner: Arc<dyn ProcessRunner>,
        environment: Arc<dyn Environment>,
        settings: SubsystemSettings,
    ) -> Self {
        Self {
            adb,
            launcher,
            services,
            runner,
            environment,
            settings,
            state: Mutex::new(ReadinessState::NotRunning),
        }
    }

    pub fn settings(&self) -> &SubsystemSettings {
        &self.settings
    }

    pub fn state(&self) -> ReadinessState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: ReadinessState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = *state;
        if previous != next {
            info!(from = %previous, state = %next, "readiness state changed");
            *state = next;
        }
    }

    pub async fn is_running(&self) -> bool {
        self.services.is_subsystem_running().await
    }

    pub fn is_wsa_installed(&self) -> bool {
        self.launcher.is_installed()
    }

    /// Why this machine cannot host the subsystem, or `None` when it can.
    pub fn missing_capabilities(&self) -> Option<String> {
        let env = self.environment.as_ref();
        if !env.is_64bit_os() || !env.is_64bit_process() {
            return Some(UNSUPPORTED_SYSTEM.to_string());
        }
        if env.platform() != OsPlatform::WindowsNt {
            return Some(UNSUPPORTED_SYSTEM.to_string());
        }
        match env.os_version() {
            Some(version) if version >= MINIMUM_OS_VERSION => {}
            _ => return Some(UNSUPPORTED_SYSTEM.to_string()),
        }
        if !self.is_wsa_installed() {
            return Some(NOT_INSTALLED.to_string());
        }
        None
    }

    pub fn is_wsa_supported(&self) -> bool {
        self.missing_capabilities().is_none()
    }

    /// Brings the subsystem up and leaves its device connected to the bridge.
    ///
    /// Callers must not run two readiness sequences on the same instance at once.
    pub async fn ensure_ready(&self, progress: Option<&dyn Progress>) -> Result<()> {
        let result = self.run_ready_sequence(progress).await;
        if result.is_err() {
            self.set_state(ReadinessState::NotRunning);
        }
        result
    }

    async fn run_ready_sequence(&self, progress: Option<&dyn Progress>) -> Result<()> {
        if !self.is_running().await {
            report(progress, "Starting Windows Subsystem for Android...");
            self.set_state(ReadinessState::ServiceStarting);
            self.start_service().await?;
            self.set_state(ReadinessState::PortWaiting);
            self.wait_for_open_port().await?;
        }

        report(progress, "Connecting to Windows Subsystem for Android...");
        self.set_state(ReadinessState::DeviceReconciling);
        self.reconcile_device(progress).await?;
        self.adb.connect(&self.settings.endpoint).await?;
        self.set_state(ReadinessState::Connected);
        Ok(())
    }

    async fn reconcile_device(&self, progress: Option<&dyn Progress>) -> Result<()> {
        let endpoint = &self.settings.endpoint;
        let mut tried_to_connect = false;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            report(progress, "Querying connected devices...");
            let devices = self.adb.list_devices().await?;
            let device = find_device(&devices, &self.settings.model_number);
            let action = next_action(device, tried_to_connect);
            debug!(attempt, ?action, "reconciling subsystem device");

            match action {
                Reconcile::Done => break,
                Reconcile::GiveUp => {
                    return Err(ServiceFailure::new(ServiceErrorKind::CannotConnectToDevice).into());
                }
                Reconcile::Connect => {
                    tried_to_connect = true;
                    report(progress, "Connecting to wsa device...");
                    self.adb.connect(endpoint).await?;
                }
                Reconcile::Reconnect => {
                    report(progress, "Reconnecting to wsa device...");
                    self.adb.disconnect(endpoint).await?;
                    self.adb.connect(endpoint).await?;
                }
                Reconcile::Wait => {}
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }

        report(progress, "Connected to wsa device");
        Ok(())
    }

    async fn wait_for_open_port(&self) -> Result<()> {
        let endpoint = &self.settings.endpoint;
        for attempt in 1..=self.settings.port_attempts {
            let connect = TcpStream::connect((endpoint.host(), endpoint.port()));
            match tokio::time::timeout(PORT_CONNECT_TIMEOUT, connect).await {
                Ok(Ok(_)) => {
                    debug!(attempt, endpoint = %endpoint, "subsystem port is open");
                    return Ok(());
                }
                Ok(Err(err)) => debug!(attempt, error = %err, "subsystem port not open yet"),
                Err(_) => debug!(attempt, "subsystem port connect timed out"),
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
        warn!(endpoint = %endpoint, "subsystem port never opened");
        Err(ServiceFailure::new(ServiceErrorKind::CannotConnectToService).into())
    }

    /// Starts the background service if needed and makes sure the client process runs.
    pub async fn start_service(&self) -> Result<()> {
        self.try_start_service().await.map_err(|err| {
            warn!(error = %err, "failed to start subsystem service");
            ServiceFailure::with_source(ServiceErrorKind::CannotStartService, err).into()
        })
    }

    async fn try_start_service(&self) -> Result<(), BoxError> {
        let service = &self.settings.service_name;
        if self.services.status(service).await? != ServiceStatus::Running {
            info!(service = %service, "starting service");
            self.services.start(service).await?;
            self.wait_for_service(ServiceStatus::Running).await?;
        }
        self.ensure_client_running().await
    }

    async fn wait_for_service(&self, target: ServiceStatus) -> Result<(), BoxError> {
        let service = &self.settings.service_name;
        let deadline = Instant::now() + self.settings.service_start_timeout;
        loop {
            let status = self.services.status(service).await?;
            if status == target {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(format!(
                    "Service {service} failed to transition to target status {target:?} (last {status:?})"
                )
                .into());
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    async fn ensure_client_running(&self) -> Result<(), BoxError> {
        let name = &self.settings.client_process_name;
        if self.runner.find_by_name(name).await?.is_some() {
            return Ok(());
        }
        let program = self.launcher.program_path()?;
        info!(program = %program.display(), "starting wsa client");
        let handle = self.runner.start(&ProcessSpec::new(program).detached())?;
        drop(handle);
        Ok(())
    }

    /// Serial number of the subsystem device. Never reconnects.
    pub async fn device_id(&self) -> Result<String> {
        let devices = self.adb.list_devices().await?;
        find_device(&devices, &self.settings.model_number)
            .map(|device| device.serial_number.clone())
            .ok_or_else(|| ServiceFailure::new(ServiceErrorKind::CannotConnectToDevice).into())
    }
}
