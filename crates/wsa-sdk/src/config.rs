use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    endpoint::Endpoint,
    launcher::DEFAULT_PACKAGE_FAMILY_NAME,
    subsystem::{
        SubsystemSettings, DEFAULT_CLIENT_PROCESS_NAME, DEFAULT_HOST, DEFAULT_MODEL_NUMBER,
        DEFAULT_PORT, DEFAULT_SERVICE_NAME,
    },
};

const CONFIG_FILE: &str = "config.json";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    /// Pins the adb executable instead of searching `PATH`.
    pub adb_path: Option<PathBuf>,
    pub host: String,
    pub port: u16,
    pub model_number: String,
    pub service_name: String,
    pub client_process_name: String,
    pub package_family_name: String,
    pub command_timeout_secs: u64,
    pub restart_on_timeout: bool,
    pub poll_interval_millis: u64,
    pub port_attempts: u32,
    pub service_start_timeout_secs: u64,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            adb_path: None,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            model_number: DEFAULT_MODEL_NUMBER.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            client_process_name: DEFAULT_CLIENT_PROCESS_NAME.to_string(),
            package_family_name: DEFAULT_PACKAGE_FAMILY_NAME.to_string(),
            command_timeout_secs: 10,
            restart_on_timeout: true,
            poll_interval_millis: 1000,
            port_attempts: 60,
            service_start_timeout_secs: 60,
        }
    }
}

impl SdkConfig {
    /// Defaults, overlaid by the state file, overlaid by the environment.
    pub fn load() -> Self {
        let mut cfg = Self::read_file(&config_path());
        cfg.apply_env(wsa_util::env_override);
        cfg
    }

    /// Reads a config file, keeping defaults when it is missing or malformed.
    pub fn read_file(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str::<SdkConfig>(&data) {
                Ok(cfg) => cfg,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to parse config");
                    Self::default()
                }
            },
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %err, "failed to read config");
                }
                Self::default()
            }
        }
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("WSA_ADB_PATH") {
            self.adb_path = Some(PathBuf::from(path));
        }
        if let Some(host) = lookup("WSA_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("WSA_PORT") {
            match port.parse() {
                Ok(port) => self.port = port,
                Err(err) => warn!(value = %port, error = %err, "ignoring invalid WSA_PORT"),
            }
        }
        if let Some(model) = lookup("WSA_MODEL_NUMBER") {
            self.model_number = model;
        }
        if let Some(service) = lookup("WSA_SERVICE_NAME") {
            self.service_name = service;
        }
        if lookup("WSA_ADB_NO_RESTART").is_some_and(|value| wsa_util::is_truthy(&value)) {
            self.restart_on_timeout = false;
        }
    }

    pub fn save(&self) -> io::Result<()> {
        wsa_util::write_json_atomic(&config_path(), self)
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.as_str(), self.port)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }

    pub fn settings(&self) -> SubsystemSettings {
        SubsystemSettings {
            endpoint: self.endpoint(),
            model_number: self.model_number.clone(),
            service_name: self.service_name.clone(),
            client_process_name: self.client_process_name.clone(),
            poll_interval: Duration::from_millis(self.poll_interval_millis),
            port_attempts: self.port_attempts.max(1),
            service_start_timeout: Duration::from_secs(self.service_start_timeout_secs),
        }
    }
}

pub fn config_path() -> PathBuf {
    wsa_util::state_file_path(CONFIG_FILE)
}
