use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::Serialize;

pub const APP_DIR_NAME: &str = "wsa-sdk";

/// Reads `key` from the environment, ignoring unset and blank values.
pub fn env_override(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn data_dir() -> PathBuf {
    if let Some(dir) = env_override("WSA_SDK_DATA_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(local) = env_override("LOCALAPPDATA") {
        return PathBuf::from(local).join(APP_DIR_NAME);
    }
    if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".local/share").join(APP_DIR_NAME)
    } else {
        std::env::temp_dir().join(APP_DIR_NAME)
    }
}

pub fn state_dir() -> PathBuf {
    data_dir().join("state")
}

pub fn state_file_path(file_name: &str) -> PathBuf {
    state_dir().join(file_name)
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let data = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .with_writer(io::stderr)
        .init();
    Ok(())
}
