use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OsPlatform {
    WindowsNt,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct OsVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
}

/// Host facts and filesystem probes the SDK depends on.
pub trait Environment: Send + Sync {
    /// Value of an environment variable, empty when unset.
    fn var(&self, name: &str) -> String;

    fn directory_exists(&self, path: &Path) -> bool;

    fn file_exists(&self, path: &Path) -> bool;

    fn is_64bit_os(&self) -> bool;

    fn is_64bit_process(&self) -> bool;

    fn platform(&self) -> OsPlatform;

    fn os_version(&self) -> Option<OsVersion>;

    fn local_app_data(&self) -> Option<PathBuf> {
        let value = self.var("LOCALAPPDATA");
        let value = value.trim();
        if value.is_empty() {
            None
        } else {
            Some(PathBuf::from(value))
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SystemEnvironment;

impl Environment for SystemEnvironment {
    fn var(&self, name: &str) -> String {
        std::env::var(name).unwrap_or_default()
    }

    fn directory_exists(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_64bit_os(&self) -> bool {
        if self.is_64bit_process() {
            return true;
        }
        // A 32-bit process on 64-bit Windows still sees the native architecture here.
        cfg!(windows) && !self.var("PROCESSOR_ARCHITEW6432").is_empty()
    }

    fn is_64bit_process(&self) -> bool {
        cfg!(target_pointer_width = "64")
    }

    fn platform(&self) -> OsPlatform {
        if cfg!(windows) {
            OsPlatform::WindowsNt
        } else {
            OsPlatform::Other
        }
    }

    fn os_version(&self) -> Option<OsVersion> {
        if !cfg!(windows) {
            return None;
        }
        let output = std::process::Command::new("cmd")
            .args(["/C", "ver"])
            .output()
            .ok()?;
        parse_windows_version(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parses the banner printed by `ver`, e.g. `Microsoft Windows [Version 10.0.22621.1702]`.
pub(crate) fn parse_windows_version(banner: &str) -> Option<OsVersion> {
    let start = banner.find("Version ")? + "Version ".len();
    let rest = &banner[start..];
    let end = rest.find(']').unwrap_or(rest.len());
    let mut parts = rest[..end].trim().split('.').map(|part| part.parse::<u32>());
    Some(OsVersion {
        major: parts.next()?.ok()?,
        minor: parts.next()?.ok()?,
        build: parts.next()?.ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ver_banner() {
        assert_eq!(
            parse_windows_version("\r\nMicrosoft Windows [Version 10.0.22621.1702]\r\n"),
            Some(OsVersion {
                major: 10,
                minor: 0,
                build: 22621
            })
        );
        assert_eq!(parse_windows_version("Linux"), None);
        assert_eq!(parse_windows_version("[Version 10.x.1]"), None);
    }

    #[test]
    fn versions_order_by_build() {
        let win10 = OsVersion {
            major: 10,
            minor: 0,
            build: 19045,
        };
        let win11 = OsVersion {
            major: 10,
            minor: 0,
            build: 22000,
        };
        assert!(win10 < win11);
    }
}
