use std::{fmt, io, path::PathBuf};

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Discriminates every way a bridge command can fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AdbErrorKind {
    /// No platform-tools directory with a usable adb executable was found.
    AdbIsNotInstalled,
    /// The adb executable could not be started by the system.
    CannotStartAdb,
    /// adb ran but exited with a non-zero code.
    CommandFailed,
    /// adb exited cleanly but its output did not match what the command expects.
    CommandFinishedWithInvalidOutput,
    /// adb did not exit within the command timeout.
    CommandTimedOut,
}

impl AdbErrorKind {
    pub fn description(self) -> &'static str {
        match self {
            AdbErrorKind::AdbIsNotInstalled => {
                "Platform tools (which contain the adb executable) are not installed."
            }
            AdbErrorKind::CannotStartAdb => "Adb executable cannot be started by the system.",
            AdbErrorKind::CommandFailed => {
                "Adb command could be started but the exit code wasn't zero."
            }
            AdbErrorKind::CommandFinishedWithInvalidOutput => {
                "Adb command could be started and has finished but the output is invalid."
            }
            AdbErrorKind::CommandTimedOut => "Adb command has been started but timed out.",
        }
    }
}

impl fmt::Display for AdbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Error)]
#[error("{}", render_adb_failure(.kind, .command, .output))]
pub struct AdbFailure {
    kind: AdbErrorKind,
    command: Option<String>,
    output: String,
    #[source]
    source: Option<io::Error>,
}

impl AdbFailure {
    pub fn new(kind: AdbErrorKind, command: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            kind,
            command: Some(command.into()),
            output: output.into(),
            source: None,
        }
    }

    pub fn not_installed() -> Self {
        Self {
            kind: AdbErrorKind::AdbIsNotInstalled,
            command: None,
            output: String::new(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: io::Error) -> Self {
        self.source = Some(source);
        self
    }

    pub fn kind(&self) -> AdbErrorKind {
        self.kind
    }

    /// The command line that was attempted, if any command was started.
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    /// Combined stdout/stderr captured before the failure.
    pub fn output(&self) -> &str {
        &self.output
    }
}

fn render_adb_failure(kind: &AdbErrorKind, command: &Option<String>, output: &str) -> String {
    let mut message = kind.description().to_string();
    if let Some(command) = command {
        message.push_str("\nCommand: ");
        message.push_str(command);
    }
    let output = output.trim();
    if !output.is_empty() {
        message.push('\n');
        message.push_str(output);
    }
    message
}

/// Formats captured process output the way failure messages embed it.
pub fn format_command_output(stdout: &str, stderr: &str) -> String {
    let stdout = stdout.trim();
    let stderr = stderr.trim();
    let mut out = String::new();

    if !stdout.is_empty() {
        out.push_str("stdout:\n");
        out.push_str(stdout);
        out.push('\n');
    }
    if !stderr.is_empty() {
        out.push_str("stderr:\n");
        out.push_str(stderr);
        out.push('\n');
    }

    out
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServiceErrorKind {
    CannotStartService,
    /// The subsystem's adb port never became reachable. Usually developer mode is off.
    CannotConnectToService,
    CannotConnectToDevice,
}

impl ServiceErrorKind {
    pub fn description(self) -> &'static str {
        match self {
            ServiceErrorKind::CannotStartService => "Cannot start the WSA-service",
            ServiceErrorKind::CannotConnectToService => "Adb cannot connect to WSA-service",
            ServiceErrorKind::CannotConnectToDevice => "Adb cannot connect to the WSA device",
        }
    }
}

#[derive(Debug, Error)]
#[error("{}", .kind.description())]
pub struct ServiceFailure {
    kind: ServiceErrorKind,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ServiceFailure {
    pub fn new(kind: ServiceErrorKind) -> Self {
        Self { kind, source: None }
    }

    pub fn with_source(
        kind: ServiceErrorKind,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            kind,
            source: Some(source.into()),
        }
    }

    pub fn kind(&self) -> ServiceErrorKind {
        self.kind
    }
}

/// Raised when bridge output does not follow the shape the parsers expect.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid adb device line: '{0}'")]
    InvalidDeviceLine(String),
    #[error("Device type '{0}' is unknown!")]
    UnknownDeviceType(String),
    #[error("Failed to find key {key} in dump of {package} on device {serial}")]
    DumpKeyMissing {
        key: &'static str,
        package: String,
        serial: String,
    },
    #[error("Failed to find end of value for key {key} in dump of {package} on device {serial}")]
    DumpValueUnterminated {
        key: &'static str,
        package: String,
        serial: String,
    },
    #[error("Invalid value '{value}' for key {key} in dump of {package} on device {serial}")]
    InvalidDumpValue {
        key: &'static str,
        value: String,
        package: String,
        serial: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("Invalid endpoint '{0}' (expected host:port)")]
    InvalidEndpoint(String),
}

#[derive(Debug, Error)]
pub enum LauncherFailure {
    #[error("Windows Subsystem for Android is not installed")]
    NotInstalled,
    #[error("Windows Subsystem for Android is installed but {} doesn't exist", .0.display())]
    ClientMissing(PathBuf),
    #[error("failed to start wsa client")]
    CannotStart(#[source] io::Error),
    #[error("wsa client failed to execute command '{command}' (exit code {code})")]
    Exit { command: String, code: i32 },
    #[error("wsa client did not finish command '{command}' in time")]
    TimedOut { command: String },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Adb(#[from] AdbFailure),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Service(#[from] ServiceFailure),
    #[error(transparent)]
    Launcher(#[from] LauncherFailure),
}

impl Error {
    pub fn adb_kind(&self) -> Option<AdbErrorKind> {
        match self {
            Error::Adb(failure) => Some(failure.kind()),
            _ => None,
        }
    }

    pub fn service_kind(&self) -> Option<ServiceErrorKind> {
        match self {
            Error::Service(failure) => Some(failure.kind()),
            _ => None,
        }
    }
}
