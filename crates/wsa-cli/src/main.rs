use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;
use wsa_sdk::{Adb, Endpoint, PackageManager, Sdk, SdkConfig};

#[derive(Parser)]
#[command(name = "wsa", version, about = "Windows Subsystem for Android host tools")]
struct Cli {
    /// Use this adb executable instead of searching PATH
    #[arg(long, global = true)]
    adb: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List devices known to adb
    Devices,
    /// Connect adb to host:port
    Connect { endpoint: String },
    /// Disconnect adb from host:port
    Disconnect { endpoint: String },
    /// Install an APK
    Install {
        path: String,
        #[arg(long)]
        serial: Option<String>,
        #[arg(long)]
        allow_downgrade: bool,
    },
    /// Uninstall a package
    Uninstall {
        package: String,
        #[arg(long)]
        serial: Option<String>,
    },
    /// Launch a package through adb
    Launch {
        package: String,
        #[arg(long)]
        serial: Option<String>,
    },
    /// List third-party packages as JSON
    Packages {
        #[arg(long)]
        serial: Option<String>,
    },
    /// Show one package as JSON
    Package {
        package: String,
        #[arg(long)]
        serial: Option<String>,
    },
    /// Run a shell command on the device
    Shell {
        command: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Start the subsystem and connect its device
    EnsureReady,
    /// Print the subsystem device serial
    DeviceId,
    /// Check whether this machine can run the subsystem
    Supported,
    /// Start the subsystem service and client
    StartService,
    /// Restart the adb server
    RestartServer,
    /// Commands handled by the subsystem's own client
    Launcher {
        #[command(subcommand)]
        cmd: LauncherCmd,
    },
}

#[derive(Subcommand)]
enum LauncherCmd {
    /// Launch an installed app
    Launch { package: String },
    /// Remove an installed app
    Uninstall { package: String },
    /// Open a deep link
    Deeplink { link: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    wsa_util::init_tracing()?;
    let cli = Cli::parse();

    let mut config = SdkConfig::load();
    if let Some(adb) = cli.adb {
        config.adb_path = Some(adb);
    }
    debug!(?config, "loaded configuration");
    let sdk = Sdk::new(&wsa_sdk::Host::system(&config), &config);

    match cli.cmd {
        Cmd::Devices => {
            for device in sdk.adb.list_devices().await? {
                println!(
                    "{}\t{}\tmodel={}\tproduct={}\tdevice={}\ttransport_id={}",
                    device.serial_number,
                    device.device_type.as_str(),
                    device.model_number,
                    device.product_code,
                    device.device_code,
                    device.transport_id
                );
            }
        }
        Cmd::Connect { endpoint } => {
            let endpoint: Endpoint = endpoint.parse()?;
            sdk.adb.connect(&endpoint).await?;
            println!("connected={endpoint}");
        }
        Cmd::Disconnect { endpoint } => {
            let endpoint: Endpoint = endpoint.parse()?;
            sdk.adb.disconnect(&endpoint).await?;
            println!("disconnected={endpoint}");
        }
        Cmd::Install {
            path,
            serial,
            allow_downgrade,
        } => {
            let serial = resolve_serial(&sdk, serial).await?;
            sdk.adb.install_package(&serial, &path, allow_downgrade).await?;
            println!("installed={path}");
        }
        Cmd::Uninstall { package, serial } => {
            let serial = resolve_serial(&sdk, serial).await?;
            sdk.packages.uninstall_package(&serial, &package).await?;
            println!("uninstalled={package}");
        }
        Cmd::Launch { package, serial } => {
            let serial = resolve_serial(&sdk, serial).await?;
            sdk.packages.launch(&serial, &package).await?;
            println!("launched={package}");
        }
        Cmd::Packages { serial } => {
            let serial = resolve_serial(&sdk, serial).await?;
            let packages = sdk.packages.get_all_installed_packages(&serial).await?;
            println!("{}", serde_json::to_string_pretty(&packages)?);
        }
        Cmd::Package { package, serial } => {
            let serial = resolve_serial(&sdk, serial).await?;
            match sdk.packages.get_installed_package(&serial, &package).await? {
                Some(info) => println!("{}", serde_json::to_string_pretty(&info)?),
                None => {
                    eprintln!("{package} is not installed on {serial}");
                    std::process::exit(1);
                }
            }
        }
        Cmd::Shell { command, args } => {
            println!("{}", sdk.adb.execute_shell_command(&command, &args).await?);
        }
        Cmd::EnsureReady => {
            let progress = |message: &str| eprintln!("{message}");
            sdk.subsystem.ensure_ready(Some(&progress)).await?;
            println!("state={}", sdk.subsystem.state());
        }
        Cmd::DeviceId => {
            println!("{}", sdk.subsystem.device_id().await?);
        }
        Cmd::Supported => match sdk.subsystem.missing_capabilities() {
            None => println!("supported=true"),
            Some(reason) => {
                println!("supported=false\treason={reason}");
                std::process::exit(1);
            }
        },
        Cmd::StartService => {
            sdk.subsystem.start_service().await?;
            println!("running={}", sdk.subsystem.is_running().await);
        }
        Cmd::RestartServer => {
            sdk.adb.restart_server().await?;
            println!("restarted=true");
        }
        Cmd::Launcher { cmd } => match cmd {
            LauncherCmd::Launch { package } => {
                sdk.launcher.launch(&package).await?;
                println!("launched={package}");
            }
            LauncherCmd::Uninstall { package } => {
                sdk.launcher.uninstall(&package).await?;
                println!("uninstalled={package}");
            }
            LauncherCmd::Deeplink { link } => {
                sdk.launcher.launch_deep_link(&link).await?;
                println!("opened={link}");
            }
        },
    }

    Ok(())
}

/// Falls back to the subsystem device when no serial is given.
async fn resolve_serial(sdk: &Sdk, serial: Option<String>) -> wsa_sdk::Result<String> {
    match serial {
        Some(serial) => Ok(serial),
        None => sdk.subsystem.device_id().await,
    }
}
