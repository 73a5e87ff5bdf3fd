use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use sysapp::commands::{self, FlowOptions};
use sysapp::config::{Config, ConfigOptions, require_package_id, resolve_sdk};
use sysapp::elevation::{Elevation, SuElevation};
use sysapp::error::RelocationResult;
use sysapp::report::ConsoleReporter;
use sysapp::runtime::RealRuntime;
use sysapp::service::Operation;

/// sysapp - move an Android package between /data/app and the system partition
///
/// Runs on the device (for example from a terminal app or `adb shell`) and
/// uses `su` for every command that touches protected locations. Changes take
/// effect after a reboot.
///
/// Examples:
///   sysapp -p com.example.app status
///   sysapp -p com.example.app install
///   sysapp -p com.example.app uninstall-system
#[derive(Parser, Debug)]
#[command(author, version = env!("SYSAPP_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Package to relocate (also via SYSAPP_PACKAGE)
    #[arg(long, short = 'p', env = "SYSAPP_PACKAGE", global = true)]
    pub package: Option<String>,

    /// Path the package is loaded from (defaults to `pm path`)
    #[arg(
        long = "source-dir",
        env = "SYSAPP_SOURCE_DIR",
        value_name = "PATH",
        global = true
    )]
    pub source_dir: Option<String>,

    /// Data directory of the package (defaults to /data/data/<package>)
    #[arg(long = "data-dir", env = "SYSAPP_DATA_DIR", value_name = "PATH", global = true)]
    pub data_dir: Option<String>,

    /// Platform SDK level (defaults to ro.build.version.sdk)
    #[arg(long, env = "SYSAPP_SDK", global = true)]
    pub sdk: Option<u32>,

    /// su binary to elevate with
    #[arg(long = "su", env = "SYSAPP_SU", value_name = "PROGRAM", global = true)]
    pub su_binary: Option<String>,

    /// Milliseconds between completion checks of a privileged command
    #[arg(long = "poll-interval-ms", value_name = "MS", global = true)]
    pub poll_interval_ms: Option<u64>,

    /// Completion checks before a privileged command times out
    #[arg(long = "max-attempts", value_name = "N", global = true)]
    pub max_attempts: Option<u32>,

    /// Do not remount /system read-write around changes
    #[arg(long = "no-remount", global = true)]
    pub no_remount: bool,

    /// Treat PATH as the device root instead of /
    #[arg(long = "device-root", value_name = "PATH", global = true, hide = true)]
    pub device_root: Option<String>,

    /// Owner given to a restored user copy (defaults to system:system)
    #[arg(
        long = "restore-owner",
        env = "SYSAPP_RESTORE_OWNER",
        value_name = "OWNER:GROUP",
        global = true,
        hide = true
    )]
    pub restore_owner: Option<String>,

    /// Do not ask for confirmation
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Do not offer a reboot after a successful change
    #[arg(long = "no-reboot-prompt", global = true)]
    pub no_reboot_prompt: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Show which copies of the package exist
    Status(OutputArgs),

    /// Show where the package lives on this SDK level without touching the device
    Paths(OutputArgs),

    /// Check whether root is available and ask for it
    Root,

    /// Copy the user app to the system partition
    Install(InstallArgs),

    /// Remove the system copy, restoring a user copy unless told otherwise
    UninstallSystem(UninstallSystemArgs),

    /// Remove the user copy
    UninstallUser,

    /// Delete the package's data directory
    ClearData,

    /// Reboot the device
    Reboot(RebootArgs),
}

#[derive(clap::Args, Debug)]
pub struct OutputArgs {
    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args, Debug)]
pub struct InstallArgs {
    /// Replace an existing system copy
    #[arg(long)]
    pub overwrite: bool,
}

#[derive(clap::Args, Debug)]
pub struct UninstallSystemArgs {
    /// Do not restore a user copy when none is left
    #[arg(long = "discard-user-app")]
    pub discard_user_app: bool,
}

#[derive(clap::Args, Debug)]
pub struct RebootArgs {
    /// Only restart the Android runtime
    #[arg(long)]
    pub soft: bool,
}

impl Cli {
    fn config_options(&self) -> ConfigOptions {
        ConfigOptions {
            package: self.package.clone(),
            source_path: self.source_dir.clone(),
            data_dir: self.data_dir.clone(),
            sdk: self.sdk,
            su_binary: self.su_binary.clone(),
            poll_interval_ms: self.poll_interval_ms,
            max_attempts: self.max_attempts,
            no_remount: self.no_remount,
            device_root: self.device_root.clone(),
            restore_owner: self.restore_owner.clone(),
        }
    }

    fn su_binary(&self) -> &str {
        self.su_binary.as_deref().unwrap_or("su")
    }

    fn operation(&self) -> Option<Operation> {
        match &self.command {
            Commands::Install(args) => Some(Operation::InstallSystemApp {
                overwrite: args.overwrite,
            }),
            Commands::UninstallSystem(args) => Some(Operation::UninstallSystemApp {
                keep_user_app: !args.discard_user_app,
            }),
            Commands::UninstallUser => Some(Operation::UninstallUserApp),
            Commands::ClearData => Some(Operation::ClearAppData),
            Commands::Reboot(args) => Some(Operation::Reboot { soft: args.soft }),
            Commands::Status(_) | Commands::Paths(_) | Commands::Root => None,
        }
    }
}

fn exit_code(result: RelocationResult) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let runtime = RealRuntime;
    let elevation: Arc<dyn Elevation> = Arc::new(SuElevation::new(RealRuntime, cli.su_binary()));

    let code = match &cli.command {
        Commands::Paths(args) => {
            let package = require_package_id(cli.package.as_deref())?;
            let sdk = resolve_sdk(&runtime, cli.sdk)?;
            commands::paths(&package, sdk, cli.device_root.as_deref(), args.json)?;
            ExitCode::SUCCESS
        }
        Commands::Root => {
            if !commands::check_root(elevation.clone()) {
                return Ok(ExitCode::FAILURE);
            }
            let result = commands::gain_root(elevation).await;
            if let Err(e) = &result {
                eprintln!("{}", e);
            }
            exit_code(result)
        }
        Commands::Status(args) => {
            let config = Config::new(&runtime, cli.config_options())?;
            let result = commands::status(elevation, &config, args.json).await?;
            if let Err(e) = &result {
                eprintln!("{}", e);
            }
            exit_code(result)
        }
        _ => {
            let Some(operation) = cli.operation() else {
                return Ok(ExitCode::FAILURE);
            };
            let config = Config::new(&runtime, cli.config_options())?;
            let options = FlowOptions {
                yes: cli.yes,
                reboot_prompt: !cli.no_reboot_prompt,
            };
            let reporter = ConsoleReporter::stdio();
            let result = commands::run_operation(
                &runtime, elevation, &config, operation, options, &reporter,
            )
            .await?;
            exit_code(result)
        }
    };
    Ok(code)
}
