//! Command-line flows built on the relocation service.

use std::sync::Arc;

use anyhow::Result;
use log::debug;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::elevation::Elevation;
use crate::error::{ErrorKind, RelocationError, RelocationResult};
use crate::gate::RootAccessGate;
use crate::layout::{PackagePaths, PlatformTier};
use crate::package::Location;
use crate::report::ResultReporter;
use crate::runtime::{RebootChoice, Runtime};
use crate::service::{Operation, RelocationService, ServiceEvent};

mod paths;

pub use paths::paths;

/// Interaction switches shared by the mutating commands.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowOptions {
    /// Skip confirmation prompts.
    pub yes: bool,
    /// Offer a reboot after a successful relocation.
    pub reboot_prompt: bool,
}

/// Print whether root can be obtained at all.
pub fn check_root(elevation: Arc<dyn Elevation>) -> bool {
    let gate = RootAccessGate::new(elevation);
    let available = gate.is_available();
    if available {
        println!("Root is available.");
    } else {
        println!("Root is not available on this device.");
    }
    available
}

/// Ask the elevation mechanism for root without touching the device.
pub async fn gain_root(elevation: Arc<dyn Elevation>) -> RelocationResult {
    let gate = RootAccessGate::new(elevation);
    gate.gain().await?;
    println!("Root access granted.");
    Ok(())
}

#[derive(Debug, Serialize)]
struct StatusReport<'a> {
    package: &'a str,
    source_path: &'a str,
    data_dir: &'a str,
    sdk: u32,
    tier: PlatformTier,
    location: Location,
    paths: PackagePaths,
}

/// Show which copies of the package exist.
#[tracing::instrument(skip(elevation, config))]
pub async fn status(elevation: Arc<dyn Elevation>, config: &Config, json: bool) -> Result<RelocationResult> {
    let (mut engine, _gate) = config.build_engine(elevation);
    let location = engine.probe_location().await;
    let paths = engine.paths();
    engine.shutdown().await;

    let location = match location {
        Ok(location) => location,
        Err(e) => return Ok(Err(e)),
    };

    let report = StatusReport {
        package: &config.package.package_id,
        source_path: &config.package.source_path,
        data_dir: &config.package.data_dir,
        sdk: config.sdk,
        tier: config.tier(),
        location,
        paths,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Package:        {}", report.package);
        println!("SDK level:      {} ({:?})", report.sdk, report.tier);
        println!("Location:       {:?}", report.location);
        println!("Loaded from:    {}", report.source_path);
        println!("System copy:    {}", report.paths.protected_path);
        println!("Data directory: {}", report.data_dir);
    }
    Ok(Ok(()))
}

fn confirmation_prompt(operation: Operation, config: &Config) -> Option<String> {
    let package = &config.package.package_id;
    match operation {
        Operation::InstallSystemApp { .. } => Some(format!(
            "Copy {} to the system partition?",
            package
        )),
        Operation::UninstallSystemApp { keep_user_app } => Some(format!(
            "Remove the system copy of {}{}?",
            package,
            if keep_user_app { " (keeping a user copy)" } else { "" }
        )),
        Operation::UninstallUserApp => Some(format!(
            "Remove the user copy of {}? Without a system copy this uninstalls it completely.",
            package
        )),
        Operation::ClearAppData => Some(format!(
            "Delete all data of {} in {}?",
            package, config.package.data_dir
        )),
        Operation::Reboot { soft: true } => Some("Restart the Android runtime now?".to_string()),
        Operation::Reboot { soft: false } => Some("Reboot the device now?".to_string()),
    }
}

/// Run one operation on a fresh service, report it, and offer a reboot.
#[tracing::instrument(skip(runtime, elevation, config, reporter))]
pub async fn run_operation<R: Runtime>(
    runtime: &R,
    elevation: Arc<dyn Elevation>,
    config: &Config,
    operation: Operation,
    options: FlowOptions,
    reporter: &dyn ResultReporter,
) -> Result<RelocationResult> {
    if let Some(prompt) = confirmation_prompt(operation, config)
        && !options.yes
        && !runtime.confirm(&prompt)?
    {
        println!("Cancelled.");
        return Ok(Ok(()));
    }

    let (engine, gate) = config.build_engine(elevation);
    let service = RelocationService::spawn(engine, gate);
    let mut events = service.subscribe();

    let result = match operation {
        Operation::Reboot { soft } => {
            service.reboot_device(soft);
            wait_for_reboot(&mut events, reporter).await
        }
        Operation::InstallSystemApp { overwrite } => {
            finish(operation, service.install_as_system_app(overwrite).await, reporter)
        }
        Operation::UninstallSystemApp { keep_user_app } => finish(
            operation,
            service.uninstall_system_app(keep_user_app).await,
            reporter,
        ),
        Operation::UninstallUserApp => {
            finish(operation, service.uninstall_user_app().await, reporter)
        }
        Operation::ClearAppData => finish(operation, service.clear_app_data().await, reporter),
    };

    let offer_reboot = result.is_ok()
        && options.reboot_prompt
        && !matches!(operation, Operation::Reboot { .. });
    if offer_reboot {
        let soft = match runtime.choose_reboot()? {
            RebootChoice::Soft => Some(true),
            RebootChoice::Full => Some(false),
            RebootChoice::Skip => None,
        };
        if let Some(soft) = soft {
            service.reboot_device(soft);
            let _ = wait_for_reboot(&mut events, reporter).await;
        }
    }

    service.shutdown().await;
    Ok(result)
}

fn finish(
    operation: Operation,
    result: RelocationResult,
    reporter: &dyn ResultReporter,
) -> RelocationResult {
    reporter.report(operation, &result);
    result
}

async fn wait_for_reboot(
    events: &mut broadcast::Receiver<ServiceEvent>,
    reporter: &dyn ResultReporter,
) -> RelocationResult {
    loop {
        match events.recv().await {
            Ok(ServiceEvent::RebootFailed { message }) => reporter.reboot_failed(&message),
            Ok(ServiceEvent::Finished {
                operation: operation @ Operation::Reboot { .. },
                result,
            }) => {
                if result.is_ok() {
                    reporter.report(operation, &result);
                }
                return result;
            }
            Ok(other) => debug!("ignoring {:?}", other),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("missed {} service events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => {
                return Err(RelocationError::new(
                    ErrorKind::IoFailure,
                    "The relocation worker stopped before rebooting.",
                ));
            }
        }
    }
}
