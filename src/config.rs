//! Resolved configuration: CLI and environment inputs, with gaps filled from
//! the device (`getprop`, `pm`).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::debug;

use crate::command;
use crate::elevation::Elevation;
use crate::engine::{EngineSettings, RelocationEngine};
use crate::gate::RootAccessGate;
use crate::layout::{DeviceLayout, PlatformTier};
use crate::package::ApplicationPackage;
use crate::runtime::Runtime;
use crate::shell::{PollBudget, PrivilegedShell};

/// Raw inputs as given on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    pub package: Option<String>,
    pub source_path: Option<String>,
    pub data_dir: Option<String>,
    pub sdk: Option<u32>,
    pub su_binary: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    pub no_remount: bool,
    pub device_root: Option<String>,
    pub restore_owner: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub package: ApplicationPackage,
    pub sdk: u32,
    pub su_binary: String,
    pub budget: PollBudget,
    pub remount_system: bool,
    pub layout: DeviceLayout,
    /// `owner:group` of a user copy restored from the protected location.
    pub restore_owner: String,
}

impl Config {
    pub fn new<R: Runtime>(runtime: &R, options: ConfigOptions) -> Result<Self> {
        let package_id = require_package_id(options.package.as_deref())?;
        let data_root = data_root(runtime, options.device_root.as_deref());
        let layout = match options.device_root.as_deref() {
            Some(root) => DeviceLayout::rooted_at(root),
            None => DeviceLayout {
                system_root: env_or(runtime, "ANDROID_ROOT", "/system"),
                user_app_root: format!("{}/app", data_root),
            },
        };
        let sdk = resolve_sdk(runtime, options.sdk)?;

        let source_path = match options.source_path {
            Some(path) => path,
            None => query_source_path(runtime, &package_id)?,
        };
        let data_dir = options
            .data_dir
            .unwrap_or_else(|| format!("{}/data/{}", data_root, package_id));

        let mut budget = PollBudget::default();
        if let Some(ms) = options.poll_interval_ms {
            budget.interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = options.max_attempts {
            budget.max_attempts = attempts;
        }

        let config = Self {
            package: ApplicationPackage::new(package_id, source_path, data_dir),
            sdk,
            su_binary: options.su_binary.unwrap_or_else(|| "su".to_string()),
            budget,
            remount_system: !options.no_remount,
            layout,
            restore_owner: options
                .restore_owner
                .unwrap_or_else(|| command::SYSTEM_OWNER.to_string()),
        };
        debug!("Using config: {:?}", config);
        Ok(config)
    }

    pub fn tier(&self) -> PlatformTier {
        PlatformTier::from_sdk(self.sdk)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            layout: self.layout.clone(),
            tier: self.tier(),
            remount_system: self.remount_system,
            restore_owner: self.restore_owner.clone(),
        }
    }

    /// Wire the engine and the gate to one elevation mechanism.
    pub fn build_engine(&self, elevation: Arc<dyn Elevation>) -> (RelocationEngine, RootAccessGate) {
        let gate = RootAccessGate::new(elevation.clone());
        let shell = PrivilegedShell::new(elevation, self.budget);
        let engine = RelocationEngine::new(
            self.package.clone(),
            self.engine_settings(),
            shell,
            gate.clone(),
        );
        (engine, gate)
    }
}

pub fn layout_for(device_root: Option<&str>) -> DeviceLayout {
    device_root
        .map(DeviceLayout::rooted_at)
        .unwrap_or_default()
}

/// Package ids end up inside shell commands, so only the characters Android
/// allows in them are accepted.
pub fn require_package_id(package: Option<&str>) -> Result<String> {
    let Some(package) = package.map(str::trim).filter(|p| !p.is_empty()) else {
        bail!("No package given. Use --package or set SYSAPP_PACKAGE.");
    };

    let valid = package
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
        && !package.starts_with('.')
        && !package.ends_with('.')
        && !package.contains("..");
    if !valid {
        bail!("Invalid package name '{}'.", package);
    }
    Ok(package.to_string())
}

pub fn resolve_sdk<R: Runtime>(runtime: &R, sdk: Option<u32>) -> Result<u32> {
    if let Some(sdk) = sdk {
        return Ok(sdk);
    }
    let raw = runtime
        .command_output("getprop", &["ro.build.version.sdk".to_string()])
        .context("Failed to read the SDK level. Pass --sdk explicitly.")?;
    raw.trim()
        .parse()
        .with_context(|| format!("Unexpected SDK level '{}'", raw))
}

/// Ask the package manager where the package is loaded from.
pub fn query_source_path<R: Runtime>(runtime: &R, package_id: &str) -> Result<String> {
    let output = runtime
        .command_output("pm", &["path".to_string(), package_id.to_string()])
        .with_context(|| {
            format!(
                "Failed to locate {}. Pass --source-dir explicitly.",
                package_id
            )
        })?;

    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("package:"))
        .next()
        .map(str::to_string)
        .with_context(|| format!("{} is not installed", package_id))
}

fn env_or<R: Runtime>(runtime: &R, key: &str, default: &str) -> String {
    runtime
        .env_var(key)
        .ok()
        .map(|v| v.trim_end_matches('/').to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// `/data` unless the device moved it.
fn data_root<R: Runtime>(runtime: &R, device_root: Option<&str>) -> String {
    match device_root {
        Some(root) => format!("{}/data", root.trim_end_matches('/')),
        None => env_or(runtime, "ANDROID_DATA", "/data"),
    }
}
