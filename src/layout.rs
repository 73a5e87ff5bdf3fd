//! Device path layout per platform tier.
//!
//! Every version-dependent path decision lives here so the engine never
//! branches on an SDK number directly.

use serde::Serialize;

/// First SDK level that ships `/system/priv-app` (Android 4.3).
pub const PRIV_APP_MIN_SDK: u32 = 18;

/// First SDK level that installs user apps into per-app directories.
/// SDK 20 (4.4W) is grouped with Lollipop here.
pub const APP_SUBDIR_MIN_SDK: u32 = 20;

/// Historical storage layouts, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlatformTier {
    /// Flat `/system/app`, flat user copies.
    Legacy,
    /// Flat `/system/priv-app`, flat user copies.
    PrivApp,
    /// `/system/priv-app`, user copies in `<pkg>-1/base.apk`.
    PrivAppSubdir,
}

impl PlatformTier {
    pub fn from_sdk(sdk: u32) -> Self {
        if sdk < PRIV_APP_MIN_SDK {
            PlatformTier::Legacy
        } else if sdk < APP_SUBDIR_MIN_SDK {
            PlatformTier::PrivApp
        } else {
            PlatformTier::PrivAppSubdir
        }
    }
}

/// Resolved locations for one package on one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackagePaths {
    pub tier: PlatformTier,
    /// Protected copy, e.g. `/system/priv-app/com.example.app.apk`.
    pub protected_path: String,
    /// User copy prefix, e.g. `/data/app/com.example.app`.
    pub user_path_prefix: String,
    /// Whether a restored user copy needs its own directory.
    pub per_app_directory_required: bool,
}

impl PackagePaths {
    /// Where a restored user copy is written.
    pub fn restore_target(&self) -> String {
        if self.per_app_directory_required {
            format!("{}-1/base.apk", self.user_path_prefix)
        } else {
            format!("{}-1.apk", self.user_path_prefix)
        }
    }

    /// Directory to create before restoring, if the tier needs one.
    pub fn restore_directory(&self) -> Option<String> {
        self.per_app_directory_required
            .then(|| format!("{}-1", self.user_path_prefix))
    }
}

/// Root directories of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLayout {
    pub system_root: String,
    pub user_app_root: String,
}

impl Default for DeviceLayout {
    fn default() -> Self {
        Self {
            system_root: "/system".to_string(),
            user_app_root: "/data/app".to_string(),
        }
    }
}

impl DeviceLayout {
    /// Layout rooted somewhere else, for staging trees and tests.
    pub fn rooted_at(root: &str) -> Self {
        let root = root.trim_end_matches('/');
        Self {
            system_root: format!("{}/system", root),
            user_app_root: format!("{}/data/app", root),
        }
    }

    pub fn resolve(&self, tier: PlatformTier, package_id: &str) -> PackagePaths {
        let apps_dir = match tier {
            PlatformTier::Legacy => "app",
            PlatformTier::PrivApp | PlatformTier::PrivAppSubdir => "priv-app",
        };

        PackagePaths {
            tier,
            protected_path: format!("{}/{}/{}.apk", self.system_root, apps_dir, package_id),
            user_path_prefix: format!("{}/{}", self.user_app_root, package_id),
            per_app_directory_required: tier == PlatformTier::PrivAppSubdir,
        }
    }

    /// True if `path` lies strictly below the user app root. Paths with
    /// `..` segments are never below it.
    pub fn is_under_user_root(&self, path: &str) -> bool {
        path.strip_prefix(self.user_app_root.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .is_some_and(|rest| !rest.is_empty() && !rest.split('/').any(|s| s == ".."))
    }
}

/// Resolve paths on the standard device layout.
pub fn resolve(tier: PlatformTier, package_id: &str) -> PackagePaths {
    DeviceLayout::default().resolve(tier, package_id)
}
