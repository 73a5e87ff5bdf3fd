//! The package being relocated and where its copies live.

use serde::Serialize;

use crate::error::RelocationError;
use crate::layout::DeviceLayout;

/// Which copies of the package exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Location {
    UserOnly,
    SystemOnly,
    Both,
    Neither,
}

impl Location {
    pub fn from_copies(user: bool, protected: bool) -> Self {
        match (user, protected) {
            (true, true) => Location::Both,
            (true, false) => Location::UserOnly,
            (false, true) => Location::SystemOnly,
            (false, false) => Location::Neither,
        }
    }

    pub fn has_user_copy(self) -> bool {
        matches!(self, Location::UserOnly | Location::Both)
    }

    pub fn has_protected_copy(self) -> bool {
        matches!(self, Location::SystemOnly | Location::Both)
    }
}

/// Facts about the package as reported by the operating environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationPackage {
    pub package_id: String,
    /// Path the package manager currently loads the package from.
    pub source_path: String,
    pub data_dir: String,
}

impl ApplicationPackage {
    pub fn new(
        package_id: impl Into<String>,
        source_path: impl Into<String>,
        data_dir: impl Into<String>,
    ) -> Self {
        Self {
            package_id: package_id.into(),
            source_path: source_path.into(),
            data_dir: data_dir.into(),
        }
    }

    /// The source path, validated to look like a file path.
    pub fn source_file(&self) -> Result<&str, RelocationError> {
        if self.source_path.is_empty() || !self.source_path.contains('/') {
            return Err(RelocationError::path_not_found(format!(
                "Unable to find the path to the APK. Is it already uninstalled? \
                 Did you remember to reboot after uninstalling? Current location appears to be {}.",
                self.source_path
            )));
        }
        Ok(&self.source_path)
    }

    /// Whether the package manager reported a path in the user location.
    /// Says nothing about whether that file is still there.
    pub fn loaded_from_user_location(&self, layout: &DeviceLayout) -> bool {
        layout.is_under_user_root(&self.source_path)
    }

    /// Directory holding the user copy when the tier uses per-app directories.
    pub fn source_directory(&self) -> Option<&str> {
        self.source_path
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .filter(|dir| !dir.is_empty())
    }
}
