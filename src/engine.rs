//! Relocation engine: moves the package between the user and protected
//! locations through the privileged shell.
//!
//! Every top-level operation walks `Idle → Verifying → Mutating →
//! (RollingBack) → Done | Failed`. Ordering rules the operations keep:
//!
//! - verify before mutate: root and source checks happen before any command
//!   that changes the device;
//! - delete before overwrite: an existing protected copy is removed first, and
//!   nothing is copied when that removal fails;
//! - restore before destroy: the protected copy is only deleted once a user
//!   copy is known to exist, when one was asked for.

use log::{debug, info, warn};

use crate::command;
use crate::error::{RelocationError, RelocationResult};
use crate::gate::RootAccessGate;
use crate::layout::{DeviceLayout, PackagePaths, PlatformTier};
use crate::package::{ApplicationPackage, Location};
use crate::reboot::RebootCoordinator;
use crate::shell::PrivilegedShell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Idle,
    Verifying,
    Mutating,
    RollingBack,
    Done,
    Failed,
}

/// Device facts that stay fixed for the engine's lifetime.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub layout: DeviceLayout,
    pub tier: PlatformTier,
    /// Remount the system root read-write around protected mutations.
    pub remount_system: bool,
    /// `owner:group` given to a restored user copy.
    pub restore_owner: String,
}

impl EngineSettings {
    pub fn for_sdk(sdk: u32) -> Self {
        Self {
            layout: DeviceLayout::default(),
            tier: PlatformTier::from_sdk(sdk),
            remount_system: true,
            restore_owner: command::SYSTEM_OWNER.to_string(),
        }
    }
}

pub struct RelocationEngine {
    package: ApplicationPackage,
    settings: EngineSettings,
    shell: PrivilegedShell,
    gate: RootAccessGate,
    reboot: RebootCoordinator,
    state: OperationState,
    transitions: Vec<OperationState>,
}

impl RelocationEngine {
    pub fn new(
        package: ApplicationPackage,
        settings: EngineSettings,
        shell: PrivilegedShell,
        gate: RootAccessGate,
    ) -> Self {
        Self {
            package,
            settings,
            shell,
            gate,
            reboot: RebootCoordinator,
            state: OperationState::Idle,
            transitions: Vec::new(),
        }
    }

    pub fn package(&self) -> &ApplicationPackage {
        &self.package
    }

    pub fn paths(&self) -> PackagePaths {
        self.settings
            .layout
            .resolve(self.settings.tier, &self.package.package_id)
    }

    /// State after the last transition.
    pub fn state(&self) -> OperationState {
        self.state
    }

    /// States visited by the most recent top-level operation.
    pub fn transitions(&self) -> &[OperationState] {
        &self.transitions
    }

    fn enter(&mut self, next: OperationState) {
        debug!("relocation state {:?} -> {:?}", self.state, next);
        self.state = next;
        self.transitions.push(next);
    }

    fn begin(&mut self) {
        self.state = OperationState::Idle;
        self.transitions.clear();
        self.transitions.push(OperationState::Idle);
        self.enter(OperationState::Verifying);
    }

    fn finish(&mut self, result: &RelocationResult) {
        match result {
            Ok(()) => self.enter(OperationState::Done),
            Err(e) => {
                warn!("operation failed ({}): {}", e.kind, e.message);
                self.enter(OperationState::Failed);
            }
        }
    }

    async fn run(&mut self, command: &str) -> Result<bool, RelocationError> {
        Ok(self.shell.run(command).await?)
    }

    async fn exists(&mut self, path: &str) -> Result<bool, RelocationError> {
        self.run(&command::exists(path)).await
    }

    /// Whether the path the package manager reported still holds a user copy.
    async fn source_present(&mut self) -> Result<bool, RelocationError> {
        if !self.package.loaded_from_user_location(&self.settings.layout) {
            return Ok(false);
        }
        let source = self.package.source_path.clone();
        self.exists(&source).await
    }

    /// Whether any user copy exists now: the reported source, or an install
    /// under `<prefix>-*` such as one restored earlier. Asked of the device
    /// every time, since earlier operations may have changed the answer.
    async fn user_copy_exists(&mut self) -> Result<bool, RelocationError> {
        if self.source_present().await? {
            return Ok(true);
        }
        let prefix = self.paths().user_path_prefix;
        self.run(&command::exists_with_prefix(&prefix)).await
    }

    /// Run a command whose failure must not mask the operation's outcome.
    async fn run_best_effort(&mut self, command: &str) {
        match self.shell.run(command).await {
            Ok(true) => {}
            Ok(false) => debug!("best-effort `{}` failed, ignoring", command),
            Err(e) => debug!("best-effort `{}` errored, ignoring: {}", command, e),
        }
    }

    async fn remount_system(&mut self, writable: bool) {
        if self.settings.remount_system {
            let cmd = command::remount(&self.settings.layout.system_root, writable);
            self.run_best_effort(&cmd).await;
        }
    }

    /// Which copies of the package exist right now.
    #[tracing::instrument(skip(self))]
    pub async fn probe_location(&mut self) -> Result<Location, RelocationError> {
        let user = self.user_copy_exists().await?;
        let protected_path = self.paths().protected_path;
        let protected = self.exists(&protected_path).await?;
        Ok(Location::from_copies(user, protected))
    }

    /// Copy the user copy to the protected location.
    #[tracing::instrument(skip(self))]
    pub async fn install_to_protected(&mut self, overwrite: bool) -> RelocationResult {
        self.begin();
        let result = self.install_inner(overwrite).await;
        self.finish(&result);
        result
    }

    async fn install_inner(&mut self, overwrite: bool) -> RelocationResult {
        self.gate.gain().await?;

        let source = self.package.source_file()?.to_string();
        if !self.source_present().await? {
            return Err(RelocationError::path_not_found(
                "Only a system app is available but no user app.",
            ));
        }

        let destination = self.paths().protected_path;
        let destination_exists = self.exists(&destination).await?;
        if destination_exists && !overwrite {
            return Err(RelocationError::already_exists(format!(
                "The file {} already exists.",
                destination
            )));
        }

        self.enter(OperationState::Mutating);
        self.remount_system(true).await;
        let result = self
            .replace_protected(&source, &destination, destination_exists)
            .await;
        self.remount_system(false).await;
        result
    }

    async fn replace_protected(
        &mut self,
        source: &str,
        destination: &str,
        destination_exists: bool,
    ) -> RelocationResult {
        if destination_exists && !self.run(&command::delete(destination)).await? {
            return Err(RelocationError::command_failed(format!(
                "Unable to delete the file {}.",
                destination
            )));
        }

        info!("copying {} to {}", source, destination);
        if !self.run(&command::copy(source, destination, true)).await? {
            return Err(RelocationError::command_failed(format!(
                "Unable to copy the file {} to {}.",
                source, destination
            )));
        }
        Ok(())
    }

    /// Delete the protected copy, restoring a user copy first when asked to
    /// and none exists.
    #[tracing::instrument(skip(self))]
    pub async fn uninstall_from_protected(&mut self, keep_user_copy: bool) -> RelocationResult {
        self.begin();
        let result = self.uninstall_protected_inner(keep_user_copy).await;
        self.finish(&result);
        result
    }

    async fn uninstall_protected_inner(&mut self, keep_user_copy: bool) -> RelocationResult {
        let protected_path = self.paths().protected_path;
        if !self.exists(&protected_path).await? {
            info!("no copy at {}, nothing to uninstall", protected_path);
            return Ok(());
        }

        self.gate.gain().await?;

        self.enter(OperationState::Mutating);
        if keep_user_copy && !self.user_copy_exists().await? {
            // The protected copy is the only one left; it stays if this fails.
            self.restore_steps().await?;
        }

        info!("deleting {}", protected_path);
        self.remount_system(true).await;
        let deleted = self.run(&command::delete(&protected_path)).await;
        self.remount_system(false).await;

        if !deleted? {
            return Err(RelocationError::command_failed(format!(
                "Unable to delete the file {}.",
                protected_path
            )));
        }
        Ok(())
    }

    /// Copy the protected copy back to the user location.
    #[tracing::instrument(skip(self))]
    pub async fn restore_to_user(&mut self) -> RelocationResult {
        self.begin();
        let result = self.restore_inner().await;
        self.finish(&result);
        result
    }

    async fn restore_inner(&mut self) -> RelocationResult {
        let protected_path = self.paths().protected_path;
        if !self.exists(&protected_path).await? {
            return Err(RelocationError::path_not_found(
                "System app doesn't exist, nothing to do.",
            ));
        }
        self.gate.gain().await?;
        self.enter(OperationState::Mutating);
        self.restore_steps().await
    }

    async fn restore_steps(&mut self) -> RelocationResult {
        let paths = self.paths();
        let target = paths.restore_target();
        let owner = self.settings.restore_owner.clone();

        self.run_best_effort(&command::delete_with_prefix(&paths.user_path_prefix))
            .await;

        let mut steps = Vec::new();
        if let Some(dir) = paths.restore_directory() {
            steps.push(command::mkdir(&dir));
            steps.push(command::chmod(command::APP_DIR_MODE, &dir));
            steps.push(command::chown(&owner, &dir));
        }
        steps.push(command::copy(&paths.protected_path, &target, false));
        steps.push(command::chown(&owner, &target));

        info!("restoring {} to {}", paths.protected_path, target);
        let mut restored = true;
        let mut first_error = None;
        for step in &steps {
            match self.run(step).await {
                Ok(ok) => restored &= ok,
                Err(e) => {
                    restored = false;
                    first_error.get_or_insert(e);
                }
            }
        }

        if restored {
            return Ok(());
        }

        self.enter(OperationState::RollingBack);
        let leftover = paths.restore_directory().unwrap_or_else(|| target.clone());
        if !matches!(self.shell.run(&command::delete(&leftover)).await, Ok(true)) {
            warn!("could not clean up {} after failed restore", leftover);
        }

        Err(first_error.unwrap_or_else(|| {
            RelocationError::command_failed(format!(
                "Unable to copy the file {} to {}.",
                paths.protected_path, target
            ))
        }))
    }

    /// Remove the user copy, leaving any protected copy alone.
    #[tracing::instrument(skip(self))]
    pub async fn uninstall_user_copy(&mut self) -> RelocationResult {
        self.begin();
        let result = self.uninstall_user_inner().await;
        self.finish(&result);
        result
    }

    async fn uninstall_user_inner(&mut self) -> RelocationResult {
        self.gate.gain().await?;

        let (target, delete) = if self.source_present().await? {
            let source = self.package.source_file()?.to_string();
            let target = if self.paths().per_app_directory_required {
                self.package
                    .source_directory()
                    .map(str::to_string)
                    .unwrap_or_else(|| source.clone())
            } else {
                source
            };

            if !self.settings.layout.is_under_user_root(&target) {
                return Err(RelocationError::path_not_found(format!(
                    "Refusing to delete {}: it is not inside {}.",
                    target, self.settings.layout.user_app_root
                )));
            }
            let delete = command::delete(&target);
            (target, delete)
        } else {
            let prefix = self.paths().user_path_prefix;
            if !self.run(&command::exists_with_prefix(&prefix)).await? {
                return Err(RelocationError::path_not_found(
                    "User app doesn't exist, only system app is left.",
                ));
            }
            (format!("{}-*", prefix), command::delete_with_prefix(&prefix))
        };

        self.enter(OperationState::Mutating);
        info!("deleting user copy {}", target);
        if !self.run(&delete).await? {
            return Err(RelocationError::command_failed(format!(
                "Unable to delete the file {}.",
                target
            )));
        }
        Ok(())
    }

    /// Delete the package's data directory.
    #[tracing::instrument(skip(self))]
    pub async fn wipe_data(&mut self) -> RelocationResult {
        self.begin();
        let result = self.wipe_inner().await;
        self.finish(&result);
        result
    }

    async fn wipe_inner(&mut self) -> RelocationResult {
        self.gate.gain().await?;

        let data_dir = self.package.data_dir.clone();
        if !data_dir.contains(&self.package.package_id) {
            return Err(RelocationError::path_not_found(format!(
                "Refusing to delete {}: it does not belong to {}.",
                data_dir, self.package.package_id
            )));
        }

        self.enter(OperationState::Mutating);
        info!("deleting data directory {}", data_dir);
        if !self.run(&command::delete(&data_dir)).await? {
            return Err(RelocationError::command_failed(format!(
                "Unable to delete the directory {}.",
                data_dir
            )));
        }
        Ok(())
    }

    /// Restart the device so the package manager picks up the new layout.
    pub async fn reboot(&mut self, soft: bool) -> RelocationResult {
        self.reboot.reboot(&mut self.shell, soft).await
    }

    /// Close the privileged session.
    pub async fn shutdown(&mut self) {
        self.shell.release().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::shell::PollBudget;
    use crate::test_utils::{ScriptedElevation, Step};
    use std::sync::Arc;

    const PKG: &str = "com.example.app";
    const USER_APK: &str = "/data/app/com.example.app-1/base.apk";
    const PROTECTED: &str = "/system/priv-app/com.example.app.apk";
    /// Matches only the existence check of a protected copy.
    const PROTECTED_CHECK: &str = "test -e '/system";
    const USER_CHECK: &str = "ls -d";

    fn user_package() -> ApplicationPackage {
        ApplicationPackage::new(PKG, USER_APK, "/data/data/com.example.app")
    }

    fn system_only_package() -> ApplicationPackage {
        ApplicationPackage::new(PKG, PROTECTED, "/data/data/com.example.app")
    }

    fn engine_with(
        package: ApplicationPackage,
        sdk: u32,
        elevation: &Arc<ScriptedElevation>,
    ) -> RelocationEngine {
        let mut settings = EngineSettings::for_sdk(sdk);
        settings.remount_system = false;
        let shell = PrivilegedShell::new(elevation.clone(), PollBudget::default());
        let gate = RootAccessGate::new(elevation.clone());
        RelocationEngine::new(package, settings, shell, gate)
    }

    fn position(commands: &[String], needle: &str) -> Option<usize> {
        commands.iter().position(|c| c.contains(needle))
    }

    #[tokio::test]
    async fn install_copies_user_apk_to_protected_location() {
        let elevation = Arc::new(ScriptedElevation::new().on(PROTECTED_CHECK, Step::Exit(1)));
        let mut engine = engine_with(user_package(), 21, &elevation);

        engine.install_to_protected(false).await.unwrap();

        let copies: Vec<_> = elevation
            .commands()
            .into_iter()
            .filter(|c| c.starts_with("cp "))
            .collect();
        assert_eq!(
            copies,
            vec![format!("cp -fp '{}' '{}'", USER_APK, PROTECTED)]
        );
        assert_eq!(engine.state(), OperationState::Done);
        assert_eq!(
            engine.transitions(),
            &[
                OperationState::Idle,
                OperationState::Verifying,
                OperationState::Mutating,
                OperationState::Done
            ]
        );
    }

    #[tokio::test]
    async fn install_without_overwrite_refuses_existing_destination() {
        let elevation = Arc::new(ScriptedElevation::new().on("test -e", Step::Exit(0)));
        let mut engine = engine_with(user_package(), 21, &elevation);

        let err = engine.install_to_protected(false).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::AlreadyExists);
        assert_eq!(
            elevation.commands(),
            vec![
                format!("test -e '{}'", USER_APK),
                format!("test -e '{}'", PROTECTED)
            ]
        );
        assert_eq!(engine.state(), OperationState::Failed);
    }

    #[tokio::test]
    async fn install_overwrite_deletes_before_copying() {
        let elevation = Arc::new(ScriptedElevation::new().on("test -e", Step::Exit(0)));
        let mut engine = engine_with(user_package(), 21, &elevation);

        engine.install_to_protected(true).await.unwrap();

        let commands = elevation.commands();
        let delete = position(&commands, "rm -rf").unwrap();
        let copy = position(&commands, "cp -fp").unwrap();
        assert!(delete < copy);
    }

    #[tokio::test]
    async fn install_overwrite_with_failed_delete_never_copies() {
        let elevation = Arc::new(
            ScriptedElevation::new()
                .on("test -e", Step::Exit(0))
                .on("rm -rf", Step::Exit(1)),
        );
        let mut engine = engine_with(user_package(), 21, &elevation);

        let err = engine.install_to_protected(true).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::CommandFailed);
        assert_eq!(position(&elevation.commands(), "cp "), None);
    }

    #[tokio::test]
    async fn install_copy_failure_is_command_failed() {
        let elevation = Arc::new(
            ScriptedElevation::new()
                .on(PROTECTED_CHECK, Step::Exit(1))
                .on("cp ", Step::Exit(1)),
        );
        let mut engine = engine_with(user_package(), 21, &elevation);

        let err = engine.install_to_protected(false).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::CommandFailed);
        assert!(err.message.contains("Unable to copy"));
    }

    #[tokio::test]
    async fn install_needs_a_user_copy() {
        let elevation = Arc::new(ScriptedElevation::new());
        let mut engine = engine_with(system_only_package(), 21, &elevation);

        let err = engine.install_to_protected(true).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::PathNotFound);
        assert!(elevation.commands().is_empty());
    }

    #[tokio::test]
    async fn install_with_vanished_source_is_path_not_found() {
        let elevation = Arc::new(
            ScriptedElevation::new().on(&format!("test -e '{}'", USER_APK), Step::Exit(1)),
        );
        let mut engine = engine_with(user_package(), 21, &elevation);

        let err = engine.install_to_protected(false).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::PathNotFound);
        assert_eq!(elevation.commands(), vec![format!("test -e '{}'", USER_APK)]);
    }

    #[tokio::test]
    async fn install_without_root_is_access_denied() {
        let elevation = Arc::new(ScriptedElevation::new().without_access());
        let mut engine = engine_with(user_package(), 21, &elevation);

        let err = engine.install_to_protected(false).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AccessDenied);
        assert!(elevation.commands().is_empty());
        assert_eq!(
            engine.transitions(),
            &[
                OperationState::Idle,
                OperationState::Verifying,
                OperationState::Failed
            ]
        );
    }

    #[tokio::test]
    async fn install_remounts_system_around_mutation() {
        let elevation = Arc::new(ScriptedElevation::new().on(PROTECTED_CHECK, Step::Exit(1)));
        let mut settings = EngineSettings::for_sdk(19);
        settings.remount_system = true;
        let shell = PrivilegedShell::new(elevation.clone(), PollBudget::default());
        let mut engine = RelocationEngine::new(
            ApplicationPackage::new(PKG, "/data/app/com.example.app-1.apk", "/data/data/x"),
            settings,
            shell,
            RootAccessGate::new(elevation.clone()),
        );

        engine.install_to_protected(false).await.unwrap();

        assert_eq!(
            elevation.commands(),
            vec![
                "test -e '/data/app/com.example.app-1.apk'".to_string(),
                format!("test -e '{}'", PROTECTED),
                "mount -o rw,remount '/system'".to_string(),
                format!(
                    "cp -fp '/data/app/com.example.app-1.apk' '{}'",
                    PROTECTED
                ),
                "mount -o ro,remount '/system'".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_copy_fails_with_timeout() {
        let elevation = Arc::new(
            ScriptedElevation::new()
                .on(PROTECTED_CHECK, Step::Exit(1))
                .on("cp ", Step::Hang),
        );
        let mut engine = engine_with(user_package(), 21, &elevation);

        let err = engine.install_to_protected(false).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(engine.state(), OperationState::Failed);
    }

    #[tokio::test]
    async fn uninstall_without_protected_copy_is_noop() {
        let elevation = Arc::new(
            ScriptedElevation::new()
                .without_access()
                .on("test -e", Step::Exit(1)),
        );
        let mut engine = engine_with(user_package(), 21, &elevation);

        engine.uninstall_from_protected(true).await.unwrap();
        assert_eq!(elevation.commands().len(), 1);
        assert_eq!(engine.state(), OperationState::Done);
    }

    #[tokio::test]
    async fn uninstall_restores_before_deleting_protected_copy() {
        let elevation = Arc::new(ScriptedElevation::new().on(USER_CHECK, Step::Exit(1)));
        let mut engine = engine_with(system_only_package(), 21, &elevation);

        engine.uninstall_from_protected(true).await.unwrap();

        let commands = elevation.commands();
        let restore_copy = position(
            &commands,
            &format!("cp -f '{}' '/data/app/com.example.app-1/base.apk'", PROTECTED),
        )
        .unwrap();
        let delete_protected = position(&commands, &format!("rm -rf '{}'", PROTECTED)).unwrap();
        assert!(restore_copy < delete_protected);
        assert_eq!(
            &commands[2..8],
            &[
                "rm -rf '/data/app/com.example.app'-*".to_string(),
                "mkdir '/data/app/com.example.app-1'".to_string(),
                "chmod 755 '/data/app/com.example.app-1'".to_string(),
                "chown system:system '/data/app/com.example.app-1'".to_string(),
                format!("cp -f '{}' '/data/app/com.example.app-1/base.apk'", PROTECTED),
                "chown system:system '/data/app/com.example.app-1/base.apk'".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn failed_restore_keeps_protected_copy() {
        let elevation = Arc::new(
            ScriptedElevation::new()
                .on(USER_CHECK, Step::Exit(1))
                .on("cp -f ", Step::Exit(1)),
        );
        let mut engine = engine_with(system_only_package(), 21, &elevation);

        let err = engine.uninstall_from_protected(true).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::CommandFailed);
        let commands = elevation.commands();
        assert_eq!(position(&commands, &format!("rm -rf '{}'", PROTECTED)), None);
        // remaining steps still ran, then the directory was cleaned up
        assert!(position(&commands, "chown system:system '/data/app/com.example.app-1/base.apk'").is_some());
        assert_eq!(
            commands.last().map(String::as_str),
            Some("rm -rf '/data/app/com.example.app-1'")
        );
        assert!(engine.transitions().contains(&OperationState::RollingBack));
        assert_eq!(engine.state(), OperationState::Failed);
    }

    #[tokio::test]
    async fn failed_restore_cleanup_failure_does_not_change_error() {
        let elevation = Arc::new(
            ScriptedElevation::new()
                .on(USER_CHECK, Step::Exit(1))
                .on("mkdir", Step::Exit(1))
                .on("rm -rf '/data/app/com.example.app-1'", Step::Exit(1)),
        );
        let mut engine = engine_with(system_only_package(), 21, &elevation);

        let err = engine.uninstall_from_protected(true).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::CommandFailed);
        assert!(err.message.contains("Unable to copy"));
    }

    #[tokio::test]
    async fn flat_tier_restore_skips_directory_creation() {
        let elevation = Arc::new(ScriptedElevation::new().on(USER_CHECK, Step::Exit(1)));
        let package = ApplicationPackage::new(
            PKG,
            "/system/app/com.example.app.apk",
            "/data/data/com.example.app",
        );
        let mut engine = engine_with(package, 17, &elevation);

        engine.uninstall_from_protected(true).await.unwrap();

        assert_eq!(
            elevation.commands(),
            vec![
                "test -e '/system/app/com.example.app.apk'".to_string(),
                "ls -d '/data/app/com.example.app'-* >/dev/null 2>&1".to_string(),
                "rm -rf '/data/app/com.example.app'-*".to_string(),
                "cp -f '/system/app/com.example.app.apk' '/data/app/com.example.app-1.apk'"
                    .to_string(),
                "chown system:system '/data/app/com.example.app-1.apk'".to_string(),
                "rm -rf '/system/app/com.example.app.apk'".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn stale_remnant_cleanup_failure_is_ignored() {
        let elevation = Arc::new(
            ScriptedElevation::new()
                .on(USER_CHECK, Step::Exit(1))
                .on("'-*", Step::Exit(1)),
        );
        let mut engine = engine_with(system_only_package(), 21, &elevation);

        engine.uninstall_from_protected(true).await.unwrap();
    }

    #[tokio::test]
    async fn restore_uses_configured_owner() {
        let elevation = Arc::new(ScriptedElevation::new().on(USER_CHECK, Step::Exit(1)));
        let mut settings = EngineSettings::for_sdk(21);
        settings.remount_system = false;
        settings.restore_owner = "1000:1000".to_string();
        let mut engine = RelocationEngine::new(
            system_only_package(),
            settings,
            PrivilegedShell::new(elevation.clone(), PollBudget::default()),
            RootAccessGate::new(elevation.clone()),
        );

        engine.uninstall_from_protected(true).await.unwrap();

        let commands = elevation.commands();
        assert!(commands.contains(&"chown 1000:1000 '/data/app/com.example.app-1'".to_string()));
        assert!(
            commands.contains(&"chown 1000:1000 '/data/app/com.example.app-1/base.apk'".to_string())
        );
        assert_eq!(position(&commands, "system:system"), None);
    }

    #[tokio::test]
    async fn vanished_source_triggers_restore_before_delete() {
        // The package manager still reports the user path, but it is gone.
        let elevation = Arc::new(
            ScriptedElevation::new()
                .on(&format!("test -e '{}'", USER_APK), Step::Exit(1))
                .on(USER_CHECK, Step::Exit(1)),
        );
        let mut engine = engine_with(user_package(), 21, &elevation);

        engine.uninstall_from_protected(true).await.unwrap();

        let commands = elevation.commands();
        let restore_copy = position(&commands, "cp -f ").unwrap();
        let delete_protected = position(&commands, &format!("rm -rf '{}'", PROTECTED)).unwrap();
        assert!(restore_copy < delete_protected);
    }

    #[tokio::test]
    async fn uninstall_without_keep_skips_restore() {
        let elevation = Arc::new(ScriptedElevation::new());
        let mut engine = engine_with(system_only_package(), 21, &elevation);

        engine.uninstall_from_protected(false).await.unwrap();
        assert_eq!(
            elevation.commands(),
            vec![
                format!("test -e '{}'", PROTECTED),
                format!("rm -rf '{}'", PROTECTED)
            ]
        );
    }

    #[tokio::test]
    async fn uninstall_delete_failure_is_command_failed() {
        let elevation = Arc::new(ScriptedElevation::new().on("rm -rf", Step::Exit(1)));
        let mut engine = engine_with(user_package(), 21, &elevation);

        let err = engine.uninstall_from_protected(true).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::CommandFailed);
    }

    #[tokio::test]
    async fn end_to_end_install_then_uninstall_keeping_user_copy() {
        let elevation = Arc::new(ScriptedElevation::new().on(PROTECTED_CHECK, Step::Exit(1)));
        let mut engine = engine_with(user_package(), 21, &elevation);
        engine.install_to_protected(false).await.unwrap();

        let elevation = Arc::new(ScriptedElevation::new().on("test -e", Step::Exit(0)));
        let mut engine = engine_with(user_package(), 21, &elevation);
        engine.uninstall_from_protected(true).await.unwrap();

        let commands = elevation.commands();
        assert_eq!(position(&commands, "cp "), None);
        assert_eq!(
            commands,
            vec![
                format!("test -e '{}'", PROTECTED),
                format!("test -e '{}'", USER_APK),
                format!("rm -rf '{}'", PROTECTED)
            ]
        );
    }

    #[tokio::test]
    async fn uninstall_user_copy_removes_per_app_directory() {
        let elevation = Arc::new(ScriptedElevation::new());
        let mut engine = engine_with(user_package(), 21, &elevation);

        engine.uninstall_user_copy().await.unwrap();
        assert_eq!(
            elevation.commands(),
            vec![
                format!("test -e '{}'", USER_APK),
                "rm -rf '/data/app/com.example.app-1'".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn uninstall_user_copy_removes_flat_file_on_old_tiers() {
        let elevation = Arc::new(ScriptedElevation::new());
        let package = ApplicationPackage::new(
            PKG,
            "/data/app/com.example.app-1.apk",
            "/data/data/com.example.app",
        );
        let mut engine = engine_with(package, 19, &elevation);

        engine.uninstall_user_copy().await.unwrap();
        assert_eq!(
            elevation.commands(),
            vec![
                "test -e '/data/app/com.example.app-1.apk'".to_string(),
                "rm -rf '/data/app/com.example.app-1.apk'".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn uninstall_user_copy_needs_a_user_copy() {
        let elevation = Arc::new(ScriptedElevation::new().on(USER_CHECK, Step::Exit(1)));
        let mut engine = engine_with(system_only_package(), 21, &elevation);

        let err = engine.uninstall_user_copy().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::PathNotFound);
        assert_eq!(position(&elevation.commands(), "rm "), None);
    }

    #[tokio::test]
    async fn uninstall_user_copy_removes_restored_installs_by_suffix() {
        let elevation = Arc::new(ScriptedElevation::new());
        let mut engine = engine_with(system_only_package(), 21, &elevation);

        engine.uninstall_user_copy().await.unwrap();
        assert_eq!(
            elevation.commands(),
            vec![
                "ls -d '/data/app/com.example.app'-* >/dev/null 2>&1".to_string(),
                "rm -rf '/data/app/com.example.app'-*".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn uninstall_user_copy_ignores_paths_escaping_user_root() {
        let elevation = Arc::new(ScriptedElevation::new().on(USER_CHECK, Step::Exit(1)));
        let package = ApplicationPackage::new(
            PKG,
            "/data/app/../../system/priv-app/base.apk",
            "/data/data/com.example.app",
        );
        let mut engine = engine_with(package, 21, &elevation);

        let err = engine.uninstall_user_copy().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::PathNotFound);
        assert_eq!(position(&elevation.commands(), "rm "), None);
        assert_eq!(position(&elevation.commands(), "/system"), None);
    }

    #[tokio::test]
    async fn uninstall_user_copy_refuses_user_root_itself() {
        let elevation = Arc::new(ScriptedElevation::new());
        let package = ApplicationPackage::new(PKG, "/data/app/base.apk", "/data/data/x");
        let mut engine = engine_with(package, 21, &elevation);

        let err = engine.uninstall_user_copy().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::PathNotFound);
        assert_eq!(
            elevation.commands(),
            vec!["test -e '/data/app/base.apk'".to_string()]
        );
    }

    #[tokio::test]
    async fn wipe_data_deletes_matching_directory() {
        let elevation = Arc::new(ScriptedElevation::new());
        let mut engine = engine_with(user_package(), 21, &elevation);

        engine.wipe_data().await.unwrap();
        assert_eq!(
            elevation.commands(),
            vec!["rm -rf '/data/data/com.example.app'".to_string()]
        );
    }

    #[tokio::test]
    async fn wipe_data_refuses_foreign_directory() {
        let elevation = Arc::new(ScriptedElevation::new());
        let package = ApplicationPackage::new(PKG, USER_APK, "/data/data/org.other");
        let mut engine = engine_with(package, 21, &elevation);

        let err = engine.wipe_data().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::PathNotFound);
        assert!(elevation.commands().is_empty());
    }

    #[tokio::test]
    async fn wipe_data_failure_is_command_failed() {
        let elevation = Arc::new(ScriptedElevation::new().on("rm -rf", Step::Exit(1)));
        let mut engine = engine_with(user_package(), 21, &elevation);

        let err = engine.wipe_data().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::CommandFailed);
        assert!(err.message.contains("/data/data/com.example.app"));
    }

    #[tokio::test]
    async fn probe_location_combines_source_and_protected_probe() {
        let elevation = Arc::new(ScriptedElevation::new().on("test -e", Step::Exit(0)));
        let mut engine = engine_with(user_package(), 21, &elevation);
        assert_eq!(engine.probe_location().await.unwrap(), Location::Both);

        let elevation = Arc::new(
            ScriptedElevation::new()
                .on("test -e", Step::Exit(1))
                .on(USER_CHECK, Step::Exit(1)),
        );
        let mut engine = engine_with(system_only_package(), 21, &elevation);
        assert_eq!(engine.probe_location().await.unwrap(), Location::Neither);
    }

    #[tokio::test]
    async fn location_is_asked_of_the_device_each_time() {
        let elevation = Arc::new(
            ScriptedElevation::new()
                .on(&format!("test -e '{}'", USER_APK), Step::Exit(1))
                .on(USER_CHECK, Step::Exit(1)),
        );
        let mut engine = engine_with(user_package(), 21, &elevation);
        assert_eq!(engine.probe_location().await.unwrap(), Location::SystemOnly);

        // A copy restored under a new suffix still counts as a user copy.
        let elevation = Arc::new(
            ScriptedElevation::new().on(&format!("test -e '{}'", USER_APK), Step::Exit(1)),
        );
        let mut engine = engine_with(user_package(), 21, &elevation);
        assert_eq!(engine.probe_location().await.unwrap(), Location::Both);
    }
}
