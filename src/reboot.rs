//! Reboot after a relocation.

use log::{info, warn};

use crate::command::{HARD_REBOOT, SOFT_REBOOT};
use crate::error::{RelocationError, RelocationResult};
use crate::shell::PrivilegedShell;

pub const REBOOT_FAILED_MESSAGE: &str =
    "Unable to reboot automatically. Please reboot your phone manually.";

/// Issues the reboot command through the engine's shell.
///
/// A hard reboot that works kills this process before the command can report
/// back, so only an observed failure is ever reported.
#[derive(Debug, Clone, Copy, Default)]
pub struct RebootCoordinator;

impl RebootCoordinator {
    pub fn command(soft: bool) -> &'static str {
        if soft { SOFT_REBOOT } else { HARD_REBOOT }
    }

    pub async fn reboot(&self, shell: &mut PrivilegedShell, soft: bool) -> RelocationResult {
        let command = Self::command(soft);
        info!("rebooting device ({})", if soft { "soft" } else { "full" });

        match shell.run(command).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!("`{}` failed", command);
                Err(RelocationError::command_failed(REBOOT_FAILED_MESSAGE))
            }
            Err(e) => {
                warn!("`{}` failed: {}", command, e);
                let mut err = RelocationError::from(e);
                err.message = REBOOT_FAILED_MESSAGE.to_string();
                Err(err)
            }
        }
    }
}
