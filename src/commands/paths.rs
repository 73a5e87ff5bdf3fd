//! Offline `paths` command: where a package lives for a given SDK level.

use anyhow::Result;

use crate::config::layout_for;
use crate::layout::PlatformTier;

/// Print where the package lives on a device of the given SDK level.
/// Runs no commands on the device.
pub fn paths(package_id: &str, sdk: u32, device_root: Option<&str>, json: bool) -> Result<()> {
    let tier = PlatformTier::from_sdk(sdk);
    let paths = layout_for(device_root).resolve(tier, package_id);

    if json {
        println!("{}", serde_json::to_string_pretty(&paths)?);
        return Ok(());
    }

    println!("Tier:            {:?} (SDK {})", tier, sdk);
    println!("System copy:     {}", paths.protected_path);
    println!("User copy:       {}*", paths.user_path_prefix);
    println!("Restore target:  {}", paths.restore_target());
    if let Some(dir) = paths.restore_directory() {
        println!("Restore dir:     {}", dir);
    }
    Ok(())
}
