//! Text of every command sent to the privileged shell.
//!
//! These strings are the only protocol between the engine and the device
//! tooling, so they are built in one place and pinned by tests.

/// Restarts the display compositor, then the application runtime.
pub const SOFT_REBOOT: &str = "setprop ctl.restart surfaceflinger; setprop ctl.restart zygote";

pub const HARD_REBOOT: &str = "reboot";

/// Owner applied to restored user copies and their directory.
pub const SYSTEM_OWNER: &str = "system:system";

/// Mode of a restored per-app directory.
pub const APP_DIR_MODE: &str = "755";

/// Single-quote `arg` for `sh`.
pub fn quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

pub fn exists(path: &str) -> String {
    format!("test -e {}", quote(path))
}

pub fn delete(path: &str) -> String {
    format!("rm -rf {}", quote(path))
}

/// Delete every install of the package under `prefix`: `<prefix>-1.apk`,
/// `<prefix>-1/`, `<prefix>-2/` and so on. The `-` anchors the match so
/// packages whose id merely starts with the same text are left alone. The
/// wildcard stays unquoted.
pub fn delete_with_prefix(prefix: &str) -> String {
    format!("rm -rf {}-*", quote(prefix))
}

/// Succeeds if any install matching `<prefix>-*` exists.
pub fn exists_with_prefix(prefix: &str) -> String {
    format!("ls -d {}-* >/dev/null 2>&1", quote(prefix))
}

pub fn copy(from: &str, to: &str, preserve_attributes: bool) -> String {
    let flags = if preserve_attributes { "-fp" } else { "-f" };
    format!("cp {} {} {}", flags, quote(from), quote(to))
}

pub fn mkdir(path: &str) -> String {
    format!("mkdir {}", quote(path))
}

pub fn chmod(mode: &str, path: &str) -> String {
    format!("chmod {} {}", mode, quote(path))
}

pub fn chown(owner: &str, path: &str) -> String {
    format!("chown {} {}", owner, quote(path))
}

pub fn remount(mount_point: &str, writable: bool) -> String {
    let mode = if writable { "rw" } else { "ro" };
    format!("mount -o {},remount {}", mode, quote(mount_point))
}
