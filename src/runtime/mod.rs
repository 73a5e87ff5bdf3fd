//! Runtime abstraction for host operations.
//!
//! Everything the tool needs from the unprivileged host process goes through
//! the [`Runtime`] trait so that configuration and elevation logic can be
//! exercised with a mock.
//!
//! # Structure
//!
//! - `env` - Environment variables, PATH lookup and privilege detection
//! - `process` - Unprivileged command execution (getprop, pm)
//! - `user` - User interaction (confirmation and reboot prompts)

mod env;
mod process;
mod user;

use anyhow::Result;
use std::env as std_env;
use std::path::PathBuf;

pub use user::RebootChoice;

#[cfg_attr(test, mockall::automock)]
pub trait Runtime: Send + Sync {
    // Environment
    fn env_var(&self, key: &str) -> Result<String, std_env::VarError>;

    /// Locate an executable by name on `PATH`, or check it directly when the
    /// name contains a slash.
    fn find_executable(&self, program: &str) -> Option<PathBuf>;

    // Processes
    /// Run a program without elevation and return its trimmed stdout.
    /// A non-zero exit status is an error.
    fn command_output(&self, program: &str, args: &[String]) -> Result<String>;

    // Privilege
    fn is_privileged(&self) -> bool;

    // User interaction
    /// Prompt user for confirmation. Returns true if user confirms (y/yes), false otherwise.
    fn confirm(&self, prompt: &str) -> Result<bool>;

    /// Ask how to reboot after a successful relocation.
    fn choose_reboot(&self) -> Result<RebootChoice>;
}

pub struct RealRuntime;

impl Runtime for RealRuntime {
    fn env_var(&self, key: &str) -> Result<String, std_env::VarError> {
        self.env_var_impl(key)
    }

    fn find_executable(&self, program: &str) -> Option<PathBuf> {
        self.find_executable_impl(program)
    }

    fn command_output(&self, program: &str, args: &[String]) -> Result<String> {
        self.command_output_impl(program, args)
    }

    fn is_privileged(&self) -> bool {
        self.is_privileged_impl()
    }

    fn confirm(&self, prompt: &str) -> Result<bool> {
        self.confirm_impl(prompt)
    }

    fn choose_reboot(&self) -> Result<RebootChoice> {
        self.choose_reboot_impl()
    }
}
