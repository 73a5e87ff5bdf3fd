//! The elevation mechanism, seen from the core as a black box.
//!
//! An [`Elevation`] knows whether root is obtainable and hands out
//! [`ShellSession`]s. A session accepts command text and later reports the
//! exit code for it; it never blocks waiting for completion. Polling and
//! timeouts are the caller's business (see [`crate::shell`]).

mod su;

use async_trait::async_trait;

use crate::error::ShellError;

pub use su::{SuElevation, SuSession};

/// Identifies a submitted command within one session.
pub type CommandId = u64;

#[async_trait]
pub trait ShellSession: Send {
    /// Queue `command` for execution and return its id.
    async fn submit(&mut self, command: &str) -> Result<CommandId, ShellError>;

    /// Exit code of `id` if it has finished, `None` if still running.
    fn try_exit_code(&mut self, id: CommandId) -> Result<Option<i32>, ShellError>;

    /// Tear the session down. Commands still running are abandoned.
    async fn close(&mut self);
}

#[async_trait]
pub trait Elevation: Send + Sync {
    /// Cheap probe; must not trigger a consent prompt.
    fn is_available(&self) -> bool;

    /// Whether root has been granted to this process. May ask the
    /// mechanism, but must return within a bounded time.
    async fn is_access_given(&self) -> bool;

    /// Start an elevated session.
    async fn open_session(&self) -> Result<Box<dyn ShellSession>, ShellError>;
}
