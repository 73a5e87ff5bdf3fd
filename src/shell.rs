//! The privileged shell: one elevated session, commands run strictly in order.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::elevation::{Elevation, ShellSession};
use crate::error::ShellError;

/// Poll interval used when none is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Poll attempts used when none is configured (about ten seconds).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;

/// How long `execute` waits for a command: `max_attempts` polls spaced by
/// `interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollBudget {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl PollBudget {
    pub fn total(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Owns the single elevated session. `&mut self` on `execute` is what keeps
/// two commands from ever running against the session at once.
pub struct PrivilegedShell {
    elevation: Arc<dyn Elevation>,
    session: Option<Box<dyn ShellSession>>,
    budget: PollBudget,
}

impl PrivilegedShell {
    pub fn new(elevation: Arc<dyn Elevation>, budget: PollBudget) -> Self {
        Self {
            elevation,
            session: None,
            budget,
        }
    }

    pub fn budget(&self) -> PollBudget {
        self.budget
    }

    /// Open the session if it is not open yet.
    pub async fn acquire(&mut self) -> Result<(), ShellError> {
        if self.session.is_none() {
            debug!("opening privileged session");
            self.session = Some(self.elevation.open_session().await?);
        }
        Ok(())
    }

    /// Close the session. The next `execute` opens a fresh one.
    pub async fn release(&mut self) {
        if let Some(mut session) = self.session.take() {
            debug!("closing privileged session");
            session.close().await;
        }
    }

    /// Run `command` with the shell's default budget.
    pub async fn run(&mut self, command: &str) -> Result<bool, ShellError> {
        let budget = self.budget;
        self.execute(command, budget).await
    }

    /// Submit `command` and poll until it finishes or the budget runs out.
    ///
    /// `Ok(true)` means exit code zero. Any other exit code is `Ok(false)`;
    /// the code itself is only logged. `Timeout` does not cancel anything on
    /// the device side.
    #[tracing::instrument(skip(self))]
    pub async fn execute(&mut self, command: &str, budget: PollBudget) -> Result<bool, ShellError> {
        self.acquire().await?;
        let Some(session) = self.session.as_mut() else {
            return Err(ShellError::Io("privileged session unavailable".to_string()));
        };

        let id = match session.submit(command).await {
            Ok(id) => id,
            Err(e) => {
                // A session we cannot write to is dead; start over next time.
                self.session = None;
                return Err(e);
            }
        };

        let mut attempts = 0;
        loop {
            match session.try_exit_code(id) {
                Ok(Some(code)) => {
                    debug!("`{}` exited with {}", command, code);
                    return Ok(code == 0);
                }
                Ok(None) => {}
                Err(e) => {
                    self.session = None;
                    return Err(e);
                }
            }

            if attempts >= budget.max_attempts {
                warn!(
                    "`{}` still running after {:?}, giving up",
                    command,
                    budget.total()
                );
                return Err(ShellError::Timeout {
                    command: command.to_string(),
                    attempts,
                });
            }

            tokio::time::sleep(budget.interval).await;
            attempts += 1;
        }
    }
}
