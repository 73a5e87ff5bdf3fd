//! Root access gate.

use std::sync::Arc;

use log::debug;

use crate::elevation::Elevation;
use crate::error::RelocationError;

pub const ACCESS_DENIED_MESSAGE: &str =
    "Unable to obtain root access. Please make sure you grant this app root authority.";

/// Answers "can we be root" and "are we root already" without ever sending a
/// command through the privileged shell.
#[derive(Clone)]
pub struct RootAccessGate {
    elevation: Arc<dyn Elevation>,
}

impl RootAccessGate {
    pub fn new(elevation: Arc<dyn Elevation>) -> Self {
        Self { elevation }
    }

    pub fn is_available(&self) -> bool {
        self.elevation.is_available()
    }

    pub async fn gain(&self) -> Result<(), RelocationError> {
        if self.elevation.is_access_given().await {
            Ok(())
        } else {
            debug!("root access not granted");
            Err(RelocationError::access_denied(ACCESS_DENIED_MESSAGE))
        }
    }
}
