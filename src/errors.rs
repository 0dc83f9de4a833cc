use thiserror::Error;

use crate::models::ActionStatus;

/// Failures raised at the remote gateway boundary.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("remote store unavailable")]
    Unavailable,

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest_middleware::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("teardown failed: {0}")]
    Teardown(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Http(reqwest_middleware::Error::Reqwest(e))
    }
}

/// Failures raised by `TokenStore` commands.
///
/// These never escape a command: they are folded into an [`ActionStatus`]
/// and, for remote failures, a notification.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Validation(String),

    #[error("token {0} does not exist")]
    UnknownToken(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl StoreError {
    /// Validation failures are rejected locally, before any remote call.
    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Validation(_) | StoreError::UnknownToken(_))
    }
}

impl From<StoreError> for ActionStatus {
    fn from(e: StoreError) -> Self {
        ActionStatus::failure(e.to_string())
    }
}
