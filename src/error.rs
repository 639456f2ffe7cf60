//! Error handling module
//!
//! Provides the unified error type for the sequencer and the repository seam.
//! Every variant maps onto one of the four caller-facing categories.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Sequencer-wide error type
#[derive(Error, Debug)]
pub enum SequencerError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("User {user_id} is not authorized to {operation}")]
    UserNotAuthorized { user_id: String, operation: String },

    #[error("Property server error: {0}")]
    PropertyServer(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Unknown governance action process: {0}")]
    UnknownProcess(String),

    #[error("Governance action process {0} has no first action type")]
    NoEntryPoint(String),

    #[error("Governance action type {0} has no executor")]
    NoExecutor(String),

    #[error("User {caller} is not the processing engine for governance action {action_guid}")]
    UnauthorizedCaller {
        caller: String,
        action_guid: Uuid,
        claimant: Option<String>,
    },

    #[error("Found {count} pending governance actions of type {action_type_guid} in run {anchor_guid}")]
    AmbiguousPendingAction {
        action_type_guid: Uuid,
        anchor_guid: Uuid,
        count: usize,
    },

    #[error("Malformed stored properties: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[cfg(feature = "postgres")]
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
}

/// Caller-facing error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Bad or missing identifiers, names or types. Not retried.
    InvalidParameter,
    /// Authorization denial. Not retried.
    UserNotAuthorized,
    /// Repository-side failure. The caller may retry.
    PropertyServer,
    /// Illegal status transition or re-claim. Not retried.
    InvalidState,
}

impl SequencerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SequencerError::InvalidParameter(_) | SequencerError::UnknownProcess(_) => {
                ErrorCategory::InvalidParameter
            }
            SequencerError::UserNotAuthorized { .. } | SequencerError::UnauthorizedCaller { .. } => {
                ErrorCategory::UserNotAuthorized
            }
            SequencerError::InvalidState(_) => ErrorCategory::InvalidState,
            SequencerError::PropertyServer(_)
            | SequencerError::NoEntryPoint(_)
            | SequencerError::NoExecutor(_)
            | SequencerError::AmbiguousPendingAction { .. }
            | SequencerError::Serialization(_) => ErrorCategory::PropertyServer,
            #[cfg(feature = "postgres")]
            SequencerError::Database(_) | SequencerError::Pool(_) => ErrorCategory::PropertyServer,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::PropertyServer
    }

    pub fn is_not_authorized(&self) -> bool {
        matches!(self, SequencerError::UserNotAuthorized { .. })
    }
}

impl From<validator::ValidationErrors> for SequencerError {
    fn from(errors: validator::ValidationErrors) -> Self {
        SequencerError::InvalidParameter(errors.to_string())
    }
}

/// Result type alias for sequencer and repository operations
pub type SequencerResult<T> = Result<T, SequencerError>;

/// Helper function to create an invalid parameter error
pub fn invalid_parameter(msg: impl Into<String>) -> SequencerError {
    SequencerError::InvalidParameter(msg.into())
}

/// Helper function to create a property server error
pub fn property_server_error(msg: impl Into<String>) -> SequencerError {
    SequencerError::PropertyServer(msg.into())
}

/// Helper function to create an invalid state error
pub fn invalid_state(msg: impl Into<String>) -> SequencerError {
    SequencerError::InvalidState(msg.into())
}

/// Helper function to create a not authorized error
pub fn not_authorized(user_id: &str, operation: impl Into<String>) -> SequencerError {
    SequencerError::UserNotAuthorized {
        user_id: user_id.to_string(),
        operation: operation.into(),
    }
}

/// Reject empty caller identities before any repository call is made
pub fn validate_user_id(user_id: &str) -> SequencerResult<()> {
    if user_id.trim().is_empty() {
        return Err(invalid_parameter("userId must not be empty"));
    }
    Ok(())
}
