//! Error types for Texet.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Transition error: {0}")]
    Transition(#[from] TransitionError),

    #[error("{0}")]
    Pipeline(#[from] PipelineError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}

impl Error {
    /// Taxonomy name, used when a failure has no usable message text.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigError",
            Self::Validation(_) => "ValidationError",
            Self::Database(DatabaseError::NotFound { .. }) => "NotFoundError",
            Self::Database(DatabaseError::Conflict(_)) => "ConflictError",
            Self::Database(_) => "DatabaseError",
            Self::Transition(_) => "TransitionError",
            Self::Pipeline(_) => "PipelineStageError",
            Self::Delivery(_) => "DeliveryError",
        }
    }

    /// True when the error is a missing-row lookup.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Database(DatabaseError::NotFound { .. }))
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Malformed or out-of-bounds input.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Missing { field: &'static str },

    #[error("{field} must be at least {min} characters")]
    TooShort { field: &'static str, min: usize },

    #[error("{field} exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("Utterance {id} has no text")]
    MissingText { id: String },

    #[error("Reply is empty")]
    EmptyReply,

    #[error("Reply exceeds {max} characters")]
    ReplyTooLong { max: usize },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Uniqueness conflict: {0}")]
    Conflict(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Data integrity violation: {0}")]
    Integrity(String),

    #[error("Consistency failure: {0}")]
    Consistency(String),
}

impl DatabaseError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

/// An update was attempted against an utterance in a terminal state.
#[derive(Debug, thiserror::Error)]
#[error("Utterance {id} is {state}, cannot transition to {target}")]
pub struct TransitionError {
    pub id: String,
    pub state: String,
    pub target: String,
}

/// Reply pipeline failures, tagged with the stage that produced them.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline:{stage} failed: {reason}")]
    StageFailed { stage: &'static str, reason: String },
}

impl PipelineError {
    /// Name of the stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::StageFailed { stage, .. } => stage,
        }
    }
}

/// Outbound channel failures.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("{0} is not set.")]
    NotConfigured(&'static str),

    #[error("Delivery on channel {channel} failed: {reason}")]
    Transport { channel: String, reason: String },

    #[error("Channel {channel} rejected delivery with HTTP {status}: {body}")]
    Rejected {
        channel: String,
        status: u16,
        body: String,
    },

    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
