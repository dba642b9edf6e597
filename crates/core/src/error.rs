//! Error taxonomy shared by the store, the venue collaborators, and the engine.

use thiserror::Error;

use crate::position::PositionRef;
use crate::trigger::TriggerId;

/// Durability layer failures.
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error reading/writing a record.
    #[error("storage IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No record exists for the given trigger.
    #[error("no stored record for trigger {0}")]
    NotFound(TriggerId),
}

/// Price/position feed failures. Always transient from the engine's point of view.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    /// Venue or feed unreachable.
    #[error("price feed unavailable: {0}")]
    Unavailable(String),

    /// Request did not complete in time.
    #[error("price feed timed out after {0}ms")]
    Timeout(u64),
}

/// Order mutation failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Venue refused the order (invalid stop, lot below minimum, ...).
    #[error("order rejected: {0}")]
    Rejected(String),

    /// Venue unreachable.
    #[error("order gateway unavailable: {0}")]
    Unavailable(String),

    /// Request did not complete in time.
    #[error("order gateway timed out after {0}ms")]
    Timeout(u64),
}

impl GatewayError {
    /// Creates a rejection error.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }
}

/// Errors surfaced by the engine's control surface.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Operation on an unknown trigger id.
    #[error("trigger not found: {0}")]
    NotFound(TriggerId),

    /// Trigger definition failed validation.
    #[error("invalid trigger definition: {0}")]
    InvalidDefinition(String),

    /// Target position is not open at the venue.
    #[error("position not found: {0}")]
    PositionNotFound(PositionRef),

    /// Engine settings that would stop the watchers from running.
    #[error("invalid engine config: {0}")]
    InvalidConfig(String),

    /// Persistence failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The supervisor actor is gone.
    #[error("supervisor command channel closed")]
    ChannelClosed,
}

impl EngineError {
    /// Creates an invalid definition error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidDefinition(message.into())
    }
}
