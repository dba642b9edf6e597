use crate::error::{FeedError, GatewayError, StorageError};
use crate::position::{PositionRef, PositionState};
use crate::trigger::{Trigger, TriggerId};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Live position and price lookups against the venue.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Returns `exists: false` when the venue no longer has the position.
    async fn current_state(&self, position: &PositionRef) -> Result<PositionState, FeedError>;
}

/// Order mutations against an open position.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn set_stop_loss(&self, position: &PositionRef, price: Decimal) -> Result<(), GatewayError>;

    /// Closes `fraction` of the position's remaining size at market.
    async fn close_fraction(&self, position: &PositionRef, fraction: Decimal) -> Result<(), GatewayError>;
}

/// Durable keyed storage of trigger records.
#[async_trait]
pub trait TriggerStore: Send + Sync {
    /// Reads every valid record. Called once, at startup.
    async fn load_all(&self) -> Result<Vec<Trigger>, StorageError>;

    /// Inserts or replaces the record for `trigger.id`.
    async fn save(&self, trigger: &Trigger) -> Result<(), StorageError>;

    /// Deletes the record, failing with `StorageError::NotFound` if there is none.
    async fn delete(&self, id: &TriggerId) -> Result<(), StorageError>;
}
