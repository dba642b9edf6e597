use crate::position::PositionRef;
use crate::trigger::{TriggerId, TriggerKind};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle notifications published by the engine for the GUI/stats layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerEvent {
    Added {
        id: TriggerId,
        position: PositionRef,
        kind: TriggerKind,
    },
    Removed {
        id: TriggerId,
        position: PositionRef,
    },
    Armed {
        id: TriggerId,
        position: PositionRef,
    },
    /// One partial take-profit level closed; more remain.
    LevelFired {
        id: TriggerId,
        position: PositionRef,
        level: usize,
        fraction: Decimal,
        timestamp: DateTime<Utc>,
    },
    /// The trigger reached Fired (stop moved, or the last level closed).
    Fired {
        id: TriggerId,
        position: PositionRef,
        kind: TriggerKind,
        timestamp: DateTime<Utc>,
    },
    Cancelled {
        id: TriggerId,
        position: PositionRef,
        reason: String,
    },
    Failed {
        id: TriggerId,
        position: PositionRef,
        reason: String,
    },
    /// The feed has been unreachable for this trigger for `cycles` polls in a row.
    FeedUnavailable {
        id: TriggerId,
        position: PositionRef,
        cycles: u32,
    },
    WatcherRestarted {
        kind: TriggerKind,
        timestamp: DateTime<Utc>,
    },
}

/// Run state of the watcher set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EngineState {
    #[default]
    Stopped,
    Running,
    Paused,
}
