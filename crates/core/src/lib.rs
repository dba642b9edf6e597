pub mod config;
pub mod config_loader;
pub mod error;
pub mod events;
pub mod position;
pub mod traits;
pub mod trigger;

pub use config::{AppConfig, EngineConfig, LoggingConfig, StoreConfig};
pub use config_loader::ConfigLoader;
pub use error::{EngineError, FeedError, GatewayError, StorageError};
pub use events::{EngineState, TriggerEvent};
pub use position::{PositionRef, PositionState, Side};
pub use traits::{OrderGateway, PriceFeed, TriggerStore};
pub use trigger::{
    TakeProfitLevel, Trigger, TriggerCondition, TriggerDefinition, TriggerId, TriggerKind,
    TriggerState, REASON_GATEWAY_EXHAUSTED, REASON_POSITION_CLOSED,
};
