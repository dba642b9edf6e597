use tokio::sync::oneshot;

use trade_guard_core::{EngineError, PositionRef, Trigger, TriggerDefinition, TriggerId};

pub type Reply<T> = oneshot::Sender<T>;

/// Control-surface requests consumed, in arrival order, by the supervisor actor.
#[derive(Debug)]
pub enum SupervisorCommand {
    AddTrigger {
        definition: TriggerDefinition,
        reply: Reply<Result<TriggerId, EngineError>>,
    },
    RemoveTrigger {
        id: TriggerId,
        reply: Reply<Result<(), EngineError>>,
    },
    RemoveForPosition {
        position: PositionRef,
        reply: Reply<Result<Vec<TriggerId>, EngineError>>,
    },
    PurgeTerminal {
        reply: Reply<Result<usize, EngineError>>,
    },
    ListTriggers {
        position: Option<PositionRef>,
        reply: Reply<Vec<Trigger>>,
    },
    GetTrigger {
        id: TriggerId,
        reply: Reply<Option<Trigger>>,
    },
    Pause(Reply<()>),
    Resume(Reply<()>),
    /// Stops the watchers and ends the actor.
    Shutdown(Reply<()>),
}
