use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use trade_guard_core::{
    EngineConfig, EngineError, EngineState, PositionRef, PriceFeed, Trigger, TriggerDefinition,
    TriggerEvent, TriggerId,
};

use crate::commands::SupervisorCommand;
use crate::supervisor::{check_position, Supervisor};

const COMMAND_BUFFER: usize = 32;

/// Cloneable client of a supervisor running as an actor task.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<SupervisorCommand>,
    events: broadcast::Sender<TriggerEvent>,
    state: watch::Receiver<EngineState>,
    feed: Arc<dyn PriceFeed>,
    config: EngineConfig,
}

impl Supervisor {
    /// Moves the supervisor into its own task and returns a handle to it.
    ///
    /// Commands are served one at a time, so concurrent callers are ordered by
    /// arrival. The task ends after `Shutdown` or once every handle is dropped.
    #[must_use]
    pub fn spawn(self) -> (SupervisorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = SupervisorHandle {
            tx,
            events: self.event_sender(),
            state: self.state_receiver(),
            feed: self.feed(),
            config: self.config().clone(),
        };
        let task = tokio::spawn(run_actor(self, rx));
        (handle, task)
    }
}

async fn run_actor(mut supervisor: Supervisor, mut rx: mpsc::Receiver<SupervisorCommand>) {
    info!("Supervisor actor started");

    while let Some(command) = rx.recv().await {
        debug!(?command, "Supervisor command");
        match command {
            SupervisorCommand::AddTrigger { definition, reply } => {
                let _ = reply.send(supervisor.register(definition).await);
            }
            SupervisorCommand::RemoveTrigger { id, reply } => {
                let _ = reply.send(supervisor.remove_trigger(&id).await);
            }
            SupervisorCommand::RemoveForPosition { position, reply } => {
                let _ = reply.send(supervisor.remove_triggers_for_position(&position).await);
            }
            SupervisorCommand::PurgeTerminal { reply } => {
                let _ = reply.send(supervisor.purge_terminal().await);
            }
            SupervisorCommand::ListTriggers { position, reply } => {
                let _ = reply.send(supervisor.list_triggers(position.as_ref()));
            }
            SupervisorCommand::GetTrigger { id, reply } => {
                let _ = reply.send(supervisor.get_trigger(&id));
            }
            SupervisorCommand::Pause(reply) => {
                supervisor.pause().await;
                let _ = reply.send(());
            }
            SupervisorCommand::Resume(reply) => {
                supervisor.resume();
                let _ = reply.send(());
            }
            SupervisorCommand::Shutdown(reply) => {
                supervisor.shutdown().await;
                let _ = reply.send(());
                info!("Supervisor actor shut down");
                return;
            }
        }
    }

    supervisor.shutdown().await;
    info!("All supervisor handles dropped, actor exiting");
}

impl SupervisorHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SupervisorCommand,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(make(tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// The position lookup runs on the caller's task, so a slow feed does not
    /// hold up other commands.
    ///
    /// # Errors
    /// `InvalidDefinition`, `PositionNotFound`, `Storage`, or `ChannelClosed`.
    pub async fn add_trigger(&self, definition: TriggerDefinition) -> Result<TriggerId, EngineError> {
        check_position(self.feed.as_ref(), &self.config, &definition).await?;
        self.request(|reply| SupervisorCommand::AddTrigger { definition, reply })
            .await?
    }

    /// # Errors
    /// `NotFound`, `Storage`, or `ChannelClosed`.
    pub async fn remove_trigger(&self, id: TriggerId) -> Result<(), EngineError> {
        self.request(|reply| SupervisorCommand::RemoveTrigger { id, reply })
            .await?
    }

    /// # Errors
    /// `Storage` or `ChannelClosed`.
    pub async fn remove_triggers_for_position(&self, position: PositionRef) -> Result<Vec<TriggerId>, EngineError> {
        self.request(|reply| SupervisorCommand::RemoveForPosition { position, reply })
            .await?
    }

    /// # Errors
    /// `Storage` or `ChannelClosed`.
    pub async fn purge_terminal(&self) -> Result<usize, EngineError> {
        self.request(|reply| SupervisorCommand::PurgeTerminal { reply })
            .await?
    }

    /// # Errors
    /// `ChannelClosed` if the actor is gone.
    pub async fn list_triggers(&self, position: Option<PositionRef>) -> Result<Vec<Trigger>, EngineError> {
        self.request(|reply| SupervisorCommand::ListTriggers { position, reply })
            .await
    }

    /// # Errors
    /// `ChannelClosed` if the actor is gone.
    pub async fn get_trigger(&self, id: TriggerId) -> Result<Option<Trigger>, EngineError> {
        self.request(|reply| SupervisorCommand::GetTrigger { id, reply })
            .await
    }

    /// Returns once every watcher has finished its current cycle.
    ///
    /// # Errors
    /// `ChannelClosed` if the actor is gone.
    pub async fn pause(&self) -> Result<(), EngineError> {
        self.request(SupervisorCommand::Pause).await
    }

    /// # Errors
    /// `ChannelClosed` if the actor is gone.
    pub async fn resume(&self) -> Result<(), EngineError> {
        self.request(SupervisorCommand::Resume).await
    }

    /// # Errors
    /// `ChannelClosed` if the actor is gone.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.request(SupervisorCommand::Shutdown).await
    }

    /// Engine state as last published, without a round trip.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TriggerEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state.clone()
    }
}
