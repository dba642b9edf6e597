//! Owns the registry and the watcher tasks.
//!
//! Construction loads every stored trigger once. `start` spawns one supervised
//! watcher per trigger kind; `pause` signals them and waits for the in-flight cycle
//! to drain. A watcher that panics is restarted after a backoff.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use trade_guard_core::{
    EngineConfig, EngineError, EngineState, OrderGateway, PositionRef, PriceFeed, Trigger,
    TriggerDefinition, TriggerEvent, TriggerId, TriggerKind, TriggerStore,
};

use crate::registry::TriggerRegistry;
use crate::watcher::{Watcher, WatcherContext};

struct RunningWatchers {
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct Supervisor {
    ctx: WatcherContext,
    state_tx: watch::Sender<EngineState>,
    running: Option<RunningWatchers>,
}

impl Supervisor {
    /// Loads the registry from `store`. Watchers are not started yet.
    ///
    /// # Errors
    /// Returns `EngineError::InvalidConfig` for settings the watchers cannot run
    /// with, or `EngineError::Storage` if the store cannot be read.
    pub async fn new(
        store: Arc<dyn TriggerStore>,
        feed: Arc<dyn PriceFeed>,
        gateway: Arc<dyn OrderGateway>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        config.validate().map_err(EngineError::InvalidConfig)?;
        let registry = Arc::new(TriggerRegistry::load(store).await?);
        let (events, _) = broadcast::channel(config.event_buffer);
        let (state_tx, _) = watch::channel(EngineState::Stopped);

        Ok(Self {
            ctx: WatcherContext {
                registry,
                feed,
                gateway,
                config,
                events,
            },
            state_tx,
            running: None,
        })
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<TriggerRegistry> {
        &self.ctx.registry
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TriggerEvent> {
        self.ctx.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<TriggerEvent> {
        self.ctx.events.clone()
    }

    pub(crate) fn feed(&self) -> Arc<dyn PriceFeed> {
        self.ctx.feed.clone()
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_tx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_tx.subscribe()
    }

    /// Spawns the watchers. Does nothing if they are already running.
    pub fn start(&mut self) {
        if self.running.is_some() {
            return;
        }

        let (stop, stop_rx) = watch::channel(false);
        let tasks = TriggerKind::ALL
            .into_iter()
            .map(|kind| tokio::spawn(supervise(kind, self.ctx.clone(), stop_rx.clone())))
            .collect();

        self.running = Some(RunningWatchers { stop, tasks });
        self.state_tx.send_replace(EngineState::Running);
        info!(triggers = self.ctx.registry.len(), "Trigger engine running");
    }

    pub fn resume(&mut self) {
        self.start();
    }

    /// Signals every watcher and waits for in-flight cycles to finish.
    pub async fn pause(&mut self) {
        self.drain().await;
        self.state_tx.send_replace(EngineState::Paused);
        info!("Trigger engine paused");
    }

    pub async fn shutdown(&mut self) {
        self.drain().await;
        self.state_tx.send_replace(EngineState::Stopped);
        info!("Trigger engine stopped");
    }

    async fn drain(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.stop.send_replace(true);
        for task in running.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Watcher supervisor task ended abnormally");
            }
        }
    }

    /// Validates, persists and registers a new trigger.
    ///
    /// The position is looked up first: a position the venue does not know is
    /// rejected, while an unreachable feed lets the add through.
    ///
    /// # Errors
    /// `InvalidDefinition`, `PositionNotFound`, or `Storage`.
    pub async fn add_trigger(&self, definition: TriggerDefinition) -> Result<TriggerId, EngineError> {
        check_position(self.ctx.feed.as_ref(), &self.ctx.config, &definition).await?;
        self.register(definition).await
    }

    /// Persists and registers a trigger whose position was already checked.
    pub(crate) async fn register(&self, definition: TriggerDefinition) -> Result<TriggerId, EngineError> {
        definition.validate()?;
        let trigger = self.ctx.registry.insert(Trigger::new(definition)).await?;
        info!(
            trigger_id = %trigger.id,
            position = %trigger.position_ref,
            kind = %trigger.kind(),
            condition = %trigger.condition,
            "Trigger added"
        );
        let _ = self.ctx.events.send(TriggerEvent::Added {
            id: trigger.id,
            position: trigger.position_ref.clone(),
            kind: trigger.kind(),
        });
        Ok(trigger.id)
    }

    /// Deletes a trigger from the store and the registry.
    ///
    /// A watcher holding this trigger mid-order notices on its next registry write
    /// and abandons the fire.
    ///
    /// # Errors
    /// `NotFound` for an unknown id, `Storage` if the record could not be deleted.
    pub async fn remove_trigger(&self, id: &TriggerId) -> Result<(), EngineError> {
        let removed = self.ctx.registry.remove(id).await?;
        self.announce_removed(&removed);
        Ok(())
    }

    /// # Errors
    /// `Storage` on the first record that could not be deleted.
    pub async fn remove_triggers_for_position(&self, position: &PositionRef) -> Result<Vec<TriggerId>, EngineError> {
        let removed = self.ctx.registry.remove_for_position(position).await?;
        for trigger in &removed {
            self.announce_removed(trigger);
        }
        Ok(removed.into_iter().map(|t| t.id).collect())
    }

    /// Deletes every Fired, Cancelled or Failed trigger.
    ///
    /// # Errors
    /// `Storage` on the first record that could not be deleted.
    pub async fn purge_terminal(&self) -> Result<usize, EngineError> {
        let purged = self.ctx.registry.purge_terminal().await?;
        for trigger in &purged {
            self.announce_removed(trigger);
        }
        info!(count = purged.len(), "Purged finished triggers");
        Ok(purged.len())
    }

    #[must_use]
    pub fn list_triggers(&self, position: Option<&PositionRef>) -> Vec<Trigger> {
        self.ctx.registry.list(position)
    }

    #[must_use]
    pub fn get_trigger(&self, id: &TriggerId) -> Option<Trigger> {
        self.ctx.registry.get(id)
    }

    fn announce_removed(&self, trigger: &Trigger) {
        info!(trigger_id = %trigger.id, position = %trigger.position_ref, "Trigger removed");
        let _ = self.ctx.events.send(TriggerEvent::Removed {
            id: trigger.id,
            position: trigger.position_ref.clone(),
        });
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.stop.send_replace(true);
        }
    }
}

/// Validates `definition` and rejects it if the feed says its position is gone.
///
/// Feed errors and timeouts only warn: the watcher resolves the position later.
pub(crate) async fn check_position(
    feed: &dyn PriceFeed,
    config: &EngineConfig,
    definition: &TriggerDefinition,
) -> Result<(), EngineError> {
    definition.validate()?;

    let position = &definition.position_ref;
    match timeout(config.feed_timeout(), feed.current_state(position)).await {
        Ok(Ok(state)) if !state.exists => Err(EngineError::PositionNotFound(position.clone())),
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => {
            warn!(position = %position, error = %e, "Could not verify position; adding trigger anyway");
            Ok(())
        }
        Err(_) => {
            warn!(position = %position, timeout_ms = config.feed_timeout_ms, "Position lookup timed out; adding trigger anyway");
            Ok(())
        }
    }
}

/// Runs a watcher for `kind`, restarting it after a panic until `stop` is set.
async fn supervise(kind: TriggerKind, ctx: WatcherContext, mut stop: watch::Receiver<bool>) {
    let backoff = ctx.config.restart_backoff();
    let events = ctx.events.clone();

    loop {
        let watcher = Watcher::new(kind, ctx.clone());
        let result = tokio::spawn(watcher.run(stop.clone())).await;

        match result {
            Ok(()) => break,
            Err(e) if e.is_panic() => {
                error!(kind = %kind, error = %e, backoff_ms = ctx.config.restart_backoff_ms, "Watcher panicked");
            }
            Err(e) => {
                warn!(kind = %kind, error = %e, "Watcher task cancelled");
                break;
            }
        }

        if *stop.borrow() {
            break;
        }
        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            () = sleep(backoff) => {}
        }

        info!(kind = %kind, "Restarting watcher");
        let _ = events.send(TriggerEvent::WatcherRestarted {
            kind,
            timestamp: Utc::now(),
        });
    }
}
