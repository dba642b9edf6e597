//! Polling loop for one trigger kind.
//!
//! Each cycle snapshots the kind's live triggers, resolves their positions through
//! the price feed, asks the evaluator, and carries out at most one order per trigger.
//! A stop signal is honored between cycles only; an order already sent is always
//! awaited and recorded.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use trade_guard_core::{
    EngineConfig, EngineError, FeedError, GatewayError, OrderGateway, PositionState, PriceFeed,
    Trigger, TriggerEvent, TriggerId, TriggerKind, TriggerState, REASON_POSITION_CLOSED,
};

use crate::evaluator::{evaluate, Decision, FireAction};
use crate::registry::TriggerRegistry;

/// Everything a watcher needs, shared by all watchers of one supervisor.
#[derive(Clone)]
pub struct WatcherContext {
    pub registry: Arc<TriggerRegistry>,
    pub feed: Arc<dyn PriceFeed>,
    pub gateway: Arc<dyn OrderGateway>,
    pub config: EngineConfig,
    pub events: broadcast::Sender<TriggerEvent>,
}

/// What happened to one trigger in one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Removed or finished since the snapshot was taken.
    Skipped,
    /// The feed could not be reached; retried next cycle.
    Unavailable,
    Cancelled,
    /// Evaluated, nothing to do.
    Idle,
    Armed,
    Invalidated(String),
    Fired,
    LevelFired { level: usize },
    GatewayFailed { attempts: u32 },
    /// Failed for good after too many gateway errors.
    Exhausted,
    /// Removed while its order was in flight; the fire was not recorded.
    Abandoned,
}

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub outcomes: Vec<(TriggerId, Outcome)>,
}

impl CycleReport {
    #[must_use]
    pub fn outcome(&self, id: &TriggerId) -> Option<&Outcome> {
        self.outcomes.iter().find(|(tid, _)| tid == id).map(|(_, o)| o)
    }

    #[must_use]
    pub fn count(&self, predicate: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| predicate(o)).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

pub struct Watcher {
    kind: TriggerKind,
    ctx: WatcherContext,
    unavailable: HashMap<TriggerId, u32>,
}

impl Watcher {
    #[must_use]
    pub fn new(kind: TriggerKind, ctx: WatcherContext) -> Self {
        Self {
            kind,
            ctx,
            unavailable: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> TriggerKind {
        self.kind
    }

    /// Polls until `stop` turns true or its sender is dropped.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        let mut ticker = interval(self.ctx.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(kind = %self.kind, interval_ms = self.ctx.config.poll_interval_ms, "Watcher started");

        loop {
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            if *stop.borrow() {
                break;
            }

            let report = self.run_cycle().await;
            if !report.is_empty() {
                debug!(kind = %self.kind, outcomes = ?report.outcomes, "Watcher cycle complete");
            }
        }

        info!(kind = %self.kind, "Watcher stopped");
    }

    /// Runs one poll cycle over every live trigger of this watcher's kind.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let triggers = self.ctx.registry.active(self.kind);
        self.unavailable
            .retain(|id, _| triggers.iter().any(|t| t.id == *id));

        let mut report = CycleReport::default();
        for trigger in triggers {
            let id = trigger.id;
            let outcome = self.process(trigger).await;
            report.outcomes.push((id, outcome));
        }
        report
    }

    async fn process(&mut self, snapshot: Trigger) -> Outcome {
        // The snapshot may be stale if a control-surface removal landed mid-cycle.
        let Some(trigger) = self
            .ctx
            .registry
            .get(&snapshot.id)
            .filter(|t| !t.is_terminal())
        else {
            return Outcome::Skipped;
        };

        let position = match self.resolve(&trigger).await {
            Ok(position) => position,
            Err(e) => return self.note_unavailable(&trigger, &e),
        };
        self.unavailable.remove(&trigger.id);

        if !position.exists {
            return self.cancel_closed(&trigger).await;
        }

        match evaluate(&trigger, &position) {
            Decision::NoAction => self.idle(&trigger).await,
            Decision::Invalidate(reason) => self.invalidate(&trigger, reason).await,
            Decision::Fire(action) => self.fire(&trigger, action).await,
        }
    }

    async fn resolve(&self, trigger: &Trigger) -> Result<PositionState, FeedError> {
        let limit = self.ctx.config.feed_timeout();
        match timeout(limit, self.ctx.feed.current_state(&trigger.position_ref)).await {
            Ok(result) => result,
            Err(_) => Err(FeedError::Timeout(self.ctx.config.feed_timeout_ms)),
        }
    }

    fn note_unavailable(&mut self, trigger: &Trigger, error: &FeedError) -> Outcome {
        let cycles = self.unavailable.entry(trigger.id).or_insert(0);
        *cycles = cycles.saturating_add(1);
        let cycles = *cycles;

        if cycles == self.ctx.config.unavailable_warn_cycles {
            warn!(
                trigger_id = %trigger.id,
                position = %trigger.position_ref,
                cycles,
                error = %error,
                "Price feed unavailable for consecutive cycles"
            );
            self.emit(TriggerEvent::FeedUnavailable {
                id: trigger.id,
                position: trigger.position_ref.clone(),
                cycles,
            });
        } else {
            debug!(trigger_id = %trigger.id, cycles, error = %error, "Price feed unavailable, skipping");
        }
        Outcome::Unavailable
    }

    async fn cancel_closed(&self, trigger: &Trigger) -> Outcome {
        match self.ctx.registry.cancel(&trigger.id, REASON_POSITION_CLOSED).await {
            Ok(_) => {
                info!(
                    trigger_id = %trigger.id,
                    position = %trigger.position_ref,
                    kind = %self.kind,
                    "Position closed, trigger cancelled"
                );
                self.emit(TriggerEvent::Cancelled {
                    id: trigger.id,
                    position: trigger.position_ref.clone(),
                    reason: REASON_POSITION_CLOSED.to_string(),
                });
                Outcome::Cancelled
            }
            Err(e) => self.lost(trigger, &e),
        }
    }

    async fn idle(&self, trigger: &Trigger) -> Outcome {
        if trigger.state != TriggerState::Pending {
            self.ctx.registry.touch(&trigger.id);
            return Outcome::Idle;
        }

        match self.ctx.registry.mark_armed(&trigger.id).await {
            Ok(_) => {
                info!(trigger_id = %trigger.id, position = %trigger.position_ref, kind = %self.kind, "Trigger armed");
                self.emit(TriggerEvent::Armed {
                    id: trigger.id,
                    position: trigger.position_ref.clone(),
                });
                Outcome::Armed
            }
            Err(e) => self.lost(trigger, &e),
        }
    }

    async fn invalidate(&self, trigger: &Trigger, reason: String) -> Outcome {
        match self.ctx.registry.fail(&trigger.id, &reason).await {
            Ok(_) => {
                warn!(trigger_id = %trigger.id, position = %trigger.position_ref, reason = %reason, "Trigger invalidated");
                self.emit(TriggerEvent::Failed {
                    id: trigger.id,
                    position: trigger.position_ref.clone(),
                    reason: reason.clone(),
                });
                Outcome::Invalidated(reason)
            }
            Err(e) => self.lost(trigger, &e),
        }
    }

    async fn fire(&self, trigger: &Trigger, action: FireAction) -> Outcome {
        if !self.ctx.registry.is_actionable(&trigger.id, &action) {
            debug!(trigger_id = %trigger.id, ?action, "Fire no longer applicable");
            return Outcome::Abandoned;
        }

        info!(
            trigger_id = %trigger.id,
            position = %trigger.position_ref,
            kind = %self.kind,
            ?action,
            "Trigger condition met, sending order"
        );

        match self.send(trigger, &action).await {
            Ok(()) => self.fired(trigger, &action).await,
            Err(e) => self.gateway_failed(trigger, &e).await,
        }
    }

    async fn send(&self, trigger: &Trigger, action: &FireAction) -> Result<(), GatewayError> {
        let gateway = &self.ctx.gateway;
        let position = &trigger.position_ref;
        let call = async {
            match action {
                FireAction::SetStopLoss { price } => gateway.set_stop_loss(position, *price).await,
                FireAction::CloseFraction { fraction, .. } => gateway.close_fraction(position, *fraction).await,
            }
        };
        match timeout(self.ctx.config.gateway_timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(self.ctx.config.gateway_timeout_ms)),
        }
    }

    async fn fired(&self, trigger: &Trigger, action: &FireAction) -> Outcome {
        let updated = match self.ctx.registry.record_fire(&trigger.id, action).await {
            Ok(updated) => updated,
            Err(EngineError::NotFound(_)) => {
                warn!(
                    trigger_id = %trigger.id,
                    position = %trigger.position_ref,
                    ?action,
                    "Trigger removed while its order was in flight; fire abandoned"
                );
                return Outcome::Abandoned;
            }
            Err(e) => return self.lost(trigger, &e),
        };

        let at = updated.last_evaluated_at.unwrap_or_else(Utc::now);
        let outcome = match action {
            FireAction::SetStopLoss { .. } => Outcome::Fired,
            FireAction::CloseFraction { level, fraction } => {
                info!(
                    trigger_id = %trigger.id,
                    position = %trigger.position_ref,
                    level,
                    fraction = %fraction,
                    "Take-profit level filled"
                );
                self.emit(TriggerEvent::LevelFired {
                    id: trigger.id,
                    position: trigger.position_ref.clone(),
                    level: *level,
                    fraction: *fraction,
                    timestamp: at,
                });
                Outcome::LevelFired { level: *level }
            }
        };

        if updated.state == TriggerState::Fired {
            info!(trigger_id = %trigger.id, position = %trigger.position_ref, kind = %self.kind, "Trigger fired");
            self.emit(TriggerEvent::Fired {
                id: trigger.id,
                position: trigger.position_ref.clone(),
                kind: self.kind,
                timestamp: updated.fired_at.unwrap_or(at),
            });
        }
        outcome
    }

    async fn gateway_failed(&self, trigger: &Trigger, error: &GatewayError) -> Outcome {
        let max = self.ctx.config.max_gateway_retries;
        let updated = match self
            .ctx
            .registry
            .record_gateway_failure(&trigger.id, &error.to_string(), max)
            .await
        {
            Ok(updated) => updated,
            Err(EngineError::NotFound(_)) => {
                warn!(trigger_id = %trigger.id, error = %error, "Trigger removed while its order was in flight");
                return Outcome::Abandoned;
            }
            Err(e) => return self.lost(trigger, &e),
        };

        if let TriggerState::Failed { reason } = &updated.state {
            error!(
                trigger_id = %trigger.id,
                position = %trigger.position_ref,
                attempts = updated.gateway_failures,
                error = %error,
                "Order gateway exhausted retries, trigger failed"
            );
            self.emit(TriggerEvent::Failed {
                id: trigger.id,
                position: trigger.position_ref.clone(),
                reason: reason.clone(),
            });
            return Outcome::Exhausted;
        }

        warn!(
            trigger_id = %trigger.id,
            position = %trigger.position_ref,
            attempts = updated.gateway_failures,
            max,
            error = %error,
            "Order rejected, will retry next cycle"
        );
        Outcome::GatewayFailed {
            attempts: updated.gateway_failures,
        }
    }

    fn lost(&self, trigger: &Trigger, error: &EngineError) -> Outcome {
        debug!(trigger_id = %trigger.id, kind = %self.kind, error = %error, "Trigger vanished mid-cycle");
        Outcome::Skipped
    }

    fn emit(&self, event: TriggerEvent) {
        // No subscribers is fine.
        let _ = self.ctx.events.send(event);
    }
}
