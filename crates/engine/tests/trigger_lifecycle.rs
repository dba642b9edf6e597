//! Trigger lifecycle against a paper venue, one watcher cycle at a time.
//!
//! Covers:
//! - Terminal triggers are never acted on again
//! - A gapped take-profit ladder fires one level per cycle
//! - Breakeven fires exactly once at its threshold
//! - Vanished positions cancel their triggers
//! - Gateway failures exhaust into Failed
//! - Restart after a crash reproduces the stored state
//! - Removal during an in-flight order abandons the fire

mod common;

use rust_decimal_macros::dec;
use std::sync::Arc;
use tempfile::TempDir;

use common::{drain, GatedGateway, Rig, StalledGateway};
use trade_guard_core::{
    PositionRef, PriceFeed, Side, TakeProfitLevel, Trigger, TriggerCondition, TriggerDefinition,
    TriggerEvent, TriggerKind, TriggerState, TriggerStore, REASON_GATEWAY_EXHAUSTED,
    REASON_POSITION_CLOSED,
};
use trade_guard_engine::{evaluate, Decision, Outcome, TriggerRegistry, Watcher};
use trade_guard_paper::PaperOrder;
use trade_guard_store::JsonFileStore;

// =============================================================================
// Helper Functions
// =============================================================================

fn open_eurusd_long(rig: &Rig) -> PositionRef {
    rig.venue.set_quote("EURUSD", dec!(1.1000), dec!(1.1002));
    rig.venue.open_position("EURUSD", Side::Long, dec!(1.00), dec!(1.1000))
}

fn breakeven_15_pips(position: &PositionRef) -> Trigger {
    Trigger::new(TriggerDefinition::breakeven(position.clone(), dec!(0.0015), dec!(0)))
}

// =============================================================================
// Breakeven
// =============================================================================

#[tokio::test]
async fn test_breakeven_fires_once_at_threshold() {
    let rig = Rig::new();
    let position = open_eurusd_long(&rig);
    let trigger = rig.registry.insert(breakeven_15_pips(&position)).await.unwrap();
    let mut watcher = Watcher::new(TriggerKind::Breakeven, rig.context());
    let mut events = rig.events.subscribe();

    rig.venue.set_quote("EURUSD", dec!(1.1010), dec!(1.1012));
    let report = watcher.run_cycle().await;
    assert_eq!(report.outcome(&trigger.id), Some(&Outcome::Armed));
    assert!(rig.venue.orders().is_empty());
    assert_eq!(rig.store.get(&trigger.id).unwrap().state, TriggerState::Armed);

    rig.venue.set_quote("EURUSD", dec!(1.1016), dec!(1.1018));
    let report = watcher.run_cycle().await;
    assert_eq!(report.outcome(&trigger.id), Some(&Outcome::Fired));

    // Same price again: the trigger is terminal and no longer polled.
    let report = watcher.run_cycle().await;
    assert!(report.is_empty());

    let orders = rig.venue.orders_for(&position);
    assert_eq!(orders.len(), 1);
    assert!(matches!(orders[0], PaperOrder::StopLoss { price, .. } if price == dec!(1.1000)));
    assert_eq!(rig.venue.position(&position).unwrap().stop_loss, Some(dec!(1.1000)));

    let stored = rig.store.get(&trigger.id).unwrap();
    assert_eq!(stored.state, TriggerState::Fired);
    assert!(stored.fired_at.is_some());

    let events = drain(&mut events);
    assert!(matches!(events[0], TriggerEvent::Armed { .. }));
    assert!(matches!(events[1], TriggerEvent::Fired { kind: TriggerKind::Breakeven, .. }));
    assert_eq!(events.len(), 2);
}

#[tokio::test]
async fn test_terminal_triggers_stay_terminal() {
    let rig = Rig::new();
    let position = open_eurusd_long(&rig);
    let trigger = rig.registry.insert(breakeven_15_pips(&position)).await.unwrap();
    let mut watcher = Watcher::new(TriggerKind::Breakeven, rig.context());

    rig.venue.set_quote("EURUSD", dec!(1.1030), dec!(1.1032));
    watcher.run_cycle().await;
    let fired = rig.registry.get(&trigger.id).unwrap();
    assert_eq!(fired.state, TriggerState::Fired);

    for bid in [dec!(1.1040), dec!(1.0990), dec!(1.1100)] {
        rig.venue.set_quote("EURUSD", bid, bid + dec!(0.0002));
        watcher.run_cycle().await;
        let snapshot = rig.venue.current_state(&position).await.unwrap();
        assert_eq!(evaluate(&fired, &snapshot), Decision::NoAction);
    }

    assert_eq!(rig.registry.get(&trigger.id).unwrap(), fired);
    assert_eq!(rig.venue.orders().len(), 1);
}

// =============================================================================
// Partial take-profit
// =============================================================================

#[tokio::test]
async fn test_gapped_ladder_fires_one_level_per_cycle() {
    let rig = Rig::new();
    rig.venue.set_quote("XAUUSD", dec!(2000), dec!(2000.5));
    let position = rig.venue.open_position("XAUUSD", Side::Long, dec!(1.00), dec!(2000));
    let trigger = rig
        .registry
        .insert(Trigger::new(TriggerDefinition::partial_take_profit(
            position.clone(),
            vec![
                TakeProfitLevel::new(dec!(10), dec!(0.5)),
                TakeProfitLevel::new(dec!(20), dec!(0.5)),
            ],
        )))
        .await
        .unwrap();
    let mut watcher = Watcher::new(TriggerKind::PartialTakeProfit, rig.context());

    // Price gaps past both levels at once.
    rig.venue.set_quote("XAUUSD", dec!(2035), dec!(2035.5));

    let report = watcher.run_cycle().await;
    assert_eq!(report.outcome(&trigger.id), Some(&Outcome::LevelFired { level: 0 }));
    let after_first = rig.registry.get(&trigger.id).unwrap();
    assert_eq!(after_first.state, TriggerState::Armed);
    assert_eq!(after_first.fired_levels.iter().copied().collect::<Vec<_>>(), vec![0]);
    assert_eq!(rig.venue.position(&position).unwrap().size, dec!(0.50));

    let report = watcher.run_cycle().await;
    assert_eq!(report.outcome(&trigger.id), Some(&Outcome::LevelFired { level: 1 }));
    let after_second = rig.registry.get(&trigger.id).unwrap();
    assert_eq!(after_second.state, TriggerState::Fired);
    assert!(after_second.fired_levels.is_superset(&after_first.fired_levels));
    assert_eq!(after_second.fired_levels.len(), 2);
    assert_eq!(rig.venue.position(&position).unwrap().size, dec!(0.25));

    assert!(watcher.run_cycle().await.is_empty());
    assert_eq!(rig.venue.orders_for(&position).len(), 2);
}

#[tokio::test]
async fn test_dust_remainder_exhausts_instead_of_clamping() {
    let rig = Rig::new();
    rig.venue.set_quote("XAUUSD", dec!(2000), dec!(2000.5));
    let position = rig.venue.open_position("XAUUSD", Side::Long, dec!(0.015), dec!(2000));
    let trigger = rig
        .registry
        .insert(Trigger::new(TriggerDefinition::partial_take_profit(
            position.clone(),
            vec![TakeProfitLevel::new(dec!(10), dec!(0.5))],
        )))
        .await
        .unwrap();
    let mut watcher = Watcher::new(TriggerKind::PartialTakeProfit, rig.context());
    rig.venue.set_quote("XAUUSD", dec!(2015), dec!(2015.5));

    for attempt in 1..=2 {
        let report = watcher.run_cycle().await;
        assert_eq!(report.outcome(&trigger.id), Some(&Outcome::GatewayFailed { attempts: attempt }));
    }
    let report = watcher.run_cycle().await;
    assert_eq!(report.outcome(&trigger.id), Some(&Outcome::Exhausted));
    assert_eq!(rig.venue.position(&position).unwrap().size, dec!(0.015));
}

// =============================================================================
// Position and gateway failures
// =============================================================================

#[tokio::test]
async fn test_vanished_position_cancels_trigger() {
    let rig = Rig::new();
    let position = open_eurusd_long(&rig);
    let trigger = rig.registry.insert(breakeven_15_pips(&position)).await.unwrap();
    let mut watcher = Watcher::new(TriggerKind::Breakeven, rig.context());

    watcher.run_cycle().await;
    rig.venue.close_position(&position);

    let report = watcher.run_cycle().await;
    assert_eq!(report.outcome(&trigger.id), Some(&Outcome::Cancelled));
    assert_eq!(
        rig.store.get(&trigger.id).unwrap().state,
        TriggerState::Cancelled {
            reason: REASON_POSITION_CLOSED.to_string()
        }
    );

    assert!(watcher.run_cycle().await.is_empty());
}

#[tokio::test]
async fn test_gateway_failures_exhaust_into_failed() {
    let rig = Rig::new();
    let position = open_eurusd_long(&rig);
    let trigger = rig.registry.insert(breakeven_15_pips(&position)).await.unwrap();
    let mut watcher = Watcher::new(TriggerKind::Breakeven, rig.context());
    let mut events = rig.events.subscribe();

    rig.venue.set_quote("EURUSD", dec!(1.1020), dec!(1.1022));
    rig.venue.reject_next(100);

    for attempt in 1..=2 {
        let report = watcher.run_cycle().await;
        assert_eq!(report.outcome(&trigger.id), Some(&Outcome::GatewayFailed { attempts: attempt }));
    }
    let report = watcher.run_cycle().await;
    assert_eq!(report.outcome(&trigger.id), Some(&Outcome::Exhausted));

    // Not retried afterwards, even once the venue would accept.
    rig.venue.reject_next(0);
    assert!(watcher.run_cycle().await.is_empty());
    assert!(rig.venue.orders().is_empty());

    let listed = rig.registry.list(Some(&position));
    assert_eq!(
        listed[0].state,
        TriggerState::Failed {
            reason: REASON_GATEWAY_EXHAUSTED.to_string()
        }
    );
    assert!(listed[0].last_error.as_deref().unwrap_or_default().contains("requote"));

    let failed = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, TriggerEvent::Failed { .. }))
        .count();
    assert_eq!(failed, 1);
}

#[tokio::test]
async fn test_success_resets_gateway_failures() {
    let rig = Rig::new();
    rig.venue.set_quote("XAUUSD", dec!(2000), dec!(2000.5));
    let position = rig.venue.open_position("XAUUSD", Side::Long, dec!(1.00), dec!(2000));
    let trigger = rig
        .registry
        .insert(Trigger::new(TriggerDefinition::partial_take_profit(
            position.clone(),
            vec![
                TakeProfitLevel::new(dec!(10), dec!(0.5)),
                TakeProfitLevel::new(dec!(20), dec!(0.5)),
            ],
        )))
        .await
        .unwrap();
    let mut watcher = Watcher::new(TriggerKind::PartialTakeProfit, rig.context());

    rig.venue.set_quote("XAUUSD", dec!(2012), dec!(2012.5));
    rig.venue.reject_next(2);
    watcher.run_cycle().await;
    watcher.run_cycle().await;
    assert_eq!(rig.registry.get(&trigger.id).unwrap().gateway_failures, 2);

    watcher.run_cycle().await;
    let t = rig.registry.get(&trigger.id).unwrap();
    assert_eq!(t.gateway_failures, 0);
    assert!(t.is_level_fired(0));
    assert!(!t.is_terminal());
}

#[tokio::test(start_paused = true)]
async fn test_gateway_timeout_counts_as_failure() {
    let rig = Rig::new();
    let position = open_eurusd_long(&rig);
    let trigger = rig.registry.insert(breakeven_15_pips(&position)).await.unwrap();
    let mut watcher = Watcher::new(
        TriggerKind::Breakeven,
        rig.context_with(rig.venue.clone(), Arc::new(StalledGateway)),
    );

    rig.venue.set_quote("EURUSD", dec!(1.1020), dec!(1.1022));
    let report = watcher.run_cycle().await;
    assert_eq!(report.outcome(&trigger.id), Some(&Outcome::GatewayFailed { attempts: 1 }));

    let t = rig.registry.get(&trigger.id).unwrap();
    assert!(t.last_error.unwrap_or_default().contains("timed out"));
    assert_ne!(t.state, TriggerState::Fired);
}

#[tokio::test]
async fn test_unreachable_feed_skips_and_notifies_once() {
    let rig = Rig::new();
    let position = open_eurusd_long(&rig);
    let trigger = rig.registry.insert(breakeven_15_pips(&position)).await.unwrap();
    let mut watcher = Watcher::new(TriggerKind::Breakeven, rig.context());
    let mut events = rig.events.subscribe();

    rig.venue.set_unreachable(true);
    for _ in 0..5 {
        let report = watcher.run_cycle().await;
        assert_eq!(report.outcome(&trigger.id), Some(&Outcome::Unavailable));
    }
    assert_eq!(rig.registry.get(&trigger.id).unwrap().state, TriggerState::Pending);

    let notices: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            TriggerEvent::FeedUnavailable { cycles, .. } => Some(cycles),
            _ => None,
        })
        .collect();
    assert_eq!(notices, vec![3]);

    rig.venue.set_unreachable(false);
    let report = watcher.run_cycle().await;
    assert_eq!(report.outcome(&trigger.id), Some(&Outcome::Armed));
}

#[tokio::test]
async fn test_unwritable_store_does_not_cause_refire() {
    let rig = Rig::new();
    let position = open_eurusd_long(&rig);
    let trigger = rig.registry.insert(breakeven_15_pips(&position)).await.unwrap();
    let mut watcher = Watcher::new(TriggerKind::Breakeven, rig.context());

    rig.store.set_fail_writes(true);
    rig.venue.set_quote("EURUSD", dec!(1.1020), dec!(1.1022));
    let report = watcher.run_cycle().await;
    assert_eq!(report.outcome(&trigger.id), Some(&Outcome::Fired));
    assert_eq!(rig.registry.pending_writes(), 1);

    assert!(watcher.run_cycle().await.is_empty());
    assert_eq!(rig.venue.orders().len(), 1);

    rig.store.set_fail_writes(false);
    rig.registry.insert(breakeven_15_pips(&position)).await.unwrap();
    assert_eq!(rig.store.get(&trigger.id).unwrap().state, TriggerState::Fired);
}

#[tokio::test]
async fn test_corrupted_record_is_failed_not_fired() {
    let rig = Rig::new();
    let position = open_eurusd_long(&rig);
    let mut broken = breakeven_15_pips(&position);
    broken.condition = TriggerCondition::Breakeven {
        trigger_distance: dec!(0.0010),
        offset: dec!(0.0020),
    };
    rig.store.save(&broken).await.unwrap();
    let registry = Arc::new(TriggerRegistry::load(rig.store_dyn()).await.unwrap());

    let mut ctx = rig.context();
    ctx.registry = registry.clone();
    let mut watcher = Watcher::new(TriggerKind::Breakeven, ctx);

    let report = watcher.run_cycle().await;
    assert!(matches!(report.outcome(&broken.id), Some(Outcome::Invalidated(_))));
    assert!(matches!(registry.get(&broken.id).unwrap().state, TriggerState::Failed { .. }));
    assert!(rig.venue.orders().is_empty());
}

// =============================================================================
// Durability
// =============================================================================

#[tokio::test]
async fn test_restart_after_crash_reproduces_state() {
    let dir = TempDir::new().unwrap();
    let rig = Rig::new();
    let position = open_eurusd_long(&rig);

    let store: Arc<dyn TriggerStore> = Arc::new(JsonFileStore::new(dir.path()));
    let before = TriggerRegistry::load(store.clone()).await.unwrap();
    let pending = before.insert(breakeven_15_pips(&position)).await.unwrap();
    let armed = before
        .insert(breakeven_15_pips(&position))
        .await
        .unwrap();
    let armed = before.mark_armed(&armed.id).await.unwrap();
    let snapshot = before.list(None);
    drop(before);

    let reopened: Arc<dyn TriggerStore> = Arc::new(JsonFileStore::new(dir.path()));
    let after = Arc::new(TriggerRegistry::load(reopened).await.unwrap());
    assert_eq!(after.list(None), snapshot);
    assert_eq!(after.get(&pending.id).unwrap().state, TriggerState::Pending);
    assert_eq!(after.get(&armed.id).unwrap().state, TriggerState::Armed);

    let mut ctx = rig.context();
    ctx.registry = after.clone();
    let mut watcher = Watcher::new(TriggerKind::Breakeven, ctx);
    rig.venue.set_quote("EURUSD", dec!(1.1016), dec!(1.1018));
    let report = watcher.run_cycle().await;
    assert_eq!(report.count(|o| *o == Outcome::Fired), 2);
}

// =============================================================================
// Removal races
// =============================================================================

#[tokio::test]
async fn test_removal_during_inflight_order_abandons_fire() {
    let rig = Rig::new();
    let position = open_eurusd_long(&rig);
    let trigger = rig.registry.insert(breakeven_15_pips(&position)).await.unwrap();
    let gateway = Arc::new(GatedGateway::new(rig.venue.clone()));
    let mut watcher = Watcher::new(
        TriggerKind::Breakeven,
        rig.context_with(rig.venue.clone(), gateway.clone()),
    );
    let mut events = rig.events.subscribe();

    rig.venue.set_quote("EURUSD", dec!(1.1020), dec!(1.1022));
    let cycle = tokio::spawn(async move { watcher.run_cycle().await });

    gateway.entered.notified().await;
    rig.registry.remove(&trigger.id).await.unwrap();
    gateway.release.notify_one();

    let report = cycle.await.unwrap();
    assert_eq!(report.outcome(&trigger.id), Some(&Outcome::Abandoned));
    assert!(rig.registry.get(&trigger.id).is_none());
    assert!(rig.store.get(&trigger.id).is_none());
    assert!(rig.registry.list(Some(&position)).is_empty());
    assert!(!drain(&mut events)
        .iter()
        .any(|e| matches!(e, TriggerEvent::Fired { .. })));
}

#[tokio::test]
async fn test_removal_between_snapshot_and_evaluation_skips() {
    let rig = Rig::new();
    let position = open_eurusd_long(&rig);
    rig.registry.insert(breakeven_15_pips(&position)).await.unwrap();
    rig.registry.insert(breakeven_15_pips(&position)).await.unwrap();
    let order = rig.registry.active(TriggerKind::Breakeven);
    let (first, second) = (order[0].clone(), order[1].clone());
    let gateway = Arc::new(GatedGateway::new(rig.venue.clone()));
    let mut watcher = Watcher::new(
        TriggerKind::Breakeven,
        rig.context_with(rig.venue.clone(), gateway.clone()),
    );

    rig.venue.set_quote("EURUSD", dec!(1.1020), dec!(1.1022));
    let cycle = tokio::spawn(async move { watcher.run_cycle().await });

    // First trigger's order is in flight; remove the second before it is reached.
    gateway.entered.notified().await;
    rig.registry.remove(&second.id).await.unwrap();
    gateway.release.notify_one();

    let report = cycle.await.unwrap();
    assert_eq!(report.outcome(&first.id), Some(&Outcome::Fired));
    assert_eq!(report.outcome(&second.id), Some(&Outcome::Skipped));
    assert_eq!(rig.venue.orders().len(), 1);
}
