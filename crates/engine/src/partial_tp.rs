//! Partial take-profit ladder.

use rust_decimal::Decimal;
use std::collections::BTreeSet;

use trade_guard_core::{PositionState, TakeProfitLevel};

use crate::evaluator::FireAction;

/// Picks the lowest unfired level whose distance has been reached.
///
/// At most one level is returned per call even when price has gapped past several,
/// so each fire stays a single order.
#[must_use]
pub fn check(
    levels: &[TakeProfitLevel],
    fired: &BTreeSet<usize>,
    position: &PositionState,
) -> Option<FireAction> {
    if position.size <= Decimal::ZERO {
        return None;
    }

    let moved = position.favorable_move();
    let (index, level) = levels
        .iter()
        .enumerate()
        .filter(|(index, _)| !fired.contains(index))
        .find(|(_, level)| moved >= level.trigger_distance)?;

    tracing::debug!(
        level = index,
        distance = %level.trigger_distance,
        moved = %moved,
        fraction = %level.close_fraction,
        "Take-profit level reached"
    );
    Some(FireAction::CloseFraction {
        level: index,
        fraction: level.close_fraction,
    })
}
