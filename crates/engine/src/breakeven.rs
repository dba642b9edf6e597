//! Breakeven rule: protect the entry once the trade is far enough in profit.

use rust_decimal::Decimal;

use trade_guard_core::PositionState;

use crate::evaluator::FireAction;

/// Returns the stop-loss move once favorable movement reaches `trigger_distance`.
///
/// The boundary counts: a move of exactly `trigger_distance` fires.
#[must_use]
pub fn check(trigger_distance: Decimal, offset: Decimal, position: &PositionState) -> Option<FireAction> {
    if position.favorable_move() < trigger_distance {
        return None;
    }

    let stop = position.side.beyond(position.entry_price, offset);
    tracing::debug!(
        entry = %position.entry_price,
        current = %position.current_price,
        side = %position.side,
        stop = %stop,
        "Breakeven condition met"
    );
    Some(FireAction::SetStopLoss { price: stop })
}
