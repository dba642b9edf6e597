//! Pure trigger decisions.
//!
//! Nothing here performs I/O or mutates a trigger. The watcher feeds in a
//! trigger and a position snapshot and acts on the returned [`Decision`].

use rust_decimal::Decimal;

use trade_guard_core::{PositionState, Trigger, TriggerCondition};

use crate::{breakeven, partial_tp};

/// Order mutation a firing trigger asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireAction {
    /// Move the position's stop-loss to `price`.
    SetStopLoss { price: Decimal },
    /// Close `fraction` of the remaining size for ladder level `level`.
    CloseFraction { level: usize, fraction: Decimal },
}

impl FireAction {
    #[must_use]
    pub const fn level(&self) -> Option<usize> {
        match self {
            Self::SetStopLoss { .. } => None,
            Self::CloseFraction { level, .. } => Some(*level),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    NoAction,
    Fire(FireAction),
    /// The trigger can never be acted on safely; fail it with this reason.
    Invalidate(String),
}

/// Decides what `trigger` should do given the latest `position` snapshot.
///
/// Terminal triggers always yield [`Decision::NoAction`]. A missing position is the
/// watcher's concern (it cancels the trigger) and also yields `NoAction` here.
#[must_use]
pub fn evaluate(trigger: &Trigger, position: &PositionState) -> Decision {
    if trigger.is_terminal() {
        return Decision::NoAction;
    }

    if let Err(reason) = trigger.condition.validate() {
        return Decision::Invalidate(reason);
    }
    if let Some(index) = trigger
        .fired_levels
        .iter()
        .find(|&&index| index >= trigger.level_count())
    {
        return Decision::Invalidate(format!("fired level {index} is outside the ladder"));
    }

    if !position.exists
        || position.entry_price <= Decimal::ZERO
        || position.current_price <= Decimal::ZERO
    {
        return Decision::NoAction;
    }

    let action = match &trigger.condition {
        TriggerCondition::Breakeven {
            trigger_distance,
            offset,
        } => breakeven::check(*trigger_distance, *offset, position),
        TriggerCondition::PartialTakeProfit { levels } => {
            partial_tp::check(levels, &trigger.fired_levels, position)
        }
    };

    action.map_or(Decision::NoAction, Decision::Fire)
}
