//! The durable unit of automation intent.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::error::EngineError;
use crate::position::PositionRef;

/// Reason recorded when the target position is gone.
pub const REASON_POSITION_CLOSED: &str = "position closed";

/// Reason recorded when the order gateway kept failing.
pub const REASON_GATEWAY_EXHAUSTED: &str = "gateway exhausted retries";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerId(Uuid);

impl TriggerId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TriggerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl std::str::FromStr for TriggerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Breakeven,
    PartialTakeProfit,
}

impl TriggerKind {
    pub const ALL: [Self; 2] = [Self::Breakeven, Self::PartialTakeProfit];
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Breakeven => write!(f, "breakeven"),
            Self::PartialTakeProfit => write!(f, "partial_take_profit"),
        }
    }
}

/// One rung of a partial take-profit ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeProfitLevel {
    /// Favorable movement from entry, in normalized price units.
    pub trigger_distance: Decimal,
    /// Fraction of the *remaining* position to close, in (0, 1].
    pub close_fraction: Decimal,
}

impl TakeProfitLevel {
    #[must_use]
    pub const fn new(trigger_distance: Decimal, close_fraction: Decimal) -> Self {
        Self {
            trigger_distance,
            close_fraction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerCondition {
    /// Move the stop-loss to entry (+ offset) once price has moved `trigger_distance` in favor.
    Breakeven {
        trigger_distance: Decimal,
        #[serde(default)]
        offset: Decimal,
    },
    /// Close fractions of the position at ascending favorable distances.
    PartialTakeProfit { levels: Vec<TakeProfitLevel> },
}

impl TriggerCondition {
    #[must_use]
    pub const fn kind(&self) -> TriggerKind {
        match self {
            Self::Breakeven { .. } => TriggerKind::Breakeven,
            Self::PartialTakeProfit { .. } => TriggerKind::PartialTakeProfit,
        }
    }

    /// Checks the structural rules for this condition.
    ///
    /// # Errors
    /// Returns a human readable reason when the condition can never be acted on safely.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Breakeven {
                trigger_distance,
                offset,
            } => {
                if *trigger_distance <= Decimal::ZERO {
                    return Err(format!("trigger distance must be positive, got {trigger_distance}"));
                }
                if *offset < Decimal::ZERO {
                    return Err(format!("offset must not be negative, got {offset}"));
                }
                if offset >= trigger_distance {
                    return Err(format!(
                        "offset {offset} must be smaller than trigger distance {trigger_distance}"
                    ));
                }
                Ok(())
            }
            Self::PartialTakeProfit { levels } => {
                if levels.is_empty() {
                    return Err("partial take-profit needs at least one level".to_string());
                }
                let mut previous: Option<Decimal> = None;
                for (index, level) in levels.iter().enumerate() {
                    if level.trigger_distance <= Decimal::ZERO {
                        return Err(format!("level {index}: trigger distance must be positive"));
                    }
                    if level.close_fraction <= Decimal::ZERO || level.close_fraction > Decimal::ONE {
                        return Err(format!(
                            "level {index}: close fraction {} outside (0, 1]",
                            level.close_fraction
                        ));
                    }
                    if previous.is_some_and(|prev| level.trigger_distance <= prev) {
                        return Err(format!(
                            "level {index}: trigger distances must be strictly ascending"
                        ));
                    }
                    previous = Some(level.trigger_distance);
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for TriggerCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Breakeven {
                trigger_distance,
                offset,
            } => write!(f, "BE @ +{trigger_distance} (offset {offset})"),
            Self::PartialTakeProfit { levels } => {
                write!(f, "PTP")?;
                for level in levels {
                    write!(f, " [{} x {}]", level.trigger_distance, level.close_fraction)?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TriggerState {
    Pending,
    Armed,
    Fired,
    Cancelled { reason: String },
    Failed { reason: String },
}

impl TriggerState {
    /// Terminal states are never evaluated again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Fired | Self::Cancelled { .. } | Self::Failed { .. }
        )
    }
}

impl fmt::Display for TriggerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Armed => write!(f, "armed"),
            Self::Fired => write!(f, "fired"),
            Self::Cancelled { reason } => write!(f, "cancelled ({reason})"),
            Self::Failed { reason } => write!(f, "failed ({reason})"),
        }
    }
}

/// What the control surface submits; the engine assigns id, state and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerDefinition {
    pub position_ref: PositionRef,
    pub condition: TriggerCondition,
}

impl TriggerDefinition {
    pub fn breakeven(position_ref: PositionRef, trigger_distance: Decimal, offset: Decimal) -> Self {
        Self {
            position_ref,
            condition: TriggerCondition::Breakeven {
                trigger_distance,
                offset,
            },
        }
    }

    pub fn partial_take_profit(position_ref: PositionRef, levels: Vec<TakeProfitLevel>) -> Self {
        Self {
            position_ref,
            condition: TriggerCondition::PartialTakeProfit { levels },
        }
    }

    /// # Errors
    /// Returns `EngineError::InvalidDefinition` if the condition is malformed.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.position_ref.as_str().trim().is_empty() {
            return Err(EngineError::invalid("position reference is empty"));
        }
        self.condition.validate().map_err(EngineError::InvalidDefinition)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: TriggerId,
    pub position_ref: PositionRef,
    pub condition: TriggerCondition,
    pub state: TriggerState,
    /// Indices into the level ladder that have fired. Only grows.
    #[serde(default)]
    pub fired_levels: BTreeSet<usize>,
    /// Consecutive failed order attempts since the last successful fire.
    #[serde(default)]
    pub gateway_failures: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_evaluated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fired_at: Option<DateTime<Utc>>,
}

impl Trigger {
    /// Creates a pending trigger with a fresh id.
    #[must_use]
    pub fn new(definition: TriggerDefinition) -> Self {
        Self {
            id: TriggerId::new(),
            position_ref: definition.position_ref,
            condition: definition.condition,
            state: TriggerState::Pending,
            fired_levels: BTreeSet::new(),
            gateway_failures: 0,
            last_error: None,
            created_at: Utc::now(),
            last_evaluated_at: None,
            fired_at: None,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> TriggerKind {
        self.condition.kind()
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    #[must_use]
    pub fn level_count(&self) -> usize {
        match &self.condition {
            TriggerCondition::Breakeven { .. } => 0,
            TriggerCondition::PartialTakeProfit { levels } => levels.len(),
        }
    }

    #[must_use]
    pub fn is_level_fired(&self, index: usize) -> bool {
        self.fired_levels.contains(&index)
    }

    /// Pending becomes Armed; any other state is returned unchanged.
    #[must_use]
    pub fn armed(&self, at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        if next.state == TriggerState::Pending {
            next.state = TriggerState::Armed;
        }
        next.last_evaluated_at = Some(at);
        next
    }

    #[must_use]
    pub fn cancelled(&self, reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.state = TriggerState::Cancelled {
            reason: reason.into(),
        };
        next.last_evaluated_at = Some(at);
        next
    }

    #[must_use]
    pub fn failed(&self, reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.state = TriggerState::Failed {
            reason: reason.into(),
        };
        next.last_evaluated_at = Some(at);
        next
    }

    /// Records one more failed order attempt, failing the trigger once `max_attempts` is reached.
    #[must_use]
    pub fn with_gateway_failure(&self, error: impl Into<String>, max_attempts: u32, at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.gateway_failures = next.gateway_failures.saturating_add(1);
        next.last_error = Some(error.into());
        next.last_evaluated_at = Some(at);
        if next.gateway_failures >= max_attempts {
            next.state = TriggerState::Failed {
                reason: REASON_GATEWAY_EXHAUSTED.to_string(),
            };
        }
        next
    }

    /// Records a successful single-shot fire (breakeven).
    #[must_use]
    pub fn fired(&self, at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.state = TriggerState::Fired;
        next.gateway_failures = 0;
        next.last_error = None;
        next.last_evaluated_at = Some(at);
        next.fired_at = Some(at);
        next
    }

    /// Records a successful partial close of ladder level `index`.
    ///
    /// The trigger becomes Fired once every level has fired; until then it stays Armed.
    #[must_use]
    pub fn level_fired(&self, index: usize, at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        if index < next.level_count() {
            next.fired_levels.insert(index);
        }
        next.gateway_failures = 0;
        next.last_error = None;
        next.last_evaluated_at = Some(at);
        if next.fired_levels.len() >= next.level_count() {
            next.state = TriggerState::Fired;
            next.fired_at = Some(at);
        } else {
            next.state = TriggerState::Armed;
        }
        next
    }
}
