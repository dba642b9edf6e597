use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Venue identifier of an open position (the broker ticket).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionRef(String);

impl PositionRef {
    pub fn new(ticket: impl Into<String>) -> Self {
        Self(ticket.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PositionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PositionRef {
    fn from(ticket: &str) -> Self {
        Self::new(ticket)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Signed price movement from `from` to `to`, positive when it favors this side.
    #[must_use]
    pub fn favorable_move(self, from: Decimal, to: Decimal) -> Decimal {
        match self {
            Self::Long => to - from,
            Self::Short => from - to,
        }
    }

    /// Shifts `price` by `distance` in this side's favorable direction.
    #[must_use]
    pub fn beyond(self, price: Decimal, distance: Decimal) -> Decimal {
        match self {
            Self::Long => price + distance,
            Self::Short => price - distance,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "long" | "buy" => Ok(Self::Long),
            "short" | "sell" => Ok(Self::Short),
            other => Err(format!("unknown side '{other}' (expected long or short)")),
        }
    }
}

/// What the price feed reports about a position at one instant.
///
/// Prices are already normalized to the instrument's point size by the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionState {
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub side: Side,
    pub size: Decimal,
    pub exists: bool,
}

impl PositionState {
    /// State reported for a ticket the venue no longer knows about.
    #[must_use]
    pub const fn closed() -> Self {
        Self {
            entry_price: Decimal::ZERO,
            current_price: Decimal::ZERO,
            side: Side::Long,
            size: Decimal::ZERO,
            exists: false,
        }
    }

    /// Unrealized favorable movement from entry, signed by side.
    #[must_use]
    pub fn favorable_move(&self) -> Decimal {
        self.side.favorable_move(self.entry_price, self.current_price)
    }
}
