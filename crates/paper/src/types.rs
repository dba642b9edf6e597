use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use trade_guard_core::{PositionRef, Side};

/// Volume constraints of the simulated instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotRules {
    /// Smallest volume the venue accepts, and the smallest remainder it leaves open.
    pub min_lot: Decimal,
    /// Volumes are rounded to a multiple of this.
    pub lot_step: Decimal,
}

impl Default for LotRules {
    fn default() -> Self {
        Self {
            min_lot: Decimal::new(1, 2),
            lot_step: Decimal::new(1, 2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: Decimal,
    pub ask: Decimal,
}

impl Quote {
    #[must_use]
    pub const fn new(bid: Decimal, ask: Decimal) -> Self {
        Self { bid, ask }
    }

    /// Price a position of `side` would be closed at.
    #[must_use]
    pub const fn mark(&self, side: Side) -> Decimal {
        match side {
            Side::Long => self.bid,
            Side::Short => self.ask,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperPosition {
    pub ticket: PositionRef,
    pub symbol: String,
    pub side: Side,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub opened_at: DateTime<Utc>,
}

/// Order mutation accepted by the paper venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaperOrder {
    StopLoss {
        ticket: PositionRef,
        price: Decimal,
        at: DateTime<Utc>,
    },
    Close {
        ticket: PositionRef,
        volume: Decimal,
        price: Decimal,
        at: DateTime<Utc>,
    },
}

impl PaperOrder {
    #[must_use]
    pub const fn ticket(&self) -> &PositionRef {
        match self {
            Self::StopLoss { ticket, .. } | Self::Close { ticket, .. } => ticket,
        }
    }
}
