//! In-process venue that fills against a settable quote book.
//!
//! Makes zero network calls. Positions, quotes and fault switches are all driven
//! by the caller, which makes it the venue of choice for demos and engine tests.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{debug, info, warn};

use trade_guard_core::{
    FeedError, GatewayError, OrderGateway, PositionRef, PositionState, PriceFeed, Side,
};

use crate::types::{LotRules, PaperOrder, PaperPosition, Quote};

#[derive(Debug, Default)]
struct Book {
    positions: HashMap<PositionRef, PaperPosition>,
    quotes: HashMap<String, Quote>,
    orders: Vec<PaperOrder>,
    next_ticket: u64,
}

/// Simulated broker implementing both [`PriceFeed`] and [`OrderGateway`].
#[derive(Debug)]
pub struct PaperVenue {
    lots: LotRules,
    book: Mutex<Book>,
    unreachable: AtomicBool,
    reject_next: AtomicU32,
}

impl Default for PaperVenue {
    fn default() -> Self {
        Self::new(LotRules::default())
    }
}

impl PaperVenue {
    #[must_use]
    pub fn new(lots: LotRules) -> Self {
        Self {
            lots,
            book: Mutex::new(Book {
                next_ticket: 100_001,
                ..Book::default()
            }),
            unreachable: AtomicBool::new(false),
            reject_next: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub const fn lot_rules(&self) -> LotRules {
        self.lots
    }

    pub fn set_quote(&self, symbol: &str, bid: Decimal, ask: Decimal) {
        self.book
            .lock()
            .quotes
            .insert(symbol.to_string(), Quote::new(bid, ask));
    }

    #[must_use]
    pub fn quote(&self, symbol: &str) -> Option<Quote> {
        self.book.lock().quotes.get(symbol).copied()
    }

    /// Opens a position and returns its ticket.
    pub fn open_position(
        &self,
        symbol: &str,
        side: Side,
        size: Decimal,
        entry_price: Decimal,
    ) -> PositionRef {
        let mut book = self.book.lock();
        let ticket = PositionRef::new(book.next_ticket.to_string());
        book.next_ticket += 1;
        book.positions.insert(
            ticket.clone(),
            PaperPosition {
                ticket: ticket.clone(),
                symbol: symbol.to_string(),
                side,
                size,
                entry_price,
                stop_loss: None,
                opened_at: Utc::now(),
            },
        );
        info!(position = %ticket, symbol, %side, %size, entry = %entry_price, "Paper position opened");
        ticket
    }

    /// Closes a position outside the engine, as a manual close or a stop-out would.
    pub fn close_position(&self, ticket: &PositionRef) -> Option<PaperPosition> {
        let closed = self.book.lock().positions.remove(ticket);
        if closed.is_some() {
            info!(position = %ticket, "Paper position closed externally");
        }
        closed
    }

    #[must_use]
    pub fn position(&self, ticket: &PositionRef) -> Option<PaperPosition> {
        self.book.lock().positions.get(ticket).cloned()
    }

    /// Every order the venue accepted, oldest first.
    #[must_use]
    pub fn orders(&self) -> Vec<PaperOrder> {
        self.book.lock().orders.clone()
    }

    #[must_use]
    pub fn orders_for(&self, ticket: &PositionRef) -> Vec<PaperOrder> {
        self.book
            .lock()
            .orders
            .iter()
            .filter(|o| o.ticket() == ticket)
            .cloned()
            .collect()
    }

    /// While set, the feed reports `Unavailable` and every order fails as unreachable.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Rejects the next `count` order calls.
    pub fn reject_next(&self, count: u32) {
        self.reject_next.store(count, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> bool {
        !self.unreachable.load(Ordering::SeqCst)
    }

    fn take_injected_rejection(&self) -> bool {
        self.reject_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn gateway_precheck(&self) -> Result<(), GatewayError> {
        if !self.check_reachable() {
            return Err(GatewayError::Unavailable("paper venue offline".to_string()));
        }
        if self.take_injected_rejection() {
            return Err(GatewayError::rejected("requote"));
        }
        Ok(())
    }

    fn round_to_step(&self, volume: Decimal) -> Decimal {
        if self.lots.lot_step <= Decimal::ZERO {
            return volume;
        }
        (volume / self.lots.lot_step).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            * self.lots.lot_step
    }
}

#[async_trait]
impl PriceFeed for PaperVenue {
    async fn current_state(&self, position: &PositionRef) -> Result<PositionState, FeedError> {
        if !self.check_reachable() {
            return Err(FeedError::Unavailable("paper venue offline".to_string()));
        }

        let book = self.book.lock();
        let Some(pos) = book.positions.get(position) else {
            return Ok(PositionState::closed());
        };
        let quote = book
            .quotes
            .get(&pos.symbol)
            .ok_or_else(|| FeedError::Unavailable(format!("no quote for {}", pos.symbol)))?;

        Ok(PositionState {
            entry_price: pos.entry_price,
            current_price: quote.mark(pos.side),
            side: pos.side,
            size: pos.size,
            exists: true,
        })
    }
}

#[async_trait]
impl OrderGateway for PaperVenue {
    async fn set_stop_loss(&self, position: &PositionRef, price: Decimal) -> Result<(), GatewayError> {
        self.gateway_precheck()?;

        let mut book = self.book.lock();
        let Book {
            positions,
            quotes,
            orders,
            ..
        } = &mut *book;

        let pos = positions
            .get_mut(position)
            .ok_or_else(|| GatewayError::rejected(format!("position {position} not found")))?;
        let quote = quotes
            .get(&pos.symbol)
            .ok_or_else(|| GatewayError::Unavailable(format!("no quote for {}", pos.symbol)))?;

        let mark = quote.mark(pos.side);
        let protective = match pos.side {
            Side::Long => price < mark,
            Side::Short => price > mark,
        };
        if !protective {
            warn!(position = %position, stop = %price, %mark, "Paper stop rejected: wrong side of market");
            return Err(GatewayError::rejected(format!(
                "invalid stop {price} for {} position marked at {mark}",
                pos.side
            )));
        }

        pos.stop_loss = Some(price);
        orders.push(PaperOrder::StopLoss {
            ticket: position.clone(),
            price,
            at: Utc::now(),
        });
        info!(position = %position, stop = %price, "Paper stop-loss modified");
        Ok(())
    }

    async fn close_fraction(&self, position: &PositionRef, fraction: Decimal) -> Result<(), GatewayError> {
        self.gateway_precheck()?;

        if fraction <= Decimal::ZERO || fraction > Decimal::ONE {
            return Err(GatewayError::rejected(format!("close fraction {fraction} outside (0, 1]")));
        }

        let volume_raw;
        let volume;
        let price;
        {
            let book = self.book.lock();
            let pos = book
                .positions
                .get(position)
                .ok_or_else(|| GatewayError::rejected(format!("position {position} not found")))?;
            let quote = book
                .quotes
                .get(&pos.symbol)
                .ok_or_else(|| GatewayError::Unavailable(format!("no quote for {}", pos.symbol)))?;

            volume_raw = pos.size * fraction;
            volume = self.round_to_step(volume_raw).min(pos.size);
            price = quote.mark(pos.side);

            if volume < self.lots.min_lot {
                return Err(GatewayError::rejected(format!(
                    "volume {volume} below minimum lot {}",
                    self.lots.min_lot
                )));
            }
            let remaining = pos.size - volume;
            if remaining > Decimal::ZERO && remaining < self.lots.min_lot {
                return Err(GatewayError::rejected(format!(
                    "remaining size {remaining} would be below minimum lot {}",
                    self.lots.min_lot
                )));
            }
        }

        let mut book = self.book.lock();
        let fully_closed = match book.positions.get_mut(position) {
            Some(pos) => {
                pos.size -= volume;
                pos.size <= Decimal::ZERO
            }
            None => return Err(GatewayError::rejected(format!("position {position} not found"))),
        };
        if fully_closed {
            book.positions.remove(position);
        }
        book.orders.push(PaperOrder::Close {
            ticket: position.clone(),
            volume,
            price,
            at: Utc::now(),
        });

        debug!(position = %position, requested = %volume_raw, "Paper close volume rounded");
        info!(
            position = %position,
            %volume,
            %price,
            fully_closed,
            "Paper partial close filled"
        );
        Ok(())
    }
}
