//! Paper trading venue for trade protection triggers.
//!
//! [`PaperVenue`] keeps positions and bid/ask quotes in memory and serves both
//! the price feed and the order gateway from them. No broker is contacted.

pub mod types;
pub mod venue;

pub use types::{LotRules, PaperOrder, PaperPosition, Quote};
pub use venue::PaperVenue;
