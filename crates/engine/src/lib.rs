//! Automated trade protection.
//!
//! Watches open positions and fires two kinds of triggers against them:
//! - Breakeven: move the stop-loss to entry (plus offset) after a favorable move
//! - Partial take-profit: close fractions of the position at ascending distances
//!
//! [`Supervisor`] owns the [`TriggerRegistry`] and runs one [`Watcher`] per
//! trigger kind. The [`evaluator`] decides, the watcher acts, the registry records.

pub mod breakeven;
pub mod commands;
pub mod evaluator;
pub mod handle;
pub mod partial_tp;
pub mod registry;
pub mod supervisor;
pub mod watcher;

pub use commands::SupervisorCommand;
pub use evaluator::{evaluate, Decision, FireAction};
pub use handle::SupervisorHandle;
pub use registry::TriggerRegistry;
pub use supervisor::Supervisor;
pub use watcher::{CycleReport, Outcome, Watcher, WatcherContext};
