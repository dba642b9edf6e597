//! Trigger persistence.
//!
//! - [`JsonFileStore`]: one JSON record per trigger, replaced atomically on every save
//! - [`MemoryStore`]: volatile store with write-failure injection, for tests and dry runs

pub mod json_file;
pub mod memory;

pub use json_file::{JsonFileStore, TriggerRecord, SCHEMA_VERSION};
pub use memory::MemoryStore;
