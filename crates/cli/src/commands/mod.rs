//! CLI commands for the trigger engine.

pub mod demo;
pub mod triggers;

pub use demo::{run_demo, DemoArgs};
pub use triggers::{
    run_add_breakeven, run_add_partial, run_list, run_purge, run_remove, AddBreakevenArgs,
    AddPartialArgs, ListArgs, RemoveArgs,
};
