//! Paper-trading walkthrough of the trigger engine.
//!
//! Opens one position on an in-process paper venue, attaches the requested
//! triggers, then steps the quote along a fixed price path while the
//! supervisor's watchers run. Nothing is written to the configured store.

use anyhow::{bail, Context, Result};
use clap::Args;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::broadcast;

use trade_guard_core::{AppConfig, PositionRef, Side, TakeProfitLevel, TriggerDefinition, TriggerEvent};
use trade_guard_engine::Supervisor;
use trade_guard_paper::{PaperOrder, PaperVenue};
use trade_guard_store::MemoryStore;

use super::triggers::{describe, parse_level};

/// Arguments for the demo command.
#[derive(Args, Debug, Clone)]
pub struct DemoArgs {
    /// Instrument name for the paper position
    #[arg(long, default_value = "EURUSD")]
    pub symbol: String,

    /// Entry price
    #[arg(long)]
    pub entry: Decimal,

    /// Position direction (long or short)
    #[arg(long)]
    pub side: Side,

    /// Position size in lots
    #[arg(long)]
    pub size: Decimal,

    /// Comma-separated price path, one step per poll interval
    #[arg(long, value_delimiter = ',', required = true)]
    pub prices: Vec<Decimal>,

    /// Attach a breakeven trigger at this favorable distance
    #[arg(long)]
    pub breakeven: Option<Decimal>,

    /// Breakeven stop offset beyond entry
    #[arg(long, default_value = "0")]
    pub offset: Decimal,

    /// Attach a partial take-profit level as distance:fraction (repeatable)
    #[arg(long = "level", value_parser = parse_level)]
    pub levels: Vec<TakeProfitLevel>,

    /// Polls to wait at each price step
    #[arg(long, default_value_t = 2)]
    pub polls_per_step: u32,
}

impl DemoArgs {
    fn definitions(&self, position: &PositionRef) -> Vec<TriggerDefinition> {
        let mut definitions = Vec::new();
        if let Some(distance) = self.breakeven {
            definitions.push(TriggerDefinition::breakeven(position.clone(), distance, self.offset));
        }
        if !self.levels.is_empty() {
            definitions.push(TriggerDefinition::partial_take_profit(
                position.clone(),
                self.levels.clone(),
            ));
        }
        definitions
    }
}

/// Runs the demo command.
///
/// # Errors
/// Returns an error if no trigger was requested or a trigger is rejected.
pub async fn run_demo(config: &AppConfig, args: DemoArgs) -> Result<()> {
    if args.breakeven.is_none() && args.levels.is_empty() {
        bail!("nothing to watch: pass --breakeven and/or at least one --level");
    }

    let venue = Arc::new(PaperVenue::default());
    venue.set_quote(&args.symbol, args.entry, args.entry);
    let position = venue.open_position(&args.symbol, args.side, args.size, args.entry);
    println!(
        "Opened paper position {position}: {} {} {} @ {}",
        args.side, args.size, args.symbol, args.entry
    );

    let mut supervisor = Supervisor::new(
        Arc::new(MemoryStore::new()),
        venue.clone(),
        venue.clone(),
        config.engine.clone(),
    )
    .await?;
    let printer = tokio::spawn(print_events(supervisor.subscribe()));

    for definition in args.definitions(&position) {
        let condition = definition.condition.to_string();
        supervisor
            .add_trigger(definition)
            .await
            .with_context(|| format!("trigger {condition} rejected"))?;
    }

    supervisor.start();
    let step = config.engine.poll_interval() * args.polls_per_step.max(1);
    for price in &args.prices {
        venue.set_quote(&args.symbol, *price, *price);
        tracing::debug!(price = %price, "Price step");
        println!("price {price}");
        tokio::time::sleep(step).await;
    }
    supervisor.shutdown().await;

    println!();
    for trigger in supervisor.list_triggers(Some(&position)) {
        println!("{}", describe(&trigger));
    }
    for order in venue.orders_for(&position) {
        println!("{}", describe_order(&order));
    }
    match venue.position(&position) {
        Some(open) => println!(
            "Position {position}: {} lots remaining, stop {}",
            open.size,
            open.stop_loss.map_or_else(|| "none".to_string(), |s| s.to_string())
        ),
        None => println!("Position {position}: fully closed"),
    }

    drop(supervisor);
    if let Err(e) = printer.await {
        tracing::warn!(error = %e, "Event printer ended abnormally");
    }
    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<TriggerEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => println!("  {}", describe_event(&event)),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Event printer fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn describe_event(event: &TriggerEvent) -> String {
    match event {
        TriggerEvent::Added { id, kind, .. } => format!("{id} added ({kind})"),
        TriggerEvent::Removed { id, .. } => format!("{id} removed"),
        TriggerEvent::Armed { id, .. } => format!("{id} armed"),
        TriggerEvent::LevelFired {
            id, level, fraction, ..
        } => format!("{id} level {level} closed {fraction} of remaining"),
        TriggerEvent::Fired { id, kind, .. } => format!("{id} fired ({kind})"),
        TriggerEvent::Cancelled { id, reason, .. } => format!("{id} cancelled: {reason}"),
        TriggerEvent::Failed { id, reason, .. } => format!("{id} failed: {reason}"),
        TriggerEvent::FeedUnavailable { id, cycles, .. } => {
            format!("{id} feed unavailable for {cycles} polls")
        }
        TriggerEvent::WatcherRestarted { kind, .. } => format!("{kind} watcher restarted"),
    }
}

fn describe_order(order: &PaperOrder) -> String {
    match order {
        PaperOrder::StopLoss { price, at, .. } => {
            format!("{} stop moved to {price}", at.format("%H:%M:%S%.3f"))
        }
        PaperOrder::Close {
            volume, price, at, ..
        } => format!("{} closed {volume} lots @ {price}", at.format("%H:%M:%S%.3f")),
    }
}
