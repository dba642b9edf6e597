//! Offline trigger management against the configured store.
//!
//! These commands never contact a venue and are meant for a stopped engine. A
//! running engine does not see an added trigger until it restarts, and its next
//! transition on a trigger re-saves the record, undoing a `remove` or `purge`.

use anyhow::{Context, Result};
use clap::Args;
use rust_decimal::Decimal;
use std::sync::Arc;

use trade_guard_core::{
    AppConfig, PositionRef, TakeProfitLevel, Trigger, TriggerDefinition, TriggerId,
};
use trade_guard_engine::TriggerRegistry;
use trade_guard_store::JsonFileStore;

/// Arguments for the list command.
#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Only show triggers attached to this position
    #[arg(long)]
    pub position: Option<String>,

    /// Print full records as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the add-breakeven command.
#[derive(Args, Debug, Clone)]
pub struct AddBreakevenArgs {
    /// Position ticket
    #[arg(long)]
    pub position: String,

    /// Favorable move from entry that arms the stop move (e.g. 0.0015)
    #[arg(long)]
    pub distance: Decimal,

    /// Extra distance beyond entry for the new stop
    #[arg(long, default_value = "0")]
    pub offset: Decimal,
}

/// Arguments for the add-partial command.
#[derive(Args, Debug, Clone)]
pub struct AddPartialArgs {
    /// Position ticket
    #[arg(long)]
    pub position: String,

    /// Ladder level as distance:fraction (repeatable, ascending distances)
    #[arg(long = "level", required = true, value_parser = parse_level)]
    pub levels: Vec<TakeProfitLevel>,
}

/// Arguments for the remove command.
#[derive(Args, Debug, Clone)]
pub struct RemoveArgs {
    /// Trigger id as printed by `list`
    pub id: TriggerId,
}

/// Parses `distance:fraction`, e.g. `0.0010:0.5`.
pub fn parse_level(raw: &str) -> Result<TakeProfitLevel, String> {
    let (distance, fraction) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected distance:fraction, got '{raw}'"))?;
    let distance: Decimal = distance
        .trim()
        .parse()
        .map_err(|e| format!("bad distance '{distance}': {e}"))?;
    let fraction: Decimal = fraction
        .trim()
        .parse()
        .map_err(|e| format!("bad fraction '{fraction}': {e}"))?;
    Ok(TakeProfitLevel::new(distance, fraction))
}

async fn open_registry(config: &AppConfig) -> Result<TriggerRegistry> {
    let store = Arc::new(JsonFileStore::new(config.store.path.clone()));
    TriggerRegistry::load(store)
        .await
        .with_context(|| format!("failed to load triggers from {}", config.store.path.display()))
}

/// One human readable line per trigger.
pub fn describe(trigger: &Trigger) -> String {
    let mut line = format!(
        "{}  {:<8} {:<20} {}",
        trigger.id,
        trigger.position_ref.to_string(),
        trigger.state.to_string(),
        trigger.condition
    );
    if !trigger.fired_levels.is_empty() {
        let fired: Vec<String> = trigger.fired_levels.iter().map(ToString::to_string).collect();
        line.push_str(&format!("  fired levels: {}", fired.join(",")));
    }
    if let Some(error) = &trigger.last_error {
        line.push_str(&format!("  last error: {error}"));
    }
    line
}

/// Runs the list command.
///
/// # Errors
/// Returns an error if the store cannot be read.
pub async fn run_list(config: &AppConfig, args: ListArgs) -> Result<()> {
    let registry = open_registry(config).await?;
    let position = args.position.map(PositionRef::new);
    let triggers = registry.list(position.as_ref());

    if args.json {
        println!("{}", serde_json::to_string_pretty(&triggers)?);
        return Ok(());
    }

    if triggers.is_empty() {
        println!("No triggers stored");
        return Ok(());
    }
    for trigger in &triggers {
        println!("{}", describe(trigger));
    }
    println!("{} trigger(s)", triggers.len());
    Ok(())
}

async fn add(config: &AppConfig, definition: TriggerDefinition) -> Result<()> {
    definition.validate()?;
    let registry = open_registry(config).await?;
    let trigger = registry
        .insert(Trigger::new(definition))
        .await
        .context("failed to persist trigger")?;
    tracing::info!(trigger_id = %trigger.id, position = %trigger.position_ref, "Trigger stored");
    println!("{}", describe(&trigger));
    Ok(())
}

/// Runs the add-breakeven command.
///
/// # Errors
/// Returns an error if the definition is invalid or cannot be persisted.
pub async fn run_add_breakeven(config: &AppConfig, args: AddBreakevenArgs) -> Result<()> {
    let definition =
        TriggerDefinition::breakeven(PositionRef::new(args.position), args.distance, args.offset);
    add(config, definition).await
}

/// Runs the add-partial command.
///
/// # Errors
/// Returns an error if the ladder is invalid or cannot be persisted.
pub async fn run_add_partial(config: &AppConfig, args: AddPartialArgs) -> Result<()> {
    let definition =
        TriggerDefinition::partial_take_profit(PositionRef::new(args.position), args.levels);
    add(config, definition).await
}

/// Runs the remove command.
///
/// # Errors
/// Returns an error for an unknown id or a failed delete.
pub async fn run_remove(config: &AppConfig, args: RemoveArgs) -> Result<()> {
    let registry = open_registry(config).await?;
    let removed = registry.remove(&args.id).await?;
    println!("Removed {}", describe(&removed));
    Ok(())
}

/// Runs the purge command.
///
/// # Errors
/// Returns an error if a record cannot be deleted.
pub async fn run_purge(config: &AppConfig) -> Result<()> {
    let registry = open_registry(config).await?;
    let purged = registry.purge_terminal().await?;
    println!("Purged {} finished trigger(s)", purged.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_level() {
        let level = parse_level("0.0010:0.5").unwrap();
        assert_eq!(level, TakeProfitLevel::new(dec!(0.0010), dec!(0.5)));

        let spaced = parse_level(" 25 : 1 ").unwrap();
        assert_eq!(spaced, TakeProfitLevel::new(dec!(25), dec!(1)));
    }

    #[test]
    fn test_parse_level_rejects_malformed_input() {
        assert!(parse_level("0.0010").unwrap_err().contains("distance:fraction"));
        assert!(parse_level("abc:0.5").unwrap_err().contains("bad distance"));
        assert!(parse_level("10:half").unwrap_err().contains("bad fraction"));
    }

    fn config_in(dir: &tempfile::TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.store.path = dir.path().join("triggers");
        config
    }

    #[tokio::test]
    async fn test_offline_add_then_remove_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = config_in(&dir);

        run_add_breakeven(
            &config,
            AddBreakevenArgs {
                position: "100001".to_string(),
                distance: dec!(0.0015),
                offset: dec!(0),
            },
        )
        .await
        .unwrap();

        let stored = open_registry(&config).await.unwrap().list(None);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].position_ref, PositionRef::new("100001"));

        run_purge(&config).await.unwrap();
        assert_eq!(open_registry(&config).await.unwrap().len(), 1);

        run_remove(&config, RemoveArgs { id: stored[0].id }).await.unwrap();
        assert!(open_registry(&config).await.unwrap().is_empty());
        assert!(run_remove(&config, RemoveArgs { id: stored[0].id }).await.is_err());
    }

    #[tokio::test]
    async fn test_offline_add_rejects_invalid_ladder() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = config_in(&dir);

        let result = run_add_partial(
            &config,
            AddPartialArgs {
                position: "100001".to_string(),
                levels: vec![
                    TakeProfitLevel::new(dec!(20), dec!(0.5)),
                    TakeProfitLevel::new(dec!(10), dec!(0.5)),
                ],
            },
        )
        .await;
        assert!(result.is_err());
        assert!(open_registry(&config).await.unwrap().is_empty());
    }

    #[test]
    fn test_describe_includes_progress() {
        let definition = TriggerDefinition::partial_take_profit(
            PositionRef::new("100001"),
            vec![
                TakeProfitLevel::new(dec!(10), dec!(0.5)),
                TakeProfitLevel::new(dec!(20), dec!(1)),
            ],
        );
        let trigger = Trigger::new(definition).level_fired(0, chrono::Utc::now());
        let line = describe(&trigger);
        assert!(line.contains("100001"));
        assert!(line.contains("fired levels: 0"));
    }
}
