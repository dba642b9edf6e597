use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{AddBreakevenArgs, AddPartialArgs, DemoArgs, ListArgs, RemoveArgs};

#[derive(Parser)]
#[command(name = "trade-guard")]
#[command(about = "Breakeven and partial take-profit triggers for open positions", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true, default_value = trade_guard_core::config_loader::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored triggers
    List(ListArgs),
    /// Add a breakeven trigger to a position
    AddBreakeven(AddBreakevenArgs),
    /// Add a partial take-profit ladder to a position
    AddPartial(AddPartialArgs),
    /// Delete one trigger
    Remove(RemoveArgs),
    /// Delete every fired, cancelled or failed trigger
    Purge,
    /// Run the engine against a paper position along a scripted price path
    Demo(DemoArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = trade_guard_core::ConfigLoader::load_from(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    match cli.command {
        Commands::List(args) => commands::run_list(&config, args).await?,
        Commands::AddBreakeven(args) => commands::run_add_breakeven(&config, args).await?,
        Commands::AddPartial(args) => commands::run_add_partial(&config, args).await?,
        Commands::Remove(args) => commands::run_remove(&config, args).await?,
        Commands::Purge => commands::run_purge(&config).await?,
        Commands::Demo(args) => commands::run_demo(&config, args).await?,
    }

    Ok(())
}
