use clap::Parser;
use tracing::info;

use xvenue_arb::cli::{Cli, Commands};
use xvenue_arb::{AppConfig, Result};

mod main_runtime;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config).unwrap_or_else(|e| {
        eprintln!("warning: failed to load config from {} ({e}), using defaults", cli.config);
        AppConfig::default_config(cli.dry_run, "default")
    });
    if cli.dry_run {
        config.runtime.dry_run = true;
    }

    match cli.command {
        Commands::Run => {
            main_runtime::init_logging(&config);
            info!("starting xvenue-arb engine, dry_run={}", config.runtime.dry_run);
            let engine = xvenue_arb::bootstrap(config).await?;
            xvenue_arb::run(engine).await?;
        }
        Commands::Scan => {
            main_runtime::init_logging_simple();
            let engine = xvenue_arb::bootstrap(config).await?;
            for pair in &engine.pairs {
                engine.scanner.scan_pair(pair);
            }
            let snapshot = engine.scanner.snapshot();
            if snapshot.is_empty() {
                println!("no opportunities found across {} matched pairs", engine.pairs.len());
            } else {
                for opp in &snapshot {
                    println!("{}", serde_json::to_string(opp).unwrap_or_default());
                }
            }
        }
        Commands::Status => {
            main_runtime::init_logging_simple();
            let engine = xvenue_arb::bootstrap(config).await?;
            let tasks = engine.store.list();
            if tasks.is_empty() {
                println!("no tasks in store");
            } else {
                for task in &tasks {
                    println!(
                        "{} market={} status={} filled={} hedged={}",
                        task.id,
                        task.market_id,
                        task.status.as_str(),
                        task.predict_filled_qty,
                        task.hedged_qty,
                    );
                }
            }
        }
    }

    Ok(())
}
