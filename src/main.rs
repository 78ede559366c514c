use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing::{error, info};

use stateset_sourcing as sourcing;
use sourcing::events::EventSender;
use sourcing::scenario::Scenario;
use sourcing::services::db_ledger::DbMovementLedger;
use sourcing::services::reservation_scheduler::ReservationScheduler;

#[derive(Parser)]
#[command(
    name = "stateset-sourcing",
    about = "Multi-warehouse sourcing and fulfillment routing",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Confirm an order described in a JSON scenario against in-memory stock
    Simulate {
        #[arg(long, help = "Path to the scenario JSON file")]
        scenario: PathBuf,
        #[arg(
            long,
            action = ArgAction::SetTrue,
            help = "Print the Prometheus metrics gathered during the run"
        )]
        metrics: bool,
    },
    /// Apply pending database migrations
    Migrate,
    /// Run one reservation pass over the database ledger
    Reserve {
        #[arg(
            long,
            action = ArgAction::SetTrue,
            help = "Keep running passes on the configured interval"
        )]
        watch: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = sourcing::config::load_config().context("failed to load configuration")?;
    sourcing::config::init_tracing(&cfg.log_level, cfg.log_json);
    sourcing::metrics::init();

    match cli.command {
        Commands::Simulate { scenario, metrics } => {
            let raw = fs::read_to_string(&scenario)
                .with_context(|| format!("failed to read scenario {}", scenario.display()))?;
            let scenario = Scenario::from_json(&raw)?.with_defaults(
                cfg.selector_settings(),
                cfg.transit_mode(),
                cfg.fulfillment_options(),
            );

            let (events, rx) = EventSender::channel(cfg.event_channel_capacity);
            let worker = tokio::spawn(sourcing::events::process_events(rx));

            let outcome = scenario.run(Some(events)).await;
            // Every sender is gone once the run returns; let the log drain.
            if let Err(e) = worker.await {
                error!("event logger error: {}", e);
            }

            let outcome = outcome.map_err(|e| {
                error!("Simulation failed: {}", e);
                e
            })?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);

            if metrics {
                println!("{}", sourcing::metrics::gather()?);
            }
        }
        Commands::Migrate => {
            sourcing::migrator::run_migration(&cfg.database_url)
                .await
                .context("failed to run migrations")?;
            info!("Database is up to date");
        }
        Commands::Reserve { watch } => {
            let db = sourcing::db::establish_connection_from_app_config(&cfg).await?;
            let ledger = Arc::new(DbMovementLedger::new(Arc::new(db)));

            if watch {
                let handle = ReservationScheduler::start(ledger, cfg.reservation_interval());
                tokio::signal::ctrl_c()
                    .await
                    .context("failed to listen for shutdown signal")?;
                handle.abort();
                info!("Reservation scheduler stopped");
            } else {
                let summary = ReservationScheduler::new(ledger).run_once().await?;
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
        }
    }

    Ok(())
}
