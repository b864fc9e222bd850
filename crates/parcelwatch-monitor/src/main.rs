use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use parcelwatch_core::config::ParcelwatchConfig;
use parcelwatch_monitor::{build_notifier, CheckEngine, EngineSettings, HttpTrackingClient};
use parcelwatch_scheduler::{canonical_city, RouteTable, VerificationScheduler};
use parcelwatch_subscriptions::SubscriptionManager;
use tracing::info;

const DEFAULT_LOG_FILTER: &str = "parcelwatch=info,parcelwatch_monitor=info,\
                                  parcelwatch_scheduler=info,parcelwatch_subscriptions=info";

#[derive(Parser, Debug)]
#[command(name = "parcelwatch", version, about = "Watch parcel shipments and push an alert on arrival")]
struct Cli {
    /// Config file (default: $PARCELWATCH_CONFIG or ~/.parcelwatch/parcelwatch.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check due shipments on a fixed interval until interrupted
    Run,
    /// Run a single check cycle and print its report as JSON
    Check,
    /// Start tracking a shipment for a push subscriber
    Subscribe {
        tracking_number: String,
        /// Push-provider subscription id of the device
        #[arg(long)]
        user: String,
        #[arg(long)]
        phone: Option<String>,
    },
    /// Show the active subscription of a shipment
    Status { tracking_number: String },
    /// Stop tracking a shipment
    Cancel { tracking_number: String },
    /// Print subscription counters
    Stats,
    /// Show the expected travel time between two cities
    Route { origin: String, destination: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();

    let cli = Cli::parse();

    // explicit flag > PARCELWATCH_CONFIG env > ~/.parcelwatch/parcelwatch.toml
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("PARCELWATCH_CONFIG").ok());
    let config = ParcelwatchConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        ParcelwatchConfig::default()
    });

    let routes = RouteTable::from_config(&config.routes);

    // no database needed for a route lookup
    if let Command::Route {
        origin,
        destination,
    } = &cli.command
    {
        let hours = routes.resolve_travel_hours(origin, destination);
        let known = routes.lookup(origin, destination).is_some();
        println!(
            "{}",
            serde_json::json!({
                "origin": canonical_city(origin),
                "destination": canonical_city(destination),
                "hours": hours,
                "known_route": known,
            })
        );
        return Ok(());
    }

    let engine = build_engine(&config, routes)?;

    match cli.command {
        Command::Run => {
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received");
                }
                let _ = shutdown_tx.send(true);
            });
            engine.run(shutdown_rx).await;
        }
        Command::Check => {
            let report = engine.run_cycle(Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Subscribe {
            tracking_number,
            user,
            phone,
        } => {
            let sub = engine
                .subscribe(&tracking_number, &user, phone)
                .await
                .with_context(|| format!("subscribing to {tracking_number}"))?;
            println!("{}", serde_json::to_string_pretty(&sub)?);
        }
        Command::Status { tracking_number } => {
            let sub = engine.status(&tracking_number)?;
            let log = engine.store().verification_log(&sub.id)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "subscription": sub,
                    "checks": log,
                }))?
            );
        }
        Command::Cancel { tracking_number } => {
            let n = engine.cancel(&tracking_number)?;
            println!("cancelled {n} subscription(s) for {tracking_number}");
        }
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&engine.stats()?)?);
        }
        Command::Route { .. } => {}
    }

    Ok(())
}

fn build_engine(config: &ParcelwatchConfig, routes: RouteTable) -> anyhow::Result<CheckEngine> {
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)
        .with_context(|| format!("opening database {db_path}"))?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    let store = SubscriptionManager::new(db)?;

    let scheduler = VerificationScheduler::new(&config.schedule, routes);
    let tracker = HttpTrackingClient::new(&config.tracking)?;
    let notifier = build_notifier(&config.notifications);

    Ok(CheckEngine::new(
        Arc::new(store),
        Arc::new(scheduler),
        Arc::new(tracker),
        notifier,
        EngineSettings::from_config(config),
    ))
}

/// Create the parent directory for a file path if it doesn't exist.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }
}
