use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

mod api;
mod channel;
mod config;
mod db;
mod dispatch;
mod error;
mod evaluator;
mod ingest;
mod journal;
mod models;
mod monitor;
mod registry;
mod replay;
mod report;
mod roster;

use crate::channel::PushChannel;
use crate::config::MonitorConfig;
use crate::monitor::Monitor;

#[derive(Parser)]
#[command(name = "glywatch-monitor")]
#[command(about = "Glucose monitoring, alerting and caregiver fan-out service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitoring HTTP API
    Serve {
        #[arg(long, default_value = "0.0.0.0:8000")]
        bind: SocketAddr,
        /// Preload patients and contacts from a roster CSV
        #[arg(long)]
        roster: Option<PathBuf>,
    },
    /// Create or upgrade the journal schema
    InitDb,
    /// Load a demo roster into the journal
    Seed,
    /// Replay a readings CSV through the evaluator and print transitions
    Evaluate {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Generate a markdown glucose report from a readings CSV
    Report {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();
    let config = MonitorConfig::from_env().context("invalid monitor configuration")?;

    match cli.command {
        Commands::Serve { bind, roster } => {
            let journal = match std::env::var("DATABASE_URL") {
                Ok(url) => Some(connect(&url).await?),
                Err(_) => {
                    tracing::info!("DATABASE_URL not set, running without a journal");
                    None
                }
            };
            serve(config, bind, roster, journal).await?;
        }
        Commands::InitDb => {
            let pool = connect(&database_url()?).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect(&database_url()?).await?;
            db::seed(&pool).await?;
            println!("Seed roster inserted.");
        }
        Commands::Evaluate { csv } => {
            let rows = replay::read_readings_csv(&csv)?;
            let transitions = replay::replay(&rows, &config);

            if transitions.is_empty() {
                println!("No classification changes across {} readings.", rows.len());
                return Ok(());
            }

            println!("Classification changes:");
            for t in transitions.iter() {
                println!(
                    "- {} at {}: {:.0} mg/dL {} -> {} (trend {})",
                    t.patient,
                    t.captured_at.to_rfc3339(),
                    t.value,
                    t.previous.classification,
                    t.current.classification,
                    t.current.trend
                );
            }
        }
        Commands::Report { csv, out } => {
            let rows = replay::read_readings_csv(&csv)?;
            let report = report::build_report(&rows, &config);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

fn database_url() -> anyhow::Result<String> {
    std::env::var("DATABASE_URL").context("DATABASE_URL must be set to a Postgres instance")
}

async fn connect(url: &str) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(url)
        .await
        .context("failed to connect to Postgres")
}

async fn serve(
    config: MonitorConfig,
    bind: SocketAddr,
    roster: Option<PathBuf>,
    journal: Option<PgPool>,
) -> anyhow::Result<()> {
    let push = Arc::new(PushChannel::new());
    let (monitor, queue) = Monitor::new(config, push.clone(), journal.clone());

    if let Some(pool) = &journal {
        let entries = db::fetch_roster(pool)
            .await
            .context("failed to load roster from journal")?;
        roster::apply_roster(&monitor, &entries).await?;
    }
    if let Some(path) = roster {
        let entries = roster::read_roster_csv(&path)?;
        roster::apply_roster(&monitor, &entries).await?;
    }

    monitor.start(queue);

    let app = api::router(api::AppState { monitor, push });
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(%bind, "Monitoring API listening");
    axum::serve(listener, app).await?;
    Ok(())
}
