use std::io;
use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use sqlx::sqlite::SqlitePoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod device_csv;
mod error;
mod events;
mod kinematics;
mod map_tile;
mod models;
mod report;
mod route;
mod status;
mod trail;
mod trail_log;
mod view;
mod zones;

use config::ReportConfig;
use events::StatusLog;
use models::{ReportWindow, SubjectExtract};

const MAP_FETCH_RETRIES: u32 = 3;

#[derive(Parser)]
#[command(name = "em-trail")]
#[command(
    about = "Trail reconstruction and statements for electronic monitoring subjects",
    long_about = None
)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SourceArgs {
    /// Subject (offender) id, e.g. 00/123456X
    #[arg(long)]
    offender: String,
    /// Read a tracker CSV export instead of the database
    #[arg(long)]
    csv: Option<PathBuf>,
}

#[derive(Args)]
struct WindowArgs {
    /// Window start, RFC 3339
    #[arg(long, value_parser = parse_instant)]
    from: DateTime<Utc>,
    /// Window end (exclusive), RFC 3339
    #[arg(long, value_parser = parse_instant)]
    to: DateTime<Utc>,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump everything held for a subject as JSON
    Extract {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long, default_value = "extract.json")]
        out: PathBuf,
    },
    /// Write the CSV trail log for a window
    TrailLog {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        window: WindowArgs,
        #[arg(long, default_value = "trail.csv")]
        out: PathBuf,
    },
    /// Write the markdown statement for a window
    Statement {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        window: WindowArgs,
        #[arg(long, default_value = "statement.md")]
        out: PathBuf,
        /// Also dump the report view as JSON
        #[arg(long)]
        json: Option<PathBuf>,
        /// Fetch the static route map to this file
        #[arg(long)]
        map_image: Option<PathBuf>,
    },
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

async fn load(source: &SourceArgs) -> anyhow::Result<(SubjectExtract, StatusLog)> {
    let (extract, status) = match &source.csv {
        Some(path) => {
            let export = device_csv::load_device_csv(path, &source.offender)?;
            (export.extract, export.status)
        }
        None => load_database(&source.offender).await?,
    };

    if status.is_empty() {
        info!(subject = %extract.subject_id, "no status changes on record");
    }
    Ok((extract, status))
}

async fn load_database(offender: &str) -> anyhow::Result<(SubjectExtract, StatusLog)> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must point at the monitoring extract (sqlite://...)")?;

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to open the monitoring extract")?;

    let extract = db::fetch_extract(&pool, offender).await?;
    let status = events::pair_events(&extract.subject_id, &extract.events)?;
    Ok((extract, status))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let config = ReportConfig::from_env();

    match cli.command {
        Commands::Extract { source, out } => {
            let (extract, _) = load(&source).await?;
            std::fs::write(&out, serde_json::to_string_pretty(&extract)?)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Extract written to {}.", out.display());
        }
        Commands::TrailLog {
            source,
            window,
            out,
        } => {
            let window = ReportWindow::new(window.from, window.to)?;
            let (extract, status) = load(&source).await?;
            let rows = trail_log::trail_log_rows(&extract, &status, &window, &config)?;

            if rows.is_empty() {
                println!("No positions found for this window.");
            }
            trail_log::save_trail_log(&rows, &out)?;
            println!("Trail log written to {}.", out.display());
        }
        Commands::Statement {
            source,
            window,
            out,
            json,
            map_image,
        } => {
            let window = ReportWindow::new(window.from, window.to)?;
            let (extract, status) = load(&source).await?;
            let request = map_tile::StaticMapRequest::new(&config.map)?;

            let view = view::build_view(
                &extract,
                &status,
                &window,
                &config,
                Some(&request),
                Utc::now(),
            )?;

            let saved_map = match (&map_image, &view.route) {
                (Some(target), Some(route)) => match map_tile::client() {
                    Ok(client) => {
                        let url = request.url_for(&route.encoded);
                        map_tile::save_map_image(&client, &url, target, MAP_FETCH_RETRIES).await
                    }
                    Err(e) => {
                        warn!(error = %e, "map image skipped");
                        None
                    }
                },
                (Some(_), None) => {
                    warn!("no positions in window, skipping map image");
                    None
                }
                _ => None,
            };

            if let Some(path) = &json {
                std::fs::write(path, serde_json::to_string_pretty(&view)?)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!(path = %path.display(), "wrote report view");
            }

            let statement = report::build_statement(&view, saved_map.as_deref());
            std::fs::write(&out, statement)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Statement written to {}.", out.display());
        }
    }

    Ok(())
}
