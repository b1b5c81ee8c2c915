//! `bitemp` — load a measurement table and answer bi-temporal queries, either
//! once from the command line or over HTTP.
//!
//! # Usage
//!
//! ```text
//! bitemp serve --port 5240
//! bitemp point --first-name John --last-name Doe --code 1234-5 --valid-time 2024-02-01
//! bitemp history --first-name John --last-name Doe --concept-name glucose
//! bitemp --append late-results.csv history --first-name John --last-name Doe
//! ```

mod config;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context as _, bail};
use bitemp_core::{
  CodeLookup, FactTable, HistoryQuery, PointInTimeQuery, QueryEngine, SharedFactTable,
  TimeInput, ingest,
};
use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, expand_tilde};

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(author, version, about = "Bi-temporal lab measurement queries")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml", global = true)]
  config: PathBuf,

  /// Measurement table CSV; overrides `data_path`.
  #[arg(long, global = true, value_name = "CSV")]
  data: Option<PathBuf>,

  /// Code lookup CSV; overrides `lookup_path`.
  #[arg(long, global = true, value_name = "CSV")]
  codes: Option<PathBuf>,

  /// Extra batches appended after the initial load, in order.
  #[arg(long = "append", global = true, value_name = "CSV")]
  appends: Vec<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Serve the JSON API.
  Serve {
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
  },
  /// Value of one code for a patient at a valid time.
  Point(PointArgs),
  /// Measurements for a patient that started within a valid-time range.
  History(HistoryArgs),
}

#[derive(Args)]
struct PointArgs {
  #[arg(long)]
  first_name:       String,
  #[arg(long)]
  last_name:        String,
  #[arg(long)]
  code:             String,
  /// Date (`2024-02-01`) or date-time (`2024-02-01 10:00`).
  #[arg(long)]
  valid_time:       String,
  /// As-of time; defaults to now.
  #[arg(long)]
  transaction_time: Option<String>,
}

#[derive(Args)]
struct HistoryArgs {
  #[arg(long)]
  first_name:       String,
  #[arg(long)]
  last_name:        String,
  #[arg(long)]
  code:             Option<String>,
  #[arg(long)]
  concept_name:     Option<String>,
  #[arg(long)]
  valid_start:      Option<String>,
  #[arg(long)]
  valid_end:        Option<String>,
  #[arg(long)]
  transaction_time: Option<String>,
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let mut cfg = AppConfig::load(&cli.config)?;
  if let Some(data) = &cli.data {
    cfg.data_path = expand_tilde(data);
  }
  if let Some(codes) = &cli.codes {
    cfg.lookup_path = expand_tilde(codes);
  }

  let engine = load_engine(&cfg, &cli.appends)?;

  match cli.command {
    Command::Serve { host, port } => {
      let address = format!(
        "{}:{}",
        host.unwrap_or(cfg.host),
        port.unwrap_or(cfg.port)
      );
      let app = bitemp_api::api_router(Arc::new(engine)).layer(TraceLayer::new_for_http());

      tracing::info!("Listening on http://{address}");
      let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
      axum::serve(listener, app).await.context("server error")?;
    }
    Command::Point(args) => {
      let mut query = PointInTimeQuery::new(
        args.first_name,
        args.last_name,
        args.code,
        args.valid_time,
      );
      query.transaction_time = args.transaction_time.map(TimeInput::from);

      let fact = engine.point_in_time(&query)?;
      println!("{}", serde_json::to_string_pretty(&fact)?);
    }
    Command::History(args) => {
      let query = HistoryQuery {
        first_name:       args.first_name,
        last_name:        args.last_name,
        code:             args.code,
        concept_name:     args.concept_name,
        valid_start:      args.valid_start.map(TimeInput::from),
        valid_end:        args.valid_end.map(TimeInput::from),
        transaction_time: args.transaction_time.map(TimeInput::from),
      };

      let history = engine.history(&query)?;
      println!("{}", serde_json::to_string_pretty(&history)?);
    }
  }

  Ok(())
}

/// Load the lookup and the initial table, then apply any extra batches.
/// A bad extra batch is reported and skipped; an empty initial table is fatal.
fn load_engine(cfg: &AppConfig, appends: &[PathBuf]) -> anyhow::Result<QueryEngine> {
  let lookup = Arc::new(CodeLookup::load(&cfg.lookup_path));

  let batch = ingest::read_csv(&cfg.data_path)
    .with_context(|| format!("failed to read {}", cfg.data_path.display()))?;
  let table = FactTable::build(&batch, &lookup);
  if table.is_empty() {
    bail!("no facts loaded from {}", cfg.data_path.display());
  }

  let engine = QueryEngine::new(SharedFactTable::new(table), lookup);
  for path in appends {
    let path = expand_tilde(path);
    match ingest::read_csv(&path).and_then(|batch| engine.append(&batch)) {
      Ok(report) => {
        tracing::info!(path = %path.display(), rows_added = report.rows_added, "appended batch");
      }
      Err(e) => {
        tracing::warn!(path = %path.display(), error = %e, "skipping batch");
      }
    }
  }

  Ok(engine)
}
