//! medvault server binary.
//!
//! Reads `medvault.toml` (or the path given with `--config`), opens the
//! SQLite store, and serves the JSON API over HTTP.
//!
//! # Secret hashing
//!
//! To print the argon2 PHC string for a secret:
//!
//! ```
//! cargo run -p medvault-server -- --hash-secret
//! ```

mod config;

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use medvault_core::{
  consent::LedgerEvent, credential::hash_secret, store::ExchangeStore,
};
use medvault_store_sqlite::SqliteStore;
use tokio::{net::TcpListener, sync::broadcast};
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;

#[derive(Parser)]
#[command(author, version, about = "medvault consent-gated record exchange")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "medvault.toml")]
  config: PathBuf,

  /// Print the argon2 hash for a secret entered on stdin and exit.
  #[arg(long)]
  hash_secret: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Helper mode: hash a secret and exit.
  if cli.hash_secret {
    let secret = read_secret()?;
    let phc = hash_secret(&secret).context("failed to hash secret")?;
    println!("{phc}");
    return Ok(());
  }

  let server_cfg = ServerConfig::load(&cli.config)?;

  let store_path = &server_cfg.store_path;
  let store = SqliteStore::open(store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  tokio::spawn(log_ledger(store.subscribe()));

  let app = axum::Router::new()
    .merge(medvault_api::api_router(Arc::new(store)))
    .layer(TraceLayer::new_for_http());

  let address = server_cfg.address();
  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// Log every committed ledger change until the store goes away.
async fn log_ledger(mut events: broadcast::Receiver<LedgerEvent>) {
  loop {
    match events.recv().await {
      Ok(LedgerEvent::Filed(r)) => tracing::info!(
        request_id = %r.request_id,
        kind = ?r.kind(),
        subject_key = %r.subject_key,
        institution_id = %r.institution_id,
        "consent request filed"
      ),
      Ok(LedgerEvent::Resolved(r)) => tracing::info!(
        request_id = %r.request_id,
        kind = ?r.kind(),
        status = ?r.status,
        "consent request resolved"
      ),
      Err(broadcast::error::RecvError::Lagged(skipped)) => {
        tracing::warn!(skipped, "ledger log fell behind");
      }
      Err(broadcast::error::RecvError::Closed) => break,
    }
  }
}

/// Read a secret from stdin.
fn read_secret() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  print!("Secret: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  io::stdin().lock().read_line(&mut line)?;
  Ok(line.trim_end_matches(['\n', '\r']).to_string())
}
