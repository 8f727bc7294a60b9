use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use ama_server::{AmaServer, ServerSettings};
use ama_store::Database;
use ama_telemetry::{init_telemetry, parse_level, TelemetryConfig};

/// Live Q&A rooms over HTTP and WebSocket.
#[derive(Debug, Parser)]
#[command(name = "ama", version)]
struct Args {
    /// Host to bind (overrides AMA_API_HOST).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides AMA_API_PORT).
    #[arg(long)]
    port: Option<u16>,

    /// SQLite database file (overrides AMA_DATABASE_PATH).
    #[arg(long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // A missing .env file is fine.
    let dotenv = dotenvy::dotenv().ok();

    let (mut settings, rejected) = ServerSettings::from_env();
    if let Some(host) = args.host {
        settings.host = host;
    }
    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(database) = args.database {
        settings.database_path = database;
    }
    settings.validate()?;

    let mut telemetry = TelemetryConfig {
        json: settings.log_json,
        ..TelemetryConfig::default()
    };
    match parse_level(&settings.log_level) {
        Some(level) => telemetry.log_level = level,
        None => eprintln!("unknown log level {:?}, using info", settings.log_level),
    }
    init_telemetry(&telemetry)?;

    if let Some(path) = dotenv {
        tracing::debug!(path = %path.display(), "loaded .env file");
    }
    for key in &rejected {
        tracing::warn!(key = %key, "ignoring invalid environment value");
    }

    let db = Database::open(&settings.database_path)
        .with_context(|| format!("failed to open database at {}", settings.database_path.display()))?;
    tracing::info!(path = %settings.database_path.display(), "database opened");

    let server = AmaServer::new(settings, db);
    let (addr, serve_handle) = server.listen().await?;
    tracing::info!(addr = %addr, "ama server ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    let report = server
        .shutdown()
        .graceful_shutdown(server.registry(), vec![serve_handle], None)
        .await;
    tracing::info!(
        sessions = report.sessions_signalled,
        remaining = report.sessions_remaining,
        clean = report.is_clean(),
        "shutdown complete"
    );

    Ok(())
}
