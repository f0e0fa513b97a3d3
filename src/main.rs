//! DB Layer - diagnostic entry point.
//!
//! Connects the configured default connection, optionally prepares the log
//! table, records the connection in the history file and prints a JSON summary
//! of all connections.

use db_layer::backend::LogCapability;
use db_layer::config::{Config, DEFAULT_NAMESPACE};
use db_layer::context::DbContext;
use db_layer::error::DbError;
use db_layer::history::{ConnectionHistory, default_history_path};
use db_layer::models::ConnectionSummary;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    info!("Starting DB Layer v{}", env!("CARGO_PKG_VERSION"));

    let ctx = match DbContext::new(&config) {
        Ok(ctx) => ctx,
        Err(e @ DbError::BackendUnresolved { .. }) => {
            error!(error = %e, "Cannot start without a database backend");
            eprintln!("Error: {}", e);
            eprintln!();
            eprintln!("Usage: db-layer --backend <name> --url <connection_string>");
            eprintln!("Backends: generic, mysql, postgresql, sqlite");
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    let settings = config.to_settings();
    let conn = ctx.connection(DEFAULT_NAMESPACE, settings).await;
    ctx.registry(DEFAULT_NAMESPACE).set_default(conn.clone());

    if !ctx.dispatcher().is_supported(&conn) {
        warn!(
            url = %conn.masked_url(),
            backend = ctx.dispatcher().name(),
            "Connection URL is not supported by the active backend"
        );
    }

    match conn.connect().await {
        Ok(()) => {
            if config.init_log_table {
                match ctx.log(&conn) {
                    Ok(log) => match log.init().await {
                        Ok(_) => info!("Log table ready"),
                        Err(e) => error!(error = %e, "Log table initialization failed"),
                    },
                    Err(e) => error!(error = %e, "No log storage for this connection"),
                }
            }

            let path = config.history_file.clone().unwrap_or_else(default_history_path);
            let mut history = ConnectionHistory::load(&path).unwrap_or_else(|e| {
                warn!(error = %e, "Ignoring unreadable connection history");
                ConnectionHistory::new()
            });
            history.add(conn.parameters());
            if history.default_connection().is_none() {
                history.make_default(conn.parameters());
            }
            if let Err(e) = history.save(&path) {
                warn!(error = %e, "Failed to save connection history");
            }
        }
        Err(e) => {
            error!(error = %e, "Database is offline");
        }
    }

    let summaries: Vec<ConnectionSummary> = ctx.connections().iter().map(|c| c.summary()).collect();
    println!("{}", serde_json::to_string_pretty(&summaries)?);

    ctx.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}
