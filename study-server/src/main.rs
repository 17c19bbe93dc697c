use std::fs::OpenOptions;
use std::sync::Arc;

use clap::Parser;
use study_core::config::ServiceConfig;
use study_core::StudyConfig;
use tokio::sync::broadcast;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use study_server::http::{self, HttpState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "study.toml")]
    config: String,
}

/// Console output plus an optional append-only file. `RUST_LOG` wins over the
/// configured level.
fn init_logging(service: &ServiceConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&service.log_level))?;

    let file_layer = match &service.log_file {
        Some(path) => {
            let path = shellexpand::tilde(path).into_owned();
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience, production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match StudyConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&config.service) {
        eprintln!("Failed to initialise logging: {}", e);
        std::process::exit(1);
    }

    let state = match HttpState::from_config(config) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("Failed to start study server: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!(
        backend = state.backend.name(),
        default_terms = state.default_terms.len(),
        password = state.gate.is_enabled(),
        "Study server configured"
    );

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    // Spawn idle session sweeper
    tokio::spawn(study_server::subsystems::sweeper::run_session_sweeper(
        state.sessions.clone(),
        state.config.session.clone(),
        tx.subscribe(),
    ));

    http::start_http_server(state, tx.subscribe()).await?;

    Ok(())
}
