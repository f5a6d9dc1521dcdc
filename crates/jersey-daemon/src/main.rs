//! jersey-daemon - Jersey Canvas Placement Service
//!
//! Loads `jersey.toml`, opens the placement store and serves the placement
//! API until SIGTERM or SIGINT.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use jersey_core::JerseyConfig;
use jersey_daemon::state::Secrets;
use jersey_daemon::{api, build_state, sweeper};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// jersey daemon - shared jersey canvas placement service
#[derive(Parser, Debug)]
#[command(name = "jersey-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file. Defaults apply when it does not exist.
    #[arg(short, long, default_value = "jersey.toml")]
    config: PathBuf,

    /// Socket address to bind, overriding `server.bind`
    #[arg(long)]
    bind: Option<String>,

    /// Path to `SQLite` database, overriding `store.path`
    #[arg(long)]
    db: Option<PathBuf>,

    /// Disable the stale pending sweeper
    #[arg(long)]
    no_sweeper: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<JerseyConfig> {
    let mut config = if args.config.exists() {
        JerseyConfig::from_file(&args.config)
            .with_context(|| format!("failed to load {}", args.config.display()))?
    } else {
        warn!(path = %args.config.display(), "configuration file not found, using defaults");
        JerseyConfig::default()
    };

    if let Some(bind) = &args.bind {
        config.server.bind.clone_from(bind);
    }
    if let Some(db) = &args.db {
        config.store.path.clone_from(db);
    }
    if args.no_sweeper {
        config.sweeper.enabled = false;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    wait_for_signal().await;
    let _ = shutdown_tx.send(true);
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "failed to register signal handlers, falling back to ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
            return;
        },
    };

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received ctrl-c");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let config = load_config(&args)?;
    let secrets = Secrets::from_env(&config);
    let bind = config.server.bind.clone();
    let sweeper_config = config.sweeper.clone();

    let state = build_state(config, secrets).context("failed to start service")?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper_task = if sweeper_config.enabled {
        Some(tokio::spawn(sweeper::run(
            state.engine.clone(),
            sweeper_config,
            shutdown_rx.clone(),
        )))
    } else {
        info!("pending sweeper disabled");
        None
    };

    tokio::spawn(shutdown_signal(shutdown_tx));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(addr = %bind, gateway = state.gateway.name(), "jersey daemon listening");

    let mut server_shutdown = shutdown_rx;
    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .context("HTTP server error")?;

    if let Some(task) = sweeper_task {
        let _ = task.await;
    }
    info!("jersey daemon stopped");
    Ok(())
}
