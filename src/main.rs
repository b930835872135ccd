//! lantern-chain: two-sided chained HTTP(S) relay
//!
//! This is the main entry point for the lantern-chain binary. It handles CLI
//! argument parsing, configuration loading, tracing initialization, and runs
//! the relay for the selected role until interrupted.
//!
//! - With `--server`, the process is the ingress relay and loads (or creates)
//!   the local certificate authority before binding.
//! - Without it, the process is the egress relay.

use anyhow::{Context, Result};
use clap::Parser;
use lantern_chain::{
    ca::CertificateAuthority,
    cli::Cli,
    config::{ConfigLoader, RelayRole},
    proxy::RelayServer,
    telemetry::PeerStats,
};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, trace, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before any other initialization)
    let cli = Cli::parse();

    if cli.help {
        Cli::print_usage();
        std::process::exit(1);
    }

    // Load configuration with hierarchy merging
    let config = ConfigLoader::new()
        .load(&cli)
        .context("Failed to load configuration")?;

    init_tracing(cli.verbose, config.logging.level.as_deref())?;

    debug!("Parsed CLI arguments: {:?}", cli);
    debug!("Loaded configuration: {:?}", config);

    if cli.wants_usage(config.relay.listen_addr.is_some()) {
        Cli::print_usage();
        std::process::exit(1);
    }

    let relay = config
        .resolve()
        .context("Invalid relay configuration")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stats = Arc::new(PeerStats::new());
    let mut server = RelayServer::new(relay.clone(), shutdown_rx).with_observer(stats.clone());

    if let RelayRole::Ingress(ref ingress) = relay.role {
        let ca = CertificateAuthority::load_or_create(&relay.ca)
            .context("Failed to initialize certificate authority")?;
        info!(
            "Clients must trust {:?} to intercept via {}",
            ca.cert_path(),
            ingress.mitm_addr
        );
        server = server.with_authority(Arc::new(ca));
    } else {
        info!("Running as egress relay");
    }

    let bound = server.bind().await.context("Failed to start relay")?;

    tokio::spawn(log_peer_updates(stats));
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            // Keep the sender alive; dropping it stops the listeners.
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Interrupted, shutting down");
        let _ = shutdown_tx.send(true);
    });

    bound.run().await.context("Relay failed")?;

    Ok(())
}

/// Trace every peer update as it would be pushed to a subscriber.
async fn log_peer_updates(stats: Arc<PeerStats>) {
    let (_, mut updates) = stats.subscribe();
    loop {
        match updates.recv().await {
            Ok(update) => match update.to_json() {
                Ok(json) => trace!("{}", json),
                Err(e) => debug!("Failed to encode peer update: {}", e),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                trace!("Skipped {} peer updates", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Initialize the tracing subscriber.
///
/// Logs go to stderr.
///
/// # Verbosity Levels
/// - 0 (default): `RUST_LOG`, then `logging.level`, then warnings and errors
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8, configured: Option<&str>) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(configured.unwrap_or("warn")))
            .unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
