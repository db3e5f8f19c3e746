//! `ZVault` server entry point.
//!
//! Bootstraps the storage backend and the seal, initializes and unseals the
//! vault, then keeps the seal wrappers under periodic health checks until a
//! shutdown signal arrives. The vault is sealed on the way out.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};

use zvault_core::seal::InitResult;
use zvault_server::bootstrap;
use zvault_server::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(
        storage = ?config.storage_backend,
        seals = config.seals.len(),
        generation = config.seal_generation,
        "ZVault starting"
    );

    let storage = bootstrap::open_storage(&config.storage_backend)
        .context("failed to open storage backend")?;
    let manager = Arc::new(
        bootstrap::start_seal(&config, storage)
            .await
            .context("failed to configure seal")?,
    );

    if let Some(result) = bootstrap::initialize_if_needed(&manager, &config)
        .await
        .context("failed to initialize vault")?
    {
        print_init_result(&result);
    }

    let unsealed = bootstrap::unseal_at_startup(&manager, &config)
        .await
        .context("failed to unseal vault")?;
    let status = manager.status().await.context("failed to read seal status")?;
    info!(
        unsealed,
        seal_type = %status.seal_type,
        generation = status.generation,
        rewrapped = status.rewrapped,
        "seal ready"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let health_handle = Arc::clone(&manager).spawn_health_checks(
        Duration::from_secs(config.health_check_interval_secs),
        Duration::from_secs(config.health_check_timeout_secs),
        shutdown_rx,
    );

    shutdown_signal(shutdown_tx).await;

    info!("waiting for background workers to stop");
    let _ = tokio::time::timeout(Duration::from_secs(10), health_handle).await;

    if manager.barrier().is_unsealed().await {
        manager.seal().await.context("failed to seal vault")?;
    }
    if let Err(err) = manager.access().await.finalize().await {
        warn!(error = %err, "failed to finalize seal wrappers");
    }

    info!("ZVault stopped");
    Ok(())
}

/// Wait for Ctrl-C or SIGTERM, then notify background workers.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
}

/// Print the one-time init shares to stdout, never to the log.
#[allow(clippy::print_stdout)]
fn print_init_result(result: &InitResult) {
    for (i, share) in result.unseal_shares.iter().enumerate() {
        println!("Unseal Key {}: {share}", i + 1);
    }
    for (i, share) in result.recovery_shares.iter().enumerate() {
        println!("Recovery Key {}: {share}", i + 1);
    }
    println!("Store these keys securely. They will not be shown again.");
}
