//! Shroud server entry point.
//!
//! Opens the storage backend, builds the lifecycle coordinator, then starts
//! the Axum HTTP server with graceful shutdown. A background retention sweep
//! worker runs alongside the server and is cancelled on shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use shroud_core::LifecycleCoordinator;
use shroud_core::audit_file::FileAccessLog;
use shroud_storage::{MemoryBackend, StorageBackend};

use shroud_server::config::{ServerConfig, StorageBackendType};
use shroud_server::hardening;
use shroud_server::routes;
use shroud_server::state::AppState;
use shroud_server::worker::sweep_worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    // Runs before logging is initialized, so warnings go to stderr.
    apply_hardening(&config);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(storage = config.storage_backend.name(), "Shroud starting");

    let state = build_app_state(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweep_handle = tokio::spawn(sweep_worker(
        state.coordinator.sweeper().clone(),
        shutdown_rx,
        Duration::from_secs(config.sweep_interval_secs),
    ));

    let app = routes::build_router(Arc::clone(&state), config.kdf_concurrency);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "Shroud server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown_tx))
    .await
    .context("server error")?;

    info!("waiting for background workers to stop");
    let _ = tokio::time::timeout(Duration::from_secs(10), sweep_handle).await;

    info!("Shroud server stopped");
    Ok(())
}

/// Open storage and build the shared application state.
async fn build_app_state(config: &ServerConfig) -> anyhow::Result<Arc<AppState>> {
    let storage: Arc<dyn StorageBackend> = match &config.storage_backend {
        StorageBackendType::Memory => {
            info!("using in-memory storage (data will not persist)");
            Arc::new(MemoryBackend::new())
        }
        #[cfg(feature = "redb-backend")]
        StorageBackendType::Redb { path } => {
            info!(path = %path, "using redb storage");
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("failed to create storage directory {}", parent.display())
                    })?;
                }
            }
            Arc::new(
                shroud_storage::RedbBackend::open(path).context("failed to open redb storage")?,
            )
        }
        #[cfg(not(feature = "redb-backend"))]
        StorageBackendType::Redb { .. } => {
            anyhow::bail!("redb backend requested but feature 'redb-backend' is not enabled");
        }
    };

    let coordinator = LifecycleCoordinator::new(storage).with_sweep_on_write(config.sweep_on_write);

    if let Some(ref audit_path) = config.audit_file_path {
        coordinator
            .access_log()
            .add_sink(Arc::new(FileAccessLog::new(audit_path)))
            .await;
        info!(path = %audit_path, "file access log registered");
    }
    if config.sweep_on_write {
        info!("terminal secrets are purged immediately after their last view");
    }

    Ok(Arc::new(AppState::new(
        coordinator,
        config.storage_backend.name(),
    )))
}

/// Wait for SIGINT or SIGTERM, then broadcast shutdown.
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

    info!("shutdown signal received, stopping server");
    let _ = shutdown_tx.send(true);
}

/// Apply process hardening before logging is initialized.
#[allow(clippy::print_stderr)]
fn apply_hardening(config: &ServerConfig) {
    if let Err(e) = hardening::disable_core_dumps() {
        eprintln!("WARNING: failed to disable core dumps: {e}");
    }

    if config.disable_mlock {
        eprintln!(
            "WARNING: mlock disabled via SHROUD_DISABLE_MLOCK, secrets may be swapped to disk"
        );
    } else if let Err(e) = hardening::lock_memory() {
        eprintln!("WARNING: failed to lock memory: {e} (set SHROUD_DISABLE_MLOCK=true for dev)");
    }
}
