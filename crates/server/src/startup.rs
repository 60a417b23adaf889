use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use configs::{AppConfig, StorageConfig};
use store::{PersistenceConfig, Store, StoreError};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::routes::{self, AppState};
use crate::tcp;
use crate::tls::TlsListener;

/// Front-end the server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Tcp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Http => f.write_str("http"),
            Protocol::Tcp => f.write_str("tcp"),
        }
    }
}

fn build_cors() -> CorsLayer {
    CorsLayer::very_permissive()
}

pub fn persistence_config(storage: &StorageConfig) -> PersistenceConfig {
    let location = Some(storage.location.trim())
        .filter(|l| !l.is_empty())
        .map(PathBuf::from);
    PersistenceConfig {
        location,
        memory_only: storage.memory_only,
        continuous_write: storage.continuous_write,
        write_interval_minutes: storage.write_interval_minutes,
        queue_capacity: storage.queue_capacity,
        drain_timeout: Duration::from_millis(storage.drain_timeout_ms),
    }
}

/// Log everything the write scheduler reports until the stream closes.
pub fn spawn_error_logger(mut errors: mpsc::Receiver<StoreError>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(err) = errors.recv().await {
            if err.is_soft() {
                warn!(error = %err, "persistence warning");
            } else {
                error!(error = %err, "persistence error");
            }
        }
        info!("persistence error stream closed");
    })
}

/// Resolves on Ctrl+C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!(event = "shutdown_signal", "shutting down server");
}

/// Public entry: serve until Ctrl+C/SIGTERM, then flush the store.
pub async fn run(cfg: AppConfig, protocol: Protocol) -> anyhow::Result<()> {
    run_until(cfg, protocol, shutdown_signal()).await
}

/// Connect the store, serve `protocol` until `shutdown` resolves, then write the
/// final snapshot. A store that cannot load its file aborts startup.
pub async fn run_until<F>(cfg: AppConfig, protocol: Protocol, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if !cfg.storage.memory_only {
        common::env::ensure_data_dir(&cfg.storage.location).await?;
    }

    let tls = match protocol {
        Protocol::Http => TlsListener::load(&cfg.server).await?,
        Protocol::Tcp => None,
    };

    let store = Store::new(persistence_config(&cfg.storage));
    let error_logger = store.subscribe_errors().map(spawn_error_logger);
    store.connect().await.context("connect store")?;

    let addr = cfg.server.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(addr = %listener.local_addr()?, %protocol, "server listening");

    let served = match protocol {
        Protocol::Http => {
            let state = AppState::new(Arc::clone(&store), cfg.server.auth_key.clone());
            let app = routes::build_router(state, build_cors());
            let https = tls.map(|tls| tls.spawn(app.clone()));
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
                .map_err(anyhow::Error::from);
            match https {
                Some(https) => served.and(https.shutdown().await),
                None => served,
            }
        }
        Protocol::Tcp => {
            let admin = match cfg.server.admin_addr.as_deref() {
                Some(admin_addr) => Some(common::admin_http::spawn_admin_server(admin_addr, routes::metrics_text).await?),
                None => None,
            };
            let served = tcp::serve(listener, Arc::clone(&store), shutdown).await;
            if let Some(admin) = admin {
                admin.abort();
            }
            served
        }
    };
    if let Err(e) = &served {
        error!(error = %e, "server stopped with error");
    }

    let flushed = store.disconnect().await;
    if let Some(logger) = error_logger {
        let _ = logger.await;
    }

    served?;
    flushed.context("final snapshot")?;
    info!("server stopped");
    Ok(())
}
