//! Optional HTTPS listener for the HTTP front-end.
//!
//! Serves the same router as the plain listener on `server.tls_port` when both
//! `server.certificate` and `server.private_key` are configured.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use configs::ServerConfig;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Grace period for open HTTPS connections once shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(1500);

/// Certificate material and address, loaded before the store connects so a
/// bad certificate aborts startup early.
pub struct TlsListener {
    addr: SocketAddr,
    config: RustlsConfig,
}

/// Running HTTPS server.
pub struct TlsServer {
    handle: Handle,
    task: JoinHandle<std::io::Result<()>>,
}

impl TlsListener {
    pub async fn load(server: &ServerConfig) -> anyhow::Result<Option<Self>> {
        let Some((cert, key)) = server.tls_files() else {
            return Ok(None);
        };
        let config = RustlsConfig::from_pem_file(cert, key)
            .await
            .with_context(|| format!("load TLS certificate {cert} / key {key}"))?;

        let bind = server.tls_bind_addr();
        let addr = tokio::net::lookup_host(&bind)
            .await
            .with_context(|| format!("resolve {bind}"))?
            .next()
            .ok_or_else(|| anyhow!("no address for {bind}"))?;
        Ok(Some(Self { addr, config }))
    }

    pub fn spawn(self, app: Router) -> TlsServer {
        let handle = Handle::new();
        let server = axum_server::bind_rustls(self.addr, self.config).handle(handle.clone());
        info!(addr = %self.addr, "https listener starting");
        let task = tokio::spawn(async move { server.serve(app.into_make_service()).await });
        TlsServer { handle, task }
    }
}

impl TlsServer {
    /// Stop accepting, give open connections the grace period, then wait for
    /// the listener task.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        match self.task.await {
            Ok(Ok(())) => {
                info!("https listener stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(error = %e, "https listener failed");
                Err(anyhow::Error::from(e).context("https listener"))
            }
            Err(e) => Err(anyhow!("https listener task: {e}")),
        }
    }
}
