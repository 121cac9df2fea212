//! Relay service core logic.
//!
//! Opens the registration log, starts the desktop registry and runs one
//! accept loop per configured listen address until stopped.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use qv_core::{RegistrationLog, Registry, RelayError, RelayServer};

use crate::config::RelayConfig;

// ── ProxyService ─────────────────────────────────────────────────

/// The top-level relay service.
pub struct ProxyService {
    config: RelayConfig,
    shutdown: CancellationToken,
}

impl ProxyService {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Obtain a token that stops the service when cancelled.
    pub fn stop_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Bind every configured listen address.
    pub async fn bind(&self) -> Result<Vec<TcpListener>, RelayError> {
        let mut listeners = Vec::with_capacity(self.config.network.listen_addrs.len());
        for addr in &self.config.network.listen_addrs {
            let addr: SocketAddr = addr
                .parse()
                .map_err(|e| RelayError::Other(format!("invalid listen address {addr:?}: {e}")))?;
            listeners.push(TcpListener::bind(addr).await?);
        }
        if listeners.is_empty() {
            return Err("no listen addresses configured".into());
        }
        Ok(listeners)
    }

    /// Bind and serve until stopped.
    pub async fn run(&self) -> Result<(), RelayError> {
        let listeners = self.bind().await?;
        self.serve(listeners).await
    }

    /// Serve on already bound listeners until stopped.
    ///
    /// The registration log is created first; failing to create it aborts
    /// before any connection is accepted.
    pub async fn serve(&self, listeners: Vec<TcpListener>) -> Result<(), RelayError> {
        let log = RegistrationLog::create(&self.config.registry.log_path).await?;
        let (registry, _registry_task) = Registry::spawn(log, self.config.command_capacity());
        let server = RelayServer::new(registry, self.config.to_endpoint_settings());

        let mut loops = JoinSet::new();
        for listener in listeners {
            let server = server.clone();
            let shutdown = self.shutdown.clone();
            loops.spawn(async move { server.serve(listener, shutdown).await });
        }

        while let Some(joined) = loops.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("listener failed: {e}"),
                Err(e) => error!("listener task panicked: {e}"),
            }
        }

        info!("relay service stopped");
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
