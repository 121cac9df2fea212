//! Accept loop: upgrades TCP connections to websockets and starts an
//! [`Endpoint`] for each.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::accept_async_with_config;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::endpoint::Endpoint;
use crate::error::RelayError;
use crate::registry::RegistryHandle;
use crate::settings::EndpointSettings;

/// Listens for desktops and web clients alike.
#[derive(Debug, Clone)]
pub struct RelayServer {
    registry: RegistryHandle,
    settings: Arc<EndpointSettings>,
}

impl RelayServer {
    pub fn new(registry: RegistryHandle, settings: EndpointSettings) -> Self {
        Self {
            registry,
            settings: Arc::new(settings),
        }
    }

    /// Accept connections until `shutdown` is cancelled.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), RelayError> {
        let local = listener.local_addr()?;
        info!("relay listening on {local}");

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown.cancelled() => break,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let server = self.clone();
                    tokio::spawn(async move {
                        let endpoint = match server.accept(stream, peer).await {
                            Ok(endpoint) => endpoint,
                            Err(e) => {
                                debug!("upgrade from {peer} failed: {e}");
                                return;
                            }
                        };
                        let id = endpoint.id();
                        match endpoint.join().await {
                            Ok(()) => debug!("endpoint {id} for {peer} finished"),
                            Err(e) => warn!("endpoint {id} for {peer} failed: {e}"),
                        }
                    });
                }
                Err(e) => warn!("accept error on {local}: {e}"),
            }
        }

        info!("relay on {local} stopped");
        Ok(())
    }

    /// Upgrade one connection and start its endpoint.
    pub async fn accept(&self, stream: TcpStream, peer: SocketAddr) -> Result<Endpoint, RelayError> {
        stream.set_nodelay(true)?;
        let config = Some(self.settings.websocket_config());
        let wait = self.settings.handshake_timeout;

        let ws = timeout(wait, accept_async_with_config(stream, config))
            .await
            .map_err(|_| RelayError::Timeout(wait))??;

        let endpoint = Endpoint::spawn(ws, self.registry.clone(), Arc::clone(&self.settings));
        info!("incoming host {peer} served as endpoint {}", endpoint.id());
        Ok(endpoint)
    }
}
