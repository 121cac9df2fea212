//! Reader half of an endpoint: handshake interpretation and bridging.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::SplitStream;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use super::{EndpointHandle, EndpointId, PartnerSlot};
use crate::error::RelayError;
use crate::frame::{self, Handshake, RendezvousId, VERSION_NOTICE};
use crate::registry::RegistryHandle;
use crate::settings::EndpointSettings;
use crate::state::{EndpointState, Lifecycle, Role};

/// The only task reading from the connection.
pub(crate) struct Reader<S> {
    id: EndpointId,
    stream: SplitStream<WebSocketStream<S>>,
    state: EndpointState,
    text_tx: mpsc::Sender<String>,
    binary_tx: mpsc::Sender<Vec<u8>>,
    lifecycle: Arc<Lifecycle>,
    partner: Arc<PartnerSlot>,
    registry: RegistryHandle,
    settings: Arc<EndpointSettings>,
}

impl<S> Reader<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: EndpointId,
        stream: SplitStream<WebSocketStream<S>>,
        text_tx: mpsc::Sender<String>,
        binary_tx: mpsc::Sender<Vec<u8>>,
        lifecycle: Arc<Lifecycle>,
        partner: Arc<PartnerSlot>,
        registry: RegistryHandle,
        settings: Arc<EndpointSettings>,
    ) -> Self {
        Self {
            id,
            stream,
            state: EndpointState::new(),
            text_tx,
            binary_tx,
            lifecycle,
            partner,
            registry,
            settings,
        }
    }

    /// Read until the connection ends, then tear down.
    pub(crate) async fn run(mut self) {
        match self.pump().await {
            Ok(()) => debug!("reader finished"),
            Err(RelayError::NoMatch(id)) => info!("no unpaired desktop for {id:?}"),
            Err(e) => info!("reader stopped: {e}"),
        }
        self.teardown().await;
    }

    async fn pump(&mut self) -> Result<(), RelayError> {
        let mut deadline = Instant::now() + self.settings.pong_wait;
        let mut lifecycle = self.lifecycle.subscribe();

        loop {
            let next = tokio::select! {
                next = timeout_at(deadline, self.stream.next()) => next,
                _ = lifecycle.wait_for(|s| s.is_closed()) => {
                    debug!("connection closed underneath the reader");
                    return Ok(());
                }
            };

            let message = match next {
                Err(_) => return Err(RelayError::Timeout(self.settings.pong_wait)),
                Ok(None) => return Ok(()),
                Ok(Some(result)) => result?,
            };

            let payload = match message {
                Message::Text(text) => text.into_bytes(),
                Message::Binary(data) => data,
                Message::Pong(_) => {
                    deadline = Instant::now() + self.settings.pong_wait;
                    continue;
                }
                Message::Ping(_) | Message::Frame(_) => continue,
                Message::Close(_) => return Ok(()),
            };

            if self.state.is_registered() {
                self.forward(payload).await;
            } else {
                self.handshake(&payload).await?;
            }
        }
    }

    // ── Handshake ────────────────────────────────────────────────

    async fn handshake(&mut self, payload: &[u8]) -> Result<(), RelayError> {
        match frame::parse_handshake(payload) {
            Handshake::Invalid(reason) => {
                warn!(
                    "invalid handshake ({reason}): {:?}",
                    String::from_utf8_lossy(payload)
                );
                Err(reason.into())
            }
            Handshake::Unrecognized => {
                debug!("ignoring unrecognized frame of {} bytes", payload.len());
                Ok(())
            }
            Handshake::Register { id, version } => self.register_desktop(id, version).await,
            Handshake::Connect { id } => self.connect_web(id).await,
        }
    }

    async fn register_desktop(
        &mut self,
        id: RendezvousId,
        version: String,
    ) -> Result<(), RelayError> {
        self.state.claim_desktop(id.clone())?;
        let supported = version == self.settings.supported_version;
        info!("desktop {id:?} of version {version:?} connected");

        self.registry.register(self.handle(id.clone()), supported).await?;

        if !supported {
            self.text_tx.send(VERSION_NOTICE.to_string()).await?;
            return Ok(());
        }

        self.binary_tx.send(frame::rego_ack(&id)).await?;
        self.state.complete_registration()
    }

    async fn connect_web(&mut self, id: RendezvousId) -> Result<(), RelayError> {
        self.state.claim_web(id.clone())?;
        info!("web client requesting desktop {id:?}");

        let partner = self.registry.pair(self.handle(id.clone())).await?;
        tokio::time::sleep(self.settings.pair_delay).await;

        let Some(partner) = partner else {
            self.binary_tx.send(frame::conn_failure()).await?;
            return Err(RelayError::NoMatch(id.to_string()));
        };

        info!("bridge open to desktop {partner} for {id:?}");
        self.binary_tx.send(frame::conn_ack(&id)).await?;
        self.state.complete_registration()
    }

    fn handle(&self, rendezvous: RendezvousId) -> EndpointHandle {
        EndpointHandle {
            id: self.id,
            rendezvous,
            text: self.text_tx.clone(),
            binary: self.binary_tx.downgrade(),
            lifecycle: Arc::clone(&self.lifecycle),
            partner: Arc::clone(&self.partner),
        }
    }

    // ── Bridge ───────────────────────────────────────────────────

    /// Push a payload onto the partner's binary queue, whatever subtype it
    /// arrived as.
    async fn forward(&self, payload: Vec<u8>) {
        let Some(queue) = self.partner.get().and_then(|p| p.binary_queue()) else {
            trace!("no partner; dropping {} bytes", payload.len());
            return;
        };
        if queue.send(payload).await.is_err() {
            debug!("partner queue closed; dropping message");
        }
    }

    // ── Teardown ─────────────────────────────────────────────────

    async fn teardown(self) {
        if let Some(partner) = self.partner.get() {
            if partner.close() {
                info!("closing partner {}", partner.id());
            }
        }

        if self.state.role() == Role::Desktop {
            if let Err(e) = self.registry.deregister(self.id).await {
                warn!("deregistration failed: {e}");
            }
        }

        self.lifecycle.drain();
        debug!(
            "reader for {} {:?} ended after {:?} registered",
            self.state.role(),
            self.state.rendezvous().map(|id| id.as_str()),
            self.state.registered_duration()
        );
    }
}
