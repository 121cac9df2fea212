//! One endpoint per accepted connection.
//!
//! An endpoint is a pair of tasks sharing a websocket:
//!
//! ```text
//!            ┌──────────── Endpoint ─────────────┐
//!  socket ──►│ Reader ─► handshake / bridge      │
//!            │   │            │                  │
//!            │   ▼            ▼ partner.binary   │
//!            │ text q     binary q ──► Writer ───┼──► socket
//!            └───────────────────────────────────┘
//! ```
//!
//! The reader is the only task reading the socket, the writer the only
//! task writing it. Once paired, a reader pushes inbound payloads straight
//! onto its partner's binary queue without going through the registry.

mod reader;
mod writer;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_tungstenite::WebSocketStream;
use tracing::{Instrument, info_span};

use crate::frame::RendezvousId;
use crate::registry::RegistryHandle;
use crate::settings::EndpointSettings;
use crate::state::Lifecycle;

pub(crate) use reader::Reader;
pub(crate) use writer::Writer;

// ── EndpointId ───────────────────────────────────────────────────

static NEXT_ENDPOINT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique endpoint identifier, increasing in accept order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointId(u64);

impl EndpointId {
    pub fn next() -> Self {
        Self(NEXT_ENDPOINT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── PeerLink ─────────────────────────────────────────────────────

/// Non-owning reference to a partner endpoint.
///
/// Both halves degrade to "gone" once the partner has torn down.
#[derive(Debug, Clone)]
pub struct PeerLink {
    id: EndpointId,
    binary: mpsc::WeakSender<Vec<u8>>,
    lifecycle: Weak<Lifecycle>,
}

impl PeerLink {
    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// The partner's binary queue, if the partner is still alive.
    pub fn binary_queue(&self) -> Option<mpsc::Sender<Vec<u8>>> {
        self.binary.upgrade()
    }

    /// Force the partner's connection shut. Returns `false` if it was
    /// already gone or closed.
    pub fn close(&self) -> bool {
        self.lifecycle.upgrade().is_some_and(|lc| lc.close())
    }

}

/// Set-once partner cell. Written only by the registry loop.
pub type PartnerSlot = OnceLock<PeerLink>;

// ── EndpointHandle ───────────────────────────────────────────────

/// What the registry keeps about an endpoint.
#[derive(Debug, Clone)]
pub struct EndpointHandle {
    id: EndpointId,
    rendezvous: RendezvousId,
    text: mpsc::Sender<String>,
    binary: mpsc::WeakSender<Vec<u8>>,
    lifecycle: Arc<Lifecycle>,
    partner: Arc<PartnerSlot>,
}

impl EndpointHandle {
    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn rendezvous(&self) -> &RendezvousId {
        &self.rendezvous
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn partner(&self) -> Option<&PeerLink> {
        self.partner.get()
    }

    pub fn is_paired(&self) -> bool {
        self.partner.get().is_some()
    }

    /// A non-owning reference suitable for a partner's slot.
    pub fn link(&self) -> PeerLink {
        PeerLink {
            id: self.id,
            binary: self.binary.clone(),
            lifecycle: Arc::downgrade(&self.lifecycle),
        }
    }

    /// Record `peer` as this endpoint's partner. Fails if one is set.
    pub fn set_partner(&self, peer: PeerLink) -> bool {
        self.partner.set(peer).is_ok()
    }

    /// Push onto the text queue without waiting.
    pub fn try_send_text(
        &self,
        message: String,
    ) -> Result<(), mpsc::error::TrySendError<String>> {
        self.text.try_send(message)
    }
}

// ── Endpoint ─────────────────────────────────────────────────────

/// Task handles of a running endpoint.
#[derive(Debug)]
pub struct Endpoint {
    id: EndpointId,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Endpoint {
    /// Split `ws` and start the reader and writer tasks.
    pub fn spawn<S>(
        ws: WebSocketStream<S>,
        registry: RegistryHandle,
        settings: Arc<EndpointSettings>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = EndpointId::next();
        let (sink, stream) = ws.split();

        let (text_tx, text_rx) = mpsc::channel(settings.queue_capacity);
        let (binary_tx, binary_rx) = mpsc::channel(settings.queue_capacity);
        let lifecycle = Arc::new(Lifecycle::new());
        let partner = Arc::new(PartnerSlot::new());

        let span = info_span!("endpoint", id = %id);

        let writer = Writer::new(
            sink,
            text_rx,
            binary_rx,
            Arc::clone(&lifecycle),
            Arc::clone(&settings),
        );
        let writer = tokio::spawn(writer.run().instrument(span.clone()));

        let reader = Reader::new(
            id,
            stream,
            text_tx,
            binary_tx,
            lifecycle,
            partner,
            registry,
            settings,
        );
        let reader = tokio::spawn(reader.run().instrument(span));

        Self { id, reader, writer }
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// Wait for both tasks to finish. Fails if either task panicked.
    pub async fn join(self) -> Result<(), JoinError> {
        let reader = self.reader.await;
        let writer = self.writer.await;
        reader.and(writer)
    }
}

// ── Tests ────────────────────────────────────────────────────────
