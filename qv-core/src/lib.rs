//! # qv-core
//!
//! Pairing and bridging core of the QuickView rendezvous relay.
//!
//! Desktops connect and register under an opaque id (`1111REGO`); web
//! clients connect and ask for that id (`1111CONN`). Once matched, every
//! message is forwarded verbatim between the two until either side leaves.
//!
//! This crate contains:
//! - **Frame**: handshake parser and acknowledgement encoders
//! - **State**: per-endpoint handshake state machine and queue lifecycle
//! - **Endpoint**: reader / writer tasks per websocket connection
//! - **Registry**: serialized desktop registry, pairing and registration log
//! - **Server**: accept loop upgrading TCP connections to websockets
//! - **Error**: `RelayError`, the crate-wide `thiserror` enum

pub mod endpoint;
pub mod error;
pub mod frame;
pub mod registry;
pub mod server;
pub mod settings;
pub mod state;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use endpoint::{Endpoint, EndpointHandle, EndpointId, PeerLink};
pub use error::RelayError;
pub use frame::{Handshake, InvalidHandshake, RendezvousId};
pub use registry::{
    DEFAULT_COMMAND_CAPACITY, DesktopSummary, RegistrationLog, Registry, RegistryCommand,
    RegistryHandle,
};
pub use server::RelayServer;
pub use settings::EndpointSettings;
pub use state::{EndpointState, Lifecycle, QueueState, Registration, Role};
