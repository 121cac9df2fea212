//! Runtime knobs shared by every endpoint.

use std::time::Duration;

use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use crate::frame::{MAX_MESSAGE_SIZE, SUPPORTED_VERSION};

/// Time allowed to write a message to the peer.
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);

/// Time allowed between two pongs from the peer.
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);

/// Capacity of each outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 512;

/// Throttle applied before answering a CONN request.
pub const DEFAULT_PAIR_DELAY: Duration = Duration::from_secs(1);

/// Time allowed for the websocket upgrade.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for every [`Endpoint`](crate::endpoint::Endpoint).
#[derive(Debug, Clone)]
pub struct EndpointSettings {
    /// Deadline for a single write.
    pub write_wait: Duration,
    /// Read deadline, extended on every pong.
    pub pong_wait: Duration,
    /// Keepalive period. Must be shorter than `pong_wait`.
    pub ping_period: Duration,
    /// Largest inbound message, in bytes.
    pub max_message_size: usize,
    /// Capacity of the text and binary outbound queues.
    pub queue_capacity: usize,
    /// Delay before a CONN request is answered.
    pub pair_delay: Duration,
    /// Deadline for the websocket upgrade.
    pub handshake_timeout: Duration,
    /// Desktop version tag accepted by REGO.
    pub supported_version: String,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            write_wait: DEFAULT_WRITE_WAIT,
            pong_wait: DEFAULT_PONG_WAIT,
            ping_period: DEFAULT_PONG_WAIT * 9 / 10,
            max_message_size: MAX_MESSAGE_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            pair_delay: DEFAULT_PAIR_DELAY,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            supported_version: SUPPORTED_VERSION.to_string(),
        }
    }
}

impl EndpointSettings {
    /// Set the pong deadline and derive the keepalive period from it.
    pub fn with_pong_wait(mut self, pong_wait: Duration) -> Self {
        self.pong_wait = pong_wait;
        self.ping_period = pong_wait * 9 / 10;
        self
    }

    pub fn with_pair_delay(mut self, delay: Duration) -> Self {
        self.pair_delay = delay;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Transport configuration enforcing the inbound size limit.
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            max_message_size: Some(self.max_message_size),
            ..Default::default()
        }
    }
}
