//! Configuration for the relay service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use qv_core::EndpointSettings;
use qv_core::frame::{MAX_MESSAGE_SIZE, SUPPORTED_VERSION};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Listening sockets.
    pub network: NetworkConfig,
    /// Handshake and queue parameters.
    pub protocol: ProtocolConfig,
    /// Per-connection deadlines.
    pub timeouts: TimeoutConfig,
    /// Desktop registry settings.
    pub registry: RegistryConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Addresses to accept websocket connections on. TLS, if any, is
    /// terminated in front of the relay.
    pub listen_addrs: Vec<String>,
    /// Seconds allowed for the websocket upgrade.
    pub handshake_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Version tag a desktop must present in REGO.
    pub supported_version: String,
    /// Largest inbound message in bytes.
    pub max_message_size: usize,
    /// Depth of each outbound queue.
    pub queue_capacity: usize,
    /// Milliseconds to wait before answering a CONN request.
    pub pair_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub write_wait_secs: u64,
    pub pong_wait_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registration log, truncated at startup.
    pub log_path: PathBuf,
    /// Depth of the registry command queue.
    pub command_capacity: usize,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addrs: vec!["0.0.0.0:8080".into()],
            handshake_timeout_secs: 10,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            supported_version: SUPPORTED_VERSION.into(),
            max_message_size: MAX_MESSAGE_SIZE,
            queue_capacity: 512,
            pair_delay_ms: 1000,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            write_wait_secs: 10,
            pong_wait_secs: 60,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("desktop-clients.log"),
            command_capacity: qv_core::DEFAULT_COMMAND_CAPACITY,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl RelayConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Replace the configured listen addresses, if any are given.
    pub fn override_listen(&mut self, addrs: Vec<String>) {
        if !addrs.is_empty() {
            self.network.listen_addrs = addrs;
        }
    }

    /// Convert into per-endpoint settings, clamping values that would stall
    /// or kill every connection.
    pub fn to_endpoint_settings(&self) -> EndpointSettings {
        let version = self.protocol.supported_version.trim();
        let mut settings = EndpointSettings::default()
            .with_pong_wait(Duration::from_secs(self.timeouts.pong_wait_secs.max(1)))
            .with_pair_delay(Duration::from_millis(self.protocol.pair_delay_ms))
            .with_max_message_size(self.protocol.max_message_size.max(1))
            .with_queue_capacity(self.protocol.queue_capacity);
        settings.write_wait = Duration::from_secs(self.timeouts.write_wait_secs.max(1));
        settings.handshake_timeout =
            Duration::from_secs(self.network.handshake_timeout_secs.max(1));
        if !version.is_empty() {
            settings.supported_version = version.to_string();
        }
        settings
    }

    pub fn command_capacity(&self) -> usize {
        self.registry.command_capacity.max(1)
    }
}

// ── Tests ────────────────────────────────────────────────────────
