//! Shutdown signalling between an endpoint's tasks and the registry.
//!
//! ```text
//!  Open ──► Draining ──► Closed
//!    │                     ▲
//!    └─────────────────────┘
//! ```
//!
//! `Draining` asks the writer to flush what is queued and close politely.
//! `Closed` is forced: the writer stops without flushing and the reader
//! stops reading. States only move forward.

use tokio::sync::watch;

/// Lifecycle of an endpoint's outbound queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum QueueState {
    #[default]
    Open,
    Draining,
    Closed,
}

impl QueueState {
    pub fn is_open(self) -> bool {
        self == Self::Open
    }

    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }
}

/// Watch-backed lifecycle shared by an endpoint's reader, its writer,
/// the registry and (weakly) its partner.
#[derive(Debug)]
pub struct Lifecycle {
    tx: watch::Sender<QueueState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(QueueState::Open);
        Self { tx }
    }

    pub fn state(&self) -> QueueState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueState> {
        self.tx.subscribe()
    }

    /// Ask for a graceful shutdown. No-op unless `Open`.
    pub fn drain(&self) -> bool {
        self.advance(QueueState::Draining)
    }

    /// Force the connection shut.
    pub fn close(&self) -> bool {
        self.advance(QueueState::Closed)
    }

    fn advance(&self, next: QueueState) -> bool {
        self.tx.send_if_modified(|state| {
            if next > *state {
                *state = next;
                true
            } else {
                false
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_open() {
        let lc = Lifecycle::new();
        assert!(lc.state().is_open());
    }

    #[test]
    fn drain_then_close() {
        let lc = Lifecycle::new();
        assert!(lc.drain());
        assert_eq!(lc.state(), QueueState::Draining);
        assert!(!lc.drain());
        assert!(lc.close());
        assert!(lc.state().is_closed());
    }

    #[test]
    fn never_moves_backwards() {
        let lc = Lifecycle::new();
        lc.close();
        assert!(!lc.drain());
        assert!(lc.state().is_closed());
    }

    #[tokio::test]
    async fn subscribers_observe_transitions() {
        let lc = Lifecycle::new();
        let mut rx = lc.subscribe();
        lc.drain();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), QueueState::Draining);

        lc.close();
        let state = rx.wait_for(|s| s.is_closed()).await.unwrap();
        assert!(state.is_closed());
    }
}
