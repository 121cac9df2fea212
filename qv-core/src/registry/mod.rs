//! The desktop registry.
//!
//! A single task owns the set of known desktops and processes one
//! [`RegistryCommand`] at a time. Every mutation of that set, and every
//! partner link, happens inside this loop; endpoints only talk to it
//! through a cloneable [`RegistryHandle`].
//!
//! Pairing (scan for an unpaired desktop and link both sides) is a single
//! command, so two web clients racing for the same desktop are ordered by
//! the loop: the first one processed wins, the second one finds the desktop
//! already paired.

mod log;

use std::collections::BTreeMap;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::endpoint::{EndpointHandle, EndpointId};
use crate::error::RelayError;

pub use log::{LOG_HEADER, RegistrationLog, format_entry};

/// Default depth of the command queue.
pub const DEFAULT_COMMAND_CAPACITY: usize = 256;

// ── Commands ─────────────────────────────────────────────────────

/// Requests processed by the registry loop.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Add (or replace) a desktop. `supported` is `false` when its version
    /// was refused; such desktops are never pairing candidates.
    Register {
        endpoint: EndpointHandle,
        supported: bool,
    },
    /// Forget a desktop, close its partner and ask its writer to drain.
    /// Idempotent.
    Deregister { id: EndpointId },
    /// Push a text message to every known desktop, evicting the ones whose
    /// queue is full.
    Broadcast { message: String },
    /// Find an unpaired desktop advertising `requester.rendezvous()` and
    /// link it with `requester`.
    Pair {
        requester: EndpointHandle,
        reply: oneshot::Sender<Option<EndpointId>>,
    },
    /// Describe every known desktop.
    Snapshot {
        reply: oneshot::Sender<Vec<DesktopSummary>>,
    },
}

/// Point-in-time view of one registered desktop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesktopSummary {
    pub id: EndpointId,
    pub rendezvous: String,
    pub supported: bool,
    pub paired: bool,
}

// ── RegistryHandle ───────────────────────────────────────────────

/// Cloneable front door to the registry loop.
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    pub async fn register(
        &self,
        endpoint: EndpointHandle,
        supported: bool,
    ) -> Result<(), RelayError> {
        self.tx
            .send(RegistryCommand::Register {
                endpoint,
                supported,
            })
            .await?;
        Ok(())
    }

    pub async fn deregister(&self, id: EndpointId) -> Result<(), RelayError> {
        self.tx.send(RegistryCommand::Deregister { id }).await?;
        Ok(())
    }

    pub async fn broadcast(&self, message: impl Into<String>) -> Result<(), RelayError> {
        self.tx
            .send(RegistryCommand::Broadcast {
                message: message.into(),
            })
            .await?;
        Ok(())
    }

    /// Link `requester` with a matching desktop.
    ///
    /// Returns the desktop's id, or `None` when no registered, supported,
    /// unpaired desktop advertises the requested id.
    pub async fn pair(&self, requester: EndpointHandle) -> Result<Option<EndpointId>, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RegistryCommand::Pair { requester, reply })
            .await?;
        Ok(rx.await?)
    }

    pub async fn desktops(&self) -> Result<Vec<DesktopSummary>, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::Snapshot { reply }).await?;
        Ok(rx.await?)
    }
}

// ── Registry ─────────────────────────────────────────────────────

#[derive(Debug)]
struct DesktopEntry {
    endpoint: EndpointHandle,
    supported: bool,
}

impl DesktopEntry {
    fn is_candidate_for(&self, requester: &EndpointHandle) -> bool {
        self.supported
            && self.endpoint.id() != requester.id()
            && self.endpoint.rendezvous() == requester.rendezvous()
            && !self.endpoint.is_paired()
            && self.endpoint.lifecycle().state().is_open()
    }
}

/// Owner of the desktop set. Run it with [`Registry::run`] or
/// [`Registry::spawn`].
#[derive(Debug)]
pub struct Registry {
    // Keyed by accept order, so scans prefer the earliest desktop.
    desktops: BTreeMap<EndpointId, DesktopEntry>,
    rx: mpsc::Receiver<RegistryCommand>,
    log: RegistrationLog,
}

impl Registry {
    pub fn new(log: RegistrationLog, capacity: usize) -> (Self, RegistryHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let registry = Self {
            desktops: BTreeMap::new(),
            rx,
            log,
        };
        (registry, RegistryHandle { tx })
    }

    /// Build the registry and run it on its own task.
    pub fn spawn(log: RegistrationLog, capacity: usize) -> (RegistryHandle, JoinHandle<()>) {
        let (registry, handle) = Self::new(log, capacity);
        (handle, tokio::spawn(registry.run()))
    }

    /// Process commands until every handle is dropped.
    pub async fn run(mut self) {
        info!("registry started, logging to {}", self.log.path().display());
        while let Some(command) = self.rx.recv().await {
            self.handle(command).await;
        }
        info!("registry stopped");
    }

    async fn handle(&mut self, command: RegistryCommand) {
        match command {
            RegistryCommand::Register {
                endpoint,
                supported,
            } => self.register(endpoint, supported).await,
            RegistryCommand::Deregister { id } => {
                self.deregister(id);
            }
            RegistryCommand::Broadcast { message } => self.broadcast(&message),
            RegistryCommand::Pair { requester, reply } => {
                let matched = self.pair(&requester);
                let _ = reply.send(matched);
            }
            RegistryCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    async fn register(&mut self, endpoint: EndpointHandle, supported: bool) {
        let id = endpoint.id();
        let rendezvous = endpoint.rendezvous().to_string();
        info!("registering desktop {rendezvous:?} ({id}), supported: {supported}");

        self.desktops.insert(id, DesktopEntry { endpoint, supported });
        info!("{} desktop client(s) connected", self.desktops.len());

        if let Err(e) = self.log.record(&rendezvous).await {
            warn!("{e}");
        }
    }

    fn deregister(&mut self, id: EndpointId) -> bool {
        match self.desktops.remove(&id) {
            Some(entry) => {
                info!(
                    "deregistering desktop {:?} ({id})",
                    entry.endpoint.rendezvous().as_str()
                );
                // A Pair processed before this command may have linked a
                // partner the desktop's own teardown never saw.
                if let Some(partner) = entry.endpoint.partner() {
                    if partner.close() {
                        info!("closing partner {}", partner.id());
                    }
                }
                entry.endpoint.lifecycle().drain();
                true
            }
            None => false,
        }
    }

    fn broadcast(&mut self, message: &str) {
        let unresponsive: Vec<EndpointId> = self
            .desktops
            .values()
            .filter(|entry| entry.endpoint.try_send_text(message.to_string()).is_err())
            .map(|entry| entry.endpoint.id())
            .collect();

        for id in unresponsive {
            warn!("desktop {id} is not keeping up; evicting");
            self.deregister(id);
        }
    }

    fn pair(&self, requester: &EndpointHandle) -> Option<EndpointId> {
        if requester.is_paired() {
            return None;
        }

        let entry = self
            .desktops
            .values()
            .find(|entry| entry.is_candidate_for(requester))?;

        let desktop = &entry.endpoint;
        let linked = desktop.set_partner(requester.link());
        let linked_back = requester.set_partner(desktop.link());
        debug_assert!(
            linked && linked_back,
            "partner slots are only written by the registry loop"
        );

        debug!(
            "paired desktop {} with {} for {:?}",
            desktop.id(),
            requester.id(),
            requester.rendezvous().as_str()
        );
        Some(desktop.id())
    }

    fn snapshot(&self) -> Vec<DesktopSummary> {
        self.desktops
            .values()
            .map(|entry| DesktopSummary {
                id: entry.endpoint.id(),
                rendezvous: entry.endpoint.rendezvous().to_string(),
                supported: entry.supported,
                paired: entry.endpoint.is_paired(),
            })
            .collect()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::tests::{Fixture, fixture};

    async fn spawn_registry() -> (RegistryHandle, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let log = RegistrationLog::create(dir.path().join("registry.log"))
            .await
            .unwrap();
        let (handle, _task) = Registry::spawn(log, DEFAULT_COMMAND_CAPACITY);
        (handle, dir)
    }

    #[tokio::test]
    async fn register_and_deregister() {
        let (registry, _dir) = spawn_registry().await;
        let desk = fixture("desk", 4);

        registry.register(desk.handle.clone(), true).await.unwrap();
        let listed = registry.desktops().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].rendezvous, "desk");
        assert!(!listed[0].paired);

        registry.deregister(desk.handle.id()).await.unwrap();
        assert!(registry.desktops().await.unwrap().is_empty());
        assert!(!desk.handle.lifecycle().state().is_open());

        // Idempotent.
        registry.deregister(desk.handle.id()).await.unwrap();
        assert!(registry.desktops().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deregister_closes_partner_linked_just_before() {
        let dir = tempfile::tempdir().unwrap();
        let log = RegistrationLog::create(dir.path().join("registry.log"))
            .await
            .unwrap();
        let (registry, handle) = Registry::new(log, 8);
        let desk = fixture("desk", 4);
        let web = fixture("desk", 4);

        // Queue everything before the loop runs: the pair is processed
        // ahead of the departing desktop's deregistration.
        handle.register(desk.handle.clone(), true).await.unwrap();
        let (reply, matched) = oneshot::channel();
        handle
            .tx
            .send(RegistryCommand::Pair {
                requester: web.handle.clone(),
                reply,
            })
            .await
            .unwrap();
        handle.deregister(desk.handle.id()).await.unwrap();
        tokio::spawn(registry.run());

        assert_eq!(matched.await.unwrap(), Some(desk.handle.id()));
        assert!(handle.desktops().await.unwrap().is_empty());
        assert!(web.handle.lifecycle().state().is_closed());
        assert_eq!(
            desk.handle.lifecycle().state(),
            crate::state::QueueState::Draining
        );
    }

    #[tokio::test]
    async fn pair_after_deregister_finds_nothing() {
        let (registry, _dir) = spawn_registry().await;
        let desk = fixture("desk", 4);
        let web = fixture("desk", 4);
        registry.register(desk.handle.clone(), true).await.unwrap();
        registry.deregister(desk.handle.id()).await.unwrap();

        assert!(registry.pair(web.handle.clone()).await.unwrap().is_none());
        assert!(web.handle.lifecycle().state().is_open());
    }

    #[tokio::test]
    async fn registration_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.log");
        let log = RegistrationLog::create(&path).await.unwrap();
        let (registry, _task) = Registry::spawn(log, 8);

        let desk = fixture("logged-desk", 4);
        registry.register(desk.handle.clone(), false).await.unwrap();
        registry.desktops().await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(LOG_HEADER));
        assert!(text.ends_with(" > logged-desk connected.\n"));
    }

    #[tokio::test]
    async fn duplicate_ids_are_accepted() {
        let (registry, _dir) = spawn_registry().await;
        let a = fixture("same", 4);
        let b = fixture("same", 4);
        registry.register(a.handle.clone(), true).await.unwrap();
        registry.register(b.handle.clone(), true).await.unwrap();
        assert_eq!(registry.desktops().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn pair_links_both_sides() {
        let (registry, _dir) = spawn_registry().await;
        let desk = fixture("desk", 4);
        let web = fixture("desk", 4);
        registry.register(desk.handle.clone(), true).await.unwrap();

        let matched = registry.pair(web.handle.clone()).await.unwrap();
        assert_eq!(matched, Some(desk.handle.id()));
        assert_eq!(desk.handle.partner().unwrap().id(), web.handle.id());
        assert_eq!(web.handle.partner().unwrap().id(), desk.handle.id());

        let listed = registry.desktops().await.unwrap();
        assert!(listed[0].paired);
    }

    #[tokio::test]
    async fn paired_desktop_is_not_a_candidate() {
        let (registry, _dir) = spawn_registry().await;
        let desk = fixture("desk", 4);
        let first = fixture("desk", 4);
        let second = fixture("desk", 4);
        registry.register(desk.handle.clone(), true).await.unwrap();

        assert!(registry.pair(first.handle.clone()).await.unwrap().is_some());
        assert!(registry.pair(second.handle.clone()).await.unwrap().is_none());
        assert!(!second.handle.is_paired());
    }

    #[tokio::test]
    async fn scan_skips_paired_desktop_to_next_match() {
        let (registry, _dir) = spawn_registry().await;
        let older = fixture("desk", 4);
        let newer = fixture("desk", 4);
        registry.register(older.handle.clone(), true).await.unwrap();
        registry.register(newer.handle.clone(), true).await.unwrap();

        let w1 = fixture("desk", 4);
        let w2 = fixture("desk", 4);
        assert_eq!(
            registry.pair(w1.handle.clone()).await.unwrap(),
            Some(older.handle.id())
        );
        assert_eq!(
            registry.pair(w2.handle.clone()).await.unwrap(),
            Some(newer.handle.id())
        );
    }

    #[tokio::test]
    async fn unsupported_desktop_is_not_a_candidate() {
        let (registry, _dir) = spawn_registry().await;
        let desk = fixture("old-app", 4);
        let web = fixture("old-app", 4);
        registry.register(desk.handle.clone(), false).await.unwrap();

        assert!(registry.pair(web.handle.clone()).await.unwrap().is_none());

        // Re-registering with the right version makes it reachable.
        registry.register(desk.handle.clone(), true).await.unwrap();
        assert_eq!(registry.desktops().await.unwrap().len(), 1);
        assert!(registry.pair(web.handle.clone()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unknown_id_finds_nothing() {
        let (registry, _dir) = spawn_registry().await;
        let desk = fixture("desk", 4);
        let web = fixture("other", 4);
        registry.register(desk.handle.clone(), true).await.unwrap();
        assert!(registry.pair(web.handle.clone()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_pairs_have_one_winner() {
        let (registry, _dir) = spawn_registry().await;
        let desk = fixture("contended", 4);
        registry.register(desk.handle.clone(), true).await.unwrap();

        let webs: Vec<Fixture> = (0..32).map(|_| fixture("contended", 4)).collect();
        let mut tasks = Vec::new();
        for web in &webs {
            let registry = registry.clone();
            let handle = web.handle.clone();
            tasks.push(tokio::spawn(async move { registry.pair(handle).await.unwrap() }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(webs.iter().filter(|w| w.handle.is_paired()).count(), 1);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_desktop() {
        let (registry, _dir) = spawn_registry().await;
        let mut a = fixture("a", 4);
        let mut b = fixture("b", 4);
        registry.register(a.handle.clone(), true).await.unwrap();
        registry.register(b.handle.clone(), true).await.unwrap();

        registry.broadcast("hello").await.unwrap();
        registry.desktops().await.unwrap();

        assert_eq!(a.text_rx.recv().await.unwrap(), "hello");
        assert_eq!(b.text_rx.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn broadcast_evicts_full_queue() {
        let (registry, _dir) = spawn_registry().await;
        let slow = fixture("slow", 1);
        let mut fast = fixture("fast", 4);
        registry.register(slow.handle.clone(), true).await.unwrap();
        registry.register(fast.handle.clone(), true).await.unwrap();

        registry.broadcast("one").await.unwrap();
        registry.broadcast("two").await.unwrap();

        let listed = registry.desktops().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].rendezvous, "fast");
        assert_eq!(
            slow.handle.lifecycle().state(),
            crate::state::QueueState::Draining
        );
        assert_eq!(fast.text_rx.recv().await.unwrap(), "one");
        assert_eq!(fast.text_rx.recv().await.unwrap(), "two");
    }
}
