//! Per-connection handshake state machine.
//!
//! ```text
//!                 REGO (supported)
//!  Unregistered ───────────────────► Registered
//!     │    ▲        CONN (matched)
//!     │    │
//!     └────┘  REGO (unsupported version), unrecognized frames
//! ```
//!
//! `Registered` is terminal for the life of the connection. The role is
//! fixed by the first REGO or CONN frame and never flips afterwards.

use std::time::Instant;

use crate::error::RelayError;
use crate::frame::RendezvousId;

// ── Role ─────────────────────────────────────────────────────────

/// Which kind of peer sits on the other end of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// No handshake parsed yet.
    #[default]
    Unknown,
    /// Desktop agent advertising a rendezvous id.
    Desktop,
    /// Web client asking for a desktop.
    Web,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Desktop => write!(f, "desktop"),
            Self::Web => write!(f, "web"),
        }
    }
}

// ── Registration ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Registration {
    /// Handshake still being interpreted.
    #[default]
    Unregistered,

    /// Every further message is bridged to the partner.
    Registered {
        /// When the endpoint finished its handshake.
        since: Instant,
    },
}

impl std::fmt::Display for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unregistered => write!(f, "Unregistered"),
            Self::Registered { .. } => write!(f, "Registered"),
        }
    }
}

// ── EndpointState ────────────────────────────────────────────────

/// Protocol state owned by an endpoint's reader task.
#[derive(Debug, Clone, Default)]
pub struct EndpointState {
    role: Role,
    rendezvous: Option<RendezvousId>,
    registration: Registration,
}

impl EndpointState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The id this endpoint advertised (desktop) or asked for (web).
    pub fn rendezvous(&self) -> Option<&RendezvousId> {
        self.rendezvous.as_ref()
    }

    pub fn is_registered(&self) -> bool {
        matches!(self.registration, Registration::Registered { .. })
    }

    /// How long the endpoint has been bridging.
    ///
    /// Returns `None` while still unregistered.
    pub fn registered_duration(&self) -> Option<std::time::Duration> {
        match self.registration {
            Registration::Registered { since } => Some(since.elapsed()),
            Registration::Unregistered => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Record a REGO frame.
    ///
    /// Valid while `Unregistered` with role `Unknown` or `Desktop`; a
    /// desktop whose version was refused may try again.
    pub fn claim_desktop(&mut self, id: RendezvousId) -> Result<(), RelayError> {
        if self.is_registered() {
            return Err(RelayError::ProtocolViolation(
                "cannot register: handshake already complete",
            ));
        }
        match self.role {
            Role::Unknown | Role::Desktop => {
                self.role = Role::Desktop;
                self.rendezvous = Some(id);
                Ok(())
            }
            Role::Web => Err(RelayError::ProtocolViolation(
                "cannot register: connection is a web client",
            )),
        }
    }

    /// Record a CONN frame.
    ///
    /// Valid while `Unregistered` with role `Unknown`.
    pub fn claim_web(&mut self, id: RendezvousId) -> Result<(), RelayError> {
        if self.is_registered() {
            return Err(RelayError::ProtocolViolation(
                "cannot connect: handshake already complete",
            ));
        }
        match self.role {
            Role::Unknown | Role::Web => {
                self.role = Role::Web;
                self.rendezvous = Some(id);
                Ok(())
            }
            Role::Desktop => Err(RelayError::ProtocolViolation(
                "cannot connect: connection is a desktop",
            )),
        }
    }

    /// Transition to `Registered`.
    ///
    /// Valid from: `Unregistered` once a role was claimed.
    pub fn complete_registration(&mut self) -> Result<(), RelayError> {
        if self.is_registered() {
            return Err(RelayError::ProtocolViolation("already registered"));
        }
        if self.role == Role::Unknown {
            return Err(RelayError::ProtocolViolation(
                "cannot register: no handshake parsed",
            ));
        }
        self.registration = Registration::Registered {
            since: Instant::now(),
        };
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> RendezvousId {
        RendezvousId::new(s).unwrap()
    }

    #[test]
    fn desktop_happy_path() {
        let mut state = EndpointState::new();
        assert_eq!(state.role(), Role::Unknown);
        assert!(!state.is_registered());

        state.claim_desktop(id("desk")).unwrap();
        assert_eq!(state.role(), Role::Desktop);
        assert_eq!(state.rendezvous().unwrap().as_str(), "desk");
        assert!(state.registered_duration().is_none());

        state.complete_registration().unwrap();
        assert!(state.is_registered());
        assert!(state.registered_duration().is_some());
    }

    #[test]
    fn web_happy_path() {
        let mut state = EndpointState::new();
        state.claim_web(id("desk")).unwrap();
        assert_eq!(state.role(), Role::Web);
        state.complete_registration().unwrap();
        assert!(state.is_registered());
    }

    #[test]
    fn desktop_may_retry_registration() {
        let mut state = EndpointState::new();
        state.claim_desktop(id("old")).unwrap();
        state.claim_desktop(id("new")).unwrap();
        assert_eq!(state.rendezvous().unwrap().as_str(), "new");
        assert!(!state.is_registered());
    }

    #[test]
    fn registered_is_terminal() {
        let mut state = EndpointState::new();
        state.claim_desktop(id("desk")).unwrap();
        state.complete_registration().unwrap();

        assert!(state.claim_desktop(id("desk")).is_err());
        assert!(state.claim_web(id("desk")).is_err());
        assert!(state.complete_registration().is_err());
    }

    #[test]
    fn role_never_flips() {
        let mut desktop = EndpointState::new();
        desktop.claim_desktop(id("desk")).unwrap();
        assert!(desktop.claim_web(id("desk")).is_err());

        let mut web = EndpointState::new();
        web.claim_web(id("desk")).unwrap();
        assert!(web.claim_desktop(id("desk")).is_err());
    }

    #[test]
    fn cannot_register_without_role() {
        let mut state = EndpointState::new();
        assert!(state.complete_registration().is_err());
    }

    #[test]
    fn display_format() {
        assert_eq!(Role::Desktop.to_string(), "desktop");
        assert_eq!(Registration::Unregistered.to_string(), "Unregistered");
        assert_eq!(
            Registration::Registered {
                since: Instant::now()
            }
            .to_string(),
            "Registered"
        );
    }
}
