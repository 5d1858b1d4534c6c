//! Connection lifecycle states.
//!
//! ```text
//! Disconnected → Connecting → ServicesDiscovering → NegotiatingMtu → Ready
//!      ↑                                                               │
//!      └──────────────────── Disconnecting ←───────────────────────────┘
//!
//! any non-terminal state ──fatal──→ Failed ──cleanup──→ Disconnected
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::DeviceAddress;
use crate::gatt::ServiceDescriptor;
use crate::id::ConnectionId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    ServicesDiscovering,
    NegotiatingMtu,
    Ready,
    Disconnecting,
    Failed,
}

impl ConnectionState {
    /// `Disconnected` and `Failed` end a connection's life.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }

    /// Only a ready link accepts application reads, writes and
    /// notification toggles.
    #[must_use]
    pub fn accepts_operations(self) -> bool {
        self == Self::Ready
    }

    /// Whether `self → next` is an edge of the lifecycle graph.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{
            Connecting, Disconnected, Disconnecting, Failed, NegotiatingMtu, Ready,
            ServicesDiscovering,
        };

        match (self, next) {
            (Disconnected, Connecting)
            | (Connecting, ServicesDiscovering)
            | (ServicesDiscovering, NegotiatingMtu)
            | (NegotiatingMtu, Ready)
            | (Disconnecting | Failed, Disconnected) => true,
            (Connecting | ServicesDiscovering | NegotiatingMtu | Ready, Disconnecting) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::ServicesDiscovering => "services_discovering",
            Self::NegotiatingMtu => "negotiating_mtu",
            Self::Ready => "ready",
            Self::Disconnecting => "disconnecting",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a caller learns once a connection reaches `Ready`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub address: DeviceAddress,
    pub mtu: u16,
    pub services: Vec<ServiceDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_start_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn should_follow_the_happy_path() {
        let path = [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::ServicesDiscovering,
            ConnectionState::NegotiatingMtu,
            ConnectionState::Ready,
            ConnectionState::Disconnecting,
            ConnectionState::Disconnected,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn should_allow_failure_from_any_non_terminal_state() {
        for state in [
            ConnectionState::Connecting,
            ConnectionState::ServicesDiscovering,
            ConnectionState::NegotiatingMtu,
            ConnectionState::Ready,
            ConnectionState::Disconnecting,
        ] {
            assert!(state.can_transition_to(ConnectionState::Failed));
        }
        assert!(!ConnectionState::Disconnected.can_transition_to(ConnectionState::Failed));
    }

    #[test]
    fn should_reject_skipping_discovery() {
        assert!(!ConnectionState::Connecting.can_transition_to(ConnectionState::Ready));
        assert!(!ConnectionState::Disconnected.can_transition_to(ConnectionState::Ready));
    }

    #[test]
    fn should_only_accept_operations_when_ready() {
        assert!(ConnectionState::Ready.accepts_operations());
        assert!(!ConnectionState::NegotiatingMtu.accepts_operations());
        assert!(!ConnectionState::Disconnected.accepts_operations());
    }
}
