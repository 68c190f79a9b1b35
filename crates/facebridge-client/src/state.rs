//! Connection state and fault reasons

use std::fmt;

use serde::{Deserialize, Serialize};

/// Connection lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Discovering,
    Authenticating,
    SynchronizingParameters,
    Ready,
    Faulted,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Discovering => "discovering",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::SynchronizingParameters => "synchronizing-parameters",
            ConnectionState::Ready => "ready",
            ConnectionState::Faulted => "faulted",
        }
    }

    /// States reached while bringing a session up
    pub fn is_establishing(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Discovering
                | ConnectionState::Authenticating
                | ConnectionState::SynchronizingParameters
        )
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (_, Faulted) => true,
            // Cancellation tears down from anywhere
            (_, Disconnected) => true,
            (Disconnected, Connecting) => true,
            (Connecting, Discovering) | (Connecting, Authenticating) => true,
            (Discovering, Authenticating) => true,
            (Authenticating, SynchronizingParameters) => true,
            (SynchronizingParameters, Ready) => true,
            // Re-sync after a rule reload
            (Ready, SynchronizingParameters) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the client entered `Faulted`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultReason {
    DiscoveryTimeout,
    ConnectFailed,
    AuthenticationDenied,
    AuthenticationFailed,
    HandshakeTimeout,
    ParameterSyncFailed,
    SendFailed,
    ProtocolViolation,
}

impl FaultReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FaultReason::DiscoveryTimeout => "discovery-timeout",
            FaultReason::ConnectFailed => "connect-failed",
            FaultReason::AuthenticationDenied => "authentication-denied",
            FaultReason::AuthenticationFailed => "authentication-failed",
            FaultReason::HandshakeTimeout => "handshake-timeout",
            FaultReason::ParameterSyncFailed => "parameter-sync-failed",
            FaultReason::SendFailed => "send-failed",
            FaultReason::ProtocolViolation => "protocol-violation",
        }
    }
}

impl fmt::Display for FaultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use ConnectionState::*;
        let path = [
            Disconnected,
            Connecting,
            Discovering,
            Authenticating,
            SynchronizingParameters,
            Ready,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(Connecting.can_transition_to(Authenticating));
    }

    #[test]
    fn test_invalid_transitions() {
        use ConnectionState::*;
        assert!(!Disconnected.can_transition_to(Ready));
        assert!(!Faulted.can_transition_to(Ready));
        assert!(!Faulted.can_transition_to(Connecting));
        assert!(!Authenticating.can_transition_to(Ready));
    }

    #[test]
    fn test_any_state_can_fault() {
        use ConnectionState::*;
        for s in [Disconnected, Connecting, Discovering, Authenticating, SynchronizingParameters, Ready] {
            assert!(s.can_transition_to(Faulted));
        }
    }
}
