/// Circuit connection state machine.
///
/// `Connecting -> Connected -> Disconnecting -> Disconnected`, with
/// `Connecting -> Disconnected` on refusal or timeout. `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CircuitState {
    /// Connect request sent or received, no acknowledgment yet
    #[default]
    Connecting,

    /// Both ends agreed on the circuit; data may flow
    Connected,

    /// Disconnect request sent, waiting for acknowledgment
    Disconnecting,

    /// Circuit is finished and must be removed from the registry
    Disconnected,
}

impl CircuitState {
    /// Returns true if information frames may be sent.
    pub fn is_established(&self) -> bool {
        matches!(self, CircuitState::Connected)
    }

    /// Returns true once the circuit can never be used again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CircuitState::Disconnected)
    }

    /// Returns true if the move from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: CircuitState) -> bool {
        use CircuitState::*;
        matches!(
            (self, next),
            (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnecting)
                | (Connected, Disconnected)
                | (Disconnecting, Disconnected)
        )
    }
}
