//! Serialization gate.
//!
//! Messages go out as live values until the transport rejects one. From then on
//! the gate is tripped for the rest of the session and every message is sent in
//! the string form. The gate never returns to native delivery.

use tracing::warn;

use crate::error::{RelayResult, TransportError};
use crate::protocol::RelayMessage;
use crate::transport::Transport;

/// Delivery mode of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateState {
    /// Live values are attempted first.
    #[default]
    Native,
    /// Every message is encoded before delivery.
    Fallback,
}

/// How a single message was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Posted with live values.
    Native,
    /// Posted with encoded payload fields.
    Serialized,
}

/// One-way native → fallback state machine in front of a transport.
#[derive(Debug, Default)]
pub struct SerializationGate {
    state: GateState,
}

impl SerializationGate {
    /// A gate in the native state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> GateState {
        self.state
    }

    /// True once a native delivery has failed.
    #[must_use]
    pub const fn is_tripped(&self) -> bool {
        matches!(self.state, GateState::Fallback)
    }

    /// Delivers `message`, encoding it when tripped, when `always_serialize` is
    /// set, or when the transport rejects the live form.
    pub fn emit(
        &mut self,
        transport: &dyn Transport,
        message: RelayMessage,
        always_serialize: bool,
    ) -> RelayResult<Delivery> {
        if always_serialize || self.is_tripped() {
            return send_serialized(transport, message);
        }

        let frame = serde_json::to_value(&message)?;
        match transport.post(&frame) {
            Ok(()) => Ok(Delivery::Native),
            Err(TransportError::Unrepresentable { reason }) => {
                warn!(kind = ?message.kind, %reason, "native delivery rejected; switching to serialized relay");
                self.state = GateState::Fallback;
                send_serialized(transport, message)
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn send_serialized(transport: &dyn Transport, message: RelayMessage) -> RelayResult<Delivery> {
    let message = message.into_serialized()?;
    let frame = serde_json::to_value(&message)?;
    transport.post(&frame)?;
    Ok(Delivery::Serialized)
}
