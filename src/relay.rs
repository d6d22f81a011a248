//! Relay channel: builds outbound messages and screens inbound frames.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, trace};

use crate::env::Environment;
use crate::error::RelayResult;
use crate::filter::{project_history, FilterRule};
use crate::gate::{Delivery, SerializationGate};
use crate::history::{ActionId, HistoryRecord, LiftedActionEntry};
use crate::protocol::{InboundCommand, MessageKind, RelayMessage, Wire};
use crate::transport::{InboundEvent, Transport};

/// An outbound event before it is shaped into a [`RelayMessage`].
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// The bridge is ready.
    InitInstance,
    /// Full history; projected through the active filter.
    State(HistoryRecord),
    /// One new recorded action and the application state after it.
    Action {
        state: Value,
        entry: LiftedActionEntry,
        next_action_id: ActionId,
    },
    /// The application store initialized.
    Init {
        state: Value,
        timestamp: i64,
    },
    /// Ask the observer to open its UI.
    Open {
        position: Option<String>,
    },
}

impl Outbound {
    /// Wire type of this event.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::InitInstance => MessageKind::InitInstance,
            Self::State(_) => MessageKind::State,
            Self::Action { .. } => MessageKind::Action,
            Self::Init { .. } => MessageKind::Init,
            Self::Open { .. } => MessageKind::Open,
        }
    }
}

/// Session state a relay reads and may update.
#[allow(missing_docs)]
#[derive(Debug)]
pub struct RelayContext<'a> {
    pub gate: &'a mut SerializationGate,
    pub filter: Option<&'a FilterRule>,
    pub is_excess: bool,
    pub always_serialize: bool,
}

/// The page side of the protocol.
pub struct RelayChannel {
    transport: Arc<dyn Transport>,
    env: Arc<dyn Environment>,
    label: Option<String>,
}

impl RelayChannel {
    /// Creates a channel posting through `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, env: Arc<dyn Environment>, label: Option<String>) -> Self {
        Self { transport, env, label }
    }

    /// Instance name: the configured label, else the environment title.
    #[must_use]
    pub fn name(&self) -> String {
        self.label.clone().unwrap_or_else(|| self.env.title())
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Shapes an outbound event into a live message.
    pub fn build(&self, outbound: Outbound, filter: Option<&FilterRule>, is_excess: bool) -> RelayResult<RelayMessage> {
        let mut message = RelayMessage::new(outbound.kind(), self.name());
        message.is_excess = is_excess;

        match outbound {
            Outbound::InitInstance => {}
            Outbound::State(history) => {
                let history = match filter {
                    Some(rule) => project_history(&history, rule),
                    None => history,
                };
                message.payload = Some(Wire::Live(serde_json::to_value(&history)?));
            }
            Outbound::Action {
                state,
                entry,
                next_action_id,
            } => {
                message.payload = Some(Wire::Live(state));
                message.action = Some(Wire::Live(serde_json::to_value(&entry)?));
                message.next_action_id = Some(next_action_id);
            }
            Outbound::Init { state, timestamp } => {
                message.payload = Some(Wire::Live(state));
                message.action = Some(Wire::Live(json!({ "timestamp": timestamp })));
            }
            Outbound::Open { position } => {
                message.position = Some(position.unwrap_or_default());
            }
        }
        Ok(message)
    }

    /// Builds and delivers an outbound event through the gate.
    pub fn relay(&self, outbound: Outbound, ctx: RelayContext<'_>) -> RelayResult<Delivery> {
        let kind = outbound.kind();
        let message = self.build(outbound, ctx.filter, ctx.is_excess)?;
        let delivery = ctx.gate.emit(self.transport.as_ref(), message, ctx.always_serialize)?;
        debug!(?kind, ?delivery, is_excess = ctx.is_excess, "relayed");
        Ok(delivery)
    }

    /// Screens an inbound frame: same origin, peer source, known shape.
    #[must_use]
    pub fn accept(&self, event: &InboundEvent) -> Option<InboundCommand> {
        if event.origin != self.transport.context() {
            trace!(origin = %event.origin, "discarding frame from foreign context");
            return None;
        }
        let command = InboundCommand::parse(&event.data);
        if command.is_none() {
            trace!("discarding non-peer frame");
        }
        command
    }
}

impl std::fmt::Debug for RelayChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayChannel")
            .field("context", &self.transport.context())
            .field("label", &self.label)
            .finish()
    }
}
