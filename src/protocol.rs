//! Wire types exchanged with the observer.
//!
//! Outbound messages are [`RelayMessage`]s tagged with [`PAGE_SOURCE`]. Inbound
//! frames carry [`PEER_SOURCE`] and are parsed into the closed
//! [`InboundCommand`] enum.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::action::Action;
use crate::codec;
use crate::error::CodecError;
use crate::history::ActionId;

/// Source tag of messages emitted by the bridge.
pub const PAGE_SOURCE: &str = "redux-page";

/// Source tag of messages emitted by the observer side.
pub const PEER_SOURCE: &str = "redux-cs";

/// Outbound message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// The bridge is ready.
    InitInstance,
    /// Full history snapshot.
    State,
    /// One new action.
    Action,
    /// The application store was initialized.
    Init,
    /// Ask the observer to show its UI.
    Open,
}

/// A payload field: either a live JSON value or its string encoding.
///
/// On the receiving side a live JSON string is indistinguishable from an
/// encoded payload; producers that relay bare string states should enable
/// always-serialize so both sides agree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Wire {
    /// Codec output.
    Encoded(String),
    /// A value carried as is.
    Live(Value),
}

impl Wire {
    /// Returns the decoded value.
    pub fn decode(&self) -> Result<Value, CodecError> {
        match self {
            Self::Live(value) => Ok(value.clone()),
            Self::Encoded(text) => codec::decode(text),
        }
    }

    /// True for the encoded form.
    #[must_use]
    pub const fn is_encoded(&self) -> bool {
        matches!(self, Self::Encoded(_))
    }
}

/// One outbound protocol message.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Wire>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Wire>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action_id: Option<ActionId>,

    #[serde(default)]
    pub is_excess: bool,

    pub source: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
}

impl RelayMessage {
    /// Creates a page-side message with no payload.
    #[must_use]
    pub fn new(kind: MessageKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            payload: None,
            action: None,
            next_action_id: None,
            is_excess: false,
            source: PAGE_SOURCE.to_string(),
            name: name.into(),
            position: None,
        }
    }

    /// True when any payload field is in the encoded form.
    #[must_use]
    pub fn is_serialized(&self) -> bool {
        self.payload.as_ref().is_some_and(Wire::is_encoded) || self.action.as_ref().is_some_and(Wire::is_encoded)
    }

    /// Converts `payload` and `action` to the string form.
    ///
    /// Absent fields stay absent and a `null` payload is left as is.
    pub fn into_serialized(mut self) -> Result<Self, CodecError> {
        self.payload = match self.payload.take() {
            Some(Wire::Live(value)) if !value.is_null() => Some(Wire::Encoded(codec::encode(&value)?)),
            other => other,
        };
        self.action = match self.action.take() {
            Some(Wire::Live(value)) => Some(Wire::Encoded(codec::encode(&value)?)),
            other => other,
        };
        Ok(self)
    }

    /// Decodes `payload` regardless of its wire form.
    pub fn decode_payload(&self) -> Result<Option<Value>, CodecError> {
        self.payload.as_ref().map(Wire::decode).transpose()
    }

    /// Decodes `action` regardless of its wire form.
    pub fn decode_action(&self) -> Result<Option<Value>, CodecError> {
        self.action.as_ref().map(Wire::decode).transpose()
    }
}

/// Commands accepted from the observer.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundCommand {
    /// Replay a lifted-store action (jump, toggle, sweep, ...).
    Dispatch(Action),
    /// Re-issue an application action.
    Action(Action),
    /// Load a serialized history.
    Import(String),
    /// Request a full resync.
    Update,
    /// Enable monitoring.
    Start,
    /// Disable monitoring.
    Stop,
    /// Any other type; ignored.
    Unknown(String),
}

/// True for frames tagged with [`PEER_SOURCE`].
#[must_use]
pub fn is_peer_frame(frame: &Value) -> bool {
    frame.get("source").and_then(Value::as_str) == Some(PEER_SOURCE)
}

impl InboundCommand {
    /// Parses a peer frame.
    ///
    /// Returns `None` for frames that are not objects, not tagged with
    /// [`PEER_SOURCE`], or whose body does not fit their type.
    #[must_use]
    pub fn parse(frame: &Value) -> Option<Self> {
        if !is_peer_frame(frame) {
            return None;
        }
        let obj = frame.as_object()?;
        let kind = obj.get("type").and_then(Value::as_str)?;

        let command = match kind {
            "DISPATCH" => Self::Dispatch(Action::from_value(obj.get("payload")?.clone())?),
            "ACTION" => Self::Action(Action::from_value(obj.get("payload")?.clone())?),
            "IMPORT" => match obj.get("state")? {
                Value::String(text) => Self::Import(text.clone()),
                other @ (Value::Object(_) | Value::Array(_)) => Self::Import(other.to_string()),
                _ => return None,
            },
            "UPDATE" => Self::Update,
            "START" => Self::Start,
            "STOP" => Self::Stop,
            other => Self::Unknown(other.to_string()),
        };
        Some(command)
    }

    /// Builds the peer frame for this command.
    #[must_use]
    pub fn to_frame(&self) -> Value {
        let mut frame = Map::new();
        frame.insert("source".to_string(), json!(PEER_SOURCE));
        let kind = match self {
            Self::Dispatch(action) => {
                frame.insert("payload".to_string(), json!(action));
                "DISPATCH"
            }
            Self::Action(action) => {
                frame.insert("payload".to_string(), json!(action));
                "ACTION"
            }
            Self::Import(state) => {
                frame.insert("state".to_string(), json!(state));
                "IMPORT"
            }
            Self::Update => "UPDATE",
            Self::Start => "START",
            Self::Stop => "STOP",
            Self::Unknown(kind) => kind.as_str(),
        };
        frame.insert("type".to_string(), json!(kind));
        Value::Object(frame)
    }
}
