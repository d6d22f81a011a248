//! Actions as seen by the relay.
//!
//! An action is an opaque record with a `type` discriminator. The relay reads the
//! discriminator for filtering and routing and forwards everything else untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Application action recorded by the lifted store at initialization.
pub const INIT_ACTION: &str = "@@INIT";

/// Lifted action the store emits when its reducer is (re)initialized.
pub const STORE_INIT_ACTION: &str = "@@redux/INIT";

/// Lifted action wrapping a regular application dispatch.
pub const PERFORM_ACTION: &str = "PERFORM_ACTION";

/// Lifted action replacing the whole history.
pub const IMPORT_STATE: &str = "IMPORT_STATE";

/// Lifted actions that only change monitor bookkeeping. A change caused by one of
/// these is reported as a full resync rather than as a new action.
pub const MONITOR_ACTIONS: [&str; 5] = [
    "TOGGLE_ACTION",
    "SWEEP",
    "SET_ACTIONS_ACTIVE",
    IMPORT_STATE,
    "@@redux-devtools-log-monitor/START_CONSECUTIVE_TOGGLE",
];

/// Lifted actions that move the cursor through existing history. They are
/// issued by the observer, so they are never echoed back.
pub const REPLAY_ACTIONS: [&str; 2] = ["JUMP_TO_STATE", "JUMP_TO_ACTION"];

/// Returns true for lifted action types in [`MONITOR_ACTIONS`].
#[must_use]
pub fn is_monitor_action(kind: &str) -> bool {
    MONITOR_ACTIONS.contains(&kind)
}

/// Returns true for lifted action types in [`REPLAY_ACTIONS`].
#[must_use]
pub fn is_replay_action(kind: &str) -> bool {
    REPLAY_ACTIONS.contains(&kind)
}

/// An action: a `type` plus arbitrary fields.
///
/// # Examples
///
/// ```
/// use liftrelay::Action;
/// use serde_json::json;
///
/// let action = Action::new("ADD_TODO").with_field("text", json!("write docs"));
/// assert_eq!(action.kind, "ADD_TODO");
/// assert_eq!(action.field("text"), Some(&json!("write docs")));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// The action discriminator.
    #[serde(rename = "type")]
    pub kind: String,

    /// Every other field of the action.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Action {
    /// Creates an action with no payload fields.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Map::new(),
        }
    }

    /// Adds a payload field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Reads a payload field.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Parses an action out of an arbitrary JSON value.
    ///
    /// Returns `None` unless the value is an object with a string `type`.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        if !value.get("type").is_some_and(Value::is_string) {
            return None;
        }
        serde_json::from_value(value).ok()
    }

    /// Returns true for the lifted store's initialization action.
    #[must_use]
    pub fn is_init(&self) -> bool {
        self.kind == INIT_ACTION
    }
}
