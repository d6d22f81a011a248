//! History records produced by the lifted store.
//!
//! The relay never owns history; it reads a snapshot per notification, may
//! project it through a filter, and forwards it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::{Action, PERFORM_ACTION};

/// Identifier of a recorded action. Assigned by the lifted store in dispatch order.
pub type ActionId = u64;

/// Application state after applying one recorded action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedState {
    /// The resulting application state.
    pub state: Value,

    /// Error captured while computing this state, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComputedState {
    /// A computed state without an error.
    #[must_use]
    pub const fn ok(state: Value) -> Self {
        Self { state, error: None }
    }

    /// A computed state that captured an error.
    #[must_use]
    pub fn failed(state: Value, error: impl Into<String>) -> Self {
        Self {
            state,
            error: Some(error.into()),
        }
    }
}

/// One entry of `actionsById`: the recorded application action and its wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiftedActionEntry {
    /// Lifted wrapper type, normally `PERFORM_ACTION`.
    #[serde(rename = "type", default = "default_entry_kind")]
    pub kind: String,

    /// The recorded application action.
    pub action: Action,

    /// Dispatch time in milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

fn default_entry_kind() -> String {
    PERFORM_ACTION.to_string()
}

impl LiftedActionEntry {
    /// Wraps an application action as a `PERFORM_ACTION` entry.
    #[must_use]
    pub fn perform(action: Action, timestamp: Option<i64>) -> Self {
        Self {
            kind: default_entry_kind(),
            action,
            timestamp,
        }
    }
}

/// Full history snapshot of a lifted store.
///
/// Invariant: `staged_action_ids.len() == computed_states.len()`, and
/// `current_state_index` indexes both (or is -1 while history is empty).
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub staged_action_ids: Vec<ActionId>,
    pub actions_by_id: BTreeMap<ActionId, LiftedActionEntry>,
    pub computed_states: Vec<ComputedState>,
    pub current_state_index: i64,
    pub next_action_id: ActionId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_action_ids: Vec<ActionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committed_state: Option<Value>,
}

impl Default for HistoryRecord {
    fn default() -> Self {
        Self {
            staged_action_ids: Vec::new(),
            actions_by_id: BTreeMap::new(),
            computed_states: Vec::new(),
            current_state_index: -1,
            next_action_id: 0,
            skipped_action_ids: Vec::new(),
            committed_state: None,
        }
    }
}

impl HistoryRecord {
    /// Number of staged actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.staged_action_ids.len()
    }

    /// True when nothing has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.staged_action_ids.is_empty()
    }

    /// True when staged ids and computed states are aligned.
    #[must_use]
    pub fn is_aligned(&self) -> bool {
        self.staged_action_ids.len() == self.computed_states.len()
    }

    /// The computed state at `current_state_index`.
    #[must_use]
    pub fn current(&self) -> Option<&ComputedState> {
        usize::try_from(self.current_state_index)
            .ok()
            .and_then(|idx| self.computed_states.get(idx))
    }

    /// True when the computed state at the current index carries an error.
    #[must_use]
    pub fn current_has_error(&self) -> bool {
        self.current().is_some_and(|c| c.error.is_some())
    }

    /// The most recently recorded entry (`next_action_id - 1`).
    #[must_use]
    pub fn last_entry(&self) -> Option<(ActionId, &LiftedActionEntry)> {
        let id = self.next_action_id.checked_sub(1)?;
        self.actions_by_id.get(&id).map(|entry| (id, entry))
    }

    /// Number of staged application actions, not counting a leading `@@INIT` record.
    #[must_use]
    pub fn action_count(&self) -> usize {
        let leading_init = self
            .staged_action_ids
            .first()
            .and_then(|id| self.action(*id))
            .is_some_and(Action::is_init);
        self.len() - usize::from(leading_init)
    }

    /// Looks up the application action recorded under `id`.
    #[must_use]
    pub fn action(&self, id: ActionId) -> Option<&Action> {
        self.actions_by_id.get(&id).map(|entry| &entry.action)
    }
}
