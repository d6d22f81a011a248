//! Interface of the lifted (time-travel) store the bridge instruments.
//!
//! The store itself lives outside this crate. It records every dispatched action
//! and the state computed from it, and reports its activity to a
//! [`StoreObserver`].

use std::sync::Arc;

use serde_json::Value;

use crate::action::{Action, IMPORT_STATE};
use crate::error::RelayResult;
use crate::history::HistoryRecord;

/// Receives store activity.
///
/// The store calls [`lifted_action`](Self::lifted_action) for every lifted action
/// it reduces, then [`changed`](Self::changed) once subscribers may read the new
/// state. Implementations must tolerate being called re-entrantly from inside
/// [`LiftedStore::dispatch`].
pub trait StoreObserver: Send + Sync {
    /// A lifted action of type `kind` is being reduced.
    fn lifted_action(&self, kind: &str);

    /// The store state changed.
    fn changed(&self);
}

/// A store wrapped with history recording.
pub trait LiftedStore: Send + Sync {
    /// Dispatches an application action (recorded as `PERFORM_ACTION`).
    fn dispatch(&self, action: Action);

    /// Dispatches a lifted action such as `JUMP_TO_STATE` or `IMPORT_STATE`.
    fn dispatch_lifted(&self, action: Action);

    /// Current application state.
    fn state(&self) -> Value;

    /// Snapshot of the recorded history.
    fn history(&self) -> HistoryRecord;

    /// Registers an observer for store activity.
    fn subscribe(&self, observer: Arc<dyn StoreObserver>);
}

/// Builds the lifted action that replaces the whole history.
pub fn import_state_action(history: &HistoryRecord) -> RelayResult<Action> {
    Ok(Action::new(IMPORT_STATE).with_field("nextLiftedState", serde_json::to_value(history)?))
}

/// Reads the history carried by an `IMPORT_STATE` lifted action.
#[must_use]
pub fn imported_history(action: &Action) -> Option<HistoryRecord> {
    if action.kind != IMPORT_STATE {
        return None;
    }
    serde_json::from_value(action.field("nextLiftedState")?.clone()).ok()
}
