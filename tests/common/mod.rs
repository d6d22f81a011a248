#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::{json, Value};

use liftrelay::store::imported_history;
use liftrelay::{
    Action, Bridge, BridgeConfig, ComputedState, HistoryRecord, InboundCommand, LiftedActionEntry, LiftedStore,
    Listener, LocalTransport, MessageKind, OptionsSource, RelayMessage, StoreObserver, Transport, INIT_ACTION,
    PAGE_SOURCE, STORE_INIT_ACTION,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// In-memory lifted store over a counter reducer.
///
/// `FAIL` records a computed state carrying an error. History starts empty;
/// [`CounterStore::init`] records the initial `@@INIT` entry.
#[derive(Default)]
pub struct CounterStore {
    history: Mutex<HistoryRecord>,
    observers: Mutex<Vec<Arc<dyn StoreObserver>>>,
}

impl CounterStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records `@@INIT` the way store creation does.
    pub fn init(&self) {
        {
            let mut history = self.history.lock().unwrap();
            *history = HistoryRecord::default();
            record(&mut history, Action::new(INIT_ACTION));
        }
        self.notify(STORE_INIT_ACTION);
    }

    pub fn count(&self) -> i64 {
        self.state()["count"].as_i64().unwrap_or(0)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().unwrap().len()
    }

    // Observers run after the lock is released; they read the store back.
    fn notify(&self, kind: &str) {
        let observers = self.observers.lock().unwrap().clone();
        for observer in &observers {
            observer.lifted_action(kind);
        }
        for observer in &observers {
            observer.changed();
        }
    }
}

fn reduce(previous: &Value, action: &Action) -> ComputedState {
    let count = previous["count"].as_i64().unwrap_or(0);
    match action.kind.as_str() {
        INIT_ACTION | "RESET" => ComputedState::ok(json!({ "count": 0 })),
        "INCREMENT" => ComputedState::ok(json!({ "count": count + 1 })),
        "DECREMENT" => ComputedState::ok(json!({ "count": count - 1 })),
        "FAIL" => ComputedState::failed(previous.clone(), "reducer failed"),
        _ => ComputedState::ok(previous.clone()),
    }
}

fn record(history: &mut HistoryRecord, action: Action) {
    let previous = history.current().map_or(Value::Null, |c| c.state.clone());
    let at_tip = history.current_state_index + 1 == history.len() as i64;
    let id = history.next_action_id;

    history.computed_states.push(reduce(&previous, &action));
    history
        .actions_by_id
        .insert(id, LiftedActionEntry::perform(action, Some(Utc::now().timestamp_millis())));
    history.staged_action_ids.push(id);
    history.next_action_id = id + 1;
    if at_tip {
        history.current_state_index = history.len() as i64 - 1;
    }
}

impl LiftedStore for CounterStore {
    fn dispatch(&self, action: Action) {
        record(&mut self.history.lock().unwrap(), action);
        self.notify(liftrelay::PERFORM_ACTION);
    }

    fn dispatch_lifted(&self, action: Action) {
        {
            let mut history = self.history.lock().unwrap();
            match action.kind.as_str() {
                "JUMP_TO_STATE" => {
                    if let Some(index) = action.field("index").and_then(Value::as_i64) {
                        history.current_state_index = index;
                    }
                }
                liftrelay::IMPORT_STATE => {
                    if let Some(imported) = imported_history(&action) {
                        *history = imported;
                    }
                }
                _ => {}
            }
        }
        self.notify(&action.kind);
    }

    fn state(&self) -> Value {
        let history = self.history.lock().unwrap();
        history.current().map_or(Value::Null, |c| c.state.clone())
    }

    fn history(&self) -> HistoryRecord {
        self.history.lock().unwrap().clone()
    }

    fn subscribe(&self, observer: Arc<dyn StoreObserver>) {
        self.observers.lock().unwrap().push(observer);
    }
}

/// A bridged counter store with an observer-side listener.
pub struct Harness {
    pub transport: Arc<LocalTransport>,
    pub peer: Listener,
    pub bridge: Bridge,
    pub store: Arc<CounterStore>,
}

impl Harness {
    pub fn new(config: BridgeConfig, options: Arc<dyn OptionsSource>) -> Self {
        Self::with_transport(Arc::new(LocalTransport::new()), config, options)
    }

    pub fn with_transport(transport: Arc<LocalTransport>, config: BridgeConfig, options: Arc<dyn OptionsSource>) -> Self {
        init_tracing();
        let peer = transport.attach();
        let bridge = Bridge::builder(transport.clone())
            .config(config)
            .options(options)
            .build()
            .unwrap();
        let store = CounterStore::new();
        bridge.enhance(store.clone()).unwrap();
        Self {
            transport,
            peer,
            bridge,
            store,
        }
    }

    /// Posts an observer command and lets the bridge apply it.
    pub fn send(&self, command: InboundCommand) {
        self.transport.post(&command.to_frame()).unwrap();
        self.bridge.pump();
    }

    /// Starts monitoring and discards everything relayed so far.
    pub fn start(&self) {
        self.send(InboundCommand::Start);
        self.messages();
    }

    /// Page-side messages received by the observer since the last call.
    pub fn messages(&self) -> Vec<RelayMessage> {
        page_messages(&self.peer)
    }

    pub fn messages_of(&self, kind: MessageKind) -> Vec<RelayMessage> {
        self.messages().into_iter().filter(|m| m.kind == kind).collect()
    }
}

pub fn page_messages(listener: &Listener) -> Vec<RelayMessage> {
    listener
        .drain()
        .filter(|event| event.data["source"] == json!(PAGE_SOURCE))
        .map(|event| serde_json::from_value(event.data).unwrap())
        .collect()
}

pub fn kinds(messages: &[RelayMessage]) -> Vec<MessageKind> {
    messages.iter().map(|m| m.kind).collect()
}

pub fn increment() -> Action {
    Action::new("INCREMENT")
}
