//! Message transport between the bridge and the observer.
//!
//! A transport delivers structured frames, in order, to every attached listener
//! of the same context. [`LocalTransport`] is the in-process implementation: each
//! listener owns an unbounded crossbeam queue that the owner drains at its own
//! pace.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;
use uuid::Uuid;

use crate::error::TransportError;

/// Identifier of a messaging context (one page/document).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(Uuid);

impl ContextId {
    /// Creates a new random context id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an attached listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListenerId(Uuid);

impl ListenerId {
    /// Creates a new random listener id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// A frame as received by a listener.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    /// Context the frame was posted from.
    pub origin: ContextId,
    /// The structured frame.
    pub data: Value,
}

/// Receiving end of an attached listener.
#[derive(Debug)]
pub struct Listener {
    id: ListenerId,
    rx: Receiver<InboundEvent>,
}

impl Listener {
    /// Wraps the receiving end of a listener queue.
    #[must_use]
    pub fn new(id: ListenerId, rx: Receiver<InboundEvent>) -> Self {
        Self { id, rx }
    }

    /// The id to pass to [`Transport::detach`].
    #[must_use]
    pub const fn id(&self) -> ListenerId {
        self.id
    }

    /// Next queued frame, without blocking.
    #[must_use]
    pub fn try_recv(&self) -> Option<InboundEvent> {
        self.rx.try_recv().ok()
    }

    /// Number of frames waiting in the queue.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Every frame queued right now, in delivery order.
    pub fn drain(&self) -> impl Iterator<Item = InboundEvent> + '_ {
        self.rx.try_iter()
    }
}

/// Predicate deciding whether a listener queues a frame.
pub type FrameFilter = fn(&Value) -> bool;

fn accept_all(_frame: &Value) -> bool {
    true
}

#[derive(Debug)]
struct Subscriber {
    tx: Sender<InboundEvent>,
    accept: FrameFilter,
}

/// Structured message passing between contexts.
pub trait Transport: Send + Sync {
    /// The context this transport posts from.
    fn context(&self) -> ContextId;

    /// Posts a frame to every listener.
    ///
    /// # Errors
    /// - `Unrepresentable`: the frame cannot be carried natively
    /// - `Closed`: the transport no longer delivers
    fn post(&self, frame: &Value) -> Result<(), TransportError>;

    /// Attaches a new listener that receives every frame.
    fn attach(&self) -> Listener {
        self.attach_filtered(accept_all)
    }

    /// Attaches a new listener that only queues frames `accept` returns true for.
    fn attach_filtered(&self, accept: FrameFilter) -> Listener;

    /// Detaches a listener. Unknown ids are ignored.
    fn detach(&self, id: ListenerId);
}

/// In-process broadcast transport.
#[derive(Debug)]
pub struct LocalTransport {
    context: ContextId,
    max_depth: Option<usize>,
    listeners: Mutex<HashMap<ListenerId, Subscriber>>,
    closed: AtomicBool,
    posted: AtomicU64,
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalTransport {
    /// A transport that carries any frame natively.
    #[must_use]
    pub fn new() -> Self {
        Self {
            context: ContextId::new(),
            max_depth: None,
            listeners: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            posted: AtomicU64::new(0),
        }
    }

    /// A transport that rejects frames nested deeper than `max_depth`.
    #[must_use]
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            max_depth: Some(max_depth),
            ..Self::new()
        }
    }

    /// Number of attached listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    /// Number of frames delivered so far.
    #[must_use]
    pub fn posted(&self) -> u64 {
        self.posted.load(Ordering::Relaxed)
    }

    /// Stops delivery; later posts fail with `Closed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Delivers a frame as if it had been posted from another context.
    pub fn deliver_from(&self, origin: ContextId, frame: Value) {
        self.broadcast(InboundEvent { origin, data: frame });
    }

    fn broadcast(&self, event: InboundEvent) {
        let Ok(mut listeners) = self.listeners.lock() else {
            return;
        };
        // Receivers dropped without detaching are pruned here.
        listeners.retain(|_, sub| !(sub.accept)(&event.data) || sub.tx.send(event.clone()).is_ok());
        self.posted.fetch_add(1, Ordering::Relaxed);
    }
}

impl Transport for LocalTransport {
    fn context(&self) -> ContextId {
        self.context
    }

    fn post(&self, frame: &Value) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if let Some(max) = self.max_depth {
            let depth = depth(frame);
            if depth > max {
                return Err(TransportError::Unrepresentable {
                    reason: format!("nesting depth {depth} exceeds {max}"),
                });
            }
        }

        trace!(context = %self.context, "posting frame");
        self.broadcast(InboundEvent {
            origin: self.context,
            data: frame.clone(),
        });
        Ok(())
    }

    fn attach_filtered(&self, accept: FrameFilter) -> Listener {
        let id = ListenerId::new();
        let (tx, rx) = unbounded();
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.insert(id, Subscriber { tx, accept });
        }
        Listener::new(id, rx)
    }

    fn detach(&self, id: ListenerId) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.remove(&id);
        }
    }
}

fn depth(value: &Value) -> usize {
    match value {
        Value::Object(map) => 1 + map.values().map(depth).max().unwrap_or(0),
        Value::Array(items) => 1 + items.iter().map(depth).max().unwrap_or(0),
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn broadcasts_to_all_listeners_in_order() {
        let transport = LocalTransport::new();
        let a = transport.attach();
        let b = transport.attach();

        transport.post(&json!(1)).unwrap();
        transport.post(&json!(2)).unwrap();

        let got_a: Vec<_> = a.drain().map(|e| e.data).collect();
        let got_b: Vec<_> = b.drain().map(|e| e.data).collect();
        assert_eq!(got_a, vec![json!(1), json!(2)]);
        assert_eq!(got_a, got_b);
        assert_eq!(transport.posted(), 2);
    }

    #[test]
    fn detach_stops_delivery() {
        let transport = LocalTransport::new();
        let listener = transport.attach();
        transport.detach(listener.id());
        assert_eq!(transport.listener_count(), 0);
        transport.post(&json!(1)).unwrap();
        assert!(listener.try_recv().is_none());
    }

    #[test]
    fn rejects_deep_frames() {
        let transport = LocalTransport::with_max_depth(3);
        assert!(transport.post(&json!({"a": {"b": 1}})).is_ok());
        let err = transport.post(&json!({"a": {"b": {"c": 1}}})).unwrap_err();
        assert!(matches!(err, TransportError::Unrepresentable { .. }));
    }

    #[test]
    fn foreign_origin_is_preserved() {
        let transport = LocalTransport::new();
        let listener = transport.attach();
        let other = ContextId::new();
        transport.deliver_from(other, json!("hi"));
        let event = listener.try_recv().unwrap();
        assert_eq!(event.origin, other);
        assert_ne!(event.origin, transport.context());
    }

    #[test]
    fn filtered_listener_skips_rejected_frames() {
        fn odd_only(frame: &Value) -> bool {
            frame.as_i64().is_some_and(|n| n % 2 == 1)
        }

        let transport = LocalTransport::new();
        let all = transport.attach();
        let odd = transport.attach_filtered(odd_only);
        for n in 1..=4 {
            transport.post(&json!(n)).unwrap();
        }

        assert_eq!(all.pending(), 4);
        assert_eq!(odd.pending(), 2);
        let got: Vec<_> = odd.drain().map(|e| e.data).collect();
        assert_eq!(got, vec![json!(1), json!(3)]);
        assert_eq!(transport.listener_count(), 2);
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let transport = LocalTransport::new();
        drop(transport.attach());
        transport.post(&json!(1)).unwrap();
        assert_eq!(transport.listener_count(), 0);
    }
}
