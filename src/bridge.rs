//! Bridge controller.
//!
//! Owns the relay session of one instrumented store. Store notifications flow
//! out through the relay channel; observer commands flow in through the
//! transport and are applied to the store.
//!
//! No lock is held while calling into the store, so stores may notify
//! re-entrantly from inside `dispatch`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use tracing::{debug, info, trace, warn};

use crate::action::{is_monitor_action, is_replay_action, Action, STORE_INIT_ACTION};
use crate::codec;
use crate::config::{
    ActionDecoder, AllowAll, BridgeConfig, GlobalOptions, OptionsSource, Permission, StateDecoder,
};
use crate::env::{Environment, LifecycleHooks, StaticEnvironment};
use crate::error::{RelayError, RelayResult};
use crate::filter::{FilterResolver, FilterRule};
use crate::gate::{GateState, SerializationGate};
use crate::history::{HistoryRecord, LiftedActionEntry};
use crate::protocol::{is_peer_frame, InboundCommand};
use crate::relay::{Outbound, RelayChannel, RelayContext};
use crate::store::{import_state_action, LiftedStore, StoreObserver};
use crate::tracker::HistoryTracker;
use crate::transport::{InboundEvent, Listener, Transport};

/// Lifecycle phase of a bridge session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No store attached yet, or the session was torn down.
    Uninitialized,
    /// A store is attached and `INIT_INSTANCE` was emitted.
    Initialized,
}

/// Outcome of [`Bridge::enhance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    /// The store is instrumented and relayed.
    Bridged,
    /// Relaying is not allowed; the store was left untouched.
    PassThrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deferred {
    StateResync,
}

#[derive(Debug)]
struct Session {
    phase: Phase,
    filters: FilterResolver,
    gate: SerializationGate,
    tracker: HistoryTracker,
    last_action: Option<String>,
    monitored: bool,
    listener: Option<Listener>,
    deferred: Option<Deferred>,
    hooks_installed: bool,
    // Bumped whenever a different store is attached; observers of older stores go quiet.
    generation: u64,
}

impl Session {
    fn new(local_filter: Option<FilterRule>) -> Self {
        Self {
            phase: Phase::Uninitialized,
            filters: FilterResolver::new(local_filter),
            gate: SerializationGate::new(),
            tracker: HistoryTracker::new(),
            last_action: None,
            monitored: false,
            listener: None,
            deferred: None,
            hooks_installed: false,
            generation: 0,
        }
    }
}

struct BridgeInner {
    channel: RelayChannel,
    options: Arc<dyn OptionsSource>,
    permission: Arc<dyn Permission>,
    env: Arc<dyn Environment>,
    state_decoder: Option<StateDecoder>,
    action_decoder: Option<ActionDecoder>,
    store: Mutex<Option<Arc<dyn LiftedStore>>>,
    session: Mutex<Session>,
}

/// Relays one lifted store to an observer.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

/// Builder for [`Bridge`].
pub struct BridgeBuilder {
    transport: Arc<dyn Transport>,
    config: BridgeConfig,
    options: Arc<dyn OptionsSource>,
    permission: Arc<dyn Permission>,
    env: Arc<dyn Environment>,
}

impl BridgeBuilder {
    /// Static bridge configuration.
    #[must_use]
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Source of process-wide options. Defaults to `GlobalOptions::default()`.
    #[must_use]
    pub fn options(mut self, options: Arc<dyn OptionsSource>) -> Self {
        self.options = options;
        self
    }

    /// Permission check. Defaults to [`AllowAll`].
    #[must_use]
    pub fn permission(mut self, permission: Arc<dyn Permission>) -> Self {
        self.permission = permission;
        self
    }

    /// Host environment. Defaults to an untitled [`StaticEnvironment`].
    #[must_use]
    pub fn environment(mut self, env: Arc<dyn Environment>) -> Self {
        self.env = env;
        self
    }

    /// Builds the bridge.
    ///
    /// # Errors
    /// Returns a configuration error if a local filter pattern does not compile.
    pub fn build(self) -> RelayResult<Bridge> {
        let local_filter = FilterRule::from_config(&self.config)?;
        let BridgeConfig {
            name,
            deserialize_state,
            deserialize_action,
            ..
        } = self.config;

        let channel = RelayChannel::new(self.transport, Arc::clone(&self.env), name);
        Ok(Bridge {
            inner: Arc::new(BridgeInner {
                channel,
                options: self.options,
                permission: self.permission,
                env: self.env,
                state_decoder: deserialize_state,
                action_decoder: deserialize_action,
                store: Mutex::new(None),
                session: Mutex::new(Session::new(local_filter)),
            }),
        })
    }
}

impl Bridge {
    /// Starts building a bridge over `transport`.
    #[must_use]
    pub fn builder(transport: Arc<dyn Transport>) -> BridgeBuilder {
        BridgeBuilder {
            transport,
            config: BridgeConfig::default(),
            options: Arc::new(GlobalOptions::default()),
            permission: Arc::new(AllowAll),
            env: Arc::new(StaticEnvironment::default()),
        }
    }

    /// Instruments `store`, or leaves it alone when relaying is not allowed.
    ///
    /// Calling this again (hot reload) re-initializes the session: the previous
    /// inbound listener is detached before a new one is attached, and
    /// `INIT_INSTANCE` is emitted again.
    pub fn enhance(&self, store: Arc<dyn LiftedStore>) -> RelayResult<Attachment> {
        let inner = &self.inner;
        let options = inner.options.options();
        if !inner.permission.is_allowed(&options) {
            info!("relaying not allowed; store passes through");
            return Ok(Attachment::PassThrough);
        }

        let same_store = {
            let mut slot = inner.store_slot();
            let same = slot.as_ref().is_some_and(|current| is_same_store(current, &store));
            *slot = Some(Arc::clone(&store));
            same
        };
        if !same_store {
            let generation = {
                let mut session = inner.session();
                session.generation += 1;
                session.generation
            };
            store.subscribe(Arc::new(ChangeObserver {
                inner: Arc::downgrade(inner),
                generation,
            }));
        }

        self.init(&options)?;
        Ok(Attachment::Bridged)
    }

    fn init(&self, options: &GlobalOptions) -> RelayResult<()> {
        let inner = &self.inner;
        let transport = inner.channel.transport();
        let install_hooks = {
            let mut session = inner.session();
            if let Some(previous) = session.listener.take() {
                transport.detach(previous.id());
                debug!("detached previous inbound listener");
            }
            // The bridge's own outbound frames never reach its queue.
            session.listener = Some(transport.attach_filtered(is_peer_frame));
            session.phase = Phase::Initialized;
            inner.emit(&mut session, options, Outbound::InitInstance)?;
            !std::mem::replace(&mut session.hooks_installed, true)
        };

        if install_hooks {
            inner.env.install_hooks(Arc::new(SessionHooks {
                inner: Arc::downgrade(inner),
            }));
        }
        info!(name = %inner.channel.name(), "bridge initialized");
        Ok(())
    }

    /// Processes every queued inbound frame in delivery order.
    ///
    /// Only peer-tagged frames are queued; frames from a foreign context and
    /// malformed commands are discarded here. The queue is unbounded, so hosts
    /// should pump on every transport wakeup. A command that fails is logged and
    /// does not stop the remaining ones. Returns the number of commands applied.
    pub fn pump(&self) -> usize {
        let events: Vec<InboundEvent> = {
            let session = self.inner.session();
            match &session.listener {
                Some(listener) => listener.drain().collect(),
                None => return 0,
            }
        };

        let mut applied = 0;
        for event in events {
            let Some(command) = self.inner.channel.accept(&event) else {
                continue;
            };
            match self.inner.apply(command) {
                Ok(()) => applied += 1,
                Err(err) => warn!(error = %err, "inbound command failed"),
            }
        }
        applied
    }

    /// Applies one observer command.
    pub fn handle_command(&self, command: InboundCommand) -> RelayResult<()> {
        self.inner.apply(command)
    }

    /// Runs the deferred task, if one is scheduled. Returns true if it ran.
    pub fn run_deferred(&self) -> RelayResult<bool> {
        let task = self.inner.session().deferred.take();
        match task {
            Some(Deferred::StateResync) => {
                debug!("running deferred state resync");
                self.inner.relay_state()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Re-emits `STATE` if monitoring is enabled (environment resumed).
    pub fn resume(&self) -> RelayResult<()> {
        self.inner.resume()
    }

    /// Handles an in-page error. Returns true when default handling should run.
    pub fn report_error(&self) -> bool {
        self.inner.report_error()
    }

    /// Asks the observer to open its UI.
    pub fn open(&self, position: Option<&str>) -> RelayResult<()> {
        let options = self.inner.options.options();
        let mut session = self.inner.session();
        self.inner.emit(
            &mut session,
            &options,
            Outbound::Open {
                position: position.map(str::to_string),
            },
        )
    }

    /// Detaches the listener, drops the store, and cancels deferred work.
    pub fn teardown(&self) {
        self.inner.store_slot().take();
        let mut session = self.inner.session();
        if let Some(listener) = session.listener.take() {
            self.inner.channel.transport().detach(listener.id());
        }
        session.deferred = None;
        session.monitored = false;
        session.phase = Phase::Uninitialized;
        session.generation += 1;
        info!("bridge torn down");
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.inner.session().phase
    }

    /// True while monitoring is enabled.
    #[must_use]
    pub fn is_monitored(&self) -> bool {
        self.inner.session().monitored
    }

    /// True once history passed the configured length.
    #[must_use]
    pub fn is_excess(&self) -> bool {
        self.inner.session().tracker.is_excess()
    }

    /// True while an error is latched.
    #[must_use]
    pub fn is_error_latched(&self) -> bool {
        self.inner.session().tracker.is_error_latched()
    }

    /// State of the serialization gate.
    #[must_use]
    pub fn gate_state(&self) -> GateState {
        self.inner.session().gate.state()
    }

    /// Number of inbound frames waiting for [`pump`](Self::pump).
    #[must_use]
    pub fn pending_inbound(&self) -> usize {
        self.inner.session().listener.as_ref().map_or(0, Listener::pending)
    }

    /// True while a deferred resync is scheduled.
    #[must_use]
    pub fn has_deferred(&self) -> bool {
        self.inner.session().deferred.is_some()
    }

    /// Name reported to the observer.
    #[must_use]
    pub fn name(&self) -> String {
        self.inner.channel.name()
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("channel", &self.inner.channel)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

fn is_same_store(a: &Arc<dyn LiftedStore>, b: &Arc<dyn LiftedStore>) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}

impl BridgeInner {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store_slot(&self) -> MutexGuard<'_, Option<Arc<dyn LiftedStore>>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_store(&self) -> Option<Arc<dyn LiftedStore>> {
        self.store_slot().clone()
    }

    fn emit(&self, session: &mut Session, options: &GlobalOptions, outbound: Outbound) -> RelayResult<()> {
        let Session {
            filters, gate, tracker, ..
        } = session;
        let filter = match outbound {
            Outbound::State(_) => filters.resolve(options),
            _ => None,
        };
        let ctx = RelayContext {
            gate,
            filter,
            is_excess: tracker.is_excess(),
            always_serialize: options.serialize,
        };
        self.channel.relay(outbound, ctx).map(|_| ())
    }

    fn relay_state(&self) -> RelayResult<()> {
        let Some(store) = self.current_store() else {
            return Ok(());
        };
        let history = store.history();
        let options = self.options.options();
        let mut session = self.session();
        self.emit(&mut session, &options, Outbound::State(history))
    }

    fn lifted_action(&self, generation: u64, kind: &str) {
        let attached = self.current_store().is_some();
        let mut session = self.session();
        if !session.monitored || session.generation != generation {
            return;
        }
        session.last_action = Some(kind.to_string());
        if kind == STORE_INIT_ACTION && attached {
            session.deferred = Some(Deferred::StateResync);
            debug!("store reinitialized; state resync deferred");
        }
    }

    fn handle_change(&self, generation: u64) {
        {
            let session = self.session();
            if !session.monitored || session.generation != generation {
                return;
            }
        }
        let Some(store) = self.current_store() else {
            return;
        };
        let history = store.history();
        let state = store.state();
        let options = self.options.options();

        let mut session = self.session();
        if !session.monitored {
            return;
        }
        let Some((_, entry)) = history.last_entry() else {
            trace!("change without a recorded action");
            return;
        };
        let entry: LiftedActionEntry = entry.clone();

        let result = if entry.action.is_init() {
            let timestamp = Utc::now().timestamp_millis();
            self.emit(&mut session, &options, Outbound::Init { state, timestamp })
        } else {
            let current_has_error = history.current_has_error();
            if current_has_error {
                session.tracker.latch_error();
            }
            let last_action = session.last_action.clone().unwrap_or_default();

            if !session.tracker.is_error_latched() && !is_monitor_action(&last_action) {
                if is_replay_action(&last_action) {
                    trace!(kind = %last_action, "replay command not relayed");
                    return;
                }
                let excluded = session
                    .filters
                    .resolve(&options)
                    .is_some_and(|rule| rule.is_excluded(&entry.action));
                if excluded {
                    trace!(kind = %entry.action.kind, "action filtered out");
                    return;
                }

                let staged = history.action_count();
                let outbound = Outbound::Action {
                    state,
                    entry,
                    next_action_id: history.next_action_id,
                };
                let result = self.emit(&mut session, &options, outbound);
                session.tracker.observe_length(staged, options.max_age());
                result
            } else {
                if session.tracker.reconcile_error(current_has_error) {
                    debug!("error cleared; resuming per-action relay");
                }
                self.emit(&mut session, &options, Outbound::State(history))
            }
        };

        if let Err(err) = result {
            warn!(error = %err, "failed to relay store change");
        }
    }

    fn apply(&self, command: InboundCommand) -> RelayResult<()> {
        debug!(?command, "inbound command");
        match command {
            InboundCommand::Start => {
                self.session().monitored = true;
                self.relay_state()
            }
            InboundCommand::Stop => {
                self.session().monitored = false;
                Ok(())
            }
            InboundCommand::Update => self.relay_state(),
            InboundCommand::Dispatch(action) => {
                if let Some(store) = self.current_store() {
                    store.dispatch_lifted(action);
                }
                Ok(())
            }
            InboundCommand::Action(action) => {
                if let Some(store) = self.current_store() {
                    store.dispatch(action);
                }
                Ok(())
            }
            InboundCommand::Import(text) => {
                let Some(store) = self.current_store() else {
                    return Ok(());
                };
                let history = self.decode_import(&text)?;
                store.dispatch_lifted(import_state_action(&history)?);
                self.relay_state()
            }
            InboundCommand::Unknown(kind) => {
                trace!(%kind, "ignoring unknown command");
                Ok(())
            }
        }
    }

    /// Decodes an imported history and runs the configured element decoders.
    fn decode_import(&self, text: &str) -> RelayResult<HistoryRecord> {
        let raw = codec::decode(text)?;
        let mut history: HistoryRecord =
            serde_json::from_value(raw).map_err(|e| RelayError::import(format!("not a history record: {e}")))?;
        if !history.is_aligned() {
            return Err(RelayError::import(format!(
                "{} staged actions but {} computed states",
                history.staged_action_ids.len(),
                history.computed_states.len()
            )));
        }

        if let Some(decode_state) = &self.state_decoder {
            for computed in &mut history.computed_states {
                computed.state = decode_state(std::mem::take(&mut computed.state));
            }
            if let Some(committed) = history.committed_state.take() {
                history.committed_state = Some(decode_state(committed));
            }
        }
        if let Some(decode_action) = &self.action_decoder {
            history.actions_by_id = std::mem::take(&mut history.actions_by_id)
                .into_iter()
                .map(|(id, entry)| {
                    let LiftedActionEntry {
                        kind,
                        action,
                        timestamp,
                    } = entry;
                    let action: Action = decode_action(action);
                    (id, LiftedActionEntry { kind, action, timestamp })
                })
                .collect();
        }
        Ok(history)
    }

    fn resume(&self) -> RelayResult<()> {
        if !self.session().monitored {
            return Ok(());
        }
        self.relay_state()
    }

    fn report_error(&self) -> bool {
        let history = self.current_store().map(|store| store.history());
        let options = self.options.options();
        let mut session = self.session();
        session.tracker.latch_error();

        match history {
            Some(history) if history.current_has_error() => {
                if let Err(err) = self.emit(&mut session, &options, Outbound::State(history)) {
                    warn!(error = %err, "failed to relay error state");
                }
                false
            }
            _ => true,
        }
    }
}

impl Drop for BridgeInner {
    fn drop(&mut self) {
        let session = self.session.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(listener) = session.listener.take() {
            self.channel.transport().detach(listener.id());
        }
    }
}

struct ChangeObserver {
    inner: Weak<BridgeInner>,
    generation: u64,
}

impl StoreObserver for ChangeObserver {
    fn lifted_action(&self, kind: &str) {
        if let Some(inner) = self.inner.upgrade() {
            inner.lifted_action(self.generation, kind);
        }
    }

    fn changed(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_change(self.generation);
        }
    }
}

struct SessionHooks {
    inner: Weak<BridgeInner>,
}

impl LifecycleHooks for SessionHooks {
    fn resumed(&self) {
        if let Some(inner) = self.inner.upgrade() {
            if let Err(err) = inner.resume() {
                warn!(error = %err, "failed to relay state on resume");
            }
        }
    }

    fn runtime_error(&self) -> bool {
        self.inner.upgrade().map_or(true, |inner| inner.report_error())
    }
}
