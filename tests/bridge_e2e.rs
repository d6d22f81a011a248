mod common;

use std::sync::Arc;

use serde_json::json;

use common::{increment, kinds, page_messages, CounterStore, Harness};
use liftrelay::{
    codec, Action, AllowAll, Attachment, Bridge, BridgeConfig, ContextId, DenyAll, GateState, GlobalOptions,
    InboundCommand, LiftedStore, LocalTransport, MessageKind, Phase, SharedOptions, StaticEnvironment, Transport,
};

fn defaults() -> Arc<GlobalOptions> {
    Arc::new(GlobalOptions::default())
}

#[test]
fn enhance_announces_instance() {
    let h = Harness::new(BridgeConfig::new().with_name("counter"), defaults());
    let messages = h.messages();
    assert_eq!(kinds(&messages), vec![MessageKind::InitInstance]);
    assert_eq!(messages[0].name, "counter");
    assert_eq!(h.bridge.phase(), Phase::Initialized);
    assert!(!h.bridge.is_monitored());
}

#[test]
fn nothing_is_relayed_until_started() {
    let h = Harness::new(BridgeConfig::new(), defaults());
    h.messages();

    h.store.dispatch(increment());
    assert!(h.messages().is_empty());

    h.send(InboundCommand::Start);
    let messages = h.messages();
    assert_eq!(kinds(&messages), vec![MessageKind::State]);
    let history = messages[0].decode_payload().unwrap().unwrap();
    assert_eq!(history["stagedActionIds"], json!([0]));
}

#[test]
fn excess_flag_follows_history_length() {
    let options = GlobalOptions {
        max_age: Some(2),
        ..GlobalOptions::default()
    };
    let h = Harness::new(BridgeConfig::new(), Arc::new(options));
    h.store.init();
    h.start();

    for _ in 0..3 {
        h.store.dispatch(increment());
    }
    assert_eq!(h.store.history().len(), 4);
    let flags: Vec<bool> = h.messages_of(MessageKind::Action).iter().map(|m| m.is_excess).collect();
    assert_eq!(flags, vec![false, false, true]);
    assert!(h.bridge.is_excess());

    // A shorter imported history does not clear the flag.
    let source = CounterStore::new();
    source.dispatch(increment());
    let text = codec::encode(&serde_json::to_value(source.history()).unwrap()).unwrap();
    h.send(InboundCommand::Import(text));
    assert_eq!(h.store.history().len(), 1);

    h.store.dispatch(increment());
    let messages = h.messages();
    assert!(!messages.is_empty());
    assert!(messages.iter().all(|m| m.is_excess));
}

#[test]
fn action_messages_carry_entry_and_next_id() {
    let h = Harness::new(BridgeConfig::new(), defaults());
    h.start();

    h.store.dispatch(increment());
    h.store.dispatch(increment());
    let actions = h.messages_of(MessageKind::Action);
    assert_eq!(actions.len(), 2);

    let last = &actions[1];
    assert_eq!(last.next_action_id, Some(2));
    assert_eq!(last.decode_payload().unwrap(), Some(json!({"count": 2})));
    let entry = last.decode_action().unwrap().unwrap();
    assert_eq!(entry["type"], json!("PERFORM_ACTION"));
    assert_eq!(entry["action"]["type"], json!("INCREMENT"));
}

#[test]
fn whitelist_admits_only_matching_actions() {
    let h = Harness::new(BridgeConfig::new().with_whitelist(["INCREMENT"]), defaults());
    h.start();

    h.store.dispatch(increment());
    h.store.dispatch(Action::new("DECREMENT"));
    h.store.dispatch(increment());

    let actions = h.messages_of(MessageKind::Action);
    assert_eq!(actions.len(), 2);
    for message in &actions {
        let entry = message.decode_action().unwrap().unwrap();
        assert_eq!(entry["action"]["type"], json!("INCREMENT"));
    }

    h.send(InboundCommand::Update);
    let states = h.messages_of(MessageKind::State);
    let history = states[0].decode_payload().unwrap().unwrap();
    assert_eq!(history["stagedActionIds"], json!([0, 2]));
    assert_eq!(history["computedStates"].as_array().map(Vec::len), Some(2));
    // Lookup tables are not projected.
    assert!(history["actionsById"].get("1").is_some());
}

#[test]
fn local_filter_shadows_global_options() {
    let options = GlobalOptions {
        filter: true,
        blacklist: Some(".*".to_string()),
        ..GlobalOptions::default()
    };
    let h = Harness::new(BridgeConfig::new().with_whitelist(["INCREMENT"]), Arc::new(options));
    h.start();

    h.store.dispatch(increment());
    h.store.dispatch(Action::new("DECREMENT"));
    assert_eq!(h.messages_of(MessageKind::Action).len(), 1);
}

#[test]
fn global_filter_tracks_option_changes() {
    let options = Arc::new(SharedOptions::new(GlobalOptions {
        filter: true,
        blacklist: Some("DECREMENT".to_string()),
        ..GlobalOptions::default()
    }));
    let h = Harness::new(BridgeConfig::new(), options.clone());
    h.start();

    h.store.dispatch(Action::new("DECREMENT"));
    assert!(h.messages_of(MessageKind::Action).is_empty());

    options.update(|o| o.filter = false);
    h.store.dispatch(Action::new("DECREMENT"));
    assert_eq!(h.messages_of(MessageKind::Action).len(), 1);

    options.update(|o| {
        o.filter = true;
        o.blacklist = Some("(".to_string());
    });
    h.store.dispatch(Action::new("DECREMENT"));
    assert_eq!(h.messages_of(MessageKind::Action).len(), 1, "invalid pattern disables filtering");
}

#[test]
fn stop_and_start_toggle_monitoring() {
    let h = Harness::new(BridgeConfig::new(), defaults());
    h.start();

    h.store.dispatch(increment());
    assert_eq!(h.messages_of(MessageKind::Action).len(), 1);

    h.send(InboundCommand::Stop);
    assert!(!h.bridge.is_monitored());
    h.store.dispatch(increment());
    h.send(InboundCommand::Update);
    assert_eq!(kinds(&h.messages()), vec![MessageKind::State]);

    h.send(InboundCommand::Start);
    let states = h.messages_of(MessageKind::State);
    assert_eq!(states.len(), 1);
    let history = states[0].decode_payload().unwrap().unwrap();
    assert_eq!(history["stagedActionIds"], json!([0, 1]));

    h.store.dispatch(increment());
    assert_eq!(h.messages_of(MessageKind::Action).len(), 1);
}

#[test]
fn store_init_relays_init_and_defers_resync() {
    let h = Harness::new(BridgeConfig::new(), defaults());
    h.start();

    h.store.init();
    let messages = h.messages();
    assert_eq!(kinds(&messages), vec![MessageKind::Init]);
    let action = messages[0].decode_action().unwrap().unwrap();
    assert!(action["timestamp"].as_i64().is_some());
    assert_eq!(messages[0].decode_payload().unwrap(), Some(json!({"count": 0})));

    assert!(h.bridge.has_deferred());
    assert!(h.bridge.run_deferred().unwrap());
    assert_eq!(kinds(&h.messages()), vec![MessageKind::State]);
    assert!(!h.bridge.run_deferred().unwrap());
}

#[test]
fn replay_commands_are_not_relayed_as_actions() {
    let h = Harness::new(BridgeConfig::new(), defaults());
    h.start();
    h.store.dispatch(increment());
    h.store.dispatch(increment());
    h.messages();

    h.send(InboundCommand::Dispatch(
        Action::new("JUMP_TO_STATE").with_field("index", json!(0)),
    ));
    assert_eq!(h.store.count(), 1);
    assert!(h.messages().is_empty());
}

#[test]
fn monitor_commands_relay_full_state() {
    let h = Harness::new(BridgeConfig::new(), defaults());
    h.start();
    h.store.dispatch(increment());
    h.messages();

    h.send(InboundCommand::Dispatch(Action::new("SWEEP")));
    assert_eq!(kinds(&h.messages()), vec![MessageKind::State]);
}

#[test]
fn action_command_dispatches_into_store() {
    let h = Harness::new(BridgeConfig::new(), defaults());
    h.start();

    h.send(InboundCommand::Action(increment()));
    assert_eq!(h.store.count(), 1);
    assert_eq!(h.messages_of(MessageKind::Action).len(), 1);

    h.send(InboundCommand::Unknown("PING".to_string()));
    assert!(h.messages().is_empty());
}

#[test]
fn error_latch_forces_state_until_cleared() {
    let h = Harness::new(BridgeConfig::new(), defaults());
    h.start();

    h.store.dispatch(increment());
    assert_eq!(kinds(&h.messages()), vec![MessageKind::Action]);

    h.store.dispatch(Action::new("FAIL"));
    assert_eq!(kinds(&h.messages()), vec![MessageKind::State]);
    assert!(h.bridge.is_error_latched());

    h.store.dispatch(increment());
    assert_eq!(kinds(&h.messages()), vec![MessageKind::State]);
    assert!(!h.bridge.is_error_latched());

    h.store.dispatch(increment());
    assert_eq!(kinds(&h.messages()), vec![MessageKind::Action]);
}

#[test]
fn gate_falls_back_and_stays_serialized() {
    let transport = Arc::new(LocalTransport::with_max_depth(8));
    let h = Harness::with_transport(transport, BridgeConfig::new(), defaults());
    h.start();

    h.store.dispatch(increment());
    let first = h.messages_of(MessageKind::Action);
    assert!(!first[0].is_serialized());
    assert_eq!(h.bridge.gate_state(), GateState::Native);

    let deep = (0..10).fold(json!(1), |acc, _| json!([acc]));
    h.store.dispatch(increment().with_field("meta", deep.clone()));
    let tripped = h.messages_of(MessageKind::Action);
    assert!(tripped[0].is_serialized());
    let entry = tripped[0].decode_action().unwrap().unwrap();
    assert_eq!(entry["action"]["meta"], deep);
    assert_eq!(h.bridge.gate_state(), GateState::Fallback);

    h.store.dispatch(increment());
    let later = h.messages_of(MessageKind::Action);
    assert!(later[0].is_serialized());
    assert_eq!(later[0].decode_payload().unwrap(), Some(json!({"count": 3})));
}

#[test]
fn always_serialize_option_encodes_without_tripping() {
    let options = GlobalOptions {
        serialize: true,
        ..GlobalOptions::default()
    };
    let h = Harness::new(BridgeConfig::new(), Arc::new(options));
    h.start();

    h.store.dispatch(increment());
    let actions = h.messages_of(MessageKind::Action);
    assert!(actions[0].is_serialized());
    assert_eq!(actions[0].decode_payload().unwrap(), Some(json!({"count": 1})));
    assert_eq!(h.bridge.gate_state(), GateState::Native);
}

#[test]
fn re_enhance_replaces_listener_and_store() {
    let h = Harness::new(BridgeConfig::new(), defaults());
    assert_eq!(h.transport.listener_count(), 2);

    let replacement = CounterStore::new();
    assert_eq!(h.bridge.enhance(replacement.clone()).unwrap(), Attachment::Bridged);
    assert_eq!(h.transport.listener_count(), 2);
    assert_eq!(
        kinds(&h.messages()),
        vec![MessageKind::InitInstance, MessageKind::InitInstance]
    );

    h.start();
    h.send(InboundCommand::Action(increment()));
    assert_eq!(replacement.count(), 1, "command applied exactly once");
    assert_eq!(h.store.count(), 0);
    h.messages();

    // The previous store is no longer observed.
    h.store.dispatch(increment());
    assert!(h.messages().is_empty());

    // Enhancing the same store again does not subscribe twice.
    h.bridge.enhance(replacement.clone()).unwrap();
    assert_eq!(replacement.observer_count(), 1);
    h.messages();
    replacement.dispatch(increment());
    assert_eq!(h.messages_of(MessageKind::Action).len(), 1);
}

#[test]
fn denied_permission_passes_store_through() {
    let transport = Arc::new(LocalTransport::new());
    let peer = transport.attach();
    let bridge = Bridge::builder(transport.clone())
        .permission(Arc::new(DenyAll))
        .build()
        .unwrap();
    let store = CounterStore::new();

    assert_eq!(bridge.enhance(store.clone()).unwrap(), Attachment::PassThrough);
    assert_eq!(store.observer_count(), 0);
    assert_eq!(transport.listener_count(), 1);
    assert_eq!(bridge.phase(), Phase::Uninitialized);

    store.dispatch(increment());
    assert!(page_messages(&peer).is_empty());
}

#[test]
fn permission_sees_current_options() {
    let options = Arc::new(SharedOptions::new(GlobalOptions::default()));
    let transport = Arc::new(LocalTransport::new());
    let bridge = Bridge::builder(transport)
        .options(options.clone())
        .permission(Arc::new(|opts: &GlobalOptions| !opts.serialize))
        .build()
        .unwrap();

    options.update(|o| o.serialize = true);
    assert_eq!(bridge.enhance(CounterStore::new()).unwrap(), Attachment::PassThrough);
    options.update(|o| o.serialize = false);
    assert_eq!(bridge.enhance(CounterStore::new()).unwrap(), Attachment::Bridged);
}

#[test]
fn excess_counts_history_without_init_record() {
    let options = GlobalOptions {
        max_age: Some(2),
        ..GlobalOptions::default()
    };
    let h = Harness::new(BridgeConfig::new(), Arc::new(options));
    h.start();

    for _ in 0..3 {
        h.store.dispatch(increment());
    }
    let flags: Vec<bool> = h.messages_of(MessageKind::Action).iter().map(|m| m.is_excess).collect();
    assert_eq!(flags, vec![false, false, true]);
}

#[test]
fn own_outbound_frames_are_not_queued() {
    let h = Harness::new(BridgeConfig::new(), defaults());
    h.start();

    for _ in 0..5 {
        h.store.dispatch(increment());
    }
    h.bridge.open(None).unwrap();
    assert_eq!(h.messages().len(), 6);
    assert_eq!(h.bridge.pending_inbound(), 0);

    h.transport.post(&InboundCommand::Update.to_frame()).unwrap();
    assert_eq!(h.bridge.pending_inbound(), 1);
    assert_eq!(h.bridge.pump(), 1);
    assert_eq!(h.bridge.pending_inbound(), 0);
}

#[test]
fn foreign_frames_are_ignored() {
    let h = Harness::new(BridgeConfig::new(), defaults());

    h.transport.deliver_from(ContextId::new(), InboundCommand::Start.to_frame());
    assert_eq!(h.bridge.pump(), 0);
    assert!(!h.bridge.is_monitored());

    h.transport.post(&json!({"source": "someone-else", "type": "START"})).unwrap();
    h.transport.post(&json!("START")).unwrap();
    assert_eq!(h.bridge.pump(), 0);
    assert!(!h.bridge.is_monitored());
}

#[test]
fn lifecycle_hooks_installed_once() {
    let env = Arc::new(StaticEnvironment::new("Counter Page"));
    let transport = Arc::new(LocalTransport::new());
    let peer = transport.attach();
    let bridge = Bridge::builder(transport.clone())
        .environment(env.clone())
        .permission(Arc::new(AllowAll))
        .build()
        .unwrap();
    let store = CounterStore::new();
    bridge.enhance(store.clone()).unwrap();
    bridge.enhance(store.clone()).unwrap();
    assert_eq!(env.hook_count(), 1);

    let messages = page_messages(&peer);
    assert_eq!(messages[0].name, "Counter Page");

    // Resume is silent until monitoring starts.
    env.resume();
    assert!(page_messages(&peer).is_empty());

    transport.post(&InboundCommand::Start.to_frame()).unwrap();
    bridge.pump();
    page_messages(&peer);
    env.resume();
    assert_eq!(kinds(&page_messages(&peer)), vec![MessageKind::State]);
}

#[test]
fn runtime_errors_surface_error_state() {
    let env = Arc::new(StaticEnvironment::new("Counter Page"));
    let transport = Arc::new(LocalTransport::new());
    let peer = transport.attach();
    let bridge = Bridge::builder(transport.clone())
        .environment(env.clone())
        .build()
        .unwrap();
    let store = CounterStore::new();
    bridge.enhance(store.clone()).unwrap();
    page_messages(&peer);

    store.dispatch(increment());
    assert!(env.raise_error(), "no error in current state; default handling runs");
    assert!(bridge.is_error_latched());
    assert!(page_messages(&peer).is_empty());

    store.dispatch(Action::new("FAIL"));
    assert!(!bridge.report_error());
    assert_eq!(kinds(&page_messages(&peer)), vec![MessageKind::State]);
}

#[test]
fn open_requests_observer_ui() {
    let h = Harness::new(BridgeConfig::new(), defaults());
    h.messages();

    h.bridge.open(Some("right")).unwrap();
    h.bridge.open(None).unwrap();
    let opens = h.messages_of(MessageKind::Open);
    assert_eq!(opens.len(), 2);
    assert_eq!(opens[0].position.as_deref(), Some("right"));
    assert_eq!(opens[1].position.as_deref(), Some(""));
}

#[test]
fn teardown_detaches_and_silences() {
    let h = Harness::new(BridgeConfig::new(), defaults());
    h.start();
    h.store.init();
    assert!(h.bridge.has_deferred());

    h.bridge.teardown();
    assert_eq!(h.bridge.phase(), Phase::Uninitialized);
    assert_eq!(h.transport.listener_count(), 1);
    assert!(!h.bridge.has_deferred());
    h.messages();

    h.store.dispatch(increment());
    h.transport.post(&InboundCommand::Start.to_frame()).unwrap();
    assert_eq!(h.bridge.pump(), 0);
    assert!(h.messages().is_empty());
}

#[test]
fn dropping_the_bridge_detaches_its_listener() {
    let transport = Arc::new(LocalTransport::new());
    {
        let bridge = Bridge::builder(transport.clone()).build().unwrap();
        bridge.enhance(CounterStore::new()).unwrap();
        assert_eq!(transport.listener_count(), 1);
    }
    assert_eq!(transport.listener_count(), 0);
}
