use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use statussync::{
    BusinessStatus, ChannelState, ConnectionQuality, ConnectionState, DualStatus, MemoryEventSource,
    MemoryHistoryStore, OrderType, PhysicalStatus, PresenceAction, PresenceActivity, RawChange, Row, StatusChange,
    StatusChangeRequest, StatusPatch, StatusSync, StatusUpdate, SyncConfig, UserIdentity,
};

fn row(v: Value) -> Row {
    v.as_object().cloned().unwrap()
}

fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    f()
}

fn fast_config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.health.heartbeat_interval = Duration::from_millis(20);
    config.health.settle_delay = Duration::from_millis(5);
    config
}

fn session(source: &MemoryEventSource, user: Option<&str>) -> StatusSync {
    StatusSync::new(
        Arc::new(source.clone()),
        Arc::new(MemoryHistoryStore::new()),
        user.map(|u| UserIdentity::new(u, format!("User {u}"))),
        fast_config(),
    )
    .unwrap()
}

fn recorder() -> (impl Fn(&StatusUpdate) + Send + Sync + 'static, Arc<Mutex<Vec<StatusUpdate>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (move |u: &StatusUpdate| sink.lock().unwrap().push(u.clone()), seen)
}

#[test]
fn transport_changes_reach_subscribers_normalized() {
    let source = MemoryEventSource::new();
    let sync = session(&source, Some("u1"));
    let (inv_cb, inventory) = recorder();
    let (ord_cb, orders) = recorder();
    let (pn_cb, parts) = recorder();
    let _inv = sync.subscribe_to_inventory_status(inv_cb);
    let _ord = sync.subscribe_to_order_status(OrderType::Repair, ord_cb);
    let _pn = sync.subscribe_to_part_number_modifications(pn_cb);

    source.emit(
        "inventory-status",
        RawChange::update(
            "inventory",
            row(json!({"id": 1, "physical_status": "depot", "business_status": "available"})),
            row(json!({"id": 1, "physical_status": "depot", "business_status": "reserved"})),
        ),
    );
    source.emit(
        "inventory-status",
        RawChange::update(
            "inventory",
            row(json!({"id": 1, "physical_status": "depot", "business_status": "reserved", "notes": "a"})),
            row(json!({"id": 1, "physical_status": "depot", "business_status": "reserved", "notes": "b"})),
        ),
    );
    source.emit(
        "repair_orders-status",
        RawChange::update(
            "repair_orders",
            row(json!({"id": 9, "status": "open"})),
            row(json!({"id": 9, "status": "closed"})),
        ),
    );
    source.emit(
        "part-number-modifications",
        RawChange::insert(
            "part_number_modification_requests",
            row(json!({"id": 4, "status": "pending", "old_part_number": "A", "new_part_number": "B"})),
        ),
    );

    let inventory = inventory.lock().unwrap();
    assert_eq!(inventory.len(), 1);
    let StatusChange::Inventory(change) = &inventory[0].change else {
        panic!("expected inventory change");
    };
    assert!(change.business_changed());
    assert!(!change.physical_changed());
    assert_eq!(change.new_business, Some(BusinessStatus::Reserved));

    assert_eq!(orders.lock().unwrap()[0].new_status["status"], "closed");
    assert_eq!(parts.lock().unwrap()[0].new_status["new_part_number"], "B");
}

#[test]
fn many_subscribers_share_one_channel_open_and_close() {
    for n in [1usize, 2, 5, 17] {
        let source = MemoryEventSource::new();
        let sync = session(&source, None);
        let subs: Vec<_> = (0..n).map(|_| sync.subscribe_to_inventory_status(|_| {})).collect();
        assert_eq!(source.open_count(), 1);
        assert_eq!(sync.get_subscription_stats().total_callbacks, n);
        drop(subs);
        assert_eq!(source.open_count(), 1);
        assert_eq!(source.close_count(), 1);
    }
}

#[test]
fn committed_update_converges_across_sessions_of_one_registry() {
    let source = MemoryEventSource::new();
    let sync = session(&source, Some("u1"));
    let (cb, seen) = recorder();
    let _sub = sync.subscribe_to_inventory_status(cb);

    let current = DualStatus::new(PhysicalStatus::Depot, BusinessStatus::Available);
    let request = StatusChangeRequest::new("55", current, StatusPatch::new().physical("in_transit")).by("u1");
    let receipt = sync.update_inventory_status(&request).unwrap();

    // Feeding the committed status back in is a no-op.
    let again = StatusChangeRequest::new("55", receipt.status.clone(), StatusPatch::new());
    let failure = sync.update_inventory_status(&again).unwrap_err();
    assert!(failure.is_rejected());

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].actor_id.as_deref(), Some("u1"));
    assert_eq!(seen[0].new_status["physical_status"], "in_transit");
}

#[test]
fn sold_items_keep_their_physical_status() {
    let source = MemoryEventSource::new();
    let sync = session(&source, None);
    let current = DualStatus::new(PhysicalStatus::Depot, BusinessStatus::Sold);
    let request = StatusChangeRequest::new("7", current, StatusPatch::new().physical("in_transit"));

    let failure = sync.update_inventory_status(&request).unwrap_err();
    let statussync::SyncError::Transition(e) = &failure.error else {
        panic!("expected transition error");
    };
    assert_eq!(e.error(), "Invalid status transition");
    assert_eq!(e.details(), "Cannot change physical status of sold items.");
}

#[test]
fn presence_reaches_other_users_only() {
    let source = MemoryEventSource::new();
    let alice = session(&source, Some("a"));
    let bob = session(&source, Some("b"));

    let seen_a = Arc::new(Mutex::new(Vec::<PresenceActivity>::new()));
    let seen_b = Arc::new(Mutex::new(Vec::<PresenceActivity>::new()));
    let sink_a = Arc::clone(&seen_a);
    let sink_b = Arc::clone(&seen_b);
    let _sa = alice.subscribe_to_user_activity("inventory", "X", move |a| sink_a.lock().unwrap().push(a.clone()));
    let _sb = bob.subscribe_to_user_activity("inventory", "X", move |a| sink_b.lock().unwrap().push(a.clone()));

    alice
        .broadcast_user_activity("inventory", "X", PresenceAction::Editing, None)
        .unwrap();

    let seen_b = seen_b.lock().unwrap();
    assert_eq!(seen_b.len(), 1);
    assert_eq!(seen_b[0].user_id, "a");
    assert_eq!(seen_b[0].user_name, "User a");
    assert_eq!(seen_b[0].action, PresenceAction::Editing);
    assert!(seen_a.lock().unwrap().is_empty());
}

#[test]
fn connection_status_tracks_channel_health_and_manual_reconnect() {
    let source = MemoryEventSource::new();
    let sync = session(&source, None);
    let states = Arc::new(Mutex::new(Vec::<ConnectionState>::new()));
    let sink = Arc::clone(&states);
    let _status = sync.subscribe_to_connection_status(move |s| sink.lock().unwrap().push(s.clone()));

    let _a = sync.subscribe_to_inventory_status(|_| {});
    let _b = sync.subscribe_to_order_status(OrderType::Sales, |_| {});
    let _c = sync.subscribe_to_order_status(OrderType::Purchase, |_| {});
    assert!(wait_until(Duration::from_secs(2), || {
        sync.connection_state().connection_quality == ConnectionQuality::Excellent
    }));

    source.set_state("sales_orders-status", ChannelState::Errored);
    assert!(wait_until(Duration::from_secs(2), || {
        sync.connection_state().connection_quality == ConnectionQuality::Poor
    }));

    sync.reconnect_all().unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        sync.connection_state().connection_quality == ConnectionQuality::Excellent
    }));
    let state = sync.connection_state();
    assert_eq!(state.reconnect_attempts, 1);
    assert!(state.last_heartbeat.is_some());
    assert_eq!(state.subscriptions.len(), 3);

    assert!(states
        .lock()
        .unwrap()
        .iter()
        .any(|s| s.connection_quality == ConnectionQuality::Poor));
}

#[test]
fn callbacks_survive_reconnect_without_re_registration() {
    let source = MemoryEventSource::new();
    let sync = session(&source, None);
    let (cb, seen) = recorder();
    let _sub = sync.subscribe_to_order_status(OrderType::Purchase, cb);

    source.set_state("purchase_orders-status", ChannelState::Errored);
    sync.reconnect_all().unwrap();
    assert!(wait_until(Duration::from_secs(2), || source.open_count() == 2));
    assert!(wait_until(Duration::from_secs(2), || {
        sync.connection_state().connection_quality == ConnectionQuality::Excellent
    }));

    source.emit(
        "purchase_orders-status",
        RawChange::update(
            "purchase_orders",
            row(json!({"id": 1, "status": "draft"})),
            row(json!({"id": 1, "status": "sent"})),
        ),
    );
    assert_eq!(seen.lock().unwrap().len(), 1);
}
