use std::sync::Arc;
use std::time::Duration;

use blueshooth::bluetooth::{PairedDevice, SimulatedHost};
use blueshooth::controller::Transition;
use blueshooth::enforcer::EnforcerSettings;
use blueshooth::notify::NotificationLog;
use blueshooth::policy::AutoConnectPolicy;
use blueshooth::registry::DeviceRegistry;
use blueshooth::storage::{JsonFileStore, MemoryStore};
use blueshooth::App;
use tempfile::TempDir;

const BLOCKED: &str = "AA:BB:CC:DD:EE:FF";
const ALLOWED: &str = "11:22:33:44:55:66";

fn host() -> Arc<SimulatedHost> {
    let host = Arc::new(SimulatedHost::new());
    host.add_device(BLOCKED, "Living Room Speaker");
    host.add_device(ALLOWED, "Work Headset");
    host
}

fn app(host: Arc<SimulatedHost>, log: Arc<NotificationLog>) -> App {
    App::new(
        host,
        Arc::new(MemoryStore::new()),
        log,
        EnforcerSettings::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn blocked_device_is_disconnected_after_delay() {
    let host = host();
    let log = Arc::new(NotificationLog::new(None, 16));
    let app = app(host.clone(), log.clone());
    app.set_blocked(BLOCKED, true).await.unwrap();
    let enforcer = app.start_enforcer().await.unwrap();

    host.fire_connected(BLOCKED);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(host.close_calls(BLOCKED), 1);
    assert!(!host.connected(BLOCKED));
    assert!(log
        .history()
        .iter()
        .any(|n| n.body.contains("Living Room Speaker")));

    enforcer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn allowed_device_keeps_its_connection() {
    let host = host();
    let log = Arc::new(NotificationLog::new(None, 16));
    let app = app(host.clone(), log.clone());
    app.set_blocked(BLOCKED, true).await.unwrap();
    let enforcer = app.start_enforcer().await.unwrap();

    host.fire_connected(ALLOWED);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(host.close_calls(ALLOWED), 0);
    assert!(host.connected(ALLOWED));
    assert!(log.history().is_empty());

    enforcer.shutdown().await;
}

// A pending forced disconnect is not cancelled by a manual reconnect made
// inside the settle window.
#[tokio::test(start_paused = true)]
async fn manual_reconnect_during_settle_window_is_overridden() {
    let host = host();
    let log = Arc::new(NotificationLog::new(None, 16));
    let app = app(host.clone(), log.clone());
    app.set_blocked(BLOCKED, true).await.unwrap();
    let enforcer = app.start_enforcer().await.unwrap();

    host.fire_connected(BLOCKED);
    tokio::time::sleep(Duration::from_millis(100)).await;

    host.set_connected(BLOCKED, false);
    let (_, transition) = app.connect(BLOCKED).await.unwrap();
    assert_eq!(transition, Transition::Changed);
    assert!(host.connected(BLOCKED));

    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(host.open_calls(BLOCKED), 1);
    assert_eq!(host.close_calls(BLOCKED), 1);
    assert!(!host.connected(BLOCKED));

    enforcer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unblocking_before_event_stops_enforcement() {
    let host = host();
    let log = Arc::new(NotificationLog::new(None, 16));
    let app = app(host.clone(), log.clone());
    app.toggle_block(BLOCKED).await.unwrap();
    app.toggle_block(BLOCKED).await.unwrap();
    let enforcer = app.start_enforcer().await.unwrap();

    host.fire_connected(BLOCKED);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(host.close_calls(BLOCKED), 0);

    enforcer.shutdown().await;
}

#[tokio::test]
async fn connect_and_disconnect_are_noops_in_target_state() {
    let host = host();
    let log = Arc::new(NotificationLog::new(None, 16));
    let app = app(host.clone(), log);

    host.set_connected(ALLOWED, true);
    let (_, transition) = app.connect(ALLOWED).await.unwrap();
    assert_eq!(transition, Transition::AlreadyInState);
    assert_eq!(host.open_calls(ALLOWED), 0);

    let (_, transition) = app.disconnect(BLOCKED).await.unwrap();
    assert_eq!(transition, Transition::AlreadyInState);
    assert_eq!(host.close_calls(BLOCKED), 0);
}

#[tokio::test]
async fn registry_skips_malformed_records() {
    let host = Arc::new(SimulatedHost::new());
    host.add_device(BLOCKED, "Living Room Speaker");
    host.add_record(PairedDevice {
        address: Some("22:33:44:55:66:77".to_string()),
        name: None,
    });
    host.add_device(ALLOWED, "Work Headset");

    let devices = DeviceRegistry::new(host).list_paired_devices().await.unwrap();

    let addresses: Vec<&str> = devices.iter().map(|d| d.address.as_str()).collect();
    assert_eq!(addresses, vec![BLOCKED, ALLOWED]);
}

#[tokio::test(start_paused = true)]
async fn policy_survives_restart_and_is_enforced() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state.json");
    let host = host();

    {
        let policy = AutoConnectPolicy::load(Arc::new(JsonFileStore::new(&state)));
        policy.set_blocked(BLOCKED, true).await.unwrap();
    }

    let log = Arc::new(NotificationLog::new(None, 16));
    let app = App::new(
        host.clone(),
        Arc::new(JsonFileStore::new(&state)),
        log.clone(),
        EnforcerSettings::default(),
    );
    assert!(app.policy().is_blocked(BLOCKED).await);

    let enforcer = app.start_enforcer().await.unwrap();
    host.fire_connected(BLOCKED);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(host.close_calls(BLOCKED), 1);
    enforcer.shutdown().await;
}
