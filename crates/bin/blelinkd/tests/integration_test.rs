//! End-to-end tests for the full blelink stack.
//!
//! Each test wires the simulated radio into a real `Central` and drives it
//! through its public handle, the way the daemon does.

use std::sync::Arc;
use std::time::Duration;

use blelink_adapter_simulated::{
    BATTERY_LEVEL, DEMO_HEART_RATE_MONITOR, DEMO_THERMOMETER, HEART_RATE_CONTROL_POINT,
    HEART_RATE_MEASUREMENT, SimulatedConfig, SimulatedPeripheral, SimulatedRadio, TEMPERATURE,
    demo_peripherals,
};
use blelink_app::central::{Central, CentralHandle};
use blelink_app::config::{CentralConfig, ScanConfig};
use blelink_app::event_bus::InProcessEventBus;
use blelink_app::ports::radio_event_channel;
use blelink_domain::address::DeviceAddress;
use blelink_domain::connection::ConnectionState;
use blelink_domain::error::BleError;
use blelink_domain::event::EventPayload;
use blelink_domain::gatt::{DEFAULT_MTU, GattStatus};
use tokio::sync::broadcast;

struct Stack {
    central: CentralHandle,
    radio: Arc<SimulatedRadio>,
    events: broadcast::Receiver<blelink_domain::event::Event>,
}

fn stack_with(peripherals: Vec<SimulatedPeripheral>) -> Stack {
    let (tx, rx) = radio_event_channel();
    let radio = Arc::new(SimulatedRadio::new(
        peripherals,
        SimulatedConfig {
            latency_ms: 1,
            advertising_interval_ms: 10,
            rssi_jitter: 0,
        },
        tx,
    ));
    let bus = Arc::new(InProcessEventBus::new(1024));
    let events = bus.subscribe();
    let central = Central::start(
        radio.clone(),
        rx,
        bus,
        CentralConfig {
            mtu_timeout_ms: 200,
            disconnect_timeout_ms: 200,
            ..CentralConfig::default()
        },
    );
    Stack {
        central,
        radio,
        events,
    }
}

fn stack() -> Stack {
    stack_with(demo_peripherals())
}

/// Start a scan and wait until every address in `addresses` has been seen.
async fn discover_all(stack: &Stack, addresses: &[DeviceAddress]) {
    stack
        .central
        .start_scan(ScanConfig::default())
        .await
        .expect("scan should start");
    for _ in 0..100 {
        let devices = stack.central.devices().await.unwrap();
        if addresses
            .iter()
            .all(|address| devices.iter().any(|d| d.address == *address))
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{addresses:?} never all advertised");
}

async fn discover(stack: &Stack, address: DeviceAddress) {
    discover_all(stack, &[address]).await;
}

async fn wait_for_state(central: &CentralHandle, state: ConnectionState) {
    for _ in 0..100 {
        if central.state().await.unwrap().state == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("connection never reached {state}");
}

fn drain(events: &mut broadcast::Receiver<blelink_domain::event::Event>) -> Vec<EventPayload> {
    let mut payloads = Vec::new();
    while let Ok(event) = events.try_recv() {
        payloads.push(event.payload);
    }
    payloads
}

// ---------------------------------------------------------------------------
// Scanning
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_list_named_demo_devices_after_scan() {
    let stack = stack();
    discover_all(&stack, &[DEMO_THERMOMETER, DEMO_HEART_RATE_MONITOR]).await;

    let devices = stack.central.devices().await.unwrap();

    assert_eq!(devices.len(), 2);
    assert!(devices.iter().all(|d| d.display_name.is_some()));
}

#[tokio::test]
async fn should_refuse_second_scan_while_scanning() {
    let stack = stack();
    stack.central.start_scan(ScanConfig::default()).await.unwrap();

    let result = stack.central.start_scan(ScanConfig::default()).await;

    assert!(matches!(result, Err(BleError::AlreadyScanning)));
}

#[tokio::test]
async fn should_report_unavailable_radio_when_scanning() {
    let stack = stack();
    stack.radio.set_available(false);

    let result = stack.central.start_scan(ScanConfig::default()).await;

    assert!(matches!(result, Err(BleError::TransportUnavailable)));
}

// ---------------------------------------------------------------------------
// Connection lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_reach_ready_with_negotiated_mtu_and_stop_scanning() {
    let mut stack = stack();
    discover(&stack, DEMO_HEART_RATE_MONITOR).await;

    let info = stack.central.connect(DEMO_HEART_RATE_MONITOR).await.unwrap();

    assert_eq!(info.address, DEMO_HEART_RATE_MONITOR);
    assert_eq!(info.mtu, 247);
    assert_eq!(info.services.len(), 2);
    assert!(!stack.radio.is_scanning());

    let states: Vec<ConnectionState> = drain(&mut stack.events)
        .into_iter()
        .filter_map(|payload| match payload {
            EventPayload::ConnectionStateChanged { to, .. } => Some(to),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            ConnectionState::Connecting,
            ConnectionState::ServicesDiscovering,
            ConnectionState::NegotiatingMtu,
            ConnectionState::Ready,
        ]
    );
}

#[tokio::test]
async fn should_become_ready_with_default_mtu_when_peripheral_refuses_negotiation() {
    let stack = stack_with(vec![
        SimulatedPeripheral::heart_rate_monitor(DEMO_HEART_RATE_MONITOR).with_mtu(None),
    ]);
    discover(&stack, DEMO_HEART_RATE_MONITOR).await;

    let info = stack.central.connect(DEMO_HEART_RATE_MONITOR).await.unwrap();

    assert_eq!(info.mtu, DEFAULT_MTU);
}

#[tokio::test]
async fn should_fail_connect_with_scripted_status() {
    let stack = stack_with(vec![
        SimulatedPeripheral::heart_rate_monitor(DEMO_HEART_RATE_MONITOR)
            .failing_connect(GattStatus::GATT_ERROR),
    ]);
    discover(&stack, DEMO_HEART_RATE_MONITOR).await;

    let result = stack.central.connect(DEMO_HEART_RATE_MONITOR).await;

    assert!(matches!(
        result,
        Err(BleError::LinkFailed {
            status: GattStatus::GATT_ERROR
        })
    ));
    wait_for_state(&stack.central, ConnectionState::Disconnected).await;
}

#[tokio::test]
async fn should_refuse_connect_to_unseen_device() {
    let stack = stack();

    let result = stack.central.connect(DEMO_HEART_RATE_MONITOR).await;

    assert!(matches!(result, Err(BleError::UnknownDevice { .. })));
}

#[tokio::test]
async fn should_release_link_once_on_disconnect() {
    let stack = stack();
    discover(&stack, DEMO_HEART_RATE_MONITOR).await;
    let info = stack.central.connect(DEMO_HEART_RATE_MONITOR).await.unwrap();

    stack.central.disconnect().await.unwrap();

    let status = stack.central.state().await.unwrap();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert_eq!(stack.radio.closed_links(), vec![info.id]);
    assert!(matches!(
        stack.central.disconnect().await,
        Err(BleError::NotConnected)
    ));
}

#[tokio::test]
async fn should_end_subscription_when_peripheral_drops_link() {
    let stack = stack();
    discover(&stack, DEMO_HEART_RATE_MONITOR).await;
    stack.central.connect(DEMO_HEART_RATE_MONITOR).await.unwrap();
    let mut subscription = stack
        .central
        .enable_notifications(HEART_RATE_MEASUREMENT)
        .await
        .unwrap();

    assert!(
        stack
            .radio
            .drop_link(DEMO_HEART_RATE_MONITOR, GattStatus::REMOTE_TERMINATED)
    );

    let ended = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
        .await
        .unwrap();
    assert_eq!(ended, None);
    wait_for_state(&stack.central, ConnectionState::Disconnected).await;
    assert_eq!(stack.radio.closed_links().len(), 1);
}

#[tokio::test]
async fn should_fail_operations_and_release_link_when_radio_powers_off() {
    let stack = stack();
    discover(&stack, DEMO_HEART_RATE_MONITOR).await;
    stack.central.connect(DEMO_HEART_RATE_MONITOR).await.unwrap();
    let mut subscription = stack
        .central
        .enable_notifications(HEART_RATE_MEASUREMENT)
        .await
        .unwrap();

    stack.radio.set_available(false);

    assert!(matches!(
        stack.central.read(BATTERY_LEVEL).await,
        Err(BleError::TransportUnavailable)
    ));
    let ended = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
        .await
        .unwrap();
    assert_eq!(ended, None);
    wait_for_state(&stack.central, ConnectionState::Disconnected).await;
    assert_eq!(stack.radio.closed_links().len(), 1);
}

// ---------------------------------------------------------------------------
// GATT operations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_read_battery_level() {
    let stack = stack();
    discover(&stack, DEMO_HEART_RATE_MONITOR).await;
    stack.central.connect(DEMO_HEART_RATE_MONITOR).await.unwrap();

    let value = stack.central.read(BATTERY_LEVEL).await.unwrap();

    assert_eq!(value, vec![87]);
}

#[tokio::test]
async fn should_map_authentication_failure_to_permission_denied() {
    let stack = stack_with(vec![
        SimulatedPeripheral::heart_rate_monitor(DEMO_HEART_RATE_MONITOR)
            .with_status(BATTERY_LEVEL, GattStatus::INSUFFICIENT_AUTHENTICATION),
    ]);
    discover(&stack, DEMO_HEART_RATE_MONITOR).await;
    stack.central.connect(DEMO_HEART_RATE_MONITOR).await.unwrap();

    let result = stack.central.read(BATTERY_LEVEL).await;

    assert!(matches!(result, Err(BleError::PermissionDenied)));
}

#[tokio::test]
async fn should_write_control_point() {
    let stack = stack();
    discover(&stack, DEMO_HEART_RATE_MONITOR).await;
    stack.central.connect(DEMO_HEART_RATE_MONITOR).await.unwrap();

    stack
        .central
        .write(HEART_RATE_CONTROL_POINT, vec![0x01])
        .await
        .unwrap();

    assert_eq!(
        stack
            .radio
            .value(DEMO_HEART_RATE_MONITOR, HEART_RATE_CONTROL_POINT),
        Some(vec![0x01])
    );
}

#[tokio::test]
async fn should_run_operations_in_submission_order() {
    let stack = stack();
    discover(&stack, DEMO_HEART_RATE_MONITOR).await;
    stack.central.connect(DEMO_HEART_RATE_MONITOR).await.unwrap();

    let (first, second) = tokio::join!(
        stack.central.write(HEART_RATE_CONTROL_POINT, vec![0x0A]),
        stack.central.write(HEART_RATE_CONTROL_POINT, vec![0x0B]),
    );

    first.unwrap();
    second.unwrap();
    assert_eq!(
        stack
            .radio
            .value(DEMO_HEART_RATE_MONITOR, HEART_RATE_CONTROL_POINT),
        Some(vec![0x0B])
    );
}

#[tokio::test]
async fn should_refuse_read_before_connecting() {
    let stack = stack();

    let result = stack.central.read(BATTERY_LEVEL).await;

    assert!(matches!(result, Err(BleError::NotConnected)));
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_deliver_pushed_values_to_subscription_and_bus() {
    let mut stack = stack();
    discover(&stack, DEMO_HEART_RATE_MONITOR).await;
    stack.central.connect(DEMO_HEART_RATE_MONITOR).await.unwrap();
    let mut subscription = stack
        .central
        .enable_notifications(HEART_RATE_MEASUREMENT)
        .await
        .unwrap();
    drain(&mut stack.events);

    assert!(
        stack
            .radio
            .push_notification(DEMO_HEART_RATE_MONITOR, HEART_RATE_MEASUREMENT, [0x00, 72])
    );

    let value = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
        .await
        .unwrap();
    assert_eq!(value, Some(vec![0x00, 72]));
    let notified = drain(&mut stack.events).into_iter().any(|payload| {
        matches!(
            payload,
            EventPayload::NotificationReceived { characteristic, .. }
                if characteristic == HEART_RATE_MEASUREMENT
        )
    });
    assert!(notified);
}

#[tokio::test]
async fn should_subscribe_to_indications() {
    let stack = stack();
    discover(&stack, DEMO_THERMOMETER).await;
    stack.central.connect(DEMO_THERMOMETER).await.unwrap();
    let mut subscription = stack
        .central
        .enable_notifications(TEMPERATURE)
        .await
        .unwrap();

    stack
        .radio
        .push_notification(DEMO_THERMOMETER, TEMPERATURE, 2200_i16.to_le_bytes());

    let value = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
        .await
        .unwrap();
    assert_eq!(value, Some(2200_i16.to_le_bytes().to_vec()));
}

#[tokio::test]
async fn should_stop_pushes_after_disable() {
    let stack = stack();
    discover(&stack, DEMO_HEART_RATE_MONITOR).await;
    stack.central.connect(DEMO_HEART_RATE_MONITOR).await.unwrap();
    let mut subscription = stack
        .central
        .enable_notifications(HEART_RATE_MEASUREMENT)
        .await
        .unwrap();

    stack
        .central
        .disable_notifications(HEART_RATE_MEASUREMENT)
        .await
        .unwrap();

    assert!(
        !stack
            .radio
            .push_notification(DEMO_HEART_RATE_MONITOR, HEART_RATE_MEASUREMENT, [0x00, 80])
    );
    let ended = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
        .await
        .unwrap();
    assert_eq!(ended, None);
}

#[tokio::test]
async fn should_refuse_notifications_on_read_only_characteristic() {
    let stack = stack();
    discover(&stack, DEMO_HEART_RATE_MONITOR).await;
    stack.central.connect(DEMO_HEART_RATE_MONITOR).await.unwrap();

    let result = stack.central.enable_notifications(BATTERY_LEVEL).await;

    assert!(matches!(result, Err(BleError::Unsupported { .. })));
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_release_link_on_shutdown() {
    let stack = stack();
    discover(&stack, DEMO_HEART_RATE_MONITOR).await;
    stack.central.connect(DEMO_HEART_RATE_MONITOR).await.unwrap();

    stack.central.shutdown().await.unwrap();

    assert_eq!(stack.radio.closed_links().len(), 1);
    assert!(matches!(
        stack.central.state().await,
        Err(BleError::Shutdown)
    ));
}
