//! # blelinkd: BLE central daemon
//!
//! Composition root that wires a radio adapter into the central and drives
//! one session from configuration.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Initialise logging
//! - Open the radio (simulated peripherals or the host adapter)
//! - Start the central and log every event it publishes
//! - Scan, list devices, optionally connect, read and subscribe
//! - Release the link and stop the central on Ctrl-C
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer; no BLE logic belongs here.

mod config;

use std::sync::Arc;
use std::time::Duration;

use blelink_adapter_btleplug::BtleplugRadio;
use blelink_adapter_simulated::{
    DEMO_HEART_RATE_MONITOR, HEART_RATE_MEASUREMENT, SimulatedRadio, demo_peripherals,
};
use blelink_app::central::{Central, CentralHandle};
use blelink_app::event_bus::InProcessEventBus;
use blelink_app::ports::{Radio, RadioEventReceiver, radio_event_channel};
use blelink_domain::address::DeviceAddress;
use blelink_domain::error::BleError;
use blelink_domain::event::{Event, EventPayload};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use config::{Config, RadioKind, SessionConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.logging.filter))
        .init();

    let (radio_tx, radio_rx) = radio_event_channel();
    match config.radio.kind {
        RadioKind::Simulated => {
            let radio = Arc::new(SimulatedRadio::new(
                demo_peripherals(),
                config.radio.simulated.clone(),
                radio_tx,
            ));
            tokio::spawn(simulate_heart_rate(radio.clone()));
            tracing::info!("using simulated radio");
            run(radio, radio_rx, &config).await
        }
        RadioKind::Btleplug => {
            let radio = BtleplugRadio::open(config.radio.btleplug.clone(), radio_tx).await?;
            run(Arc::new(radio), radio_rx, &config).await
        }
    }
}

async fn run<R: Radio + 'static>(
    radio: Arc<R>,
    radio_events: RadioEventReceiver,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let bus = Arc::new(InProcessEventBus::new(config.logging.event_capacity.max(1)));
    tokio::spawn(log_events(bus.subscribe()));

    let central = Central::start(radio, radio_events, bus, config.central.clone());

    central.start_scan(config.scan.scan_config()).await?;
    tokio::select! {
        () = tokio::time::sleep(config.scan.duration()) => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            central.shutdown().await?;
            return Ok(());
        }
    }

    let devices = central.devices().await?;
    tracing::info!(count = devices.len(), "scan results");
    for device in &devices {
        tracing::info!(
            address = %device.address,
            name = device.display_name.as_deref().unwrap_or("<unnamed>"),
            rssi = ?device.rssi,
            "device"
        );
    }

    if let Some(address) = config.connect_address()? {
        if let Err(err) = session(&central, address, &config.session).await {
            tracing::error!(%address, error = %err, "session failed");
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    match central.disconnect().await {
        Ok(()) | Err(BleError::NotConnected) => {}
        Err(err) => tracing::warn!(error = %err, "disconnect failed"),
    }
    central.shutdown().await?;
    Ok(())
}

async fn session(
    central: &CentralHandle,
    address: DeviceAddress,
    session: &SessionConfig,
) -> Result<(), BleError> {
    let info = central.connect(address).await?;
    tracing::info!(
        %address,
        connection = %info.id,
        mtu = info.mtu,
        services = info.services.len(),
        "connection ready"
    );

    for characteristic in &session.read {
        match central.read(*characteristic).await {
            Ok(value) => tracing::info!(%characteristic, ?value, "read"),
            Err(err) => tracing::warn!(%characteristic, error = %err, "read failed"),
        }
    }

    for characteristic in &session.subscribe {
        let mut subscription = central.enable_notifications(*characteristic).await?;
        tokio::spawn(async move {
            while let Some(value) = subscription.recv().await {
                tracing::info!(characteristic = %subscription.characteristic(), ?value, "value");
            }
        });
    }
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<Event>) {
    loop {
        match events.recv().await {
            Ok(event) => log_event(&event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event logger fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &Event) {
    match &event.payload {
        EventPayload::ScanStarted => tracing::info!("scan started"),
        EventPayload::ScanStopped => tracing::info!("scan stopped"),
        EventPayload::ScanFailed { status } => tracing::error!(%status, "scan failed"),
        EventPayload::DeviceDiscovered { record } => {
            tracing::debug!(address = %record.address, name = ?record.display_name, "discovered");
        }
        EventPayload::DeviceUpdated { record } => {
            tracing::trace!(address = %record.address, rssi = ?record.rssi, "updated");
        }
        EventPayload::DeviceListChanged { edits } => {
            tracing::debug!(edits = edits.len(), "device list changed");
        }
        EventPayload::ConnectionStateChanged {
            address, from, to, ..
        } => tracing::info!(%address, %from, %to, "connection state"),
        EventPayload::ConnectionFailed {
            address, status, ..
        } => tracing::error!(%address, %status, "connection failed"),
        EventPayload::OperationCompleted {
            kind,
            characteristic,
            outcome,
            ..
        } => tracing::debug!(?kind, %characteristic, ?outcome, "operation completed"),
        EventPayload::NotificationReceived {
            characteristic,
            value,
            ..
        } => tracing::trace!(%characteristic, ?value, "notification"),
    }
}

/// Push a heart rate measurement every second; dropped until someone
/// subscribes.
async fn simulate_heart_rate(radio: Arc<SimulatedRadio>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let mut bpm: u8 = 60;
    loop {
        interval.tick().await;
        radio.push_notification(DEMO_HEART_RATE_MONITOR, HEART_RATE_MEASUREMENT, [0x00, bpm]);
        bpm = if bpm >= 90 { 60 } else { bpm + 1 };
    }
}
