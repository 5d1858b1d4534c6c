//! Scan controller: owns the discovery session and feeds the registry.

use std::sync::Arc;

use blelink_domain::address::DeviceAddress;
use blelink_domain::device::DeviceRecord;
use blelink_domain::error::BleError;
use blelink_domain::event::{Event, EventPayload};
use blelink_domain::gatt::GattStatus;
use blelink_domain::list_diff;

use crate::config::ScanConfig;
use crate::ports::{EventPublisher, Radio};
use crate::services::device_registry::{DeviceRegistry, Upsert, named_only};

/// One scan session at a time.
///
/// Besides the per-advertisement discovered/updated events, the controller
/// remembers the device list it last published and emits the edits between
/// that list and the current one whenever they differ.
pub struct ScanController<R, P> {
    radio: Arc<R>,
    publisher: Arc<P>,
    registry: DeviceRegistry,
    scanning: bool,
    list_unnamed: bool,
    published: Vec<DeviceRecord>,
}

impl<R: Radio, P: EventPublisher> ScanController<R, P> {
    /// Create an idle controller. With `list_unnamed` off, peripherals that
    /// advertise no name stay out of [`devices`](Self::devices).
    pub fn new(radio: Arc<R>, publisher: Arc<P>, list_unnamed: bool) -> Self {
        Self {
            radio,
            publisher,
            registry: DeviceRegistry::new(),
            scanning: false,
            list_unnamed,
            published: Vec::new(),
        }
    }

    /// Start a new session, forgetting everything the previous one saw.
    ///
    /// # Errors
    ///
    /// Returns [`BleError::AlreadyScanning`] if a session is active,
    /// [`BleError::TransportUnavailable`] if the radio is off, or
    /// [`BleError::ScanFailed`] if the radio refuses the session.
    #[tracing::instrument(skip(self, config), fields(mode = ?config.mode))]
    pub fn start(&mut self, config: &ScanConfig) -> Result<(), BleError> {
        if self.scanning {
            return Err(BleError::AlreadyScanning);
        }
        if !self.radio.is_available() {
            return Err(BleError::TransportUnavailable);
        }

        self.registry.clear();
        self.publish_list_changes();

        if let Err(err) = self.radio.start_scan(config) {
            let status = err.status();
            tracing::error!(%status, "radio refused the scan session");
            self.publisher
                .publish(Event::new(EventPayload::ScanFailed { status }));
            return Err(BleError::ScanFailed { status });
        }

        self.scanning = true;
        tracing::info!(filters = config.service_uuids.len(), "scan started");
        self.publisher.publish(Event::new(EventPayload::ScanStarted));
        Ok(())
    }

    /// Stop the session. Does nothing when idle.
    pub fn stop(&mut self) {
        if !self.scanning {
            return;
        }
        self.radio.stop_scan();
        self.scanning = false;
        tracing::info!(devices = self.registry.len(), "scan stopped");
        self.publisher.publish(Event::new(EventPayload::ScanStopped));
    }

    /// Record an advertisement seen during the current session and publish
    /// the resulting events. Ignored outside a session.
    pub fn on_advertisement(
        &mut self,
        address: DeviceAddress,
        name: Option<String>,
        rssi: Option<i16>,
    ) {
        if !self.scanning {
            tracing::trace!(%address, "advertisement outside a scan session, ignored");
            return;
        }

        let record = DeviceRecord::new(address, name, rssi);
        let payload = match self.registry.upsert(record.clone()) {
            Upsert::Inserted => {
                tracing::debug!(%address, name = ?record.display_name, "device discovered");
                EventPayload::DeviceDiscovered { record }
            }
            Upsert::Updated => {
                tracing::trace!(%address, rssi = ?record.rssi, "device updated");
                EventPayload::DeviceUpdated { record }
            }
        };
        self.publisher.publish(Event::new(payload));
        self.publish_list_changes();
    }

    /// The radio aborted the session on its own. No retry is attempted.
    pub fn on_scan_failed(&mut self, status: GattStatus) {
        tracing::error!(%status, "scan failed");
        self.scanning = false;
        self.publisher
            .publish(Event::new(EventPayload::ScanFailed { status }));
    }

    /// The radio went away; the session ends without a stop request.
    pub fn on_radio_lost(&mut self) {
        if self.scanning {
            self.scanning = false;
            self.publisher.publish(Event::new(EventPayload::ScanStopped));
        }
    }

    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    #[must_use]
    pub fn is_known(&self, address: &DeviceAddress) -> bool {
        self.registry.contains(address)
    }

    /// The device list as a view would show it.
    #[must_use]
    pub fn devices(&self) -> Vec<DeviceRecord> {
        if self.list_unnamed {
            self.registry.snapshot(|_| true)
        } else {
            self.registry.snapshot(named_only)
        }
    }

    fn publish_list_changes(&mut self) {
        let current = self.devices();
        let edits = list_diff::diff(&self.published, &current);
        if edits.is_empty() {
            return;
        }
        self.published = current;
        self.publisher
            .publish(Event::new(EventPayload::DeviceListChanged { edits }));
    }
}
