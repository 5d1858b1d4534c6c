//! Device registry: peripherals seen during the current scan session.

use std::collections::HashMap;

use blelink_domain::address::DeviceAddress;
use blelink_domain::device::DeviceRecord;

/// What an [`upsert`](DeviceRegistry::upsert) did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}

/// Records keyed by address, kept in first-seen order.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    records: Vec<DeviceRecord>,
    index: HashMap<DeviceAddress, usize>,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `record`, or replace the one sharing its address in place.
    pub fn upsert(&mut self, record: DeviceRecord) -> Upsert {
        if let Some(&position) = self.index.get(&record.address) {
            self.records[position] = record;
            Upsert::Updated
        } else {
            self.index.insert(record.address, self.records.len());
            self.records.push(record);
            Upsert::Inserted
        }
    }

    #[must_use]
    pub fn get(&self, address: &DeviceAddress) -> Option<&DeviceRecord> {
        self.index
            .get(address)
            .and_then(|&position| self.records.get(position))
    }

    #[must_use]
    pub fn contains(&self, address: &DeviceAddress) -> bool {
        self.index.contains_key(address)
    }

    /// Records accepted by `filter`, in first-seen order.
    pub fn snapshot<F>(&self, filter: F) -> Vec<DeviceRecord>
    where
        F: Fn(&DeviceRecord) -> bool,
    {
        self.records
            .iter()
            .filter(|record| filter(record))
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.index.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Snapshot filter hiding peripherals that advertise no name.
#[must_use]
pub fn named_only(record: &DeviceRecord) -> bool {
    record.has_display_name()
}
