//! Hardware radio error types.

use blelink_domain::error::BleError;

/// Errors raised while opening the host adapter.
#[derive(Debug, thiserror::Error)]
pub enum BtleplugError {
    /// No adapter at the configured index.
    #[error("no BLE adapter at index {index}")]
    NotAvailable { index: usize },

    #[error("BLE backend error")]
    Backend(#[from] btleplug::Error),
}

impl From<BtleplugError> for BleError {
    fn from(err: BtleplugError) -> Self {
        tracing::debug!(error = %err, "hardware radio unavailable");
        Self::TransportUnavailable
    }
}
