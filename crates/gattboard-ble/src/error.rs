//! Error types for BLE peripheral backends

use gattboard_core::PeripheralError;
use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors raised while talking to the platform Bluetooth stack
#[derive(Error, Debug)]
pub enum BleError {
    #[error("Bluetooth daemon session unavailable: {0}")]
    Session(String),

    #[error("BLE adapter not available: {0}")]
    AdapterNotAvailable(String),

    #[error("Failed to power on adapter: {0}")]
    PowerOn(String),

    #[error("Failed to register GATT application: {0}")]
    Application(String),

    #[error("Failed to start advertising: {0}")]
    Advertisement(String),

    #[error("Service {0} is not registered with this peripheral")]
    UnknownService(uuid::Uuid),
}

impl From<BleError> for PeripheralError {
    fn from(err: BleError) -> Self {
        match err {
            BleError::Session(_) | BleError::AdapterNotAvailable(_) | BleError::PowerOn(_) => {
                PeripheralError::AdapterUnavailable(err.to_string())
            }
            BleError::Application(_) => PeripheralError::RegistrationFailed(err.to_string()),
            BleError::Advertisement(_) => PeripheralError::AdvertisingFailed(err.to_string()),
            BleError::UnknownService(_) => PeripheralError::NotRegistered,
        }
    }
}
