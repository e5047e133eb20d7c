//! BLE GATT peripheral backends for gattboard
//!
//! Implements the `PeripheralService` trait from `gattboard-core` on top of
//! the platform Bluetooth stack, so published slot values can be read by any
//! BLE central.
//!
//! ## Platform Support
//!
//! - **Linux**: GATT server and advertising via the `bluer` crate (BlueZ)
//! - **Other platforms**: in-memory fallback; nothing is advertised
//!
//! ## Usage
//!
//! ```rust,no_run
//! use gattboard_ble::PlatformPeripheral;
//! use gattboard_core::{config::ServiceConfig, PeripheralService, ServiceDescriptor};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServiceConfig::default();
//! let mut peripheral = PlatformPeripheral::new(&config);
//!
//! let handle = peripheral.register(&ServiceDescriptor::from_config(&config)).await?;
//! peripheral.start_advertising(&handle).await?;
//! peripheral.set_value(&handle, 0, b"{}".to_vec())?;
//! # Ok(())
//! # }
//! ```

mod error;
mod peripheral;

pub use error::BleError;
pub use peripheral::fallback::FallbackPeripheral;
#[cfg(target_os = "linux")]
pub use peripheral::linux::BluezPeripheral;
pub use peripheral::PlatformPeripheral;
