//! Platform detection for the peripheral backend

pub mod fallback;
#[cfg(target_os = "linux")]
pub mod linux;

use async_trait::async_trait;
use gattboard_core::config::ServiceConfig;
use gattboard_core::{
    PeripheralError, PeripheralService, ServiceDescriptor, ServiceHandle, SlotAssignment,
};

// ----------------------------------------------------------------------------
// Platform Detection and Factory
// ----------------------------------------------------------------------------

/// Platform-specific peripheral enum
pub enum PlatformPeripheral {
    #[cfg(target_os = "linux")]
    Linux(linux::BluezPeripheral),
    Fallback(fallback::FallbackPeripheral),
}

impl PlatformPeripheral {
    /// Create the appropriate peripheral for the current platform
    pub fn new(config: &ServiceConfig) -> Self {
        #[cfg(target_os = "linux")]
        {
            Self::Linux(linux::BluezPeripheral::new(config.adapter.clone()))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = config;
            Self::Fallback(fallback::FallbackPeripheral::new())
        }
    }

    /// Peripheral that never touches the radio
    pub fn in_memory() -> Self {
        Self::Fallback(fallback::FallbackPeripheral::new())
    }

    /// Name of the backend, for logs
    pub fn backend(&self) -> &'static str {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(_) => "bluez",
            Self::Fallback(_) => "in-memory",
        }
    }
}

#[async_trait]
impl PeripheralService for PlatformPeripheral {
    async fn register(
        &mut self,
        descriptor: &ServiceDescriptor,
    ) -> Result<ServiceHandle, PeripheralError> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(ref mut peripheral) => peripheral.register(descriptor).await,
            Self::Fallback(ref mut peripheral) => peripheral.register(descriptor).await,
        }
    }

    async fn start_advertising(&mut self, handle: &ServiceHandle) -> Result<(), PeripheralError> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(ref mut peripheral) => peripheral.start_advertising(handle).await,
            Self::Fallback(ref mut peripheral) => peripheral.start_advertising(handle).await,
        }
    }

    async fn stop(&mut self, handle: ServiceHandle) -> Result<(), PeripheralError> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(ref mut peripheral) => peripheral.stop(handle).await,
            Self::Fallback(ref mut peripheral) => peripheral.stop(handle).await,
        }
    }

    fn is_advertising(&self) -> bool {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(ref peripheral) => peripheral.is_advertising(),
            Self::Fallback(ref peripheral) => peripheral.is_advertising(),
        }
    }

    fn publish(
        &self,
        handle: &ServiceHandle,
        assignment: &SlotAssignment,
    ) -> Result<(), PeripheralError> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(ref peripheral) => peripheral.publish(handle, assignment),
            Self::Fallback(ref peripheral) => peripheral.publish(handle, assignment),
        }
    }
}
