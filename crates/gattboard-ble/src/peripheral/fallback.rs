//! Fallback peripheral for hosts without a supported GATT server

use async_trait::async_trait;
use gattboard_core::{
    MemoryCentral, MemoryPeripheral, PeripheralError, PeripheralService, ServiceDescriptor,
    ServiceHandle,
};
use tracing::warn;

// ----------------------------------------------------------------------------
// Fallback Implementation
// ----------------------------------------------------------------------------

/// Keeps slot values in memory only; nothing is visible over the air
#[derive(Default)]
pub struct FallbackPeripheral {
    inner: MemoryPeripheral,
}

impl FallbackPeripheral {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local view of the published values
    pub fn central(&self) -> MemoryCentral {
        self.inner.central()
    }
}

#[async_trait]
impl PeripheralService for FallbackPeripheral {
    async fn register(
        &mut self,
        descriptor: &ServiceDescriptor,
    ) -> Result<ServiceHandle, PeripheralError> {
        self.inner.register(descriptor).await
    }

    async fn start_advertising(&mut self, handle: &ServiceHandle) -> Result<(), PeripheralError> {
        warn!(
            "BLE peripheral mode not supported on this platform. Service '{}' will not be \
            discoverable; values are kept in memory only.",
            handle.descriptor().local_name
        );
        self.inner.start_advertising(handle).await
    }

    async fn stop(&mut self, handle: ServiceHandle) -> Result<(), PeripheralError> {
        self.inner.stop(handle).await
    }

    fn is_advertising(&self) -> bool {
        false
    }
}
