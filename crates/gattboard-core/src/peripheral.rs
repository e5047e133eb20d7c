//! Peripheral service boundary
//!
//! The engine talks to the BLE stack through [`PeripheralService`]. Slot values
//! live in a [`SlotStore`] shared between the engine (the only writer) and the
//! backend's read callbacks. Reads are synchronous and never trigger I/O; they
//! return whatever was last published.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use crate::chunking::SlotAssignment;
use crate::config::ServiceConfig;
use crate::error::PeripheralError;

// ----------------------------------------------------------------------------
// Service Description
// ----------------------------------------------------------------------------

/// GATT capabilities of a characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicFlags {
    pub read: bool,
    pub notify: bool,
    /// Attribute permission: readable without pairing
    pub readable: bool,
}

impl Default for CharacteristicFlags {
    fn default() -> Self {
        Self {
            read: true,
            notify: true,
            readable: true,
        }
    }
}

/// One characteristic of the published service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicSlot {
    pub uuid: Uuid,
    pub capacity: usize,
    pub flags: CharacteristicFlags,
}

/// The published service and its characteristics in slot order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub uuid: Uuid,
    pub local_name: String,
    pub slots: Vec<CharacteristicSlot>,
}

impl ServiceDescriptor {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            uuid: config.uuid,
            local_name: config.local_name.clone(),
            slots: config
                .characteristics
                .iter()
                .map(|uuid| CharacteristicSlot {
                    uuid: *uuid,
                    capacity: config.slot_capacity,
                    flags: CharacteristicFlags::default(),
                })
                .collect(),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Slot index of a characteristic UUID
    pub fn slot_index(&self, uuid: &Uuid) -> Option<usize> {
        self.slots.iter().position(|slot| slot.uuid == *uuid)
    }
}

// ----------------------------------------------------------------------------
// Slot Store
// ----------------------------------------------------------------------------

struct SlotStoreInner {
    capacities: Vec<usize>,
    values: RwLock<Vec<Vec<u8>>>,
    updates: Vec<watch::Sender<Vec<u8>>>,
    generation: AtomicU64,
}

/// Current characteristic values, shared with the BLE read callbacks
#[derive(Clone)]
pub struct SlotStore {
    inner: Arc<SlotStoreInner>,
}

impl SlotStore {
    pub fn new(descriptor: &ServiceDescriptor) -> Self {
        let capacities: Vec<usize> = descriptor.slots.iter().map(|s| s.capacity).collect();
        let updates = capacities
            .iter()
            .map(|_| watch::channel(Vec::new()).0)
            .collect();

        Self {
            inner: Arc::new(SlotStoreInner {
                values: RwLock::new(vec![Vec::new(); capacities.len()]),
                capacities,
                updates,
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.inner.capacities.len()
    }

    /// Number of completed publishes
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Read callback: last published value of a slot, empty for unknown slots
    pub fn on_read(&self, index: usize) -> Vec<u8> {
        self.values().get(index).cloned().unwrap_or_default()
    }

    /// Read starting at `offset` (BLE long reads); `None` past the end
    pub fn read_at(&self, index: usize, offset: usize) -> Option<Vec<u8>> {
        let values = self.values();
        let value = values.get(index)?;
        value.get(offset..).map(<[u8]>::to_vec)
    }

    /// All slot values as one consistent set
    pub fn snapshot(&self) -> Vec<Vec<u8>> {
        self.values().clone()
    }

    /// Change feed for one slot, used for notifications
    pub fn subscribe(&self, index: usize) -> Option<watch::Receiver<Vec<u8>>> {
        self.inner.updates.get(index).map(watch::Sender::subscribe)
    }

    /// Replace a single slot value
    pub fn set(&self, index: usize, value: Vec<u8>) -> Result<(), PeripheralError> {
        self.check(index, &value)?;
        {
            let mut values = self.values_mut();
            values[index] = value.clone();
        }
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        self.notify(index, value);
        Ok(())
    }

    /// Replace every slot value in one step.
    ///
    /// All values are validated first; on error nothing is written.
    pub fn publish(&self, assignment: &SlotAssignment) -> Result<(), PeripheralError> {
        let slots = self.slot_count();
        if assignment.slot_count() != slots {
            return Err(PeripheralError::SlotOutOfRange {
                index: assignment.slot_count().saturating_sub(1),
                slots,
            });
        }
        for (index, value) in assignment.values().iter().enumerate() {
            self.check(index, value)?;
        }

        let changed: Vec<usize> = {
            let mut values = self.values_mut();
            let changed = (0..slots)
                .filter(|&i| values[i] != assignment.values()[i])
                .collect();
            values.clone_from_slice(assignment.values());
            changed
        };
        self.inner.generation.fetch_add(1, Ordering::AcqRel);

        for index in changed {
            self.notify(index, assignment.values()[index].clone());
        }
        Ok(())
    }

    fn check(&self, index: usize, value: &[u8]) -> Result<(), PeripheralError> {
        let capacity = *self
            .inner
            .capacities
            .get(index)
            .ok_or(PeripheralError::SlotOutOfRange {
                index,
                slots: self.slot_count(),
            })?;
        if value.len() > capacity {
            return Err(PeripheralError::ValueTooLarge {
                index,
                size: value.len(),
                capacity,
            });
        }
        Ok(())
    }

    fn notify(&self, index: usize, value: Vec<u8>) {
        if let Some(sender) = self.inner.updates.get(index) {
            sender.send_replace(value);
        }
    }

    fn values(&self) -> std::sync::RwLockReadGuard<'_, Vec<Vec<u8>>> {
        self.inner.values.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn values_mut(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Vec<u8>>> {
        self.inner.values.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SlotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotStore")
            .field("slots", &self.slot_count())
            .field("generation", &self.generation())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Peripheral Service Trait
// ----------------------------------------------------------------------------

/// A registered service
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    descriptor: Arc<ServiceDescriptor>,
    store: SlotStore,
}

impl ServiceHandle {
    pub fn new(descriptor: ServiceDescriptor) -> Self {
        let store = SlotStore::new(&descriptor);
        Self {
            descriptor: Arc::new(descriptor),
            store,
        }
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    pub fn store(&self) -> &SlotStore {
        &self.store
    }
}

/// Backend that exposes the slot store over BLE
#[async_trait]
pub trait PeripheralService: Send + Sync {
    /// Register the service and its characteristics
    async fn register(
        &mut self,
        descriptor: &ServiceDescriptor,
    ) -> Result<ServiceHandle, PeripheralError>;

    /// Begin advertising the registered service
    async fn start_advertising(&mut self, handle: &ServiceHandle) -> Result<(), PeripheralError>;

    /// Stop advertising and tear down the service
    async fn stop(&mut self, handle: ServiceHandle) -> Result<(), PeripheralError>;

    fn is_advertising(&self) -> bool;

    /// Replace one characteristic value
    fn set_value(
        &self,
        handle: &ServiceHandle,
        slot: usize,
        value: Vec<u8>,
    ) -> Result<(), PeripheralError> {
        handle.store().set(slot, value)
    }

    /// Replace all characteristic values at once
    fn publish(
        &self,
        handle: &ServiceHandle,
        assignment: &SlotAssignment,
    ) -> Result<(), PeripheralError> {
        handle.store().publish(assignment)
    }
}

// ----------------------------------------------------------------------------
// In-memory Peripheral
// ----------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    store: Mutex<Option<SlotStore>>,
    advertising: AtomicBool,
    stopped: AtomicBool,
}

/// Peripheral without a radio, for tests, dry runs and unsupported hosts
#[derive(Default)]
pub struct MemoryPeripheral {
    state: Arc<MemoryState>,
    fail_registration: bool,
}

/// Central-side view of a [`MemoryPeripheral`]
#[derive(Clone)]
pub struct MemoryCentral {
    state: Arc<MemoryState>,
}

impl MemoryPeripheral {
    pub fn new() -> Self {
        Self::default()
    }

    /// Peripheral whose registration always fails
    pub fn failing() -> Self {
        Self {
            fail_registration: true,
            ..Self::default()
        }
    }

    /// Handle for reading characteristics the way a central would
    pub fn central(&self) -> MemoryCentral {
        MemoryCentral {
            state: self.state.clone(),
        }
    }
}

impl MemoryCentral {
    fn store(&self) -> Option<SlotStore> {
        self.state
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Read one characteristic
    pub fn read(&self, slot: usize) -> Vec<u8> {
        self.store().map(|s| s.on_read(slot)).unwrap_or_default()
    }

    /// Read every characteristic in slot order
    pub fn read_all(&self) -> Vec<Vec<u8>> {
        self.store().map(|s| s.snapshot()).unwrap_or_default()
    }

    pub fn is_advertising(&self) -> bool {
        self.state.advertising.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::Acquire)
    }
}

#[async_trait]
impl PeripheralService for MemoryPeripheral {
    async fn register(
        &mut self,
        descriptor: &ServiceDescriptor,
    ) -> Result<ServiceHandle, PeripheralError> {
        if self.fail_registration {
            return Err(PeripheralError::RegistrationFailed(
                "in-memory peripheral configured to fail".to_string(),
            ));
        }

        let handle = ServiceHandle::new(descriptor.clone());
        *self
            .state
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle.store().clone());
        debug!(
            "Registered in-memory service {} with {} slots",
            descriptor.uuid,
            descriptor.slot_count()
        );
        Ok(handle)
    }

    async fn start_advertising(&mut self, _handle: &ServiceHandle) -> Result<(), PeripheralError> {
        self.state.advertising.store(true, Ordering::Release);
        info!("In-memory peripheral advertising");
        Ok(())
    }

    async fn stop(&mut self, _handle: ServiceHandle) -> Result<(), PeripheralError> {
        self.state.advertising.store(false, Ordering::Release);
        self.state.stopped.store(true, Ordering::Release);
        info!("In-memory peripheral stopped");
        Ok(())
    }

    fn is_advertising(&self) -> bool {
        self.state.advertising.load(Ordering::Acquire)
    }
}
