//! Linux GATT server using bluer (BlueZ)

use async_trait::async_trait;
use bluer::adv::{Advertisement, AdvertisementHandle, Type as AdvertisementType};
use bluer::gatt::local::{
    Application, ApplicationHandle, Characteristic, CharacteristicNotify,
    CharacteristicNotifyMethod, CharacteristicRead, ReqError, Service,
};
use futures::FutureExt;
use gattboard_core::{
    PeripheralError, PeripheralService, ServiceDescriptor, ServiceHandle, SlotStore,
};
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::error::BleError;

// ----------------------------------------------------------------------------
// Linux Implementation
// ----------------------------------------------------------------------------

pub struct BluezPeripheral {
    adapter_name: Option<String>,
    session: Option<bluer::Session>,
    adapter: Option<bluer::Adapter>,
    application: Option<ApplicationHandle>,
    advertisement: Option<AdvertisementHandle>,
    service: Option<Uuid>,
}

impl BluezPeripheral {
    /// Peripheral on the named adapter, or the default adapter
    pub fn new(adapter_name: Option<String>) -> Self {
        Self {
            adapter_name,
            session: None,
            adapter: None,
            application: None,
            advertisement: None,
            service: None,
        }
    }

    async fn initialize(&mut self) -> Result<bluer::Adapter, BleError> {
        if let Some(adapter) = &self.adapter {
            return Ok(adapter.clone());
        }

        let session = bluer::Session::new()
            .await
            .map_err(|e| BleError::Session(e.to_string()))?;

        let adapter = match &self.adapter_name {
            Some(name) => session.adapter(name),
            None => session.default_adapter().await,
        }
        .map_err(|e| BleError::AdapterNotAvailable(e.to_string()))?;

        if !adapter.is_powered().await.unwrap_or(false) {
            adapter
                .set_powered(true)
                .await
                .map_err(|e| BleError::PowerOn(e.to_string()))?;
        }

        info!("Using BLE adapter {}", adapter.name());
        self.session = Some(session);
        self.adapter = Some(adapter.clone());
        Ok(adapter)
    }

    fn check_service(&self, handle: &ServiceHandle) -> Result<(), BleError> {
        let uuid = handle.descriptor().uuid;
        if self.service == Some(uuid) {
            Ok(())
        } else {
            Err(BleError::UnknownService(uuid))
        }
    }
}

impl Default for BluezPeripheral {
    fn default() -> Self {
        Self::new(None)
    }
}

// ----------------------------------------------------------------------------
// GATT Application
// ----------------------------------------------------------------------------

/// Build the BlueZ application: one readable, notifying characteristic per slot
fn gatt_application(handle: &ServiceHandle) -> Application {
    let descriptor = handle.descriptor();
    let characteristics = descriptor
        .slots
        .iter()
        .enumerate()
        .map(|(index, slot)| Characteristic {
            uuid: slot.uuid,
            read: slot
                .flags
                .read
                .then(|| read_handler(handle.store().clone(), index)),
            notify: slot
                .flags
                .notify
                .then(|| notify_handler(handle.store().clone(), index)),
            ..Default::default()
        })
        .collect();

    Application {
        services: vec![Service {
            uuid: descriptor.uuid,
            primary: true,
            characteristics,
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// Answer reads from the slot store without blocking
fn read_handler(store: SlotStore, index: usize) -> CharacteristicRead {
    CharacteristicRead {
        read: true,
        fun: Box::new(move |req| {
            trace!(
                "Read slot {} at offset {} from {}",
                index,
                req.offset,
                req.device_address
            );
            let value = store.read_at(index, usize::from(req.offset));
            async move { value.ok_or(ReqError::InvalidOffset) }.boxed()
        }),
        ..Default::default()
    }
}

/// Push every published change of the slot to a subscribed central
fn notify_handler(store: SlotStore, index: usize) -> CharacteristicNotify {
    CharacteristicNotify {
        notify: true,
        method: CharacteristicNotifyMethod::Fun(Box::new(move |mut notifier| {
            let updates = store.subscribe(index);
            async move {
                let Some(mut updates) = updates else {
                    return;
                };
                tokio::spawn(async move {
                    debug!("Central subscribed to slot {}", index);
                    while updates.changed().await.is_ok() {
                        if notifier.is_stopped() {
                            break;
                        }
                        let value = updates.borrow_and_update().clone();
                        if let Err(e) = notifier.notify(value).await {
                            debug!("Notification on slot {} failed: {}", index, e);
                            break;
                        }
                    }
                    debug!("Central unsubscribed from slot {}", index);
                });
            }
            .boxed()
        })),
        ..Default::default()
    }
}

// ----------------------------------------------------------------------------
// Peripheral Service
// ----------------------------------------------------------------------------

#[async_trait]
impl PeripheralService for BluezPeripheral {
    async fn register(
        &mut self,
        descriptor: &ServiceDescriptor,
    ) -> Result<ServiceHandle, PeripheralError> {
        let adapter = self.initialize().await?;

        let handle = ServiceHandle::new(descriptor.clone());
        let application = adapter
            .serve_gatt_application(gatt_application(&handle))
            .await
            .map_err(|e| BleError::Application(e.to_string()))?;

        self.application = Some(application);
        self.service = Some(descriptor.uuid);
        info!(
            "Registered GATT service {} with {} characteristics",
            descriptor.uuid,
            descriptor.slot_count()
        );
        Ok(handle)
    }

    async fn start_advertising(&mut self, handle: &ServiceHandle) -> Result<(), PeripheralError> {
        self.check_service(handle)?;
        let adapter = self.initialize().await?;
        let descriptor = handle.descriptor();

        let advertisement = Advertisement {
            advertisement_type: AdvertisementType::Peripheral,
            service_uuids: vec![descriptor.uuid].into_iter().collect(),
            local_name: Some(descriptor.local_name.clone()),
            discoverable: Some(true),
            ..Default::default()
        };

        let advertisement = adapter
            .advertise(advertisement)
            .await
            .map_err(|e| BleError::Advertisement(e.to_string()))?;

        self.advertisement = Some(advertisement);
        info!("Started BLE advertising as '{}'", descriptor.local_name);
        Ok(())
    }

    async fn stop(&mut self, handle: ServiceHandle) -> Result<(), PeripheralError> {
        self.check_service(&handle)?;

        // Dropping the handles unregisters them from BlueZ
        if let Some(advertisement) = self.advertisement.take() {
            drop(advertisement);
            info!("Stopped BLE advertising");
        }
        if let Some(application) = self.application.take() {
            drop(application);
            debug!("Unregistered GATT service {}", handle.descriptor().uuid);
        }
        self.service = None;
        Ok(())
    }

    fn is_advertising(&self) -> bool {
        self.advertisement.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gattboard_core::config::ServiceConfig;

    fn handle() -> ServiceHandle {
        ServiceHandle::new(ServiceDescriptor::from_config(&ServiceConfig::default()))
    }

    #[test]
    fn test_application_has_one_characteristic_per_slot() {
        let handle = handle();
        let app = gatt_application(&handle);

        assert_eq!(app.services.len(), 1);
        let service = &app.services[0];
        assert_eq!(service.uuid, handle.descriptor().uuid);
        assert!(service.primary);
        assert_eq!(service.characteristics.len(), 5);
        let slots = &handle.descriptor().slots;
        for (characteristic, slot) in service.characteristics.iter().zip(slots) {
            assert_eq!(characteristic.uuid, slot.uuid);
            assert!(characteristic.read.is_some());
            assert!(characteristic.notify.is_some());
            assert!(characteristic.write.is_none());
        }
    }

    #[tokio::test]
    async fn test_unregistered_handle_is_rejected() {
        let mut peripheral = BluezPeripheral::new(Some("hci0".to_string()));
        assert!(!peripheral.is_advertising());

        let err = peripheral.stop(handle()).await.unwrap_err();
        assert!(matches!(err, PeripheralError::NotRegistered));
    }
}
