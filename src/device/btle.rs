use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use btleplug::{
    api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter, WriteType},
    platform::{Adapter, Manager, Peripheral, PeripheralId as BtleId},
};
use futures::{future, stream, stream::BoxStream, StreamExt};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    CharacteristicHandle, PeripheralId, PeripheralInfo, ServiceHandle, Transport, TransportError,
    TransportEvent,
};

#[derive(Default)]
struct Peripherals {
    by_id: HashMap<PeripheralId, Peripheral>,
    ids: HashMap<BtleId, PeripheralId>,
}

/// Bluetooth LE radio, using the first adapter of the host
pub struct BtleTransport {
    adapter: Adapter,
    peripherals: Arc<Mutex<Peripherals>>,
    /// Report advertisement refreshes of known peripherals as discoveries
    allow_duplicates: Arc<AtomicBool>,
}

impl BtleTransport {
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;

        match adapter.adapter_info().await {
            Ok(info) => info!(adapter = %info, "using bluetooth adapter"),
            Err(error) => warn!(error = %error, "could not query adapter info"),
        }

        Ok(Self {
            adapter,
            peripherals: Default::default(),
            allow_duplicates: Default::default(),
        })
    }

    async fn peripheral(&self, id: &PeripheralId) -> Result<Peripheral, TransportError> {
        self.peripherals
            .lock()
            .await
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| TransportError::UnknownPeripheral(id.clone()))
    }
}

async fn discovered(
    adapter: &Adapter,
    peripherals: &Mutex<Peripherals>,
    btle_id: BtleId,
) -> Option<TransportEvent> {
    let peripheral = match adapter.peripheral(&btle_id).await {
        Ok(peripheral) => peripheral,
        Err(error) => {
            debug!(error = %error, "discovered peripheral vanished");
            return None;
        }
    };

    let properties = match peripheral.properties().await {
        Ok(Some(properties)) => properties,
        Ok(None) => return None,
        Err(error) => {
            debug!(error = %error, "could not read peripheral properties");
            return None;
        }
    };

    let address = properties.address.to_string();
    let id = PeripheralId::from(address.clone());

    let mut peripherals = peripherals.lock().await;
    peripherals.by_id.insert(id.clone(), peripheral);
    peripherals.ids.insert(btle_id, id.clone());

    Some(TransportEvent::Discovered(PeripheralInfo {
        id,
        address: Some(address),
        services: properties.services,
    }))
}

#[async_trait]
impl Transport for BtleTransport {
    async fn events(&self) -> Result<BoxStream<'static, TransportEvent>, TransportError> {
        let adapter = self.adapter.clone();
        let peripherals = self.peripherals.clone();
        let allow_duplicates = self.allow_duplicates.clone();

        let events = self.adapter.events().await?.then(move |event| {
            let adapter = adapter.clone();
            let peripherals = peripherals.clone();
            let allow_duplicates = allow_duplicates.load(Ordering::Relaxed);

            async move {
                match event {
                    CentralEvent::DeviceDiscovered(id) => {
                        discovered(&adapter, &peripherals, id).await
                    }
                    CentralEvent::DeviceUpdated(id) if allow_duplicates => {
                        discovered(&adapter, &peripherals, id).await
                    }
                    CentralEvent::DeviceConnected(id) => peripherals
                        .lock()
                        .await
                        .ids
                        .get(&id)
                        .cloned()
                        .map(TransportEvent::Connected),
                    CentralEvent::DeviceDisconnected(id) => peripherals
                        .lock()
                        .await
                        .ids
                        .get(&id)
                        .cloned()
                        .map(TransportEvent::Disconnected),
                    _ => None,
                }
            }
        });

        // Adapters are only returned once powered, so the radio starts on
        Ok(stream::once(future::ready(TransportEvent::PoweredOn))
            .chain(events.filter_map(future::ready))
            .boxed())
    }

    async fn start_scan(
        &self,
        services: &[Uuid],
        allow_duplicates: bool,
    ) -> Result<(), TransportError> {
        self.allow_duplicates.store(allow_duplicates, Ordering::Relaxed);

        self.adapter
            .start_scan(ScanFilter {
                services: services.to_vec(),
            })
            .await?;

        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, peripheral: &PeripheralId) -> Result<(), TransportError> {
        self.peripheral(peripheral).await?.connect().await?;
        Ok(())
    }

    async fn peripheral_connected(&self, peripheral: &PeripheralId) -> Result<bool, TransportError> {
        Ok(self.peripheral(peripheral).await?.is_connected().await?)
    }

    async fn discover_service(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
    ) -> Result<Option<ServiceHandle>, TransportError> {
        let device = self.peripheral(peripheral).await?;
        device.discover_services().await?;

        Ok(device
            .services()
            .into_iter()
            .find(|candidate| candidate.uuid == service)
            .map(|found| ServiceHandle {
                peripheral: peripheral.clone(),
                uuid: found.uuid,
            }))
    }

    async fn discover_characteristic(
        &self,
        service: &ServiceHandle,
    ) -> Result<Option<CharacteristicHandle>, TransportError> {
        let device = self.peripheral(&service.peripheral).await?;

        Ok(device
            .services()
            .into_iter()
            .find(|candidate| candidate.uuid == service.uuid)
            .and_then(|found| found.characteristics.into_iter().next())
            .map(|characteristic| CharacteristicHandle {
                peripheral: service.peripheral.clone(),
                service: service.uuid,
                uuid: characteristic.uuid,
            }))
    }

    async fn write(
        &self,
        characteristic: &CharacteristicHandle,
        data: &[u8],
        without_response: bool,
    ) -> Result<(), TransportError> {
        let device = self.peripheral(&characteristic.peripheral).await?;

        if !device.is_connected().await? {
            return Err(TransportError::NotConnected(characteristic.peripheral.clone()));
        }

        let target = device
            .characteristics()
            .into_iter()
            .find(|candidate| {
                candidate.uuid == characteristic.uuid
                    && candidate.service_uuid == characteristic.service
            })
            .ok_or_else(|| TransportError::UnknownCharacteristic {
                peripheral: characteristic.peripheral.clone(),
                uuid: characteristic.uuid,
            })?;

        let write_type = if without_response {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };

        device.write(&target, data, write_type).await?;
        Ok(())
    }
}
