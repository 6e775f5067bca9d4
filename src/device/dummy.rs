use std::{
    collections::HashSet,
    fmt::Write,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use futures::{future, stream, stream::BoxStream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use super::{
    CharacteristicHandle, PeripheralId, PeripheralInfo, ServiceHandle, Transport, TransportError,
    TransportEvent, SET_COLOR_OPCODE,
};
use crate::{color::DeviceColor, models};

/// Characteristic exposed by every simulated peripheral
pub const DUMMY_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000ffd9_0000_1000_8000_00805f9b34fb);

#[derive(Debug, Default)]
struct DummyState {
    powered: bool,
    scanning: bool,
    connected: HashSet<PeripheralId>,
    fail_writes: bool,
    writes: Vec<(PeripheralId, Vec<u8>)>,
}

/// Simulated radio
///
/// Every scanned service is answered by a simulated peripheral which accepts connections and
/// logs the colors written to it. Writes are recorded so they can be inspected.
pub struct DummyTransport {
    config: models::DummyTransport,
    events_tx: broadcast::Sender<TransportEvent>,
    state: Mutex<DummyState>,
}

impl DummyTransport {
    pub fn new(config: models::DummyTransport) -> Self {
        let (events_tx, _) = broadcast::channel(16);

        Self {
            config,
            events_tx,
            state: Mutex::new(DummyState {
                powered: true,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, DummyState> {
        // The state is always left consistent, recover it if a holder panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: TransportEvent) {
        // ok: nobody may be listening yet
        self.events_tx.send(event).ok();
    }

    /// Identifier of the simulated peripheral advertising `service`
    pub fn peripheral_id(service: Uuid) -> PeripheralId {
        PeripheralId::from(format!("dummy-{}", service))
    }

    pub fn peripheral_info(service: Uuid) -> PeripheralInfo {
        let bytes = service.as_bytes();
        let mut address = String::new();
        for (i, byte) in bytes[10..].iter().enumerate() {
            if i > 0 {
                address.push(':');
            }
            // ok: writing to a String cannot fail
            write!(address, "{:02X}", byte).ok();
        }

        PeripheralInfo {
            id: Self::peripheral_id(service),
            address: Some(address),
            services: vec![service],
        }
    }

    fn service_of(peripheral: &PeripheralId) -> Option<Uuid> {
        peripheral
            .to_string()
            .strip_prefix("dummy-")
            .and_then(|uuid| uuid.parse().ok())
    }

    pub fn set_powered(&self, powered: bool) {
        let disconnected: Vec<_> = {
            let mut state = self.state();
            state.powered = powered;

            if powered {
                Vec::new()
            } else {
                state.scanning = false;
                state.connected.drain().collect()
            }
        };

        for peripheral in disconnected {
            self.emit(TransportEvent::Disconnected(peripheral));
        }

        self.emit(if powered {
            TransportEvent::PoweredOn
        } else {
            TransportEvent::PoweredOff
        });
    }

    /// Simulate the peripheral going out of range
    pub fn disconnect(&self, peripheral: &PeripheralId) {
        if self.state().connected.remove(peripheral) {
            self.emit(TransportEvent::Disconnected(peripheral.clone()));
        }
    }

    /// Drop the link without reporting it on the event stream
    pub fn disconnect_silently(&self, peripheral: &PeripheralId) {
        self.state().connected.remove(peripheral);
    }

    pub fn set_fail_writes(&self, fail_writes: bool) {
        self.state().fail_writes = fail_writes;
    }

    pub fn is_connected(&self, peripheral: &PeripheralId) -> bool {
        self.state().connected.contains(peripheral)
    }

    pub fn is_scanning(&self) -> bool {
        self.state().scanning
    }

    pub fn writes(&self) -> Vec<(PeripheralId, Vec<u8>)> {
        self.state().writes.clone()
    }

    fn check_connected(&self, peripheral: &PeripheralId) -> Result<(), TransportError> {
        let state = self.state();

        if !state.powered {
            Err(TransportError::PoweredOff)
        } else if !state.connected.contains(peripheral) {
            Err(TransportError::NotConnected(peripheral.clone()))
        } else {
            Ok(())
        }
    }

    fn log_write(&self, peripheral: &PeripheralId, data: &[u8]) {
        let color = match data {
            [SET_COLOR_OPCODE, red, green, blue] => DeviceColor::new(*red, *green, *blue),
            _ => {
                info!(peripheral = %peripheral, data = ?data, "write");
                return;
            }
        };

        match self.config.mode {
            models::DummyTransportMode::Text => {
                info!(
                    peripheral = %peripheral,
                    red = %format_args!("{:3}", color.red),
                    green = %format_args!("{:3}", color.green),
                    blue = %format_args!("{:3}", color.blue),
                );
            }

            models::DummyTransportMode::Ansi => {
                info!(
                    "{} \x1B[38;2;{};{};{}m████\x1B[0m",
                    peripheral, color.red, color.green, color.blue
                );
            }
        }
    }
}

#[async_trait]
impl Transport for DummyTransport {
    async fn events(&self) -> Result<BoxStream<'static, TransportEvent>, TransportError> {
        let initial = if self.state().powered {
            Some(TransportEvent::PoweredOn)
        } else {
            None
        };

        let events = BroadcastStream::new(self.events_tx.subscribe())
            .filter_map(|event| future::ready(event.ok()));

        Ok(stream::iter(initial).chain(events).boxed())
    }

    async fn start_scan(
        &self,
        services: &[Uuid],
        _allow_duplicates: bool,
    ) -> Result<(), TransportError> {
        {
            let mut state = self.state();
            if !state.powered {
                return Err(TransportError::PoweredOff);
            }

            state.scanning = true;
        }

        if self.config.advertise {
            for service in services {
                self.emit(TransportEvent::Discovered(Self::peripheral_info(*service)));
            }
        }

        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.state().scanning = false;
        Ok(())
    }

    async fn connect(&self, peripheral: &PeripheralId) -> Result<(), TransportError> {
        if Self::service_of(peripheral).is_none() {
            return Err(TransportError::UnknownPeripheral(peripheral.clone()));
        }

        {
            let mut state = self.state();
            if !state.powered {
                return Err(TransportError::PoweredOff);
            }

            state.connected.insert(peripheral.clone());
        }

        self.emit(TransportEvent::Connected(peripheral.clone()));
        Ok(())
    }

    async fn peripheral_connected(&self, peripheral: &PeripheralId) -> Result<bool, TransportError> {
        Ok(self.is_connected(peripheral))
    }

    async fn discover_service(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
    ) -> Result<Option<ServiceHandle>, TransportError> {
        self.check_connected(peripheral)?;

        Ok((Self::service_of(peripheral) == Some(service)).then(|| ServiceHandle {
            peripheral: peripheral.clone(),
            uuid: service,
        }))
    }

    async fn discover_characteristic(
        &self,
        service: &ServiceHandle,
    ) -> Result<Option<CharacteristicHandle>, TransportError> {
        self.check_connected(&service.peripheral)?;

        Ok(Some(CharacteristicHandle {
            peripheral: service.peripheral.clone(),
            service: service.uuid,
            uuid: DUMMY_CHARACTERISTIC,
        }))
    }

    async fn write(
        &self,
        characteristic: &CharacteristicHandle,
        data: &[u8],
        _without_response: bool,
    ) -> Result<(), TransportError> {
        self.check_connected(&characteristic.peripheral)?;

        if characteristic.uuid != DUMMY_CHARACTERISTIC {
            return Err(TransportError::UnknownCharacteristic {
                peripheral: characteristic.peripheral.clone(),
                uuid: characteristic.uuid,
            });
        }

        {
            let mut state = self.state();
            if state.fail_writes {
                return Err(TransportError::WriteFailed("simulated failure".to_owned()));
            }

            state
                .writes
                .push((characteristic.peripheral.clone(), data.to_vec()));
        }

        self.log_write(&characteristic.peripheral, data);
        Ok(())
    }
}
