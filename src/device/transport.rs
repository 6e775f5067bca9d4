use async_trait::async_trait;
use derive_more::{Display, From};
use futures::stream::BoxStream;
use serde_derive::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport not supported: {0}")]
    NotSupported(&'static str),
    #[error("radio is not powered on")]
    PoweredOff,
    #[error("no bluetooth adapter found")]
    NoAdapter,
    #[error("unknown peripheral: {0}")]
    UnknownPeripheral(PeripheralId),
    #[error("peripheral not connected: {0}")]
    NotConnected(PeripheralId),
    #[error("unknown characteristic {uuid} on {peripheral}")]
    UnknownCharacteristic { peripheral: PeripheralId, uuid: Uuid },
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[cfg(feature = "bluetooth")]
    #[error("bluetooth error: {0}")]
    Btle(#[from] btleplug::Error),
}

/// Transport-level identifier of a peripheral
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Serialize)]
pub struct PeripheralId(String);

impl From<&str> for PeripheralId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Advertisement data of a discovered peripheral
#[derive(Debug, Clone, PartialEq)]
pub struct PeripheralInfo {
    pub id: PeripheralId,
    pub address: Option<String>,
    pub services: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceHandle {
    pub peripheral: PeripheralId,
    pub uuid: Uuid,
}

/// Writable endpoint on a connected peripheral
#[derive(Debug, Clone, PartialEq)]
pub struct CharacteristicHandle {
    pub peripheral: PeripheralId,
    pub service: Uuid,
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    PoweredOn,
    PoweredOff,
    Discovered(PeripheralInfo),
    Connected(PeripheralId),
    Disconnected(PeripheralId),
}

/// Wireless transport shared by all accessories
///
/// Operations complete asynchronously. Radio state changes, discoveries and link losses are
/// reported through the single stream returned by [Transport::events].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Event stream of the radio. Only one consumer is expected.
    async fn events(&self) -> Result<BoxStream<'static, TransportEvent>, TransportError>;

    async fn start_scan(&self, services: &[Uuid], allow_duplicates: bool)
        -> Result<(), TransportError>;

    async fn stop_scan(&self) -> Result<(), TransportError>;

    async fn connect(&self, peripheral: &PeripheralId) -> Result<(), TransportError>;

    /// Current link state of a peripheral, as known by the radio
    async fn peripheral_connected(&self, peripheral: &PeripheralId) -> Result<bool, TransportError>;

    async fn discover_service(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
    ) -> Result<Option<ServiceHandle>, TransportError>;

    /// Find the first characteristic of a discovered service
    async fn discover_characteristic(
        &self,
        service: &ServiceHandle,
    ) -> Result<Option<CharacteristicHandle>, TransportError>;

    async fn write(
        &self,
        characteristic: &CharacteristicHandle,
        data: &[u8],
        without_response: bool,
    ) -> Result<(), TransportError>;
}
