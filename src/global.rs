use std::{collections::BTreeMap, sync::Arc};

use futures::{stream::BoxStream, StreamExt};
use tokio::sync::{broadcast, RwLock};

use crate::{
    accessory::{AccessoryHandle, CharacteristicUpdate},
    device::TransportEvent,
    models::Config,
};

#[derive(Clone)]
pub struct Global(Arc<RwLock<GlobalData>>);

impl Global {
    pub async fn subscribe_transport(&self) -> broadcast::Receiver<TransportEvent> {
        self.0.read().await.transport_tx.subscribe()
    }

    pub async fn get_transport_tx(&self) -> broadcast::Sender<TransportEvent> {
        self.0.read().await.transport_tx.clone()
    }

    pub async fn subscribe_updates(&self) -> broadcast::Receiver<CharacteristicUpdate> {
        self.0.read().await.updates_tx.subscribe()
    }

    pub async fn get_updates_tx(&self) -> broadcast::Sender<CharacteristicUpdate> {
        self.0.read().await.updates_tx.clone()
    }

    pub async fn register_accessory(&self, handle: AccessoryHandle) {
        let mut data = self.0.write().await;
        let name = handle.name().to_owned();
        info!(accessory = %name, "registered accessory");
        data.accessories.insert(name, handle);
    }

    pub async fn unregister_accessory(&self, name: &str) {
        let mut data = self.0.write().await;
        if data.accessories.remove(name).is_some() {
            info!(accessory = %name, "unregistered accessory");
        }
    }

    pub async fn get_accessory(&self, name: &str) -> Option<AccessoryHandle> {
        self.0.read().await.accessories.get(name).cloned()
    }

    /// Handles of the running accessories, sorted by name
    pub async fn accessories(&self) -> Vec<AccessoryHandle> {
        self.0.read().await.accessories.values().cloned().collect()
    }

    pub async fn read_config<T>(&self, f: impl FnOnce(&Config) -> T) -> T {
        let data = self.0.read().await;
        f(&data.config)
    }

    /// Forward the transport event stream to every accessory, until the stream ends
    ///
    /// Each accessory receives every event and filters it by its own target.
    #[instrument(skip(self, events))]
    pub async fn dispatch(&self, mut events: BoxStream<'static, TransportEvent>) {
        let tx = self.get_transport_tx().await;

        while let Some(event) = events.next().await {
            trace!(event = ?event, "transport event");

            // ok: no accessory may be running
            tx.send(event).ok();
        }

        debug!("transport event stream ended");
    }
}

pub struct GlobalData {
    transport_tx: broadcast::Sender<TransportEvent>,
    updates_tx: broadcast::Sender<CharacteristicUpdate>,
    accessories: BTreeMap<String, AccessoryHandle>,
    config: Config,
}

impl GlobalData {
    pub fn new(config: &Config) -> Self {
        let (transport_tx, _) = broadcast::channel(64);
        let (updates_tx, _) = broadcast::channel(64);

        Self {
            transport_tx,
            updates_tx,
            accessories: Default::default(),
            config: config.clone(),
        }
    }

    pub fn wrap(self) -> Global {
        Global(Arc::new(RwLock::new(self)))
    }
}
