use std::sync::Arc;

use serde_derive::Serialize;
use thiserror::Error;
use tokio::{
    select,
    sync::{broadcast, mpsc, oneshot, Notify},
    time::{self, Instant, MissedTickBehavior},
};
use uuid::Uuid;

use crate::{
    color::{Color, Correction},
    composer::LightComposer,
    device::{Connection, Target, Transport, TransportEvent},
    global::Global,
    models::{AccessoryConfig, Timing},
    solar::Daylight,
};

pub mod characteristic;
pub use characteristic::{
    CharacteristicError, CharacteristicKind, CharacteristicUpdate, ServiceKind, Value,
};

#[derive(Debug, Error)]
pub enum AccessoryError {
    #[error("transport event stream closed")]
    TransportClosed,
}

/// Snapshot of an accessory, as reported by [AccessoryHandle::status]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessoryStatus {
    pub name: String,
    pub service_id: Uuid,
    pub connected: bool,
    pub link: String,
    /// Last color handed to the connection
    pub color: Color,
}

/// One light strip: owns the layer state and the device connection
pub struct Accessory {
    config: Arc<AccessoryConfig>,
    timing: Timing,
    composer: LightComposer,
    connection: Connection,
    handle_rx: mpsc::Receiver<AccessoryMessage>,
    events_rx: broadcast::Receiver<TransportEvent>,
    updates_tx: broadcast::Sender<CharacteristicUpdate>,
    refresh: Arc<Notify>,
}

impl Accessory {
    pub async fn new(
        global: Global,
        config: AccessoryConfig,
        transport: Arc<dyn Transport>,
        daylight: Box<dyn Daylight>,
    ) -> (Self, AccessoryHandle) {
        let timing = global.read_config(|config| config.timing.clone()).await;
        let events_rx = global.subscribe_transport().await;
        let updates_tx = global.get_updates_tx().await;

        let composer = LightComposer::new(
            config.rainbow_cycle(),
            Correction::from(&config.correction),
            daylight,
        );

        let mut connection = Connection::new(&config.name, Target::from(&config), transport);

        // Send the current composite as soon as the link is up
        let refresh = Arc::new(Notify::new());
        connection.on_connect({
            let refresh = refresh.clone();
            move || refresh.notify_one()
        });

        let (tx, handle_rx) = mpsc::channel(4);
        let handle = AccessoryHandle {
            name: config.name.clone(),
            tx,
        };

        (
            Self {
                config: Arc::new(config),
                timing,
                composer,
                connection,
                handle_rx,
                events_rx,
                updates_tx,
                refresh,
            },
            handle,
        )
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    fn notify(&self, service: ServiceKind, characteristic: CharacteristicKind) {
        let value = characteristic::get(&self.composer, service, characteristic);

        // ok: nobody may be subscribed
        self.updates_tx
            .send(CharacteristicUpdate {
                accessory: self.config.name.clone(),
                service,
                characteristic,
                value,
            })
            .ok();
    }

    /// Mirror the animated characteristics to observers
    fn sync_ui(&self) {
        for (service, characteristic) in characteristic::animated(&self.composer) {
            self.notify(service, characteristic);
        }
    }

    fn push_color(&mut self) {
        let color = self.composer.render();
        self.connection.set_color(color);
    }

    fn status(&self) -> AccessoryStatus {
        AccessoryStatus {
            name: self.config.name.clone(),
            service_id: self.config.service_id,
            connected: self.connection.is_connected(),
            link: self.connection.state().to_string(),
            color: self.connection.color(),
        }
    }

    fn handle_message(&mut self, message: AccessoryMessage) -> AccessoryControl {
        // ok: the accessory shouldn't care if the receiver dropped

        match message {
            AccessoryMessage::Get {
                service,
                characteristic,
                tx,
            } => {
                tx.send(characteristic::get(&self.composer, service, characteristic))
                    .ok();
            }
            AccessoryMessage::Set {
                service,
                characteristic,
                value,
                tx,
            } => {
                let result = characteristic::set(&mut self.composer, service, characteristic, value)
                    .map(|changed| {
                        debug!(
                            service = %service,
                            characteristic = %characteristic,
                            value = ?value,
                            "characteristic set"
                        );

                        for (service, characteristic) in changed {
                            self.notify(service, characteristic);
                        }
                    })
                    .map_err(|error| {
                        warn!(
                            service = %service,
                            characteristic = %characteristic,
                            error = %error,
                            "rejected characteristic write"
                        );

                        error
                    });

                tx.send(result).ok();
            }
            AccessoryMessage::Status(tx) => {
                tx.send(self.status()).ok();
            }
            AccessoryMessage::Stop(tx) => {
                tx.send(()).ok();
                return AccessoryControl::Break;
            }
        }

        AccessoryControl::Continue
    }

    #[instrument]
    pub async fn run(mut self) -> Result<(), AccessoryError> {
        info!("starting accessory");

        let mut rescan = time::interval(self.timing.rescan_interval());
        let mut animation = time::interval(self.timing.update_interval());
        let mut ui_sync = time::interval(self.timing.ui_sync_interval());

        for interval in [&mut rescan, &mut animation, &mut ui_sync] {
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        }

        let mut last_tick = Instant::now();

        loop {
            select! {
                message = self.handle_rx.recv() => {
                    trace!(message = ?message, "handle_rx msg");

                    match message {
                        Some(message) => {
                            if AccessoryControl::Break == self.handle_message(message) {
                                break Ok(());
                            }
                        }
                        // All handles dropped, the accessory was unregistered
                        None => break Ok(()),
                    }
                },
                event = self.events_rx.recv() => {
                    match event {
                        Ok(event) => {
                            self.connection.handle_event(&event).await;
                        },
                        Err(broadcast::error::RecvError::Closed) => {
                            break Err(AccessoryError::TransportClosed);
                        },
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped = %skipped, "skipped transport events");

                            // A link loss may be among them
                            self.connection.reconcile().await;
                        },
                    }
                },
                outcome = self.connection.next_step() => {
                    self.connection.advance(outcome).await;
                },
                _ = rescan.tick() => {
                    self.connection.rescan().await;
                },
                now = animation.tick() => {
                    self.composer.tick(now - last_tick);
                    last_tick = now;

                    self.push_color();
                },
                _ = ui_sync.tick() => {
                    self.sync_ui();
                },
                _ = self.refresh.notified() => {
                    debug!("writing current color after connection");
                    self.push_color();
                },
            }
        }
    }
}

impl std::fmt::Debug for Accessory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accessory")
            .field("name", &self.name())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum AccessoryControl {
    Continue,
    Break,
}

#[derive(Debug)]
enum AccessoryMessage {
    Get {
        service: ServiceKind,
        characteristic: CharacteristicKind,
        tx: oneshot::Sender<Value>,
    },
    Set {
        service: ServiceKind,
        characteristic: CharacteristicKind,
        value: Value,
        tx: oneshot::Sender<Result<(), CharacteristicError>>,
    },
    Status(oneshot::Sender<AccessoryStatus>),
    Stop(oneshot::Sender<()>),
}

#[derive(Debug, Clone)]
pub struct AccessoryHandle {
    name: String,
    tx: mpsc::Sender<AccessoryMessage>,
}

#[derive(Debug, Error)]
pub enum AccessoryHandleError {
    #[error("the corresponding accessory is no longer running")]
    Dropped,
    #[error(transparent)]
    Characteristic(#[from] CharacteristicError),
}

impl<T> From<mpsc::error::SendError<T>> for AccessoryHandleError {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        Self::Dropped
    }
}

impl From<oneshot::error::RecvError> for AccessoryHandleError {
    fn from(_: oneshot::error::RecvError) -> Self {
        Self::Dropped
    }
}

impl AccessoryHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn get(
        &self,
        service: ServiceKind,
        characteristic: CharacteristicKind,
    ) -> Result<Value, AccessoryHandleError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(AccessoryMessage::Get {
                service,
                characteristic,
                tx,
            })
            .await?;
        Ok(rx.await?)
    }

    /// Update a characteristic. Returns once the layer state changed, the device is updated on
    /// the next animation tick.
    pub async fn set(
        &self,
        service: ServiceKind,
        characteristic: CharacteristicKind,
        value: Value,
    ) -> Result<(), AccessoryHandleError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(AccessoryMessage::Set {
                service,
                characteristic,
                value,
                tx,
            })
            .await?;
        Ok(rx.await??)
    }

    pub async fn status(&self) -> Result<AccessoryStatus, AccessoryHandleError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(AccessoryMessage::Status(tx)).await?;
        Ok(rx.await?)
    }

    pub async fn stop(&self) -> Result<(), AccessoryHandleError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(AccessoryMessage::Stop(tx)).await?;
        Ok(rx.await?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        device::{DummyTransport, PeripheralId, SET_COLOR_OPCODE},
        global::GlobalData,
        models::{self, Config, Location},
    };

    const SERVICE: Uuid = Uuid::from_u128(0x0000ffd5_0000_1000_8000_00805f9b34fb);

    struct Noon;

    impl Daylight for Noon {
        fn color(&self) -> Color {
            Color::new(255., 0., 0.)
        }
    }

    struct Fixture {
        global: Global,
        transport: Arc<DummyTransport>,
        handle: AccessoryHandle,
    }

    impl Fixture {
        async fn new() -> Self {
            Self::with_rescan_interval(200).await
        }

        async fn with_rescan_interval(rescan_interval_ms: u64) -> Self {
            let config = Config {
                location: Location {
                    longitude: 4.35,
                    latitude: 50.85,
                },
                timing: Timing {
                    update_interval_ms: 10,
                    ui_sync_interval_ms: 20,
                    rescan_interval_ms,
                },
                transport: Default::default(),
                json_server: Default::default(),
                accessories: vec![AccessoryConfig::new("strip", SERVICE)],
            };

            let global = GlobalData::new(&config).wrap();
            let transport = Arc::new(DummyTransport::new(models::DummyTransport::default()));

            let (accessory, handle) = Accessory::new(
                global.clone(),
                config.accessories[0].clone(),
                transport.clone(),
                Box::new(Noon),
            )
            .await;
            global.register_accessory(handle.clone()).await;

            let events = transport.events().await.expect("no event stream");
            tokio::spawn({
                let global = global.clone();
                async move { global.dispatch(events).await }
            });
            tokio::spawn(accessory.run());

            Self {
                global,
                transport,
                handle,
            }
        }

        fn last_write(&self) -> Option<Vec<u8>> {
            self.transport.writes().last().map(|(_, data)| data.clone())
        }

        async fn wait_connected(&self) {
            for _ in 0..200 {
                if self.handle.status().await.unwrap().connected {
                    return;
                }

                time::sleep(Duration::from_millis(10)).await;
            }

            panic!("accessory did not connect");
        }

        /// Poll `condition` until it holds, failing after two seconds
        async fn wait_for(&self, condition: impl Fn(&Self) -> bool) {
            for _ in 0..200 {
                if condition(self) {
                    return;
                }

                time::sleep(Duration::from_millis(10)).await;
            }

            panic!("condition not reached");
        }
    }

    fn peripheral() -> PeripheralId {
        DummyTransport::peripheral_id(SERVICE)
    }

    #[tokio::test]
    async fn test_connects_and_writes_composite() {
        let fixture = Fixture::new().await;

        fixture.wait_connected().await;
        fixture
            .wait_for(|f| f.last_write() == Some(vec![SET_COLOR_OPCODE, 0, 0, 0]))
            .await;

        let main = ServiceKind::Main;
        fixture
            .handle
            .set(main, CharacteristicKind::On, true.into())
            .await
            .unwrap();
        fixture
            .handle
            .set(main, CharacteristicKind::Saturation, 100.0.into())
            .await
            .unwrap();
        fixture
            .handle
            .set(main, CharacteristicKind::Hue, 0.0.into())
            .await
            .unwrap();
        fixture
            .handle
            .set(main, CharacteristicKind::Brightness, 50.0.into())
            .await
            .unwrap();

        fixture
            .wait_for(|f| f.last_write() == Some(vec![SET_COLOR_OPCODE, 128, 0, 0]))
            .await;

        let status = fixture.handle.status().await.unwrap();
        assert_eq!(status.name, "strip");
        assert_eq!(status.color.to_device(), crate::color::DeviceColor::new(128, 0, 0));
    }

    #[tokio::test]
    async fn test_set_broadcasts_update() {
        let fixture = Fixture::new().await;
        let mut updates = fixture.global.subscribe_updates().await;

        fixture
            .handle
            .set(
                ServiceKind::Circadian,
                CharacteristicKind::Brightness,
                30.0.into(),
            )
            .await
            .unwrap();

        assert_eq!(
            updates.recv().await.unwrap(),
            CharacteristicUpdate {
                accessory: "strip".to_owned(),
                service: ServiceKind::Circadian,
                characteristic: CharacteristicKind::Brightness,
                value: Value::Number(30.),
            }
        );

        assert_eq!(
            fixture
                .handle
                .get(ServiceKind::Circadian, CharacteristicKind::Brightness)
                .await
                .unwrap(),
            Value::Number(30.)
        );
    }

    #[tokio::test]
    async fn test_rejected_set() {
        let fixture = Fixture::new().await;

        assert!(matches!(
            fixture
                .handle
                .set(ServiceKind::Circadian, CharacteristicKind::Hue, 10.0.into())
                .await,
            Err(AccessoryHandleError::Characteristic(
                CharacteristicError::ReadOnly { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn test_reconnects_after_link_loss() {
        let fixture = Fixture::new().await;
        fixture.wait_connected().await;

        fixture.transport.disconnect(&peripheral());
        assert!(!fixture.transport.is_connected(&peripheral()));

        // The dummy peripheral answers the next scan right away
        fixture
            .wait_for(|f| f.transport.is_connected(&peripheral()))
            .await;
        fixture.wait_connected().await;

        let before = fixture.transport.writes().len();
        fixture
            .wait_for(|f| f.transport.writes().len() > before)
            .await;
    }

    #[tokio::test]
    async fn test_recovers_from_unreported_link_loss() {
        let fixture = Fixture::new().await;
        fixture.wait_connected().await;

        fixture.transport.disconnect_silently(&peripheral());

        fixture
            .wait_for(|f| f.transport.is_connected(&peripheral()))
            .await;
        fixture.wait_connected().await;
    }

    #[tokio::test]
    async fn test_lagging_events_check_the_link() {
        // Long enough that only the lag can trigger the check
        let fixture = Fixture::with_rescan_interval(60_000).await;
        fixture.wait_connected().await;

        let tx = fixture.global.get_transport_tx().await;
        fixture.transport.disconnect_silently(&peripheral());
        for _ in 0..100 {
            tx.send(TransportEvent::Connected(peripheral())).unwrap();
        }

        fixture
            .wait_for(|f| f.transport.is_connected(&peripheral()))
            .await;
        fixture.wait_connected().await;
    }

    #[tokio::test]
    async fn test_main_color_stops_rainbow() {
        let fixture = Fixture::new().await;
        let mut updates = fixture.global.subscribe_updates().await;

        fixture
            .handle
            .set(ServiceKind::Rainbow, CharacteristicKind::On, true.into())
            .await
            .unwrap();
        fixture
            .handle
            .set(ServiceKind::Main, CharacteristicKind::Hue, 200.0.into())
            .await
            .unwrap();

        let rainbow_off = CharacteristicUpdate {
            accessory: "strip".to_owned(),
            service: ServiceKind::Rainbow,
            characteristic: CharacteristicKind::On,
            value: Value::Bool(false),
        };

        loop {
            if updates.recv().await.unwrap() == rainbow_off {
                break;
            }
        }

        assert_eq!(
            fixture
                .handle
                .get(ServiceKind::Rainbow, CharacteristicKind::On)
                .await
                .unwrap(),
            Value::Bool(false)
        );
    }

    #[tokio::test]
    async fn test_animated_characteristics_sync() {
        let fixture = Fixture::new().await;
        let mut updates = fixture.global.subscribe_updates().await;

        fixture
            .handle
            .set(ServiceKind::Rainbow, CharacteristicKind::On, true.into())
            .await
            .unwrap();

        // Skip the update for the set itself
        let mut hues = 0;
        while hues < 2 {
            let update = updates.recv().await.unwrap();
            if update.service == ServiceKind::Rainbow
                && update.characteristic == CharacteristicKind::Hue
            {
                hues += 1;
            }
        }
    }

    #[tokio::test]
    async fn test_stop() {
        let fixture = Fixture::new().await;

        fixture.handle.stop().await.unwrap();
        assert!(matches!(
            fixture.handle.status().await,
            Err(AccessoryHandleError::Dropped)
        ));
    }
}
