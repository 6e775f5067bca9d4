//! Connection to one Bluetooth LE light strip
//!
//! [Connection] drives the scan, connect and discovery pipeline for its target peripheral and
//! owns the writer task of the established link. The pipeline has no task of its own: the
//! accessory loop feeds it transport events, pipeline step results and rescan ticks.

use std::sync::Arc;

use futures::future::BoxFuture;
use parse_display::Display;
use tokio::sync::watch;
use uuid::Uuid;

use crate::{
    color::{Color, DeviceColor},
    models::{AccessoryConfig, TransportConfig},
};

mod listeners;
pub use listeners::Listeners;

mod transport;
pub use transport::*;

// Transport implementations

#[cfg(feature = "bluetooth")]
mod btle;
mod dummy;
pub use dummy::{DummyTransport, DUMMY_CHARACTERISTIC};

/// Command byte of the set color message
pub const SET_COLOR_OPCODE: u8 = 0x01;

/// Encode a set color message: opcode followed by the red, green and blue channels
pub fn encode_color(color: DeviceColor) -> [u8; 4] {
    let (red, green, blue) = color.into_components();
    [SET_COLOR_OPCODE, red, green, blue]
}

pub async fn build_transport(
    config: &TransportConfig,
) -> Result<Arc<dyn Transport>, TransportError> {
    match config {
        TransportConfig::Dummy(dummy) => Ok(Arc::new(DummyTransport::new(dummy.clone()))),
        #[cfg(feature = "bluetooth")]
        TransportConfig::Bluetooth => Ok(Arc::new(btle::BtleTransport::new().await?)),
        #[cfg(not(feature = "bluetooth"))]
        TransportConfig::Bluetooth => Err(TransportError::NotSupported("bluetooth")),
    }
}

/// Peripheral an accessory connects to
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub service: Uuid,
    pub address: Option<String>,
}

impl Target {
    pub fn new(service: Uuid) -> Self {
        Self {
            service,
            address: None,
        }
    }

    pub fn matches(&self, info: &PeripheralInfo) -> bool {
        if !info.services.contains(&self.service) {
            return false;
        }

        match (&self.address, &info.address) {
            (Some(expected), Some(address)) => expected.eq_ignore_ascii_case(address),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

impl From<&AccessoryConfig> for Target {
    fn from(config: &AccessoryConfig) -> Self {
        Self {
            service: config.service_id,
            address: config.address.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(style = "snake_case")]
pub enum PipelineStage {
    ConnectingPeripheral,
    DiscoveringService,
    DiscoveringCharacteristic,
}

#[derive(Debug, Clone, PartialEq, Display)]
pub enum LinkState {
    /// Radio is not powered on
    #[display("idle")]
    Idle,
    #[display("scanning")]
    Scanning,
    #[display("{stage} {peripheral}")]
    Connecting {
        peripheral: PeripheralId,
        stage: PipelineStage,
    },
    #[display("connected to {peripheral}")]
    Connected { peripheral: PeripheralId },
}

impl LinkState {
    pub fn peripheral(&self) -> Option<&PeripheralId> {
        match self {
            Self::Connecting { peripheral, .. } | Self::Connected { peripheral } => {
                Some(peripheral)
            }
            _ => None,
        }
    }
}

#[derive(Debug)]
enum Step {
    Connect,
    DiscoverService,
    DiscoverCharacteristic(ServiceHandle),
}

impl Step {
    fn stage(&self) -> PipelineStage {
        match self {
            Self::Connect => PipelineStage::ConnectingPeripheral,
            Self::DiscoverService => PipelineStage::DiscoveringService,
            Self::DiscoverCharacteristic(_) => PipelineStage::DiscoveringCharacteristic,
        }
    }
}

#[derive(Debug)]
enum StepResult {
    Connected,
    Service(ServiceHandle),
    Characteristic(CharacteristicHandle),
    NotFound,
    Failed(TransportError),
}

/// Result of one pipeline step, tagged with the attempt it belongs to
#[derive(Debug)]
pub struct StepOutcome {
    attempt: u64,
    peripheral: PeripheralId,
    stage: PipelineStage,
    result: StepResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// No characteristic available, nothing was sent
    Dropped,
    /// The write was handed to the transport
    Issued,
}

pub struct Connection {
    name: String,
    target: Target,
    transport: Arc<dyn Transport>,
    powered: bool,
    connected: bool,
    color: Color,
    /// Latest message for the writer task of the current link
    writer: Option<watch::Sender<Vec<u8>>>,
    state: LinkState,
    attempt: u64,
    pending: Option<BoxFuture<'static, StepOutcome>>,
    on_connect: Listeners,
    on_disconnect: Listeners,
}

impl Connection {
    pub fn new(name: &str, target: Target, transport: Arc<dyn Transport>) -> Self {
        Self {
            name: name.to_owned(),
            target,
            transport,
            powered: false,
            connected: false,
            color: Color::BLACK,
            writer: None,
            state: LinkState::Idle,
            attempt: 0,
            pending: None,
            on_connect: Listeners::default(),
            on_disconnect: Listeners::default(),
        }
    }

    pub fn state(&self) -> &LinkState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Last color accepted by [Connection::set_color], transmitted or not
    pub fn color(&self) -> Color {
        self.color
    }

    pub fn on_connect(&mut self, handler: impl FnMut() + Send + 'static) {
        self.on_connect.add(handler);
    }

    pub fn on_disconnect(&mut self, handler: impl FnMut() + Send + 'static) {
        self.on_disconnect.add(handler);
    }

    /// Update the connected flag, notifying listeners on transitions only
    fn set_connected(&mut self, connected: bool) {
        if std::mem::replace(&mut self.connected, connected) == connected {
            return;
        }

        if connected {
            info!(accessory = %self.name, "connected");
            self.on_connect.fire();
        } else {
            info!(accessory = %self.name, "disconnected");
            self.on_disconnect.fire();
        }
    }

    async fn start_scan(&mut self) {
        debug!(accessory = %self.name, service = %self.target.service, "starting scan");

        if let Err(error) = self
            .transport
            .start_scan(&[self.target.service], false)
            .await
        {
            warn!(accessory = %self.name, error = %error, "could not start scanning");
        }
    }

    async fn stop_scan(&mut self) {
        debug!(accessory = %self.name, "stopping scan");

        if let Err(error) = self.transport.stop_scan().await {
            warn!(accessory = %self.name, error = %error, "could not stop scanning");
        }
    }

    /// Forget any pending pipeline step. Results of the abandoned attempt are ignored.
    fn abandon_pipeline(&mut self) {
        self.attempt += 1;
        self.pending = None;
    }

    fn drop_link(&mut self) {
        self.abandon_pipeline();
        self.writer = None;
        self.state = if self.powered {
            LinkState::Scanning
        } else {
            LinkState::Idle
        };
        self.set_connected(false);
    }

    fn schedule(&mut self, peripheral: PeripheralId, step: Step) {
        let transport = self.transport.clone();
        let attempt = self.attempt;
        let service = self.target.service;
        let stage = step.stage();

        self.state = LinkState::Connecting {
            peripheral: peripheral.clone(),
            stage,
        };

        self.pending = Some(Box::pin(async move {
            let result = match step {
                Step::Connect => match transport.connect(&peripheral).await {
                    Ok(()) => StepResult::Connected,
                    Err(error) => StepResult::Failed(error),
                },
                Step::DiscoverService => {
                    match transport.discover_service(&peripheral, service).await {
                        Ok(Some(handle)) => StepResult::Service(handle),
                        Ok(None) => StepResult::NotFound,
                        Err(error) => StepResult::Failed(error),
                    }
                }
                Step::DiscoverCharacteristic(handle) => {
                    match transport.discover_characteristic(&handle).await {
                        Ok(Some(handle)) => StepResult::Characteristic(handle),
                        Ok(None) => StepResult::NotFound,
                        Err(error) => StepResult::Failed(error),
                    }
                }
            };

            StepOutcome {
                attempt,
                peripheral,
                stage,
                result,
            }
        }));
    }

    /// Handle an event from the shared transport stream
    pub async fn handle_event(&mut self, event: &TransportEvent) {
        match event {
            TransportEvent::PoweredOn => {
                if !self.powered {
                    debug!(accessory = %self.name, "radio powered on");
                }

                self.powered = true;
                if self.state == LinkState::Idle {
                    self.state = LinkState::Scanning;
                }

                if !self.connected {
                    self.start_scan().await;
                }
            }
            TransportEvent::PoweredOff => {
                debug!(accessory = %self.name, "radio powered off");

                self.powered = false;
                self.drop_link();
            }
            TransportEvent::Discovered(info) => {
                if !self.target.matches(info) {
                    trace!(accessory = %self.name, peripheral = %info.id, "ignoring peripheral");
                } else if self.connected {
                    trace!(accessory = %self.name, peripheral = %info.id, "already connected");
                } else if self.pending.is_some() && self.state.peripheral() == Some(&info.id) {
                    trace!(accessory = %self.name, peripheral = %info.id, "pipeline already running");
                } else {
                    info!(accessory = %self.name, peripheral = %info.id, "discovered peripheral");

                    // A new discovery supersedes a stalled attempt
                    self.abandon_pipeline();
                    self.schedule(info.id.clone(), Step::Connect);
                }
            }
            TransportEvent::Connected(peripheral) => {
                trace!(accessory = %self.name, peripheral = %peripheral, "link established");
            }
            TransportEvent::Disconnected(peripheral) => {
                if self.state.peripheral() == Some(peripheral) {
                    info!(accessory = %self.name, peripheral = %peripheral, "peripheral disconnected");

                    self.drop_link();
                    if self.powered {
                        self.start_scan().await;
                    }
                }
            }
        }
    }

    /// Wait for the pending pipeline step to complete
    ///
    /// Never completes if no step is pending. Cancel safe: dropping the returned future keeps
    /// the step pending.
    pub async fn next_step(&mut self) -> StepOutcome {
        let outcome = match self.pending.as_mut() {
            Some(step) => step.await,
            None => futures::future::pending().await,
        };

        self.pending = None;
        outcome
    }

    /// Apply the result of a pipeline step
    pub async fn advance(&mut self, outcome: StepOutcome) {
        let current = match &self.state {
            LinkState::Connecting { peripheral, stage } => Some((peripheral, *stage)),
            _ => None,
        };

        if outcome.attempt != self.attempt
            || current != Some((&outcome.peripheral, outcome.stage))
        {
            debug!(
                accessory = %self.name,
                peripheral = %outcome.peripheral,
                stage = %outcome.stage,
                "discarding stale pipeline result"
            );
            return;
        }

        match outcome.result {
            StepResult::Connected => {
                debug!(accessory = %self.name, peripheral = %outcome.peripheral, "discovering service");
                self.schedule(outcome.peripheral, Step::DiscoverService);
            }
            StepResult::Service(handle) => {
                debug!(accessory = %self.name, peripheral = %outcome.peripheral, "discovering characteristic");
                self.schedule(outcome.peripheral, Step::DiscoverCharacteristic(handle));
            }
            StepResult::Characteristic(handle) => {
                debug!(accessory = %self.name, characteristic = %handle.uuid, "characteristic ready");

                self.writer = Some(self.spawn_writer(handle));
                self.state = LinkState::Connected {
                    peripheral: outcome.peripheral,
                };
                self.set_connected(true);
                self.stop_scan().await;
            }
            StepResult::NotFound => {
                warn!(
                    accessory = %self.name,
                    peripheral = %outcome.peripheral,
                    stage = %outcome.stage,
                    "nothing found, waiting for the next scan cycle"
                );
            }
            StepResult::Failed(error) => {
                warn!(
                    accessory = %self.name,
                    peripheral = %outcome.peripheral,
                    stage = %outcome.stage,
                    error = %error,
                    "pipeline step failed, waiting for the next scan cycle"
                );
            }
        }
    }

    /// Check the link against the radio, for when a link loss may have gone unreported
    pub async fn reconcile(&mut self) {
        let peripheral = match &self.state {
            LinkState::Connected { peripheral } => peripheral.clone(),
            _ => return,
        };

        let alive = match self.transport.peripheral_connected(&peripheral).await {
            Ok(alive) => alive,
            Err(error) => {
                debug!(accessory = %self.name, error = %error, "could not query link");
                false
            }
        };

        if !alive {
            warn!(accessory = %self.name, peripheral = %peripheral, "link lost without notice");

            self.drop_link();
            if self.powered {
                self.start_scan().await;
            }
        }
    }

    /// Restart scanning if the radio is on and the peripheral is not connected. A connected
    /// link is checked instead.
    pub async fn rescan(&mut self) {
        if self.connected {
            self.reconcile().await;
        } else if self.powered {
            trace!(accessory = %self.name, state = %self.state, "restarting scan");

            self.stop_scan().await;
            self.start_scan().await;
        }
    }

    /// Start the task writing to `characteristic`. It only ever sends the latest message and
    /// stops once the returned sender is dropped.
    fn spawn_writer(&self, characteristic: CharacteristicHandle) -> watch::Sender<Vec<u8>> {
        let (tx, mut rx) = watch::channel(Vec::new());
        let transport = self.transport.clone();
        let name = self.name.clone();

        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let data = rx.borrow_and_update().clone();

                if let Err(error) = transport.write(&characteristic, &data, true).await {
                    error!(accessory = %name, error = %error, "could not write to device");
                }
            }

            trace!(accessory = %name, "writer stopped");
        });

        tx
    }

    /// Send raw bytes to the peripheral, without waiting for completion
    ///
    /// Dropped silently if no characteristic is available. A message still waiting for the
    /// transport is replaced. Transport failures are logged.
    pub fn write(&self, data: Vec<u8>) -> WriteOutcome {
        match &self.writer {
            Some(writer) if writer.send(data).is_ok() => WriteOutcome::Issued,
            _ => {
                trace!(accessory = %self.name, "not connected, dropping write");
                WriteOutcome::Dropped
            }
        }
    }

    pub fn set_color(&mut self, color: Color) -> WriteOutcome {
        self.color = color;
        self.write(encode_color(color.to_device()).to_vec())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("state", &self.state)
            .finish()
    }
}
