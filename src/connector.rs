//! Device connector.
//!
//! Drives [`ConnectorState`] from btleplug adapter events and executes the
//! commands it emits. Platform errors at any discovery step are logged and
//! the connector stays where it is; there is no retry and no automatic
//! reconnect. Progress resumes only when the platform reports something new,
//! such as the adapter being powered on again.

use btleplug::api::{
    CentralEvent, CentralState, Characteristic, Peripheral as _, ValueNotification,
};
use btleplug::platform::{Peripheral, PeripheralId};
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::characteristics::{self, NotificationStream};
use crate::ble::connection::{ConnectionState, ConnectorCommand, ConnectorEvent, ConnectorState};
use crate::ble::scanner::BleScanner;
use crate::config::SensorConfig;
use crate::error::Result;

type Event = ConnectorEvent<Peripheral, Characteristic>;
type Command = ConnectorCommand<Peripheral, Characteristic>;
type State = ConnectorState<Peripheral, Characteristic>;

/// Connects to the sensor and forwards its notifications.
pub struct DeviceConnector {
    /// BLE scanner.
    scanner: BleScanner,
    /// Service the sensor advertises.
    service_uuid: Uuid,
    /// Characteristic carrying readings.
    characteristic_uuid: Uuid,
    /// Current connection state.
    state: Arc<RwLock<ConnectionState>>,
    /// Channel for connection state changes.
    state_tx: broadcast::Sender<ConnectionState>,
}

impl DeviceConnector {
    /// Create a connector on the first available Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(config: &SensorConfig) -> Result<Self> {
        let scanner = BleScanner::new(config.service_uuid).await?;
        Ok(Self::with_scanner(scanner, config))
    }

    /// Create a connector around an existing scanner.
    pub fn with_scanner(scanner: BleScanner, config: &SensorConfig) -> Self {
        let (state_tx, _) = broadcast::channel(16);

        Self {
            scanner,
            service_uuid: config.service_uuid,
            characteristic_uuid: config.characteristic_uuid,
            state: Arc::new(RwLock::new(ConnectionState::Idle)),
            state_tx,
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Check if connected to the sensor.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Subscribe to connection state changes.
    pub fn subscribe_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Run until `cancel` fires or the adapter event stream ends.
    ///
    /// Each notification payload from the reading characteristic is sent to
    /// `payloads` in arrival order. On exit the scan is stopped and a held
    /// peripheral is disconnected.
    pub async fn run(
        &self,
        payloads: mpsc::UnboundedSender<Bytes>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut events = self.scanner.events().await?;
        let mut machine = State::Idle;
        let mut notifications: Option<NotificationStream> = None;
        // The adapter was usable enough to open; treat it as powered on.
        let mut pending = VecDeque::from([Event::AdapterReady]);

        info!("Device connector started");

        'run: loop {
            while let Some(event) = pending.pop_front() {
                let (next, command) = machine.handle(event);
                machine = next;
                if machine.peripheral().is_none() {
                    notifications = None;
                }
                self.set_state(machine.status());

                let Some(command) = command else {
                    continue;
                };
                let execution = self.execute(command, &mut notifications, &payloads);
                match until_cancelled(&cancel, execution).await {
                    Some(Some(follow_up)) => pending.push_back(follow_up),
                    Some(None) => {}
                    None => {
                        debug!("Device connector cancelled during {}", machine.status());
                        break 'run;
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Device connector cancelled");
                    break;
                }
                event = events.next() => match event {
                    Some(event) => {
                        let translated = until_cancelled(&cancel, self.translate(event, &machine));
                        match translated.await {
                            Some(Some(event)) => pending.push_back(event),
                            Some(None) => {}
                            None => break,
                        }
                    }
                    None => {
                        warn!("Adapter event stream ended");
                        break;
                    }
                },
                notification = next_notification(&mut notifications) => match notification {
                    Some(notification) => {
                        if let Some(event) = self.accept_notification(notification) {
                            pending.push_back(event);
                        }
                    }
                    None => {
                        info!("Notification stream closed");
                        notifications = None;
                        pending.push_back(Event::Disconnected);
                    }
                },
            }
        }

        self.shutdown(machine).await;
        Ok(())
    }

    /// Translate an adapter event into a state machine event.
    async fn translate(&self, event: CentralEvent, machine: &State) -> Option<Event> {
        let held = machine.peripheral().map(|p| p.id());

        match route(AdapterSignal::from(event), machine.status(), held.as_ref()) {
            Routing::Ready => {
                info!("Bluetooth powered on");
                Some(Event::AdapterReady)
            }
            Routing::Unavailable => {
                warn!("Bluetooth not available");
                self.scanner.reset();
                Some(Event::AdapterUnavailable)
            }
            Routing::Resolve(id) => self
                .scanner
                .resolve_sensor(&id)
                .await
                .map(Event::PeripheralFound),
            Routing::Disconnected => {
                info!("Sensor disconnected");
                Some(Event::Disconnected)
            }
            Routing::Ignore => None,
        }
    }

    /// Keep only notifications from the reading characteristic.
    fn accept_notification(&self, notification: ValueNotification) -> Option<Event> {
        if notification.uuid != self.characteristic_uuid {
            trace!("Ignoring notification from {}", notification.uuid);
            return None;
        }

        trace!("Notification received: {} bytes", notification.value.len());
        Some(Event::Notification(Bytes::from(notification.value)))
    }

    /// Carry out a command, returning the event it produced, if any.
    async fn execute(
        &self,
        command: Command,
        notifications: &mut Option<NotificationStream>,
        payloads: &mpsc::UnboundedSender<Bytes>,
    ) -> Option<Event> {
        match command {
            Command::StartScan => scan_follow_up(self.scanner.start_scanning().await),
            Command::Connect(peripheral) => {
                if let Err(e) = self.scanner.stop_scanning().await {
                    warn!("Failed to stop scan: {}", e);
                }

                info!("Connecting to sensor {}", peripheral.id());
                match peripheral.connect().await {
                    Ok(()) => {
                        info!("Connected to sensor {}", peripheral.id());
                        Some(Event::Connected)
                    }
                    Err(e) => {
                        warn!("Connection failed, stalling: {}", e);
                        None
                    }
                }
            }
            Command::DiscoverServices(peripheral) => {
                if let Err(e) = peripheral.discover_services().await {
                    warn!("Failed to discover services, stalling: {}", e);
                    return None;
                }
                if characteristics::has_service(&peripheral, &self.service_uuid) {
                    Some(Event::ServiceFound)
                } else {
                    warn!("Service {} not found, stalling", self.service_uuid);
                    None
                }
            }
            Command::DiscoverCharacteristics(peripheral) => {
                match characteristics::find_characteristic(
                    &peripheral,
                    &self.service_uuid,
                    &self.characteristic_uuid,
                ) {
                    Ok(characteristic) => Some(Event::CharacteristicFound(characteristic)),
                    Err(e) => {
                        warn!("{}, stalling", e);
                        None
                    }
                }
            }
            Command::Subscribe(peripheral, characteristic) => {
                match characteristics::subscribe(&peripheral, &characteristic).await {
                    Ok(stream) => {
                        info!("Subscribed to readings from {}", peripheral.id());
                        *notifications = Some(stream);
                        Some(Event::NotificationsEnabled(characteristic))
                    }
                    Err(e) => {
                        warn!("Failed to enable notifications, stalling: {}", e);
                        None
                    }
                }
            }
            Command::Deliver(payload) => {
                if payloads.send(payload).is_err() {
                    warn!("Payload receiver dropped, discarding notification");
                }
                None
            }
            Command::Release(peripheral) => {
                *notifications = None;
                release(&peripheral).await;
                None
            }
        }
    }

    /// Stop scanning and drop the peripheral on exit.
    async fn shutdown(&self, machine: State) {
        if let Err(e) = self.scanner.stop_scanning().await {
            debug!("Failed to stop scan on shutdown: {}", e);
        }
        if let Some(peripheral) = machine.peripheral() {
            release(peripheral).await;
        }
        self.set_state(ConnectionState::Idle);
        info!("Device connector stopped");
    }

    /// Update the connection state and emit an event.
    fn set_state(&self, new_state: ConnectionState) {
        let old_state = {
            let mut state = self.state.write();
            let old = *state;
            *state = new_state;
            old
        };

        if old_state != new_state {
            debug!("Connection state changed: {} -> {}", old_state, new_state);
            let _ = self.state_tx.send(new_state);
        }
    }
}

/// Platform-independent view of an adapter event.
#[derive(Debug, Clone, PartialEq)]
enum AdapterSignal<I> {
    PoweredOn,
    PoweredOff,
    /// A peripheral was discovered or re-advertised.
    Seen(I),
    /// A peripheral disconnected.
    Lost(I),
    Other,
}

impl From<CentralEvent> for AdapterSignal<PeripheralId> {
    fn from(event: CentralEvent) -> Self {
        match event {
            CentralEvent::StateUpdate(CentralState::PoweredOn) => Self::PoweredOn,
            CentralEvent::StateUpdate(CentralState::PoweredOff) => Self::PoweredOff,
            CentralEvent::StateUpdate(state) => {
                debug!("Adapter state: {:?}", state);
                Self::Other
            }
            CentralEvent::DeviceDiscovered(id)
            | CentralEvent::DeviceUpdated(id)
            | CentralEvent::ServicesAdvertisement { id, .. } => Self::Seen(id),
            CentralEvent::DeviceDisconnected(id) => Self::Lost(id),
            CentralEvent::DeviceConnected(id) => {
                trace!("Device connected: {:?}", id);
                Self::Other
            }
            CentralEvent::ManufacturerDataAdvertisement { .. }
            | CentralEvent::ServiceDataAdvertisement { .. } => Self::Other,
        }
    }
}

/// What the connector does with an adapter signal.
#[derive(Debug, Clone, PartialEq)]
enum Routing<I> {
    Ready,
    Unavailable,
    /// Check whether the peripheral is the sensor.
    Resolve(I),
    Disconnected,
    Ignore,
}

/// Decide how to handle `signal` given the current state and held peripheral.
///
/// Discoveries only matter while scanning, and only a disconnect of the held
/// peripheral ends the connection.
fn route<I: PartialEq>(
    signal: AdapterSignal<I>,
    status: ConnectionState,
    held: Option<&I>,
) -> Routing<I> {
    match signal {
        AdapterSignal::PoweredOn => Routing::Ready,
        AdapterSignal::PoweredOff => Routing::Unavailable,
        AdapterSignal::Seen(id) if status.is_scanning() => Routing::Resolve(id),
        AdapterSignal::Lost(id) if held == Some(&id) => Routing::Disconnected,
        AdapterSignal::Seen(_) | AdapterSignal::Lost(_) | AdapterSignal::Other => Routing::Ignore,
    }
}

/// Event to feed back after trying to start a scan.
///
/// A scan that cannot start means the adapter is not usable yet; returning
/// to Idle lets the next power-on start over.
fn scan_follow_up<P, C>(started: Result<()>) -> Option<ConnectorEvent<P, C>> {
    match started {
        Ok(()) => None,
        Err(e) => {
            warn!("Cannot scan, waiting for Bluetooth: {}", e);
            Some(ConnectorEvent::AdapterUnavailable)
        }
    }
}

/// Run `future` to completion unless `cancel` fires first.
async fn until_cancelled<F: Future>(cancel: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = future => Some(output),
    }
}

/// Disconnect a peripheral, ignoring failures.
async fn release(peripheral: &Peripheral) {
    match peripheral.disconnect().await {
        Ok(()) => info!("Disconnected from sensor {}", peripheral.id()),
        Err(e) => debug!("Disconnect of {} failed: {}", peripheral.id(), e),
    }
}

/// Next notification, or never when not subscribed.
async fn next_notification(stream: &mut Option<NotificationStream>) -> Option<ValueNotification> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn test_route_power_changes() {
        let held = Some(&1);
        assert_eq!(
            route(AdapterSignal::PoweredOn, ConnectionState::Idle, None),
            Routing::<u8>::Ready
        );
        assert_eq!(
            route(AdapterSignal::PoweredOff, ConnectionState::Subscribed, held),
            Routing::Unavailable
        );
        assert_eq!(
            route(AdapterSignal::Other, ConnectionState::Scanning, None),
            Routing::<u8>::Ignore
        );
    }

    #[test]
    fn test_route_discovery_only_while_scanning() {
        assert_eq!(
            route(AdapterSignal::Seen(4), ConnectionState::Scanning, None),
            Routing::Resolve(4)
        );
        for status in [
            ConnectionState::Idle,
            ConnectionState::Connecting,
            ConnectionState::DiscoveringServices,
            ConnectionState::Subscribed,
        ] {
            assert_eq!(route(AdapterSignal::Seen(4), status, Some(&4)), Routing::Ignore);
        }
    }

    #[test]
    fn test_route_ignores_other_peripheral_disconnect() {
        assert_eq!(
            route(AdapterSignal::Lost(2), ConnectionState::Subscribed, Some(&1)),
            Routing::Ignore
        );
        assert_eq!(
            route(AdapterSignal::Lost(2), ConnectionState::Scanning, None),
            Routing::Ignore
        );
        assert_eq!(
            route(AdapterSignal::Lost(1), ConnectionState::Subscribed, Some(&1)),
            Routing::Disconnected
        );
    }

    #[test]
    fn test_failed_scan_returns_to_idle_until_power_on() {
        let started = Err(Error::BluetoothUnavailable);
        let follow_up = scan_follow_up::<&str, u8>(started);
        assert!(matches!(follow_up, Some(ConnectorEvent::AdapterUnavailable)));
        assert!(scan_follow_up::<&str, u8>(Ok(())).is_none());

        let idle = ConnectorState::<&str, u8>::Idle;
        let (state, command) = idle.handle(ConnectorEvent::AdapterReady);
        assert_eq!(command, Some(ConnectorCommand::StartScan));
        let (state, command) = state.handle(ConnectorEvent::AdapterUnavailable);
        assert_eq!(state, ConnectorState::Idle);
        assert_eq!(command, None);

        let (state, command) = state.handle(ConnectorEvent::AdapterReady);
        assert_eq!(state, ConnectorState::Scanning);
        assert_eq!(command, Some(ConnectorCommand::StartScan));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_command_in_flight() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        // A connect that never completes.
        let stuck = std::future::pending::<Option<u8>>();
        let outcome = tokio::time::timeout(Duration::from_secs(5), until_cancelled(&cancel, stuck))
            .await
            .expect("cancellation not observed");

        assert_eq!(outcome, None);
    }

    #[tokio::test]
    async fn test_completed_command_passes_through() {
        let cancel = CancellationToken::new();
        let outcome = until_cancelled(&cancel, async { Some(3) }).await;
        assert_eq!(outcome, Some(Some(3)));
    }

    #[tokio::test]
    async fn test_already_cancelled_skips_command() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = until_cancelled(&cancel, async { 3 }).await;
        assert_eq!(outcome, None);
    }
}
