//! Connection state machine for the sensor link.
//!
//! [`ConnectorState`] is a plain value: it owns the peripheral and
//! characteristic handles for as long as they are valid and only changes
//! through [`ConnectorState::handle`]. It performs no I/O itself; every
//! transition yields at most one [`ConnectorCommand`] for the driver in
//! [`crate::connector`] to carry out against the platform stack.

use bytes::Bytes;

/// Handle-free view of the connection, suitable for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Waiting for the Bluetooth adapter to become ready.
    #[default]
    Idle,
    /// Scanning for a peripheral advertising the sensor service.
    Scanning,
    /// Connecting to the discovered peripheral.
    Connecting,
    /// Connected, discovering the sensor service.
    DiscoveringServices,
    /// Service found, looking for the reading characteristic.
    DiscoveringCharacteristics,
    /// Notifications enabled, readings are flowing.
    Subscribed,
}

impl ConnectionState {
    /// Check if a BLE connection to the sensor is established.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            Self::DiscoveringServices | Self::DiscoveringCharacteristics | Self::Subscribed
        )
    }

    /// Check if the connector is actively looking for the sensor.
    pub fn is_scanning(&self) -> bool {
        matches!(self, Self::Scanning)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting => write!(f, "Connecting"),
            Self::DiscoveringServices => write!(f, "Discovering services"),
            Self::DiscoveringCharacteristics => write!(f, "Discovering characteristics"),
            Self::Subscribed => write!(f, "Subscribed"),
        }
    }
}

/// Inputs to the state machine, translated from platform callbacks.
#[derive(Debug, Clone)]
pub enum ConnectorEvent<P, C> {
    /// The Bluetooth adapter is powered on and usable.
    AdapterReady,
    /// The Bluetooth adapter was switched off or could not be used.
    AdapterUnavailable,
    /// A peripheral advertising the sensor service was found.
    PeripheralFound(P),
    /// The connection to the held peripheral is established.
    Connected,
    /// The sensor service exists on the held peripheral.
    ServiceFound,
    /// The reading characteristic exists on the sensor service.
    CharacteristicFound(C),
    /// Notifications are enabled on the characteristic.
    NotificationsEnabled(C),
    /// A notification arrived on the reading characteristic.
    Notification(Bytes),
    /// The held peripheral disconnected.
    Disconnected,
}

/// Work the driver has to perform after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectorCommand<P, C> {
    /// Start scanning for the sensor service.
    StartScan,
    /// Stop scanning and connect to the peripheral.
    Connect(P),
    /// Discover the services of the peripheral.
    DiscoverServices(P),
    /// Look up the reading characteristic on the peripheral.
    DiscoverCharacteristics(P),
    /// Enable notifications on the characteristic.
    Subscribe(P, C),
    /// Hand a notification payload to the recorder.
    Deliver(Bytes),
    /// Drop the peripheral, disconnecting it if still connected.
    Release(P),
}

/// The connector's state, owning the handles valid in that state.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectorState<P, C> {
    /// No adapter, nothing held.
    Idle,
    /// Scanning, nothing held yet.
    Scanning,
    /// Connecting to `peripheral`.
    Connecting {
        /// The discovered peripheral.
        peripheral: P,
    },
    /// Discovering services on `peripheral`.
    DiscoveringServices {
        /// The connected peripheral.
        peripheral: P,
    },
    /// Discovering characteristics on `peripheral`.
    DiscoveringCharacteristics {
        /// The connected peripheral.
        peripheral: P,
    },
    /// Receiving notifications from `characteristic`.
    Subscribed {
        /// The connected peripheral.
        peripheral: P,
        /// The notifying reading characteristic.
        characteristic: C,
    },
}

impl<P, C> Default for ConnectorState<P, C> {
    fn default() -> Self {
        Self::Idle
    }
}

impl<P: Clone, C: Clone> ConnectorState<P, C> {
    /// Apply an event, returning the next state and the command to run.
    ///
    /// Events that make no sense in the current state are ignored: the state
    /// is returned unchanged and no command is issued.
    pub fn handle(self, event: ConnectorEvent<P, C>) -> (Self, Option<ConnectorCommand<P, C>>) {
        use ConnectorCommand as Cmd;
        use ConnectorEvent as Ev;

        match (self, event) {
            (Self::Idle, Ev::AdapterReady) => (Self::Scanning, Some(Cmd::StartScan)),

            (state, Ev::AdapterUnavailable) => {
                let command = state.peripheral().cloned().map(Cmd::Release);
                (Self::Idle, command)
            }

            (Self::Scanning, Ev::PeripheralFound(peripheral)) => (
                Self::Connecting {
                    peripheral: peripheral.clone(),
                },
                Some(Cmd::Connect(peripheral)),
            ),

            (Self::Connecting { peripheral }, Ev::Connected) => (
                Self::DiscoveringServices {
                    peripheral: peripheral.clone(),
                },
                Some(Cmd::DiscoverServices(peripheral)),
            ),

            (Self::DiscoveringServices { peripheral }, Ev::ServiceFound) => (
                Self::DiscoveringCharacteristics {
                    peripheral: peripheral.clone(),
                },
                Some(Cmd::DiscoverCharacteristics(peripheral)),
            ),

            // Stays put until the platform confirms the subscription.
            (
                state @ Self::DiscoveringCharacteristics { .. },
                Ev::CharacteristicFound(characteristic),
            ) => {
                let command = state
                    .peripheral()
                    .cloned()
                    .map(|peripheral| Cmd::Subscribe(peripheral, characteristic));
                (state, command)
            }

            (
                Self::DiscoveringCharacteristics { peripheral },
                Ev::NotificationsEnabled(characteristic),
            ) => (
                Self::Subscribed {
                    peripheral,
                    characteristic,
                },
                None,
            ),

            (state @ Self::Subscribed { .. }, Ev::Notification(payload)) => {
                (state, Some(Cmd::Deliver(payload)))
            }

            (state, Ev::Disconnected) if state.peripheral().is_some() => (Self::Idle, None),

            (state, _) => (state, None),
        }
    }

    /// The peripheral held in this state, if any.
    pub fn peripheral(&self) -> Option<&P> {
        match self {
            Self::Idle | Self::Scanning => None,
            Self::Connecting { peripheral }
            | Self::DiscoveringServices { peripheral }
            | Self::DiscoveringCharacteristics { peripheral }
            | Self::Subscribed { peripheral, .. } => Some(peripheral),
        }
    }

    /// The subscribed characteristic, if any.
    pub fn characteristic(&self) -> Option<&C> {
        match self {
            Self::Subscribed { characteristic, .. } => Some(characteristic),
            _ => None,
        }
    }

    /// Project away the handles.
    pub fn status(&self) -> ConnectionState {
        match self {
            Self::Idle => ConnectionState::Idle,
            Self::Scanning => ConnectionState::Scanning,
            Self::Connecting { .. } => ConnectionState::Connecting,
            Self::DiscoveringServices { .. } => ConnectionState::DiscoveringServices,
            Self::DiscoveringCharacteristics { .. } => ConnectionState::DiscoveringCharacteristics,
            Self::Subscribed { .. } => ConnectionState::Subscribed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    type State = ConnectorState<&'static str, u8>;
    type Event = ConnectorEvent<&'static str, u8>;
    type Command = ConnectorCommand<&'static str, u8>;

    /// Run a sequence of events from Idle, collecting the issued commands.
    fn drive(events: Vec<Event>) -> (State, Vec<Command>) {
        let mut state = State::Idle;
        let mut commands = Vec::new();
        for event in events {
            let (next, command) = state.handle(event);
            state = next;
            commands.extend(command);
        }
        (state, commands)
    }

    fn subscribed() -> Vec<Event> {
        vec![
            ConnectorEvent::AdapterReady,
            ConnectorEvent::PeripheralFound("sensor"),
            ConnectorEvent::Connected,
            ConnectorEvent::ServiceFound,
            ConnectorEvent::CharacteristicFound(7),
            ConnectorEvent::NotificationsEnabled(7),
        ]
    }

    #[test]
    fn test_connection_state() {
        assert!(!ConnectionState::Idle.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(ConnectionState::DiscoveringServices.is_connected());
        assert!(ConnectionState::Subscribed.is_connected());

        assert!(ConnectionState::Scanning.is_scanning());
        assert!(!ConnectionState::Subscribed.is_scanning());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Subscribed), "Subscribed");
        assert_eq!(format!("{}", ConnectionState::Idle), "Idle");
    }

    #[test]
    fn test_happy_path_to_subscribed() {
        let (state, commands) = drive(subscribed());

        assert_eq!(
            state,
            State::Subscribed {
                peripheral: "sensor",
                characteristic: 7
            }
        );
        assert_eq!(
            commands,
            vec![
                ConnectorCommand::StartScan,
                ConnectorCommand::Connect("sensor"),
                ConnectorCommand::DiscoverServices("sensor"),
                ConnectorCommand::DiscoverCharacteristics("sensor"),
                ConnectorCommand::Subscribe("sensor", 7),
            ]
        );
        assert_eq!(state.status(), ConnectionState::Subscribed);
        assert_eq!(state.characteristic(), Some(&7));
    }

    #[test]
    fn test_notifications_delivered_in_order() {
        let mut events = subscribed();
        events.push(ConnectorEvent::Notification(Bytes::from_static(b"one")));
        events.push(ConnectorEvent::Notification(Bytes::from_static(b"two")));

        let (state, commands) = drive(events);

        assert_eq!(state.status(), ConnectionState::Subscribed);
        let delivered: Vec<_> = commands
            .into_iter()
            .filter_map(|c| match c {
                ConnectorCommand::Deliver(payload) => Some(payload),
                _ => None,
            })
            .collect();
        assert_eq!(
            delivered,
            vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]
        );
    }

    #[test]
    fn test_unavailable_before_discovery_never_connects() {
        let (state, commands) = drive(vec![
            ConnectorEvent::AdapterUnavailable,
            ConnectorEvent::PeripheralFound("sensor"),
            ConnectorEvent::Notification(Bytes::from_static(b"{}")),
        ]);

        assert_eq!(state, State::Idle);
        assert!(commands.is_empty());
    }

    #[test]
    fn test_unavailable_while_scanning_returns_to_idle() {
        let (state, commands) = drive(vec![
            ConnectorEvent::AdapterReady,
            ConnectorEvent::AdapterUnavailable,
            ConnectorEvent::PeripheralFound("sensor"),
        ]);

        assert_eq!(state, State::Idle);
        assert_eq!(commands, vec![ConnectorCommand::StartScan]);
    }

    #[test]
    fn test_unavailable_releases_held_peripheral() {
        let mut events = subscribed();
        events.push(ConnectorEvent::AdapterUnavailable);

        let (state, commands) = drive(events);

        assert_eq!(state, State::Idle);
        assert_eq!(commands.last(), Some(&ConnectorCommand::Release("sensor")));
    }

    #[test]
    fn test_disconnect_returns_to_idle_without_reconnect() {
        let mut events = subscribed();
        events.push(ConnectorEvent::Disconnected);
        events.push(ConnectorEvent::Notification(Bytes::from_static(b"late")));

        let (state, commands) = drive(events);

        assert_eq!(state, State::Idle);
        assert_eq!(state.peripheral(), None);
        assert!(!commands
            .iter()
            .any(|c| matches!(c, ConnectorCommand::Deliver(_))));
    }

    #[test]
    fn test_adapter_ready_again_rescans() {
        let mut events = subscribed();
        events.push(ConnectorEvent::AdapterUnavailable);
        events.push(ConnectorEvent::AdapterReady);

        let (state, commands) = drive(events);

        assert_eq!(state, State::Scanning);
        assert_eq!(commands.last(), Some(&ConnectorCommand::StartScan));
    }

    #[test]
    fn test_second_peripheral_ignored_while_connecting() {
        let (state, commands) = drive(vec![
            ConnectorEvent::AdapterReady,
            ConnectorEvent::PeripheralFound("first"),
            ConnectorEvent::PeripheralFound("second"),
        ]);

        assert_eq!(state, State::Connecting { peripheral: "first" });
        assert_eq!(commands.len(), 2);
    }

    #[test]
    fn test_out_of_order_events_stall() {
        // Connecting stays put until the platform confirms the connection.
        let (state, commands) = drive(vec![
            ConnectorEvent::AdapterReady,
            ConnectorEvent::PeripheralFound("sensor"),
            ConnectorEvent::ServiceFound,
            ConnectorEvent::CharacteristicFound(1),
        ]);

        assert_eq!(state, State::Connecting { peripheral: "sensor" });
        assert_eq!(commands.len(), 2);
    }

    #[test]
    fn test_failed_subscribe_stays_discovering_characteristics() {
        let mut events = subscribed();
        // No confirmation from the platform.
        events.pop();
        events.push(ConnectorEvent::Notification(Bytes::from_static(b"early")));

        let (state, commands) = drive(events);

        assert_eq!(state, State::DiscoveringCharacteristics { peripheral: "sensor" });
        assert_eq!(state.status(), ConnectionState::DiscoveringCharacteristics);
        assert_eq!(state.characteristic(), None);
        assert_eq!(commands.last(), Some(&ConnectorCommand::Subscribe("sensor", 7)));
    }

    #[test]
    fn test_notifications_enabled_only_after_characteristic_lookup() {
        let (state, commands) = drive(vec![
            ConnectorEvent::AdapterReady,
            ConnectorEvent::PeripheralFound("sensor"),
            ConnectorEvent::Connected,
            ConnectorEvent::NotificationsEnabled(7),
        ]);

        assert_eq!(state, State::DiscoveringServices { peripheral: "sensor" });
        assert_eq!(commands.len(), 3);
    }

    #[test]
    fn test_disconnect_while_scanning_is_ignored() {
        let (state, commands) = drive(vec![
            ConnectorEvent::AdapterReady,
            ConnectorEvent::Disconnected,
        ]);

        assert_eq!(state, State::Scanning);
        assert_eq!(commands, vec![ConnectorCommand::StartScan]);
    }
}
