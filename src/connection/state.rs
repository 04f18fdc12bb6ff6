//! Connection lifecycle states and their transition table.

/// Where the driver is in the connection lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No link and no resources held.
    #[default]
    Disconnected,
    /// Waiting for the BLE stack to open the link.
    Connecting,
    /// Locating the vendor service and characteristics.
    ServiceDiscovery,
    /// Sending the trigger command and enabling notifications.
    Subscribing,
    /// Receiving status frames.
    Ready,
}

/// What happened, as far as the state machine is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Input {
    /// Device available, or a scheduled retry fired.
    Start,
    /// The link opened.
    Connected,
    /// Service discovery located the characteristics.
    Discovered,
    /// Notifications are enabled.
    Subscribed,
    /// A notification arrived.
    Notification,
    /// An operation failed.
    Failed,
    /// The link dropped.
    LinkLost,
    /// Teardown was requested.
    Stop,
}

impl ConnectionState {
    /// Returns the state after `input`.
    ///
    /// Failure, link loss and stop lead to `Disconnected` from anywhere;
    /// inputs that make no sense in the current state leave it unchanged.
    #[must_use]
    pub const fn on(self, input: Input) -> Self {
        match (self, input) {
            (_, Input::Failed | Input::LinkLost | Input::Stop) => Self::Disconnected,
            (Self::Disconnected, Input::Start) => Self::Connecting,
            (Self::Connecting, Input::Connected) => Self::ServiceDiscovery,
            (Self::ServiceDiscovery, Input::Discovered) => Self::Subscribing,
            (Self::Subscribing, Input::Subscribed) => Self::Ready,
            (state, _) => state,
        }
    }

    /// Short name used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::ServiceDiscovery => "service_discovery",
            Self::Subscribing => "subscribing",
            Self::Ready => "ready",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
