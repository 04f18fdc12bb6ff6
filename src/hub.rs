//! Main [`Bm6Hub`] implementation.
//!
//! The hub combines the sink registry, the event dispatcher and one
//! connection driver into the object host glue binds against: sensor
//! setters, lifecycle hooks and BLE client callbacks.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::connection::{BackoffConfig, Connection, ConnectionState};
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher, EventFilter, Subscription};
use crate::protocol::{BM6_KEY, GattProfile, ProtocolRevision};
use crate::sink::{BinarySensorSink, SensorSink, SensorSinks};
use crate::transport::{BleLink, LinkEvent};
use crate::types::{DeviceReading, ReadingKind};

/// Default timeout for opening the link.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for discovery, writes and subscription.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Default event broadcast capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Default capacity of the link event queue.
pub const DEFAULT_LINK_CAPACITY: usize = 32;

/// Configuration for a hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Wire revision of the status characteristic.
    pub revision: ProtocolRevision,
    /// AES key for the encrypted revision.
    pub device_key: [u8; 16],
    /// GATT layout to look for during discovery.
    pub profile: GattProfile,
    /// Timeout for opening the link.
    pub connect_timeout: Duration,
    /// Timeout for every other link operation.
    pub operation_timeout: Duration,
    /// Reconnect backoff.
    pub backoff: BackoffConfig,
    /// Event broadcast capacity.
    pub event_capacity: usize,
    /// Capacity of the queue between link and driver.
    pub link_capacity: usize,
}

impl HubConfig {
    /// Creates a configuration for a stock BM6.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            revision: ProtocolRevision::Encrypted,
            device_key: BM6_KEY,
            profile: GattProfile::bm6(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            backoff: BackoffConfig::new(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            link_capacity: DEFAULT_LINK_CAPACITY,
        }
    }

    /// Sets the protocol revision.
    #[must_use]
    pub const fn revision(mut self, revision: ProtocolRevision) -> Self {
        self.revision = revision;
        self
    }

    /// Sets the AES device key.
    #[must_use]
    pub const fn device_key(mut self, key: [u8; 16]) -> Self {
        self.device_key = key;
        self
    }

    /// Sets the GATT profile.
    #[must_use]
    pub const fn profile(mut self, profile: GattProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the timeout for discovery, writes and subscription.
    #[must_use]
    pub const fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Sets the reconnect backoff.
    #[must_use]
    pub const fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the event broadcast capacity.
    #[must_use]
    pub const fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Sets the link event queue capacity.
    #[must_use]
    pub const fn link_capacity(mut self, capacity: usize) -> Self {
        self.link_capacity = capacity;
        self
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Host lifecycle hooks.
pub trait Component {
    /// Starts the component.
    fn setup(&mut self) -> Result<()>;

    /// Logs the component's configuration.
    fn dump_config(&self);

    /// Stops the component. Completes once every resource is released.
    fn teardown(&mut self) -> BoxFuture<'_, ()>;
}

/// Host BLE client callbacks.
pub trait BleClientNode {
    /// Delivers a link event. Returns false if it was not accepted.
    fn handle_link_event(&self, event: LinkEvent) -> bool;

    /// Signals that the device is advertising.
    fn device_available(&self) -> bool {
        self.handle_link_event(LinkEvent::DeviceAvailable)
    }
}

/// Publishes decoded readings to the sinks and the event channel.
#[derive(Debug, Clone)]
pub(crate) struct ReadingPublisher {
    sinks: SensorSinks,
    dispatcher: EventDispatcher,
}

impl ReadingPublisher {
    pub(crate) const fn new(sinks: SensorSinks, dispatcher: EventDispatcher) -> Self {
        Self { sinks, dispatcher }
    }

    pub(crate) const fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Publishes every field unconditionally; debouncing is the sinks' job.
    pub(crate) fn on_reading_available(&self, reading: &DeviceReading) {
        tracing::debug!(
            "BM6 data: {:.2}V {}°C {}%",
            reading.volts(),
            reading.temperature_c,
            reading.battery_level
        );
        let published = self.sinks.publish(reading);
        tracing::trace!("published reading to {} sinks", published);
        self.dispatcher.dispatch(Event::Reading(*reading));
    }
}

/// Driver for one BM6 battery monitor.
///
/// The hub owns the link only while stopped; while running, the link lives
/// in the connection task and comes back on [`teardown`](Component::teardown).
pub struct Bm6Hub<L> {
    config: HubConfig,
    link: Option<L>,
    publisher: ReadingPublisher,
    state: watch::Receiver<ConnectionState>,
    link_tx: Option<mpsc::Sender<LinkEvent>>,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<L>>,
}

impl<L: BleLink + 'static> Bm6Hub<L> {
    /// Creates a hub for the given link.
    #[must_use]
    pub fn new(link: L, config: HubConfig) -> Self {
        let dispatcher = EventDispatcher::new(config.event_capacity);
        let (_, state) = watch::channel(ConnectionState::Disconnected);

        Self {
            config,
            link: Some(link),
            publisher: ReadingPublisher::new(SensorSinks::new(), dispatcher),
            state,
            link_tx: None,
            shutdown: None,
            task: None,
        }
    }

    /// Creates a hub for a stock BM6.
    #[must_use]
    pub fn with_link(link: L) -> Self {
        Self::new(link, HubConfig::default())
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Returns the sink registry.
    #[must_use]
    pub const fn sinks(&self) -> &SensorSinks {
        &self.publisher.sinks
    }

    /// Registers the voltage sink (volts).
    pub fn set_voltage_sensor(&self, sink: &Arc<dyn SensorSink>) {
        self.sinks().set_sensor(ReadingKind::Voltage, sink);
    }

    /// Registers the temperature sink (°C).
    pub fn set_temperature_sensor(&self, sink: &Arc<dyn SensorSink>) {
        self.sinks().set_sensor(ReadingKind::Temperature, sink);
    }

    /// Registers the state-of-charge sink (percent).
    pub fn set_level_sensor(&self, sink: &Arc<dyn SensorSink>) {
        self.sinks().set_sensor(ReadingKind::BatteryLevel, sink);
    }

    /// Registers the low-voltage alarm sink.
    pub fn set_low_voltage_binary(&self, sink: &Arc<dyn BinarySensorSink>) {
        self.sinks().set_binary(ReadingKind::LowVoltage, sink);
    }

    /// Registers the weak-battery alarm sink.
    pub fn set_weak_battery_binary(&self, sink: &Arc<dyn BinarySensorSink>) {
        self.sinks().set_binary(ReadingKind::WeakBattery, sink);
    }

    /// Registers the charging indicator sink.
    pub fn set_charging_binary(&self, sink: &Arc<dyn BinarySensorSink>) {
        self.sinks().set_binary(ReadingKind::Charging, sink);
    }

    /// Publishes a reading to the registered sinks and to subscribers.
    pub fn on_reading_available(&self, reading: &DeviceReading) {
        self.publisher.on_reading_available(reading);
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Returns a receiver that tracks the connection state.
    ///
    /// The receiver is tied to the current run; call again after a new setup.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Returns true between setup and teardown.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Subscribes to events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.publisher.dispatcher.subscribe()
    }

    /// Waits for an event matching the filter with timeout.
    pub async fn wait_for(&self, filter: EventFilter, timeout: Duration) -> Option<Event> {
        self.publisher.dispatcher.wait_for(filter, timeout).await
    }
}

impl<L: BleLink + 'static> Component for Bm6Hub<L> {
    fn setup(&mut self) -> Result<()> {
        if self.task.is_some() {
            return Err(Error::AlreadyRunning);
        }
        let mut link = self.link.take().ok_or(Error::LinkLost)?;

        let (link_tx, link_rx) = mpsc::channel(self.config.link_capacity);
        link.set_event_sender(link_tx.clone());

        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let connection = Connection::new(
            link,
            &self.config,
            self.publisher.clone(),
            link_rx,
            state_tx,
        );

        self.task = Some(tokio::spawn(connection.run(shutdown_rx)));
        self.state = state_rx;
        self.link_tx = Some(link_tx);
        self.shutdown = Some(shutdown_tx);

        tracing::info!("BM6 hub started");
        Ok(())
    }

    fn dump_config(&self) {
        tracing::info!("BM6 BLE Hub:");
        tracing::info!("  Protocol revision: {}", self.config.revision);
        tracing::info!("  Service: {}", self.config.profile.service);
        tracing::info!("  Notify characteristic: {}", self.config.profile.notify);
        if self.config.revision.needs_trigger() {
            tracing::info!("  Write characteristic: {}", self.config.profile.write);
        }
        tracing::info!(
            "  Connect timeout: {}ms",
            self.config.connect_timeout.as_millis()
        );
        tracing::info!(
            "  Backoff: {}ms base, {}ms cap",
            self.config.backoff.base.as_millis(),
            self.config.backoff.cap.as_millis()
        );
        if self.link.is_some() || self.task.is_some() {
            tracing::info!("  BLE link: present");
        } else {
            tracing::info!("  BLE link: MISSING!");
        }

        let registered = self.sinks().registered();
        if registered.is_empty() {
            tracing::info!("  Sensors: none");
        }
        for kind in registered {
            tracing::info!("  Sensor: {}", kind.name());
        }
    }

    fn teardown(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.link_tx = None;
            if let Some(shutdown) = self.shutdown.take() {
                shutdown.send_replace(true);
            }
            if let Some(task) = self.task.take() {
                match task.await {
                    Ok(link) => self.link = Some(link),
                    Err(e) => tracing::error!("connection task failed: {}", e),
                }
                tracing::info!("BM6 hub stopped");
            }
        })
    }
}

impl<L: BleLink + 'static> BleClientNode for Bm6Hub<L> {
    fn handle_link_event(&self, event: LinkEvent) -> bool {
        let Some(tx) = &self.link_tx else {
            tracing::debug!("hub not running, ignoring {:?}", event);
            return false;
        };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!("link event queue full, dropping {:?}", event);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

impl<L> Drop for Bm6Hub<L> {
    fn drop(&mut self) {
        // The driver tears down on its own once signalled
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.send_replace(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Checksum, FrameCodec};
    use crate::sink::tests::Recorder;
    use crate::transport::testing::{Call, FakeLink, FakeLinkHandle};
    use crate::types::StatusFlags;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("bm6_ble=trace")
            .with_test_writer()
            .try_init();
    }

    fn new_hub(config: HubConfig) -> (Bm6Hub<FakeLink>, FakeLinkHandle) {
        init_tracing();
        let (link, handle) = FakeLink::new();
        (Bm6Hub::new(link, config), handle)
    }

    fn test_config() -> HubConfig {
        HubConfig::new().backoff(BackoffConfig::new().jitter(false))
    }

    fn reading() -> DeviceReading {
        DeviceReading {
            voltage_cv: 1237,
            temperature_c: 30,
            battery_level: 100,
            status: StatusFlags::new(false, false, true),
        }
    }

    async fn wait_state(hub: &Bm6Hub<FakeLink>, state: ConnectionState) {
        hub.state_changes()
            .wait_for(|s| *s == state)
            .await
            .unwrap();
    }

    #[test]
    fn test_hub_config_defaults() {
        let config = HubConfig::default();
        assert_eq!(config.revision, ProtocolRevision::Encrypted);
        assert_eq!(config.device_key, BM6_KEY);
        assert_eq!(config.profile, GattProfile::bm6());
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.operation_timeout, DEFAULT_OPERATION_TIMEOUT);
    }

    #[test]
    fn test_hub_config_builder() {
        let config = HubConfig::new()
            .revision(ProtocolRevision::Plain(Checksum::Xor))
            .device_key([0x11; 16])
            .connect_timeout(Duration::from_secs(3))
            .operation_timeout(Duration::from_secs(1))
            .event_capacity(8)
            .link_capacity(4);
        assert_eq!(config.revision, ProtocolRevision::Plain(Checksum::Xor));
        assert_eq!(config.device_key, [0x11; 16]);
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.operation_timeout, Duration::from_secs(1));
        assert_eq!(config.event_capacity, 8);
        assert_eq!(config.link_capacity, 4);
    }

    #[tokio::test]
    async fn test_only_registered_sink_receives_values() {
        let (hub, _) = new_hub(test_config());
        let voltage = Arc::new(Recorder::<f32>::default());
        let sink: Arc<dyn SensorSink> = voltage.clone();
        hub.set_voltage_sensor(&sink);

        let mut events = hub.subscribe();
        hub.on_reading_available(&reading());

        assert_eq!(voltage.values().len(), 1);
        assert_eq!(hub.sinks().registered(), vec![ReadingKind::Voltage]);
        assert_eq!(events.recv().await, Some(Event::Reading(reading())));
    }

    #[tokio::test]
    async fn test_duplicate_readings_are_published() {
        let (hub, _) = new_hub(test_config());
        let level = Arc::new(Recorder::<f32>::default());
        let sink: Arc<dyn SensorSink> = level.clone();
        hub.set_level_sensor(&sink);

        hub.on_reading_available(&reading());
        hub.on_reading_available(&reading());
        assert_eq!(level.values(), vec![100.0, 100.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_publishes_every_sink() {
        let (mut hub, link) = new_hub(test_config());

        let numeric: Vec<Arc<Recorder<f32>>> = (0..3).map(|_| Arc::default()).collect();
        let binary: Vec<Arc<Recorder<bool>>> = (0..3).map(|_| Arc::default()).collect();
        let sinks: Vec<Arc<dyn SensorSink>> = numeric
            .iter()
            .map(|r| Arc::clone(r) as Arc<dyn SensorSink>)
            .collect();
        let binary_sinks: Vec<Arc<dyn BinarySensorSink>> = binary
            .iter()
            .map(|r| Arc::clone(r) as Arc<dyn BinarySensorSink>)
            .collect();
        hub.set_voltage_sensor(&sinks[0]);
        hub.set_temperature_sensor(&sinks[1]);
        hub.set_level_sensor(&sinks[2]);
        hub.set_low_voltage_binary(&binary_sinks[0]);
        hub.set_weak_battery_binary(&binary_sinks[1]);
        hub.set_charging_binary(&binary_sinks[2]);

        hub.setup().unwrap();
        hub.dump_config();
        assert!(hub.device_available());
        wait_state(&hub, ConnectionState::Ready).await;

        let frame = FrameCodec::default().encode(&reading());
        link.send(LinkEvent::Notification(frame)).await;
        let event = hub
            .wait_for(
                EventFilter::kinds(vec![crate::event::EventKind::Reading]),
                Duration::from_secs(1),
            )
            .await;
        assert_eq!(event, Some(Event::Reading(reading())));

        assert!((numeric[0].values()[0] - 12.37).abs() < 0.001);
        assert_eq!(numeric[1].values(), vec![30.0]);
        assert_eq!(numeric[2].values(), vec![100.0]);
        assert_eq!(binary[0].values(), vec![false]);
        assert_eq!(binary[1].values(), vec![false]);
        assert_eq!(binary[2].values(), vec![true]);

        hub.teardown().await;
        assert_eq!(hub.state(), ConnectionState::Disconnected);
        assert!(link.calls().contains(&Call::Disconnect));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_registered_after_setup_is_used() {
        let (mut hub, link) = new_hub(test_config());
        hub.setup().unwrap();
        hub.device_available();
        wait_state(&hub, ConnectionState::Ready).await;

        let charging = Arc::new(Recorder::<bool>::default());
        let sink: Arc<dyn BinarySensorSink> = charging.clone();
        hub.set_charging_binary(&sink);

        let mut events = hub.subscribe();
        link.send(LinkEvent::Notification(FrameCodec::default().encode(&reading())))
            .await;
        assert!(matches!(events.recv().await, Some(Event::Reading(_))));
        assert_eq!(charging.values(), vec![true]);

        hub.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_twice_fails() {
        let (mut hub, _) = new_hub(test_config());
        hub.setup().unwrap();
        assert!(hub.is_running());
        assert!(matches!(hub.setup(), Err(Error::AlreadyRunning)));
        hub.teardown().await;
        assert!(!hub.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_teardown() {
        let (mut hub, link) = new_hub(test_config());

        hub.setup().unwrap();
        hub.device_available();
        wait_state(&hub, ConnectionState::Ready).await;
        hub.teardown().await;
        assert_eq!(hub.state(), ConnectionState::Disconnected);

        hub.setup().unwrap();
        hub.device_available();
        wait_state(&hub, ConnectionState::Ready).await;
        assert_eq!(link.count(&Call::Connect), 2);
        hub.teardown().await;
        assert_eq!(link.count(&Call::Disconnect), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_after_failed_task_reports_link_lost() {
        let (mut hub, link) = new_hub(test_config());
        link.script().panic_connect = true;

        hub.setup().unwrap();
        hub.device_available();
        tokio::time::sleep(Duration::from_millis(10)).await;
        hub.teardown().await;

        assert!(!hub.is_running());
        assert!(matches!(hub.setup(), Err(Error::LinkLost)));
    }

    #[tokio::test]
    async fn test_link_events_rejected_when_stopped() {
        let (hub, _) = new_hub(test_config());
        assert!(!hub.device_available());
        assert!(!hub.handle_link_event(LinkEvent::Disconnected));
        assert_eq!(hub.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_without_setup_is_noop() {
        let (mut hub, link) = new_hub(test_config());
        hub.teardown().await;
        hub.dump_config();
        assert!(link.calls().is_empty());
    }
}
