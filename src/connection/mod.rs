//! Connection state machine driver.
//!
//! One [`Connection`] runs per started hub as a background task. It walks
//! the link through connect, service discovery and subscription, feeds
//! notifications to the frame codec while ready, and retries with
//! exponential backoff when the stack fails. Every suspension point is
//! raced against the hub's stop signal.

pub mod backoff;
pub mod state;

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::error::{ConnectionError, ProtocolError};
use crate::event::{Event, EventDispatcher};
use crate::hub::{HubConfig, ReadingPublisher};
use crate::protocol::{FrameCodec, GattProfile};
use crate::transport::{BleLink, Characteristic, CharacteristicHandle, LinkEvent};

pub use backoff::{Backoff, BackoffConfig};
pub use state::{ConnectionState, Input};

/// Retry deadline used when the backoff delay overflows the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// How a session ended.
#[derive(Debug)]
enum SessionEnd {
    /// The link dropped while ready.
    LinkLost,
    /// A stack operation failed; retry after backoff.
    Failed(ConnectionError),
    /// The device lacks the vendor GATT layout; wait for the host.
    Aborted(ProtocolError),
    /// Every event sender is gone.
    Closed,
}

/// What woke the driver while disconnected.
enum Wake {
    Retry,
    Event(Option<LinkEvent>),
}

/// Characteristic handles located during discovery.
#[derive(Debug, Clone, Copy)]
struct Handles {
    write: Option<CharacteristicHandle>,
    notify: CharacteristicHandle,
}

/// Drives one [`BleLink`] through the connection lifecycle.
pub(crate) struct Connection<L> {
    link: L,
    codec: FrameCodec,
    profile: GattProfile,
    connect_timeout: Duration,
    operation_timeout: Duration,
    backoff: Backoff,
    publisher: ReadingPublisher,
    dispatcher: EventDispatcher,
    events: mpsc::Receiver<LinkEvent>,
    state_tx: watch::Sender<ConnectionState>,
    state: ConnectionState,
    retry_at: Option<Instant>,
    failure_reported: bool,
}

impl<L: BleLink> Connection<L> {
    /// Creates a driver for `link`. The link must already push its events
    /// into the sender paired with `events`.
    pub(crate) fn new(
        link: L,
        config: &HubConfig,
        publisher: ReadingPublisher,
        events: mpsc::Receiver<LinkEvent>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        let dispatcher = publisher.dispatcher().clone();
        state_tx.send_replace(ConnectionState::Disconnected);
        Self {
            link,
            codec: FrameCodec::with_key(config.revision, &config.device_key),
            profile: config.profile,
            connect_timeout: config.connect_timeout,
            operation_timeout: config.operation_timeout,
            backoff: Backoff::new(config.backoff),
            publisher,
            dispatcher,
            events,
            state_tx,
            state: ConnectionState::Disconnected,
            retry_at: None,
            failure_reported: false,
        }
    }

    /// Runs until `shutdown` flips (or its sender is dropped) and hands the
    /// link back, disconnected.
    pub(crate) async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> L {
        while !*shutdown.borrow_and_update() {
            let start = tokio::select! {
                biased;
                _ = shutdown.changed() => false,
                start = self.wait_for_start() => start,
            };
            if !start {
                break;
            }

            let end = tokio::select! {
                biased;
                _ = shutdown.changed() => None,
                end = self.session() => Some(end),
            };
            let Some(end) = end else {
                break;
            };
            if !self.finish_session(end).await {
                break;
            }
        }

        self.teardown().await;
        self.link
    }

    /// Waits in `Disconnected` for the device to become available or for a
    /// scheduled retry. Returns false once the event channel closes.
    ///
    /// While a retry is scheduled, availability does not cut the backoff
    /// short.
    async fn wait_for_start(&mut self) -> bool {
        loop {
            let wake = match self.retry_at {
                Some(at) => tokio::select! {
                    () = tokio::time::sleep_until(at) => Wake::Retry,
                    event = self.events.recv() => Wake::Event(event),
                },
                None => Wake::Event(self.events.recv().await),
            };

            match wake {
                Wake::Retry => {
                    tracing::debug!("retrying connection (attempt {})", self.backoff.attempt());
                    self.retry_at = None;
                    return true;
                }
                Wake::Event(Some(LinkEvent::DeviceAvailable)) if self.retry_at.is_some() => {
                    tracing::trace!("device available, waiting for scheduled retry");
                }
                Wake::Event(Some(LinkEvent::DeviceAvailable)) => {
                    tracing::debug!("device available");
                    return true;
                }
                Wake::Event(Some(LinkEvent::Notification(_))) => {
                    tracing::trace!("ignoring notification while disconnected");
                }
                Wake::Event(Some(LinkEvent::Disconnected)) => {}
                Wake::Event(None) => return false,
            }
        }
    }

    /// Runs one connect / discover / subscribe / ready cycle.
    async fn session(&mut self) -> SessionEnd {
        self.drain_stale_events();
        self.advance(Input::Start);

        if let Err(err) = timed("connect", self.connect_timeout, self.link.connect()).await {
            return SessionEnd::Failed(err);
        }
        self.advance(Input::Connected);

        let characteristics =
            match timed("discover", self.operation_timeout, self.link.discover()).await {
                Ok(characteristics) => characteristics,
                Err(err) => return SessionEnd::Failed(err),
            };
        let handles = match self.locate(&characteristics) {
            Ok(handles) => handles,
            Err(err) => return SessionEnd::Aborted(err),
        };
        self.advance(Input::Discovered);

        if let (Some(write), Some(trigger)) = (handles.write, self.codec.trigger_command()) {
            tracing::trace!("sending trigger command: 0x{}", hex::encode(&trigger));
            let written = timed(
                "write",
                self.operation_timeout,
                self.link.write(write, trigger),
            )
            .await;
            if let Err(err) = written {
                return SessionEnd::Failed(err);
            }
        }
        if let Err(err) = timed(
            "subscribe",
            self.operation_timeout,
            self.link.subscribe(handles.notify),
        )
        .await
        {
            return SessionEnd::Failed(err);
        }
        self.advance(Input::Subscribed);

        self.backoff.reset();
        self.failure_reported = false;
        tracing::info!("receiving BM6 notifications ({} frames)", self.codec.revision());

        loop {
            match self.events.recv().await {
                Some(LinkEvent::Notification(data)) => self.handle_notification(&data),
                Some(LinkEvent::Disconnected) => return SessionEnd::LinkLost,
                Some(LinkEvent::DeviceAvailable) => {}
                None => return SessionEnd::Closed,
            }
        }
    }

    /// Applies a session's outcome. Returns false if the driver should exit.
    async fn finish_session(&mut self, end: SessionEnd) -> bool {
        match end {
            SessionEnd::LinkLost => {
                self.release_link().await;
                self.advance(Input::LinkLost);
                let delay = self.schedule_retry();
                tracing::info!("link lost, reconnecting in {}ms", millis(delay));
            }
            SessionEnd::Failed(err) => {
                self.release_link().await;
                self.advance(Input::Failed);
                let delay = self.schedule_retry();
                if self.failure_reported {
                    tracing::debug!("connection attempt failed again: {}", err);
                } else {
                    tracing::warn!("connection failed: {}, retrying in {}ms", err, millis(delay));
                    self.failure_reported = true;
                    self.dispatcher.dispatch(Event::ConnectionFailed {
                        message: err.to_string(),
                        retry_in_ms: millis(delay),
                    });
                }
            }
            SessionEnd::Aborted(err) => {
                self.release_link().await;
                self.advance(Input::Failed);
                self.retry_at = None;
                tracing::error!("session aborted: {}", err);
                self.dispatcher.dispatch(Event::SessionAborted {
                    message: err.to_string(),
                });
            }
            SessionEnd::Closed => {
                tracing::debug!("link event channel closed");
                return false;
            }
        }
        true
    }

    /// Finds the characteristics the configured revision needs.
    fn locate(&self, characteristics: &[Characteristic]) -> Result<Handles, ProtocolError> {
        let service = self.profile.service;
        if !characteristics.iter().any(|c| c.service == service) {
            return Err(ProtocolError::ServiceMissing { service });
        }

        let find = |uuid| {
            characteristics
                .iter()
                .find(|c| c.service == service && c.uuid == uuid)
                .map(|c| c.handle)
                .ok_or(ProtocolError::CharacteristicMissing {
                    service,
                    characteristic: uuid,
                })
        };

        let write = if self.codec.revision().needs_trigger() {
            Some(find(self.profile.write)?)
        } else {
            None
        };
        Ok(Handles {
            write,
            notify: find(self.profile.notify)?,
        })
    }

    fn handle_notification(&self, data: &Bytes) {
        tracing::trace!("notification: 0x{}", hex::encode(data));
        match self.codec.decode(data) {
            Ok(reading) => self.publisher.on_reading_available(&reading),
            Err(e) => tracing::debug!("dropping frame: {}", e),
        }
    }

    /// Discards events left over from a previous session.
    fn drain_stale_events(&mut self) {
        let mut drained = 0usize;
        while self.events.try_recv().is_ok() {
            drained += 1;
        }
        if drained > 0 {
            tracing::trace!("drained {} stale link events", drained);
        }
    }

    fn schedule_retry(&mut self) -> Duration {
        let delay = self.backoff.next_delay();
        let now = Instant::now();
        self.retry_at = Some(now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE));
        delay
    }

    async fn release_link(&mut self) {
        if !self.link.is_connected() {
            return;
        }
        if let Err(e) = timed("disconnect", self.operation_timeout, self.link.disconnect()).await {
            tracing::warn!("failed to disconnect: {}", e);
        }
    }

    async fn teardown(&mut self) {
        if self.state != ConnectionState::Disconnected || self.link.is_connected() {
            tracing::info!("disconnecting from BM6");
            if let Err(e) = timed("disconnect", self.operation_timeout, self.link.disconnect()).await
            {
                tracing::warn!("failed to disconnect: {}", e);
            }
        }
        self.retry_at = None;
        self.advance(Input::Stop);
    }

    fn advance(&mut self, input: Input) {
        let next = self.state.on(input);
        if next == self.state {
            return;
        }
        tracing::info!("connection state: {} -> {}", self.state, next);
        self.state = next;
        self.state_tx.send_replace(next);
        self.dispatcher.dispatch(Event::StateChanged(next));
    }
}

/// Bounds a link operation by `timeout`.
async fn timed<T>(
    operation: &'static str,
    timeout: Duration,
    fut: impl Future<Output = Result<T, ConnectionError>>,
) -> Result<T, ConnectionError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ConnectionError::Timeout {
            operation,
            timeout_ms: millis(timeout),
        }),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
