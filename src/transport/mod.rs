//! Transport layer for BM6 communication.
//!
//! The BLE stack belongs to the host. This module defines the narrow
//! [`BleLink`] seam the connection driver talks to, and the events a link
//! pushes back. A `btleplug` implementation is available behind the
//! `btleplug` feature.

#[cfg(feature = "btleplug")]
pub mod bluetooth;
#[cfg(test)]
pub(crate) mod testing;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ConnectionError;

/// Opaque per-link characteristic handle.
pub type CharacteristicHandle = u16;

/// A characteristic found during service discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Characteristic {
    /// Service the characteristic belongs to.
    pub service: Uuid,
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Handle used for writes and subscriptions on this link.
    pub handle: CharacteristicHandle,
}

/// Events a link pushes to its listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The device is advertising and can be connected to.
    DeviceAvailable,
    /// A notification arrived on the subscribed characteristic.
    Notification(Bytes),
    /// The link was lost.
    Disconnected,
}

/// Trait for host BLE client implementations.
///
/// The stack guarantees one outstanding operation at a time; the driver
/// never issues a second call before the previous future resolves.
pub trait BleLink: Send {
    /// Sets the channel the link pushes [`LinkEvent`]s into.
    fn set_event_sender(&mut self, tx: mpsc::Sender<LinkEvent>);

    /// Connects to the device.
    fn connect(&mut self) -> BoxFuture<'_, Result<(), ConnectionError>>;

    /// Discovers services and returns every characteristic found.
    fn discover(&mut self) -> BoxFuture<'_, Result<Vec<Characteristic>, ConnectionError>>;

    /// Writes to a characteristic, waiting for the write response.
    fn write(
        &mut self,
        handle: CharacteristicHandle,
        data: Bytes,
    ) -> BoxFuture<'_, Result<(), ConnectionError>>;

    /// Subscribes to notifications on a characteristic.
    fn subscribe(
        &mut self,
        handle: CharacteristicHandle,
    ) -> BoxFuture<'_, Result<(), ConnectionError>>;

    /// Disconnects from the device.
    fn disconnect(&mut self) -> BoxFuture<'_, Result<(), ConnectionError>>;

    /// Returns true if connected.
    fn is_connected(&self) -> bool;
}

#[cfg(feature = "btleplug")]
pub use bluetooth::{BtleplugLink, find_peripheral};
