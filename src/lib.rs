//! # bm6-ble
//!
//! An async driver for BM6 Bluetooth Low Energy battery monitors.
//!
//! The BM6 reports voltage, temperature, state of charge and status flags
//! over a vendor GATT service. This library decodes those frames, keeps a
//! BLE link connected with exponential backoff, and publishes each reading
//! to sensor sinks owned by the host.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Encrypted (AES-128) and plain checksummed frame revisions
//! - Event-driven state and reading notifications
//! - Pluggable BLE link, with a `btleplug` implementation behind the
//!   `btleplug` feature
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use bm6_ble::{BleClientNode, Bm6Hub, BtleplugLink, Component, HubConfig, SensorSink};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = /* a btleplug adapter */;
//!     let peripheral =
//!         bm6_ble::find_peripheral(&adapter, "BM6", std::time::Duration::from_secs(30)).await?;
//!
//!     let mut hub = Bm6Hub::new(BtleplugLink::new(peripheral), HubConfig::default());
//!     let voltage: Arc<dyn SensorSink> = Arc::new(|v: f32| println!("{v:.2} V"));
//!     hub.set_voltage_sensor(&voltage);
//!
//!     hub.setup()?;
//!     hub.device_available();
//!
//!     tokio::signal::ctrl_c().await?;
//!     hub.teardown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - Frame codec, cipher and GATT identifiers
//! - [`types`] - Decoded readings and status flags
//! - [`transport`] - The [`BleLink`] seam and link implementations
//! - [`connection`] - Connection state machine, backoff and driver
//! - [`event`] - Async event system for state changes and readings
//! - [`sink`] - Host sensor sinks and the sink registry
//! - [`hub`] - The high-level [`Bm6Hub`]

pub mod connection;
pub mod error;
pub mod event;
pub mod hub;
pub mod protocol;
pub mod sink;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use connection::{BackoffConfig, ConnectionState};
pub use error::{CodecError, ConnectionError, Error, ProtocolError, Result};
pub use event::{Event, EventDispatcher, EventFilter, EventKind, Subscription};
pub use hub::{BleClientNode, Bm6Hub, Component, HubConfig};
pub use protocol::{Checksum, FrameCodec, GattProfile, ProtocolRevision};
pub use sink::{BinarySensorSink, SensorSink, SensorSinks};
pub use transport::{BleLink, Characteristic, CharacteristicHandle, LinkEvent};
#[cfg(feature = "btleplug")]
pub use transport::{BtleplugLink, find_peripheral};
pub use types::{DeviceReading, ReadingKind, StatusFlags};
