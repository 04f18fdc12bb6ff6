//! Data types for BM6 readings.

mod reading;

pub use reading::{DeviceReading, ReadingKind, StatusFlags};
