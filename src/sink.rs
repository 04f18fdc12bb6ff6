//! Host-owned sensor sinks and the per-hub sink registry.
//!
//! The hub never owns a sink. It keeps a `Weak` reference per reading kind
//! and skips sinks the host has dropped.

use std::sync::{Arc, PoisonError, RwLock, Weak};

use crate::types::{DeviceReading, ReadingKind};

/// A numeric sensor entity owned by the host.
pub trait SensorSink: Send + Sync {
    /// Publishes a new state.
    fn publish_state(&self, value: f32);
}

/// An on/off sensor entity owned by the host.
pub trait BinarySensorSink: Send + Sync {
    /// Publishes a new state.
    fn publish_state(&self, state: bool);
}

impl<F> SensorSink for F
where
    F: Fn(f32) + Send + Sync,
{
    fn publish_state(&self, value: f32) {
        self(value);
    }
}

impl<F> BinarySensorSink for F
where
    F: Fn(bool) + Send + Sync,
{
    fn publish_state(&self, state: bool) {
        self(state);
    }
}

#[derive(Default)]
struct Slots {
    voltage: Option<Weak<dyn SensorSink>>,
    temperature: Option<Weak<dyn SensorSink>>,
    level: Option<Weak<dyn SensorSink>>,
    low_voltage: Option<Weak<dyn BinarySensorSink>>,
    weak_battery: Option<Weak<dyn BinarySensorSink>>,
    charging: Option<Weak<dyn BinarySensorSink>>,
}

impl Slots {
    fn numeric(&self, kind: ReadingKind) -> Option<&Weak<dyn SensorSink>> {
        match kind {
            ReadingKind::Voltage => self.voltage.as_ref(),
            ReadingKind::Temperature => self.temperature.as_ref(),
            ReadingKind::BatteryLevel => self.level.as_ref(),
            _ => None,
        }
    }

    fn binary(&self, kind: ReadingKind) -> Option<&Weak<dyn BinarySensorSink>> {
        match kind {
            ReadingKind::LowVoltage => self.low_voltage.as_ref(),
            ReadingKind::WeakBattery => self.weak_battery.as_ref(),
            ReadingKind::Charging => self.charging.as_ref(),
            _ => None,
        }
    }
}

/// Registry mapping each reading kind to at most one sink.
///
/// Cloning yields a handle to the same registry.
#[derive(Clone, Default)]
pub struct SensorSinks {
    slots: Arc<RwLock<Slots>>,
}

impl SensorSinks {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a numeric sink for `kind`, replacing any previous one.
    ///
    /// Binary kinds are ignored.
    pub fn set_sensor(&self, kind: ReadingKind, sink: &Arc<dyn SensorSink>) {
        let weak = Some(Arc::downgrade(sink));
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        match kind {
            ReadingKind::Voltage => slots.voltage = weak,
            ReadingKind::Temperature => slots.temperature = weak,
            ReadingKind::BatteryLevel => slots.level = weak,
            _ => tracing::warn!("{} is not a numeric reading", kind.name()),
        }
    }

    /// Registers a binary sink for `kind`, replacing any previous one.
    ///
    /// Numeric kinds are ignored.
    pub fn set_binary(&self, kind: ReadingKind, sink: &Arc<dyn BinarySensorSink>) {
        let weak = Some(Arc::downgrade(sink));
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        match kind {
            ReadingKind::LowVoltage => slots.low_voltage = weak,
            ReadingKind::WeakBattery => slots.weak_battery = weak,
            ReadingKind::Charging => slots.charging = weak,
            _ => tracing::warn!("{} is not a binary reading", kind.name()),
        }
    }

    /// Returns the kinds whose sink is registered and still alive.
    #[must_use]
    pub fn registered(&self) -> Vec<ReadingKind> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        ReadingKind::ALL
            .into_iter()
            .filter(|kind| {
                if kind.is_binary() {
                    slots.binary(*kind).is_some_and(|w| w.strong_count() > 0)
                } else {
                    slots.numeric(*kind).is_some_and(|w| w.strong_count() > 0)
                }
            })
            .collect()
    }

    /// Publishes every field of `reading` to its sink.
    ///
    /// Returns the number of sinks that received a value. Unregistered and
    /// dropped sinks are skipped. The registry is not locked while sinks run,
    /// so a sink may register other sinks from its callback.
    pub fn publish(&self, reading: &DeviceReading) -> usize {
        let (numeric, binary) = self.live();

        for (kind, sink) in &numeric {
            sink.publish_state(numeric_value(reading, *kind));
        }
        for (kind, sink) in &binary {
            sink.publish_state(binary_value(reading, *kind));
        }

        numeric.len() + binary.len()
    }

    /// Upgrades every registered sink that is still alive.
    fn live(
        &self,
    ) -> (
        Vec<(ReadingKind, Arc<dyn SensorSink>)>,
        Vec<(ReadingKind, Arc<dyn BinarySensorSink>)>,
    ) {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        let mut numeric = Vec::new();
        let mut binary = Vec::new();

        for kind in ReadingKind::ALL {
            if kind.is_binary() {
                if let Some(sink) = slots.binary(kind).and_then(Weak::upgrade) {
                    binary.push((kind, sink));
                }
            } else if let Some(sink) = slots.numeric(kind).and_then(Weak::upgrade) {
                numeric.push((kind, sink));
            }
        }

        (numeric, binary)
    }
}

impl std::fmt::Debug for SensorSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorSinks")
            .field("registered", &self.registered())
            .finish()
    }
}

fn numeric_value(reading: &DeviceReading, kind: ReadingKind) -> f32 {
    match kind {
        ReadingKind::Temperature => f32::from(reading.temperature_c),
        ReadingKind::BatteryLevel => f32::from(reading.battery_level),
        _ => reading.volts(),
    }
}

fn binary_value(reading: &DeviceReading, kind: ReadingKind) -> bool {
    match kind {
        ReadingKind::LowVoltage => reading.low_voltage(),
        ReadingKind::WeakBattery => reading.weak_battery(),
        _ => reading.charging(),
    }
}
