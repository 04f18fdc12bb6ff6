//! Decoded device readings.

/// Status flag bits carried in every BM6 frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StatusFlags(u8);

impl StatusFlags {
    /// Battery voltage below the low-voltage threshold.
    pub const LOW_VOLTAGE: u8 = 0x01;
    /// Battery reported as weak during cranking.
    pub const WEAK_BATTERY: u8 = 0x02;
    /// Charging voltage detected.
    pub const CHARGING: u8 = 0x04;

    /// Parses status flags from a byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Builds the flags from individual conditions.
    #[must_use]
    pub const fn new(low_voltage: bool, weak_battery: bool, charging: bool) -> Self {
        let mut byte = 0;
        if low_voltage {
            byte |= Self::LOW_VOLTAGE;
        }
        if weak_battery {
            byte |= Self::WEAK_BATTERY;
        }
        if charging {
            byte |= Self::CHARGING;
        }
        Self(byte)
    }

    /// Encodes the flags to a byte.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn low_voltage(self) -> bool {
        self.0 & Self::LOW_VOLTAGE != 0
    }

    #[must_use]
    pub const fn weak_battery(self) -> bool {
        self.0 & Self::WEAK_BATTERY != 0
    }

    #[must_use]
    pub const fn charging(self) -> bool {
        self.0 & Self::CHARGING != 0
    }
}

/// One snapshot of the monitor's state, produced per decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceReading {
    /// Battery voltage in V/100.
    pub voltage_cv: u16,
    /// Temperature in °C.
    pub temperature_c: i16,
    /// State of charge in %, 0-100.
    pub battery_level: u8,
    /// Status flags.
    pub status: StatusFlags,
}

impl DeviceReading {
    /// Battery voltage in volts.
    #[must_use]
    pub fn volts(&self) -> f32 {
        f32::from(self.voltage_cv) / 100.0
    }

    #[must_use]
    pub const fn low_voltage(&self) -> bool {
        self.status.low_voltage()
    }

    #[must_use]
    pub const fn weak_battery(&self) -> bool {
        self.status.weak_battery()
    }

    #[must_use]
    pub const fn charging(&self) -> bool {
        self.status.charging()
    }
}

/// The kinds of value a reading carries, one per sink slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadingKind {
    Voltage,
    Temperature,
    BatteryLevel,
    LowVoltage,
    WeakBattery,
    Charging,
}

impl ReadingKind {
    /// All kinds, in publish order.
    pub const ALL: [Self; 6] = [
        Self::Voltage,
        Self::Temperature,
        Self::BatteryLevel,
        Self::LowVoltage,
        Self::WeakBattery,
        Self::Charging,
    ];

    /// Returns true for the on/off kinds.
    #[must_use]
    pub const fn is_binary(self) -> bool {
        matches!(self, Self::LowVoltage | Self::WeakBattery | Self::Charging)
    }

    /// Short name used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Voltage => "voltage",
            Self::Temperature => "temperature",
            Self::BatteryLevel => "battery_level",
            Self::LowVoltage => "low_voltage",
            Self::WeakBattery => "weak_battery",
            Self::Charging => "charging",
        }
    }
}
