//! GATT identifiers used by the BM6.
//!
//! The monitor exposes a single vendor service with a write characteristic
//! for commands and a notify characteristic carrying the status frames.

use uuid::Uuid;

/// Bluetooth base UUID (`00000000-0000-1000-8000-00805f9b34fb`).
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

/// Vendor service.
pub const BM6_SERVICE: Uuid = uuid_from_u16(0xfff0);

/// Command characteristic (write with response).
pub const BM6_WRITE_CHARACTERISTIC: Uuid = uuid_from_u16(0xfff3);

/// Status frame characteristic (notify).
pub const BM6_NOTIFY_CHARACTERISTIC: Uuid = uuid_from_u16(0xfff4);

/// Expands a 16-bit assigned number into a full 128-bit UUID.
#[must_use]
#[allow(clippy::cast_lossless)]
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | BLUETOOTH_BASE_UUID)
}

/// The service and characteristics the driver needs on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattProfile {
    /// Vendor service.
    pub service: Uuid,
    /// Characteristic the trigger command is written to.
    pub write: Uuid,
    /// Characteristic carrying status notifications.
    pub notify: Uuid,
}

impl GattProfile {
    /// Profile of a stock BM6.
    #[must_use]
    pub const fn bm6() -> Self {
        Self {
            service: BM6_SERVICE,
            write: BM6_WRITE_CHARACTERISTIC,
            notify: BM6_NOTIFY_CHARACTERISTIC,
        }
    }
}

impl Default for GattProfile {
    fn default() -> Self {
        Self::bm6()
    }
}
