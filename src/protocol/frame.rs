//! Frame encoding and decoding for BM6 status notifications.
//!
//! Two wire revisions exist. Current firmware sends one AES-128 encrypted
//! block per notification; the plaintext is:
//! ```text
//! ┌──────────┬──────┬──────┬────────┬───────┬──────────┬────────┬─────────┐
//! │ d1 55 07 │ sign │ temp │ status │ level │ volt hi  │ volt lo│ padding │
//! │ 3 bytes  │  1   │  1   │   1    │   1   │ low nib. │   1    │ 7 bytes │
//! └──────────┴──────┴──────┴────────┴───────┴──────────┴────────┴─────────┘
//! ```
//!
//! The plain revision carries the same fields in a checksummed frame:
//! ```text
//! ┌────────┬─────┬────────────┬──────┬───────┬────────┬──────────┐
//! │ aa 55  │ len │ volt (BE)  │ temp │ level │ status │ checksum │
//! │ 2 bytes│  1  │  2 bytes   │ i8   │   1   │   1    │    1     │
//! └────────┴─────┴────────────┴──────┴───────┴────────┴──────────┘
//! ```
//! The checksum covers `len` through `status`.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::protocol::cipher::{BLOCK_SIZE, BM6_KEY, FrameCipher};
use crate::types::{DeviceReading, StatusFlags};

/// Plaintext marker of an encrypted status frame.
pub const ENCRYPTED_MARKER: [u8; 3] = [0xd1, 0x55, 0x07];

/// Marker of a plain status frame.
pub const PLAIN_MARKER: [u8; 2] = [0xaa, 0x55];

/// Total size of a plain status frame.
pub const PLAIN_FRAME_SIZE: usize = 9;

/// Largest voltage the encrypted layout can carry (12 bits of V/100).
pub const MAX_ENCRYPTED_VOLTAGE_CV: u16 = 0x0fff;

/// Highest valid state of charge.
const MAX_LEVEL: u8 = 100;

/// Temperature sign byte value meaning "below zero".
const NEGATIVE_TEMPERATURE: u8 = 0x01;

/// Checksum algorithm of the plain revision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Checksum {
    /// Wrapping byte sum.
    #[default]
    Sum,
    /// Byte XOR.
    Xor,
}

impl Checksum {
    /// Computes the checksum over `data`.
    #[must_use]
    pub fn compute(self, data: &[u8]) -> u8 {
        match self {
            Self::Sum => data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)),
            Self::Xor => data.iter().fold(0u8, |acc, b| acc ^ b),
        }
    }
}

/// Wire revision of the status characteristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ProtocolRevision {
    /// AES-128 encrypted 16-byte frames (current BM6 firmware).
    #[default]
    Encrypted,
    /// Checksummed 9-byte frames.
    Plain(Checksum),
}

impl ProtocolRevision {
    /// Minimum number of bytes a notification must carry.
    #[must_use]
    pub const fn min_frame_size(self) -> usize {
        match self {
            Self::Encrypted => BLOCK_SIZE,
            Self::Plain(_) => PLAIN_FRAME_SIZE,
        }
    }

    /// Whether the device must be sent the trigger command before it notifies.
    #[must_use]
    pub const fn needs_trigger(self) -> bool {
        matches!(self, Self::Encrypted)
    }
}

impl std::fmt::Display for ProtocolRevision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encrypted => write!(f, "encrypted"),
            Self::Plain(Checksum::Sum) => write!(f, "plain (sum)"),
            Self::Plain(Checksum::Xor) => write!(f, "plain (xor)"),
        }
    }
}

/// Decoder/encoder for one device's status frames.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    revision: ProtocolRevision,
    cipher: FrameCipher,
}

impl FrameCodec {
    /// Creates a codec for the given revision using the stock BM6 key.
    #[must_use]
    pub fn new(revision: ProtocolRevision) -> Self {
        Self::with_key(revision, &BM6_KEY)
    }

    /// Creates a codec with a custom device key.
    #[must_use]
    pub fn with_key(revision: ProtocolRevision, key: &[u8; 16]) -> Self {
        Self {
            revision,
            cipher: FrameCipher::new(key),
        }
    }

    /// Returns the configured revision.
    #[must_use]
    pub const fn revision(&self) -> ProtocolRevision {
        self.revision
    }

    /// Decodes one notification payload.
    ///
    /// # Errors
    ///
    /// Returns a `CodecError` if the frame is too short, carries the wrong
    /// marker or length, or fails its checksum.
    pub fn decode(&self, raw: &[u8]) -> Result<DeviceReading, CodecError> {
        let expected = self.revision.min_frame_size();
        if raw.len() < expected {
            return Err(CodecError::TooShort {
                expected,
                got: raw.len(),
            });
        }

        match self.revision {
            ProtocolRevision::Encrypted => {
                let mut block = [0u8; BLOCK_SIZE];
                block.copy_from_slice(&raw[..BLOCK_SIZE]);
                decode_block(&self.cipher.decrypt(&block))
            }
            ProtocolRevision::Plain(checksum) => decode_plain(raw, checksum),
        }
    }

    /// Encodes a reading into a frame of the configured revision.
    ///
    /// Values outside the revision's range are clamped.
    #[must_use]
    pub fn encode(&self, reading: &DeviceReading) -> Bytes {
        match self.revision {
            ProtocolRevision::Encrypted => {
                let block = encode_block(reading);
                Bytes::copy_from_slice(&self.cipher.encrypt(&block))
            }
            ProtocolRevision::Plain(checksum) => encode_plain(reading, checksum),
        }
    }

    /// Returns the command that starts notifications, if the revision has one.
    #[must_use]
    pub fn trigger_command(&self) -> Option<Bytes> {
        if !self.revision.needs_trigger() {
            return None;
        }
        let mut block = [0u8; BLOCK_SIZE];
        block[..ENCRYPTED_MARKER.len()].copy_from_slice(&ENCRYPTED_MARKER);
        Some(Bytes::copy_from_slice(&self.cipher.encrypt(&block)))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(ProtocolRevision::default())
    }
}

/// Decodes a decrypted 16-byte block.
fn decode_block(block: &[u8; BLOCK_SIZE]) -> Result<DeviceReading, CodecError> {
    if block[..3] != ENCRYPTED_MARKER {
        return Err(CodecError::BadMarker);
    }

    let magnitude = i16::from(block[4]);
    let temperature_c = if block[3] == NEGATIVE_TEMPERATURE {
        -magnitude
    } else {
        magnitude
    };

    let voltage_cv = (u16::from(block[7] & 0x0f) << 8) | u16::from(block[8]);

    Ok(DeviceReading {
        voltage_cv,
        temperature_c,
        battery_level: block[6].min(MAX_LEVEL),
        status: StatusFlags::from_byte(block[5]),
    })
}

fn encode_block(reading: &DeviceReading) -> [u8; BLOCK_SIZE] {
    let voltage_cv = reading.voltage_cv.min(MAX_ENCRYPTED_VOLTAGE_CV);
    let magnitude = reading.temperature_c.unsigned_abs().min(u16::from(u8::MAX));

    let mut block = [0u8; BLOCK_SIZE];
    block[..3].copy_from_slice(&ENCRYPTED_MARKER);
    block[3] = u8::from(reading.temperature_c < 0);
    block[4] = magnitude as u8;
    block[5] = reading.status.to_byte();
    block[6] = reading.battery_level.min(MAX_LEVEL);
    block[7] = (voltage_cv >> 8) as u8;
    block[8] = voltage_cv as u8;
    block
}

fn decode_plain(raw: &[u8], checksum: Checksum) -> Result<DeviceReading, CodecError> {
    if raw[..2] != PLAIN_MARKER {
        return Err(CodecError::BadMarker);
    }

    let declared = usize::from(raw[2]);
    if declared != PLAIN_FRAME_SIZE || raw.len() != PLAIN_FRAME_SIZE {
        return Err(CodecError::BadLength {
            declared,
            got: raw.len(),
        });
    }

    let expected = checksum.compute(&raw[2..PLAIN_FRAME_SIZE - 1]);
    let got = raw[PLAIN_FRAME_SIZE - 1];
    if expected != got {
        return Err(CodecError::ChecksumMismatch { expected, got });
    }

    Ok(DeviceReading {
        voltage_cv: u16::from_be_bytes([raw[3], raw[4]]),
        temperature_c: i16::from(i8::from_be_bytes([raw[5]])),
        battery_level: raw[6].min(MAX_LEVEL),
        status: StatusFlags::from_byte(raw[7]),
    })
}

fn encode_plain(reading: &DeviceReading, checksum: Checksum) -> Bytes {
    let temperature = reading
        .temperature_c
        .clamp(i16::from(i8::MIN), i16::from(i8::MAX)) as i8;

    let mut buf = BytesMut::with_capacity(PLAIN_FRAME_SIZE);
    buf.put_slice(&PLAIN_MARKER);
    buf.put_u8(PLAIN_FRAME_SIZE as u8);
    buf.put_u16(reading.voltage_cv);
    buf.put_i8(temperature);
    buf.put_u8(reading.battery_level.min(MAX_LEVEL));
    buf.put_u8(reading.status.to_byte());
    let sum = checksum.compute(&buf[2..]);
    buf.put_u8(sum);
    buf.freeze()
}
