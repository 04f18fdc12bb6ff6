//! Protocol definitions for BM6 communication.
//!
//! This module contains the low-level protocol pieces:
//! - Status frame encoding/decoding for each wire revision
//! - The AES-128 block transform used by current firmware
//! - GATT service and characteristic identifiers

pub mod cipher;
pub mod frame;
pub mod gatt;

pub use cipher::{BLOCK_SIZE, BM6_KEY, FrameCipher};
pub use frame::{Checksum, FrameCodec, ProtocolRevision};
pub use gatt::{
    BM6_NOTIFY_CHARACTERISTIC, BM6_SERVICE, BM6_WRITE_CHARACTERISTIC, GattProfile, uuid_from_u16,
};
