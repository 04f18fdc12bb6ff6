//! AES-128 block transform used by BM6 frames.
//!
//! The device encrypts each 16-byte frame with AES-128-CBC and a zero IV.
//! Frames are exactly one block long, so CBC degenerates to a single raw
//! block operation: `C = E(P ^ 0) = E(P)` and `P = D(C) ^ 0 = D(C)`.

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};

/// Cipher block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Key shipped in BM6 firmware.
pub const BM6_KEY: [u8; 16] = [
    0x6c, 0x65, 0x61, 0x67, 0x65, 0x6e, 0x64, 0xff, 0xfe, 0x30, 0x31, 0x30, 0x30, 0x30, 0x30, 0x39,
];

/// A keyed block cipher for one device.
#[derive(Clone)]
pub struct FrameCipher {
    cipher: Aes128,
}

impl FrameCipher {
    /// Creates a cipher from a 128-bit key.
    #[must_use]
    pub fn new(key: &[u8; 16]) -> Self {
        Self {
            cipher: Aes128::new(GenericArray::from_slice(key)),
        }
    }

    /// Encrypts one block.
    #[must_use]
    pub fn encrypt(&self, plaintext: &[u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
        let mut block = GenericArray::clone_from_slice(plaintext);
        self.cipher.encrypt_block(&mut block);
        let mut out = [0u8; BLOCK_SIZE];
        out.copy_from_slice(&block);
        out
    }

    /// Decrypts one block.
    #[must_use]
    pub fn decrypt(&self, ciphertext: &[u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
        let mut block = GenericArray::clone_from_slice(ciphertext);
        self.cipher.decrypt_block(&mut block);
        let mut out = [0u8; BLOCK_SIZE];
        out.copy_from_slice(&block);
        out
    }
}

impl std::fmt::Debug for FrameCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCipher").finish_non_exhaustive()
    }
}

impl Default for FrameCipher {
    fn default() -> Self {
        Self::new(&BM6_KEY)
    }
}
