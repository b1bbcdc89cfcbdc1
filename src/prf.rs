//! The keyed pseudo-random function at the heart of token derivation.
//!
//! Every opaque value in the protocol -- per-keyword derivation keys, update
//! tokens, index masks -- is the output of one keyed PRF over a short byte
//! string. The construction here is CMAC-AES-256 run in the counter mode of
//! NIST SP800-108: each 16-byte block MACs a block counter, a zero separator
//! byte and the input, and the concatenated blocks are truncated to the
//! requested width. AES is typically hardware accelerated, which matters
//! when a search derives two PRF outputs per chain step.

use aes::cipher::generic_array::GenericArray;
use aes::Aes256;
use cmac::{Cmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use zeroize::ZeroizeOnDrop;

use crate::token::DERIVATION_KEY_SIZE;

/// A keyed PRF with a fixed output width of `N` bytes.
///
/// Deterministic: the same key and input always produce the same output.
/// Inputs may be of any length, though the protocol only ever feeds it a
/// token with a single trailing tag byte.
#[derive(ZeroizeOnDrop, Clone)]
pub struct Prf<const N: usize> {
    key: [u8; DERIVATION_KEY_SIZE],
}

impl<const N: usize> Prf<N> {
    /// The number of bytes one CMAC invocation yields.
    const BLOCK_SIZE: usize = 16;

    /// Create a PRF from an existing key.
    #[must_use]
    pub fn new(key: &[u8; DERIVATION_KEY_SIZE]) -> Self {
        Prf { key: *key }
    }

    /// Create a PRF under a fresh random key drawn from the OS entropy
    /// source.
    #[must_use]
    pub fn random() -> Self {
        let mut key = [0u8; DERIVATION_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Prf { key }
    }

    /// The key, for persistence. Handle with the care you'd give any other
    /// secret.
    #[must_use]
    pub fn key(&self) -> &[u8; DERIVATION_KEY_SIZE] {
        &self.key
    }

    /// Evaluate the PRF on `input`.
    #[must_use]
    pub fn prf(&self, input: &[u8]) -> [u8; N] {
        // The key is always DERIVATION_KEY_SIZE bytes, which is exactly the
        // AES-256 key width, so constructing the MAC cannot fail.
        let key = GenericArray::from_slice(&self.key);
        let mut mac = <Cmac<Aes256> as Mac>::new(key);

        let mut out = [0u8; N];
        let blocks = (N + Self::BLOCK_SIZE - 1) / Self::BLOCK_SIZE;

        for i in 0..blocks {
            mac.update(&(i as u16).to_be_bytes());
            mac.update(b"\0");
            mac.update(input);

            let block = mac.finalize_reset().into_bytes();
            let start = i * Self::BLOCK_SIZE;
            let end = std::cmp::min(start + Self::BLOCK_SIZE, N);
            out[start..end].copy_from_slice(&block[..end - start]);
        }

        out
    }
}

impl<const N: usize> fmt::Debug for Prf<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prf")
            .field("key", &"**REDACTED**")
            .finish()
    }
}
