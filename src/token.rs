//! The fixed-size byte strings that cross the client/server boundary.
//!
//! Sizes are design parameters of a database: once a store has been created
//! with them, they must never change for its lifetime.

use std::fmt;

use crate::Error;

/// Width of a search token, in bytes. This is the byte width of the trapdoor
/// permutation's domain (an RSA-2048 modulus).
pub const SEARCH_TOKEN_SIZE: usize = 256;

/// Width of an update token, in bytes.
pub const UPDATE_TOKEN_SIZE: usize = 16;

/// Width of a PRF key, in bytes.
pub const DERIVATION_KEY_SIZE: usize = 32;

/// Suffix byte appended to a search token when deriving the update token
/// stored as the index key.
pub(crate) const CHAIN_TOKEN_TAG: u8 = b'0';

/// Suffix byte appended to a search token when deriving the mask applied to
/// the stored index.
pub(crate) const CHAIN_MASK_TAG: u8 = b'1';

/// An element of the trapdoor permutation's domain, big-endian.
///
/// The client derives the initial token for a keyword from its master key,
/// then steps it backwards through the permutation once per update. A search
/// ships the newest token to the server, which walks it forwards to recover
/// every token that came before it.
#[derive(Clone, PartialEq, Eq)]
pub struct SearchToken([u8; SEARCH_TOKEN_SIZE]);

impl SearchToken {
    /// Wrap a raw domain element.
    #[must_use]
    pub fn from_bytes(bytes: [u8; SEARCH_TOKEN_SIZE]) -> Self {
        SearchToken(bytes)
    }

    /// Parse a token from a byte slice of exactly [`SEARCH_TOKEN_SIZE`] bytes.
    ///
    /// # Errors
    ///
    /// Fails if the slice has the wrong length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != SEARCH_TOKEN_SIZE {
            return Err(Error::Parse(format!(
                "search token must be {SEARCH_TOKEN_SIZE} bytes, got {}",
                bytes.len()
            )));
        }

        let mut out = [0u8; SEARCH_TOKEN_SIZE];
        out.copy_from_slice(bytes);
        Ok(SearchToken(out))
    }

    /// The raw domain element.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SEARCH_TOKEN_SIZE] {
        &self.0
    }

    /// The token followed by a single role-tag byte, the only PRF input
    /// composition the protocol uses.
    pub(crate) fn chain_input(&self, tag: u8) -> [u8; SEARCH_TOKEN_SIZE + 1] {
        let mut input = [0u8; SEARCH_TOKEN_SIZE + 1];
        input[..SEARCH_TOKEN_SIZE].copy_from_slice(&self.0);
        input[SEARCH_TOKEN_SIZE] = tag;
        input
    }
}

impl fmt::Debug for SearchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The full 256 bytes would drown a log line; the leading bytes are
        // plenty to tell two tokens apart.
        write!(f, "SearchToken(")?;
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "…)")
    }
}

impl fmt::LowerHex for SearchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// The opaque key under which one masked index is stored in the encrypted
/// database.
///
/// Derived as `PRF(search_token ‖ '0')` under the keyword's derivation key;
/// to anyone without that key it is indistinguishable from random bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpdateToken([u8; UPDATE_TOKEN_SIZE]);

impl UpdateToken {
    /// Wrap a raw token.
    #[must_use]
    pub fn from_bytes(bytes: [u8; UPDATE_TOKEN_SIZE]) -> Self {
        UpdateToken(bytes)
    }

    /// Parse a token from a byte slice of exactly [`UPDATE_TOKEN_SIZE`] bytes.
    ///
    /// # Errors
    ///
    /// Fails if the slice has the wrong length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != UPDATE_TOKEN_SIZE {
            return Err(Error::Parse(format!(
                "update token must be {UPDATE_TOKEN_SIZE} bytes, got {}",
                bytes.len()
            )));
        }

        let mut out = [0u8; UPDATE_TOKEN_SIZE];
        out.copy_from_slice(bytes);
        Ok(UpdateToken(out))
    }

    /// The raw token bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; UPDATE_TOKEN_SIZE] {
        &self.0
    }
}

impl fmt::Debug for UpdateToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UpdateToken({:x})", self)
    }
}

impl fmt::LowerHex for UpdateToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_token_round_trips_through_slice() {
        let mut bytes = [0u8; SEARCH_TOKEN_SIZE];
        bytes[0] = 0xab;
        bytes[255] = 0xcd;

        let token = SearchToken::from_slice(&bytes).unwrap();
        assert_eq!(&bytes, token.as_bytes());
    }

    #[test]
    fn short_slice_is_rejected() {
        assert!(SearchToken::from_slice(&[0u8; 17]).is_err());
        assert!(UpdateToken::from_slice(&[0u8; 17]).is_err());
    }

    #[test]
    fn chain_input_appends_exactly_one_tag_byte() {
        let token = SearchToken::from_bytes([0x5a; SEARCH_TOKEN_SIZE]);
        let input = token.chain_input(CHAIN_TOKEN_TAG);

        assert_eq!(input.len(), SEARCH_TOKEN_SIZE + 1);
        assert_eq!(&input[..SEARCH_TOKEN_SIZE], token.as_bytes());
        assert_eq!(input[SEARCH_TOKEN_SIZE], b'0');
    }

    #[test]
    fn debug_output_is_abbreviated() {
        let token = SearchToken::from_bytes([0xff; SEARCH_TOKEN_SIZE]);
        let debugged = format!("{token:?}");

        assert!(debugged.len() < 40);
        assert!(debugged.starts_with("SearchToken(ffff"));
    }
}
