//! The client: master keys, per-keyword derivations, and request
//! construction.

use std::fs;
use std::path::Path;
use tracing::debug;

use crate::keyword_store::{KeywordEntry, KeywordStore};
use crate::prf::Prf;
use crate::request::{derive_mask_word, derive_update_token, SearchRequest, UpdateRequest};
use crate::tdp::TdpInverse;
use crate::token::{SearchToken, DERIVATION_KEY_SIZE, SEARCH_TOKEN_SIZE, UPDATE_TOKEN_SIZE};
use crate::Error;

const TDP_SK_FILE: &str = "tdp_sk.key";
const DERIVATION_KEY_FILE: &str = "derivation_master.key";

/// Role tag appended to a keyword when deriving its PRF key.
const DERIVATION_KEY_TAG: u8 = b'K';
/// Role tag appended to a keyword when deriving its initial search token.
const INITIAL_TOKEN_TAG: u8 = b'T';

/// The keyword-search client.
///
/// Owns the two master secrets -- the PRF key every per-keyword key is
/// derived from, and the trapdoor of the permutation -- and turns keywords
/// into [`UpdateRequest`]s and [`SearchRequest`]s. The per-keyword
/// (token, counter) bookkeeping lives behind a [`KeywordStore`] supplied by
/// the caller.
pub struct Client {
    derivation_prf: Prf<DERIVATION_KEY_SIZE>,
    inverse_tdp: TdpInverse,
}

impl Client {
    /// Create a client with freshly generated keys.
    ///
    /// # Errors
    ///
    /// Propagates key-generation failures from the trapdoor permutation.
    pub fn setup() -> Result<Self, Error> {
        Ok(Client {
            derivation_prf: Prf::random(),
            inverse_tdp: TdpInverse::generate()?,
        })
    }

    /// Reassemble a client from raw key material.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::KeyMaterial`] if either key cannot be parsed.
    pub fn from_keys(derivation_master_key: &[u8], tdp_private_key: &[u8]) -> Result<Self, Error> {
        let master: [u8; DERIVATION_KEY_SIZE] =
            derivation_master_key.try_into().map_err(|_| {
                Error::KeyMaterial(format!(
                    "master derivation key must be {DERIVATION_KEY_SIZE} bytes, got {}",
                    derivation_master_key.len()
                ))
            })?;

        Ok(Client {
            derivation_prf: Prf::new(&master),
            inverse_tdp: TdpInverse::from_private_key(tdp_private_key)?,
        })
    }

    /// Reopen a client whose keys were persisted with
    /// [`Client::write_keys`].
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Io`] if either key file cannot be read and
    /// [`Error::KeyMaterial`] if its contents cannot be parsed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, Error> {
        let dir = dir.as_ref();
        let master = fs::read(dir.join(DERIVATION_KEY_FILE))?;
        let sk = fs::read(dir.join(TDP_SK_FILE))?;
        Self::from_keys(&master, &sk)
    }

    /// Persist the master keys into `dir`.
    ///
    /// Writes `tdp_sk.key` and `derivation_master.key`. Anyone who can read
    /// those files can decrypt the whole index, so `dir` had better be
    /// private.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Setup`] if `dir` is not a directory, and
    /// [`Error::Io`] if a file cannot be written.
    pub fn write_keys(&self, dir: impl AsRef<Path>) -> Result<(), Error> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(Error::Setup(format!("{}: not a directory", dir.display())));
        }

        fs::write(dir.join(TDP_SK_FILE), self.private_key())?;
        fs::write(dir.join(DERIVATION_KEY_FILE), self.master_key())?;
        Ok(())
    }

    /// The trapdoor permutation's public key, for server setup.
    #[must_use]
    pub fn public_key(&self) -> Vec<u8> {
        self.inverse_tdp.public_key()
    }

    /// The trapdoor permutation's private key blob.
    #[must_use]
    pub fn private_key(&self) -> Vec<u8> {
        self.inverse_tdp.private_key()
    }

    /// The master derivation key.
    #[must_use]
    pub fn master_key(&self) -> &[u8; DERIVATION_KEY_SIZE] {
        self.derivation_prf.key()
    }

    /// The PRF key under which `keyword`'s tokens and masks are derived.
    #[must_use]
    pub fn derivation_key(&self, keyword: &str) -> [u8; DERIVATION_KEY_SIZE] {
        self.derivation_prf.prf(&tagged(keyword, DERIVATION_KEY_TAG))
    }

    /// The search token `keyword` starts from, before any update.
    ///
    /// A 32-byte PRF output placed in the low end of the domain, so it is
    /// always a valid element regardless of the modulus in use.
    #[must_use]
    pub fn initial_search_token(&self, keyword: &str) -> SearchToken {
        let seed: [u8; DERIVATION_KEY_SIZE] =
            self.derivation_prf.prf(&tagged(keyword, INITIAL_TOKEN_TAG));

        let mut bytes = [0u8; SEARCH_TOKEN_SIZE];
        bytes[SEARCH_TOKEN_SIZE - DERIVATION_KEY_SIZE..].copy_from_slice(&seed);
        SearchToken::from_bytes(bytes)
    }

    /// Record one `(keyword, index)` pair: advance the keyword's state in
    /// `store` and build the request the server needs to store it.
    pub fn update_request(
        &self,
        store: &impl KeywordStore,
        keyword: &str,
        index: u64,
    ) -> UpdateRequest {
        let entry = store.get(keyword).unwrap_or_else(|| KeywordEntry {
            token: self.initial_search_token(keyword),
            count: 0,
        });

        let st_next = self.inverse_tdp.invert(&entry.token);

        let keyword_prf = Prf::<UPDATE_TOKEN_SIZE>::new(&self.derivation_key(keyword));
        let token = derive_update_token(&keyword_prf, &st_next);
        let mask = derive_mask_word(&keyword_prf, &st_next);

        store.set(
            keyword,
            KeywordEntry {
                token: st_next,
                count: entry.count + 1,
            },
        );

        debug!("update {}: token {token:x}", entry.count + 1);

        UpdateRequest {
            token,
            index: index ^ mask,
        }
    }

    /// Snapshot the keyword's state into a request the server can execute.
    ///
    /// A keyword that was never updated yields `add_count == 0`; the server
    /// will perform no lookups for it.
    pub fn search_request(&self, store: &impl KeywordStore, keyword: &str) -> SearchRequest {
        let entry = store.get(keyword).unwrap_or_else(|| KeywordEntry {
            token: self.initial_search_token(keyword),
            count: 0,
        });

        SearchRequest {
            derivation_key: self.derivation_key(keyword),
            token: entry.token,
            add_count: entry.count,
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("keys", &"**REDACTED**")
            .finish()
    }
}

/// `keyword ‖ tag`: the only composition used for per-keyword derivation.
fn tagged(keyword: &str, tag: u8) -> Vec<u8> {
    let mut input = Vec::with_capacity(keyword.len() + 1);
    input.extend_from_slice(keyword.as_bytes());
    input.push(tag);
    input
}
