//! The server: the encrypted index plus the search and update protocol
//! engines.
//!
//! The server holds exactly two things -- the [`Edb`] and the public half of
//! the trapdoor permutation -- and learns nothing from the requests it
//! serves beyond the access pattern itself. A search walks the token chain
//! forwards, looks each derived token up, and unmasks whatever it finds;
//! an update is a single store insertion.

mod parallel;

pub use parallel::PipelineWidths;

use std::path::Path;
use tracing::{debug, error};

use crate::edb::Edb;
use crate::prf::Prf;
use crate::request::{derive_mask_word, derive_update_token, SearchRequest, UpdateRequest};
use crate::tdp::Tdp;
use crate::token::UPDATE_TOKEN_SIZE;
use crate::Error;

/// The keyword-search server.
pub struct Server {
    edb: Edb,
    tdp: Tdp,
}

impl Server {
    /// Create a server over a fresh store in `db_dir`, sized for
    /// `setup_size` entries, bound to the client's public key.
    ///
    /// # Errors
    ///
    /// Propagates store-creation failures ([`Error::Setup`], [`Error::Io`])
    /// and public-key parse failures ([`Error::KeyMaterial`]).
    pub fn setup(
        db_dir: impl AsRef<Path>,
        setup_size: usize,
        public_key: &[u8],
    ) -> Result<Self, Error> {
        Ok(Server {
            edb: Edb::open_new(
                db_dir,
                setup_size,
                UPDATE_TOKEN_SIZE,
                std::mem::size_of::<u64>(),
            )?,
            tdp: Tdp::from_public_key(public_key)?,
        })
    }

    /// Reopen a server over an existing store.
    ///
    /// # Errors
    ///
    /// Propagates store-open failures and public-key parse failures.
    pub fn open(db_dir: impl AsRef<Path>, public_key: &[u8]) -> Result<Self, Error> {
        Ok(Server {
            edb: Edb::open_existing(db_dir)?,
            tdp: Tdp::from_public_key(public_key)?,
        })
    }

    /// The public key the server evaluates the permutation with.
    #[must_use]
    pub fn public_key(&self) -> Vec<u8> {
        self.tdp.public_key()
    }

    /// Number of entries in the index.
    #[must_use]
    pub fn entries(&self) -> u64 {
        self.edb.entries()
    }

    /// Store one masked index. Returns whether the insertion stuck.
    #[must_use]
    pub fn update(&self, req: &UpdateRequest) -> bool {
        debug!("update: ({:x}, {:x})", req.token, req.index);
        self.edb.put(&req.token, req.index)
    }

    /// Execute a search and collect the matching indices.
    ///
    /// Result order is unspecified.
    #[must_use]
    pub fn search(&self, req: &SearchRequest) -> Vec<u64> {
        let mut results = Vec::new();
        self.search_callback(req, |index| results.push(index));
        results
    }

    /// Execute a search, handing each match to `emit` as it is found.
    ///
    /// A chain step whose token is missing from the store is logged and
    /// skipped; the rest of the chain is still walked. The whole search runs
    /// inside one read transaction, committed before returning.
    pub fn search_callback(&self, req: &SearchRequest, mut emit: impl FnMut(u64)) {
        debug!("search: {:?}, {} steps", req.token, req.add_count);

        let keyword_prf = Prf::<UPDATE_TOKEN_SIZE>::new(&req.derivation_key);
        let txn = self.edb.ro_transaction();

        let mut st = req.token.clone();
        for i in 0..req.add_count {
            let token = derive_update_token(&keyword_prf, &st);
            debug!("derived token: {token:x}");

            match txn.get(&token) {
                Some(masked) => emit(masked ^ derive_mask_word(&keyword_prf, &st)),
                None => error!("expected to find a value for the {i}-th derived token"),
            }

            st = self.tdp.eval(&st);
        }

        txn.commit();
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("edb", &self.edb)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::keyword_store::MemoryKeywordStore;
    use crate::tdp::TdpInverse;
    use crate::token::DERIVATION_KEY_SIZE;
    use once_cell::sync::Lazy;
    use tempfile::{tempdir, TempDir};

    pub(super) static CLIENT: Lazy<Client> = Lazy::new(|| {
        let tdp = TdpInverse::generate_with_modulus_bits(768).unwrap();
        Client::from_keys(&[0x21; DERIVATION_KEY_SIZE], &tdp.private_key()).unwrap()
    });

    pub(super) fn server(setup_size: usize) -> (TempDir, Server) {
        let dir = tempdir().unwrap();
        let server = Server::setup(dir.path(), setup_size, &CLIENT.public_key()).unwrap();
        (dir, server)
    }

    #[test]
    fn one_update_one_result() {
        let (_dir, server) = server(16);
        let store = MemoryKeywordStore::new();

        assert!(server.update(&CLIENT.update_request(&store, "cat", 0x1234_5678_9abc_def0)));

        let results = server.search(&CLIENT.search_request(&store, "cat"));
        assert_eq!(vec![0x1234_5678_9abc_def0], results);
    }

    #[test]
    fn keywords_do_not_bleed_into_each_other() {
        let (_dir, server) = server(16);
        let store = MemoryKeywordStore::new();

        for (keyword, index) in [("cat", 1), ("dog", 2), ("cat", 3)] {
            assert!(server.update(&CLIENT.update_request(&store, keyword, index)));
        }

        let mut cat = server.search(&CLIENT.search_request(&store, "cat"));
        cat.sort_unstable();
        assert_eq!(vec![1, 3], cat);
        assert_eq!(vec![2], server.search(&CLIENT.search_request(&store, "dog")));
        assert!(server.search(&CLIENT.search_request(&store, "fish")).is_empty());
    }

    #[test]
    fn empty_requests_do_no_lookups() {
        let (_dir, server) = server(16);

        let req = CLIENT.search_request(&MemoryKeywordStore::new(), "never");
        assert_eq!(0, req.add_count);
        assert!(server.search(&req).is_empty());
    }

    #[test]
    fn callback_sink_sees_every_match() {
        let (_dir, server) = server(16);
        let store = MemoryKeywordStore::new();
        for index in [10, 20, 30] {
            assert!(server.update(&CLIENT.update_request(&store, "cat", index)));
        }

        let mut seen = Vec::new();
        server.search_callback(&CLIENT.search_request(&store, "cat"), |index| {
            seen.push(index)
        });
        seen.sort_unstable();
        assert_eq!(vec![10, 20, 30], seen);
    }

    #[test]
    fn entries_counts_updates() {
        let (_dir, server) = server(16);
        let store = MemoryKeywordStore::new();

        assert_eq!(0, server.entries());
        for index in 0..5 {
            assert!(server.update(&CLIENT.update_request(&store, "cat", index)));
        }
        assert_eq!(5, server.entries());
    }
}
