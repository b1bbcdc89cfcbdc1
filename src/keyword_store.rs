//! The client's per-keyword bookkeeping.
//!
//! The core protocol needs somewhere to remember, for each keyword, the
//! current search token and how many updates have been issued. Where that
//! mapping lives -- an embedded database, a remote service, a file -- is the
//! caller's business, so the client only asks for this trait. Implementations
//! must make the read-update-write sequence of a single update atomic per
//! keyword; a coarse lock is fine.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::token::SearchToken;

/// What the client remembers about one keyword.
#[derive(Clone, Debug)]
pub struct KeywordEntry {
    /// The keyword's current search token.
    pub token: SearchToken,
    /// How many updates have been issued for the keyword.
    pub count: u64,
}

/// Per-keyword state storage, provided by the caller.
pub trait KeywordStore {
    /// Look up a keyword's entry. `None` if the keyword has never been
    /// updated.
    fn get(&self, keyword: &str) -> Option<KeywordEntry>;

    /// Store a keyword's entry, replacing any previous one.
    fn set(&self, keyword: &str, entry: KeywordEntry);

    /// Every keyword with an entry.
    fn keywords(&self) -> Vec<String>;
}

/// An in-memory [`KeywordStore`].
///
/// One mutex over the whole map, which trivially satisfies the per-keyword
/// atomicity requirement. Nothing is persisted; real deployments will want
/// an implementation that writes through to disk.
#[derive(Debug, Default)]
pub struct MemoryKeywordStore {
    entries: Mutex<HashMap<String, KeywordEntry>>,
}

impl MemoryKeywordStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeywordStore for MemoryKeywordStore {
    fn get(&self, keyword: &str) -> Option<KeywordEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(keyword)
            .cloned()
    }

    fn set(&self, keyword: &str, entry: KeywordEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(keyword.to_string(), entry);
    }

    fn keywords(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::SEARCH_TOKEN_SIZE;

    fn entry(count: u64) -> KeywordEntry {
        KeywordEntry {
            token: SearchToken::from_bytes([count as u8; SEARCH_TOKEN_SIZE]),
            count,
        }
    }

    #[test]
    fn unknown_keywords_are_absent() {
        assert!(MemoryKeywordStore::new().get("nope").is_none());
    }

    #[test]
    fn set_then_get() {
        let store = MemoryKeywordStore::new();
        store.set("cat", entry(3));

        let got = store.get("cat").unwrap();
        assert_eq!(3, got.count);
        assert_eq!(entry(3).token, got.token);
    }

    #[test]
    fn set_replaces() {
        let store = MemoryKeywordStore::new();
        store.set("cat", entry(1));
        store.set("cat", entry(2));

        assert_eq!(2, store.get("cat").unwrap().count);
    }

    #[test]
    fn keywords_lists_everything_once() {
        let store = MemoryKeywordStore::new();
        store.set("cat", entry(1));
        store.set("dog", entry(1));
        store.set("cat", entry(2));

        let mut keywords = store.keywords();
        keywords.sort();
        assert_eq!(vec!["cat", "dog"], keywords);
    }
}
