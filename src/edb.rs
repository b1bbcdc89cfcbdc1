//! The server's encrypted database: a persistent map from update tokens to
//! masked indices.
//!
//! The store is a single memory-mapped file holding a linear-probed hash
//! table of fixed-width slots, plus a textual sidecar (`info.bin`) recording
//! the current map size. When an insertion finds the table full, the map is
//! grown by a fixed factor, the sidecar rewritten, and the insertion retried
//! exactly once -- the same recovery discipline as a map-full condition in an
//! mmap'd B-tree store, just with a rehash instead of an `ftruncate`.
//!
//! Readers and writers go through scoped transactions. A write transaction
//! stages its slots and applies them on commit; dropping it without
//! committing discards the staged writes. Read transactions see whatever was
//! committed when they began (the store takes a read lock for their whole
//! lifetime, so a searcher holds a consistent snapshot).

use memmap2::{Advice, MmapMut, MmapOptions};
use std::fs::{self, DirBuilder, OpenOptions};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info};

use crate::token::{UpdateToken, UPDATE_TOKEN_SIZE};
use crate::Error;

/// Growth factor applied to the map when an insertion finds it full.
const EDB_SIZE_INCREASE_STEP: f64 = 0.2;

const DATA_DIR: &str = "data";
const STORE_FILE: &str = "edb.bin";
const STORE_TMP_FILE: &str = "edb.bin.new";
const METADATA_FILE: &str = "info.bin";

const MAGIC: &[u8; 8] = b"SEALDEX\0";
/// magic ‖ key_size (u32 le) ‖ data_size (u32 le) ‖ entry_count (u64 le)
const HEADER_SIZE: usize = 24;

const STATE_EMPTY: u8 = 0;
const STATE_OCCUPIED: u8 = 1;
const STATE_TOMBSTONE: u8 = 2;

const DATA_DIR_MODE: u32 = 0o700;
const STORE_FILE_MODE: u32 = 0o644;

/// Returned by [`WriteTransaction::put`] when no free slot exists at the
/// current map size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreFull;

/// The persistent update-token → masked-index store.
pub struct Edb {
    inner: RwLock<StoreInner>,
}

struct StoreInner {
    map: MmapMut,
    dir: PathBuf,
    map_size: u64,
    slot_count: u64,
    key_size: usize,
    data_size: usize,
    entry_count: u64,
}

impl Edb {
    /// Create a fresh store under `dir`.
    ///
    /// `setup_size` is the number of entries the initial map is sized for;
    /// the map occupies `setup_size × (key_size + data_size)` bytes and the
    /// sidecar records that figure. The data subdirectory is created mode
    /// 0700 and must not already exist.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Setup`] if `dir` is not a directory, the data
    /// subdirectory already exists, or the geometry is unusable, and with
    /// [`Error::Io`] on filesystem failures.
    pub fn open_new(
        dir: impl AsRef<Path>,
        setup_size: usize,
        key_size: usize,
        data_size: usize,
    ) -> Result<Self, Error> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(Error::Setup(format!("{}: not a directory", dir.display())));
        }
        if key_size != UPDATE_TOKEN_SIZE || data_size != std::mem::size_of::<u64>() {
            return Err(Error::Setup(format!(
                "unsupported store geometry: {key_size}+{data_size} byte slots"
            )));
        }
        if setup_size == 0 {
            return Err(Error::Setup("setup size must be non-zero".to_string()));
        }

        let data_path = dir.join(DATA_DIR);
        if data_path.exists() {
            return Err(Error::Setup(format!(
                "file or directory already exists at {}",
                data_path.display()
            )));
        }
        DirBuilder::new()
            .mode(DATA_DIR_MODE)
            .create(&data_path)
            .map_err(|e| {
                Error::Setup(format!(
                    "{}: unable to create directory: {e}",
                    data_path.display()
                ))
            })?;

        let slot_bytes = key_size + data_size;
        let map_size = (setup_size * slot_bytes) as u64;
        let slot_count = slot_count_for(map_size, slot_bytes);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(STORE_FILE_MODE)
            .open(data_path.join(STORE_FILE))?;
        file.set_len(file_len(slot_count, slot_bytes))?;

        // The store file is created, resized and written only through this
        // handle; nothing else maps it.
        let mut map = unsafe { MmapOptions::new().map_mut(&file)? };
        map.advise(Advice::Random)?;
        write_header(&mut map, key_size, data_size, 0);
        map.flush()?;

        write_metadata(dir, map_size).map_err(|e| {
            Error::Setup(format!("unable to write the store metadata: {e}"))
        })?;

        Ok(Edb {
            inner: RwLock::new(StoreInner {
                map,
                dir: dir.to_path_buf(),
                map_size,
                slot_count,
                key_size,
                data_size,
                entry_count: 0,
            }),
        })
    }

    /// Reopen a store previously created with [`Edb::open_new`].
    ///
    /// The map size is taken from the sidecar, which is authoritative.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Setup`] if the sidecar is missing, with
    /// [`Error::Store`] if the store file does not match the sidecar's
    /// geometry, and with [`Error::Io`] on filesystem failures.
    pub fn open_existing(dir: impl AsRef<Path>) -> Result<Self, Error> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(Error::Setup(format!("{}: not a directory", dir.display())));
        }

        let md_path = dir.join(METADATA_FILE);
        if !md_path.is_file() {
            return Err(Error::Setup(format!(
                "missing metadata file at {}",
                md_path.display()
            )));
        }
        let map_size: u64 = fs::read_to_string(&md_path)?
            .trim()
            .parse()
            .map_err(|e| Error::Store(format!("{}: unreadable map size: {e}", md_path.display())))?;

        let store_path = dir.join(DATA_DIR).join(STORE_FILE);
        let file = OpenOptions::new().read(true).write(true).open(&store_path)?;

        // See open_new for why this mapping is sound.
        let map = unsafe { MmapOptions::new().map_mut(&file)? };
        map.advise(Advice::Random)?;

        if map.len() < HEADER_SIZE || &map[..8] != MAGIC {
            return Err(Error::Store(format!(
                "{}: not a store file",
                store_path.display()
            )));
        }
        let key_size = u32::from_le_bytes([map[8], map[9], map[10], map[11]]) as usize;
        let data_size = u32::from_le_bytes([map[12], map[13], map[14], map[15]]) as usize;
        let entry_count = u64::from_le_bytes([
            map[16], map[17], map[18], map[19], map[20], map[21], map[22], map[23],
        ]);

        if key_size != UPDATE_TOKEN_SIZE || data_size != std::mem::size_of::<u64>() {
            return Err(Error::Store(format!(
                "{}: unsupported slot geometry {key_size}+{data_size}",
                store_path.display()
            )));
        }

        let slot_bytes = key_size + data_size;
        let slot_count = slot_count_for(map_size, slot_bytes);
        if map.len() as u64 != file_len(slot_count, slot_bytes) {
            return Err(Error::Store(format!(
                "{}: store length disagrees with the recorded map size",
                store_path.display()
            )));
        }

        Ok(Edb {
            inner: RwLock::new(StoreInner {
                map,
                dir: dir.to_path_buf(),
                map_size,
                slot_count,
                key_size,
                data_size,
                entry_count,
            }),
        })
    }

    /// Begin a read-only transaction.
    pub fn ro_transaction(&self) -> ReadTransaction<'_> {
        ReadTransaction {
            inner: self.inner.read().unwrap_or_else(PoisonError::into_inner),
            committed: false,
        }
    }

    /// Begin a read-write transaction. Writers are serialised; at most one
    /// is active at a time.
    pub fn rw_transaction(&self) -> WriteTransaction<'_> {
        WriteTransaction {
            inner: self.inner.write().unwrap_or_else(PoisonError::into_inner),
            staged: Vec::new(),
            committed: false,
        }
    }

    /// Insert `index` under `token`, growing the map if it is full.
    ///
    /// Growth happens at most once per call: a second map-full in a row is
    /// reported as failure, as is any commit error. Inserting an existing
    /// token overwrites its value.
    #[must_use]
    pub fn put(&self, token: &UpdateToken, index: u64) -> bool {
        {
            let mut txn = self.rw_transaction();
            match txn.put(token, index) {
                Ok(()) => {
                    return match txn.commit() {
                        Ok(()) => true,
                        Err(e) => {
                            error!("error during store put: {e}");
                            false
                        }
                    }
                }
                Err(StoreFull) => txn.abort(),
            }
        }

        if let Err(e) = self.resize() {
            error!("unable to resize the store: {e}");
            return false;
        }

        let mut txn = self.rw_transaction();
        match txn.put(token, index) {
            Ok(()) => match txn.commit() {
                Ok(()) => true,
                Err(e) => {
                    error!("unable to replay the insertion after a resize: {e}");
                    false
                }
            },
            Err(StoreFull) => {
                error!("store still full after a resize");
                false
            }
        }
    }

    /// Remove `token`'s entry, if present. Returns whether anything was
    /// removed.
    ///
    /// Not part of the update protocol -- the index only ever grows -- but
    /// operators do lose entries out-of-band, and tests need to simulate
    /// exactly that.
    #[must_use]
    pub fn delete(&self, token: &UpdateToken) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        let Some(slot) = find_slot(&inner, token.as_bytes()) else {
            return false;
        };
        inner.set_state(slot, STATE_TOMBSTONE);
        let count = inner.entry_count - 1;
        inner.set_entry_count(count);
        if let Err(e) = inner.map.flush() {
            error!("error while flushing a deletion: {e}");
        }
        debug!("deleted entry for {token:x}");
        true
    }

    /// Number of live entries.
    pub fn entries(&self) -> u64 {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entry_count
    }

    /// Current map size in bytes -- the figure recorded in the sidecar.
    pub fn map_size(&self) -> u64 {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .map_size
    }

    /// Grow the map by the fixed factor and rewrite the sidecar.
    ///
    /// Returns the result of the sidecar write.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] if the grown store or the sidecar cannot be written.
    pub fn resize(&self) -> Result<(), Error> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        resize_locked(&mut inner)
    }
}

impl std::fmt::Debug for Edb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Edb")
            .field("dir", &inner.dir)
            .field("map_size", &inner.map_size)
            .field("entries", &inner.entry_count)
            .finish()
    }
}

/// A consistent read snapshot of the store.
///
/// Holds the store's read lock for its whole lifetime, so writers wait until
/// it is committed or dropped.
pub struct ReadTransaction<'a> {
    inner: RwLockReadGuard<'a, StoreInner>,
    committed: bool,
}

impl ReadTransaction<'_> {
    /// Look up the value stored under `token`.
    pub fn get(&self, token: &UpdateToken) -> Option<u64> {
        find_slot(&self.inner, token.as_bytes()).map(|slot| self.inner.value_at(slot))
    }

    /// Finish the transaction.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for ReadTransaction<'_> {
    fn drop(&mut self) {
        if !self.committed {
            debug!("read transaction dropped without commit");
        }
    }
}

struct Staged {
    slot: u64,
    token: UpdateToken,
    value: u64,
    fresh: bool,
}

/// A batch of writes that land atomically on commit.
pub struct WriteTransaction<'a> {
    inner: RwLockWriteGuard<'a, StoreInner>,
    staged: Vec<Staged>,
    committed: bool,
}

impl WriteTransaction<'_> {
    /// Stage an insertion. Staged writes are invisible to readers until
    /// [`WriteTransaction::commit`].
    ///
    /// # Errors
    ///
    /// [`StoreFull`] if no slot is free at the current map size.
    pub fn put(&mut self, token: &UpdateToken, index: u64) -> Result<(), StoreFull> {
        if let Some(staged) = self.staged.iter_mut().find(|s| s.token == *token) {
            staged.value = index;
            return Ok(());
        }

        let slot_count = self.inner.slot_count;
        let bucket = bucket_for(token.as_bytes(), slot_count);
        // First tombstone seen along the probe path; used only if the key
        // turns out not to be present further along.
        let mut fallback: Option<u64> = None;

        for step in 0..slot_count {
            let slot = (bucket + step) % slot_count;
            let claimed = self.staged.iter().any(|s| s.slot == slot);

            match self.inner.state(slot) {
                STATE_OCCUPIED => {
                    if self.inner.key_at(slot) == token.as_bytes() {
                        self.staged.push(Staged {
                            slot,
                            token: *token,
                            value: index,
                            fresh: false,
                        });
                        return Ok(());
                    }
                }
                STATE_EMPTY if !claimed => {
                    self.staged.push(Staged {
                        slot: fallback.unwrap_or(slot),
                        token: *token,
                        value: index,
                        fresh: true,
                    });
                    return Ok(());
                }
                _ => {
                    if !claimed && fallback.is_none() && self.inner.state(slot) == STATE_TOMBSTONE
                    {
                        fallback = Some(slot);
                    }
                }
            }
        }

        if let Some(slot) = fallback {
            self.staged.push(Staged {
                slot,
                token: *token,
                value: index,
                fresh: true,
            });
            return Ok(());
        }
        Err(StoreFull)
    }

    /// Apply the staged writes and flush the map.
    ///
    /// # Errors
    ///
    /// [`Error::Transaction`] if the flush fails.
    pub fn commit(mut self) -> Result<(), Error> {
        let staged = std::mem::take(&mut self.staged);
        let fresh = staged.iter().filter(|s| s.fresh).count() as u64;

        for s in &staged {
            self.inner.write_slot(s.slot, &s.token, s.value);
        }
        if fresh > 0 {
            let count = self.inner.entry_count + fresh;
            self.inner.set_entry_count(count);
        }
        self.inner
            .map
            .flush()
            .map_err(|e| Error::Transaction(format!("commit failed: {e}")))?;

        self.committed = true;
        Ok(())
    }

    /// Discard the staged writes.
    pub fn abort(mut self) {
        self.staged.clear();
        self.committed = true;
        debug!("write transaction aborted");
    }
}

impl Drop for WriteTransaction<'_> {
    fn drop(&mut self) {
        if !self.committed && !self.staged.is_empty() {
            debug!(
                "write transaction dropped without commit; discarding {} staged writes",
                self.staged.len()
            );
        }
    }
}

impl StoreInner {
    fn slot_bytes(&self) -> usize {
        self.key_size + self.data_size
    }

    fn state(&self, slot: u64) -> u8 {
        self.map[HEADER_SIZE + slot as usize]
    }

    fn set_state(&mut self, slot: u64, state: u8) {
        self.map[HEADER_SIZE + slot as usize] = state;
    }

    fn slot_offset(&self, slot: u64) -> usize {
        HEADER_SIZE + self.slot_count as usize + slot as usize * self.slot_bytes()
    }

    fn key_at(&self, slot: u64) -> &[u8] {
        let off = self.slot_offset(slot);
        &self.map[off..off + self.key_size]
    }

    fn value_at(&self, slot: u64) -> u64 {
        let off = self.slot_offset(slot) + self.key_size;
        let mut word = [0u8; 8];
        word.copy_from_slice(&self.map[off..off + 8]);
        u64::from_le_bytes(word)
    }

    fn write_slot(&mut self, slot: u64, token: &UpdateToken, value: u64) {
        self.set_state(slot, STATE_OCCUPIED);
        let off = self.slot_offset(slot);
        self.map[off..off + self.key_size].copy_from_slice(token.as_bytes());
        let voff = off + self.key_size;
        self.map[voff..voff + self.data_size].copy_from_slice(&value.to_le_bytes());
    }

    fn set_entry_count(&mut self, count: u64) {
        self.entry_count = count;
        self.map[16..24].copy_from_slice(&count.to_le_bytes());
    }
}

/// Probe for the slot holding `key`. `None` once an empty slot ends the
/// chain.
fn find_slot(inner: &StoreInner, key: &[u8]) -> Option<u64> {
    let slot_count = inner.slot_count;
    let bucket = bucket_for(key, slot_count);

    for step in 0..slot_count {
        let slot = (bucket + step) % slot_count;
        match inner.state(slot) {
            STATE_EMPTY => return None,
            STATE_OCCUPIED if inner.key_at(slot) == key => return Some(slot),
            _ => {}
        }
    }
    None
}

/// Tokens are PRF outputs, so their leading bytes are already uniform
/// enough to serve as the bucket hash.
fn bucket_for(key: &[u8], slot_count: u64) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&key[..8]);
    u64::from_le_bytes(word) % slot_count
}

fn slot_count_for(map_size: u64, slot_bytes: usize) -> u64 {
    let slot_bytes = slot_bytes as u64;
    (map_size + slot_bytes - 1) / slot_bytes
}

fn file_len(slot_count: u64, slot_bytes: usize) -> u64 {
    HEADER_SIZE as u64 + slot_count + slot_count * slot_bytes as u64
}

fn write_header(map: &mut MmapMut, key_size: usize, data_size: usize, entry_count: u64) {
    map[..8].copy_from_slice(MAGIC);
    map[8..12].copy_from_slice(&(key_size as u32).to_le_bytes());
    map[12..16].copy_from_slice(&(data_size as u32).to_le_bytes());
    map[16..24].copy_from_slice(&entry_count.to_le_bytes());
}

fn write_metadata(dir: &Path, map_size: u64) -> Result<(), Error> {
    fs::write(dir.join(METADATA_FILE), format!("{map_size}\n"))?;
    Ok(())
}

fn resize_locked(inner: &mut StoreInner) -> Result<(), Error> {
    let slot_bytes = inner.slot_bytes();
    // Growth rounds up, and a map small enough that 20% is less than one
    // slot still gains a slot, or the retried insertion would fail again.
    let grown = inner.map_size + (inner.map_size as f64 * EDB_SIZE_INCREASE_STEP).ceil() as u64;
    let new_map_size = grown.max((inner.slot_count + 1) * slot_bytes as u64);
    let new_slot_count = slot_count_for(new_map_size, slot_bytes);

    info!(
        "resizing the store map: {} -> {} bytes",
        inner.map_size, new_map_size
    );

    let data_dir = inner.dir.join(DATA_DIR);
    let tmp_path = data_dir.join(STORE_TMP_FILE);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .mode(STORE_FILE_MODE)
        .open(&tmp_path)?;
    file.set_len(file_len(new_slot_count, slot_bytes))?;

    // See open_new for why this mapping is sound.
    let mut map = unsafe { MmapOptions::new().map_mut(&file)? };
    map.advise(Advice::Random)?;
    write_header(&mut map, inner.key_size, inner.data_size, inner.entry_count);

    // Rehash every live entry into the wider table. A freshly zeroed file
    // means every new slot starts EMPTY.
    for slot in 0..inner.slot_count {
        if inner.state(slot) != STATE_OCCUPIED {
            continue;
        }
        let key = inner.key_at(slot);
        let bucket = bucket_for(key, new_slot_count);

        for step in 0..new_slot_count {
            let target = (bucket + step) % new_slot_count;
            let state_off = HEADER_SIZE + target as usize;
            if map[state_off] != STATE_EMPTY {
                continue;
            }
            map[state_off] = STATE_OCCUPIED;
            let off = HEADER_SIZE + new_slot_count as usize + target as usize * slot_bytes;
            map[off..off + slot_bytes]
                .copy_from_slice(&inner.map[inner.slot_offset(slot)..inner.slot_offset(slot) + slot_bytes]);
            break;
        }
    }

    map.flush()?;
    fs::rename(&tmp_path, data_dir.join(STORE_FILE))?;

    inner.map = map;
    inner.map_size = new_map_size;
    inner.slot_count = new_slot_count;

    write_metadata(&inner.dir, new_map_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use std::mem::size_of;
    use tempfile::{tempdir, TempDir};

    fn open_small(setup_size: usize) -> (TempDir, Edb) {
        let dir = tempdir().unwrap();
        let edb = Edb::open_new(dir.path(), setup_size, UPDATE_TOKEN_SIZE, size_of::<u64>())
            .unwrap();
        (dir, edb)
    }

    fn token(seed: u64) -> UpdateToken {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let mut bytes = [0u8; UPDATE_TOKEN_SIZE];
        rng.fill_bytes(&mut bytes);
        UpdateToken::from_bytes(bytes)
    }

    #[test]
    fn open_new_rejects_a_missing_directory() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nowhere");

        assert!(matches!(
            Edb::open_new(&missing, 4, UPDATE_TOKEN_SIZE, size_of::<u64>()),
            Err(Error::Setup(_))
        ));
    }

    #[test]
    fn open_new_rejects_an_existing_data_directory() {
        let (dir, edb) = open_small(4);
        drop(edb);

        assert!(matches!(
            Edb::open_new(dir.path(), 4, UPDATE_TOKEN_SIZE, size_of::<u64>()),
            Err(Error::Setup(_))
        ));
    }

    #[test]
    fn open_new_writes_the_sidecar() {
        let (dir, _edb) = open_small(4);

        let sidecar = std::fs::read_to_string(dir.path().join(METADATA_FILE)).unwrap();
        assert_eq!("96\n", sidecar);
    }

    #[test]
    fn open_existing_requires_the_sidecar() {
        let dir = tempdir().unwrap();

        assert!(matches!(
            Edb::open_existing(dir.path()),
            Err(Error::Setup(_))
        ));
    }

    #[test]
    fn put_then_get() {
        let (_dir, edb) = open_small(8);

        assert!(edb.put(&token(1), 0xdead_beef));

        let txn = edb.ro_transaction();
        assert_eq!(Some(0xdead_beef), txn.get(&token(1)));
        assert_eq!(None, txn.get(&token(2)));
        txn.commit();
    }

    #[test]
    fn last_write_wins() {
        let (_dir, edb) = open_small(8);

        assert!(edb.put(&token(1), 1));
        assert!(edb.put(&token(1), 2));

        let txn = edb.ro_transaction();
        assert_eq!(Some(2), txn.get(&token(1)));
        txn.commit();

        assert_eq!(1, edb.entries());
    }

    #[test]
    fn growth_preserves_every_entry() {
        let (dir, edb) = open_small(2);
        let initial_size = edb.map_size();

        for i in 0..50u64 {
            assert!(edb.put(&token(i), i * 10), "put {i} failed");
        }

        assert_eq!(50, edb.entries());
        assert!(edb.map_size() > initial_size);

        // Sidecar and live size must agree after growth.
        let sidecar: u64 = std::fs::read_to_string(dir.path().join(METADATA_FILE))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert_eq!(edb.map_size(), sidecar);

        let txn = edb.ro_transaction();
        for i in 0..50u64 {
            assert_eq!(Some(i * 10), txn.get(&token(i)), "entry {i} lost");
        }
        txn.commit();
    }

    #[test]
    fn reopen_sees_committed_entries() {
        let (dir, edb) = open_small(4);
        for i in 0..20u64 {
            assert!(edb.put(&token(i), i));
        }
        let size_before = edb.map_size();
        drop(edb);

        let edb = Edb::open_existing(dir.path()).unwrap();
        assert_eq!(size_before, edb.map_size());
        assert_eq!(20, edb.entries());

        let txn = edb.ro_transaction();
        for i in 0..20u64 {
            assert_eq!(Some(i), txn.get(&token(i)));
        }
        txn.commit();
    }

    #[test]
    fn delete_removes_a_single_entry() {
        let (_dir, edb) = open_small(8);
        assert!(edb.put(&token(1), 1));
        assert!(edb.put(&token(2), 2));

        assert!(edb.delete(&token(1)));
        assert!(!edb.delete(&token(1)));

        let txn = edb.ro_transaction();
        assert_eq!(None, txn.get(&token(1)));
        assert_eq!(Some(2), txn.get(&token(2)));
        txn.commit();

        assert_eq!(1, edb.entries());
    }

    #[test]
    fn deleted_slots_are_reusable() {
        let (_dir, edb) = open_small(2);
        assert!(edb.put(&token(1), 1));
        assert!(edb.put(&token(2), 2));
        assert!(edb.delete(&token(1)));

        // The tombstoned slot must be claimable without a resize.
        let size_before = edb.map_size();
        assert!(edb.put(&token(3), 3));
        assert_eq!(size_before, edb.map_size());

        let txn = edb.ro_transaction();
        assert_eq!(Some(2), txn.get(&token(2)));
        assert_eq!(Some(3), txn.get(&token(3)));
        txn.commit();
    }

    #[test]
    fn dropped_transactions_discard_their_writes() {
        let (_dir, edb) = open_small(8);

        let mut txn = edb.rw_transaction();
        txn.put(&token(1), 1).unwrap();
        drop(txn);

        let txn = edb.ro_transaction();
        assert_eq!(None, txn.get(&token(1)));
        txn.commit();
        assert_eq!(0, edb.entries());
    }

    #[test]
    fn a_full_transaction_reports_store_full() {
        let (_dir, edb) = open_small(2);

        let mut txn = edb.rw_transaction();
        txn.put(&token(1), 1).unwrap();
        txn.put(&token(2), 2).unwrap();
        assert_eq!(Err(StoreFull), txn.put(&token(3), 3));
        txn.commit().unwrap();
    }

    #[test]
    fn concurrent_readers_see_a_stable_snapshot() {
        let (_dir, edb) = open_small(64);
        for i in 0..32u64 {
            assert!(edb.put(&token(i), i));
        }

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let txn = edb.ro_transaction();
                    for i in 0..32u64 {
                        assert_eq!(Some(i), txn.get(&token(i)));
                    }
                    txn.commit();
                });
            }
        });
    }

    quickcheck! {
        fn any_token_round_trips(seed: u64, value: u64) -> bool {
            let (_dir, edb) = open_small(4);

            let t = token(seed);
            let stored = edb.put(&t, value);

            let txn = edb.ro_transaction();
            let got = txn.get(&t);
            txn.commit();

            stored && got == Some(value)
        }
    }
}
