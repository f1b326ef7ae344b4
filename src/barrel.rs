//! The Bitcask engine: an active data file, a set of stale data files, and a keydir, under a
//! single writer mutex, with background rotation/sync/compaction workers.
//!
//! The split mirrors the teacher's `Bitcask`/`Handle` pair: a writer path serialized behind
//! `parking_lot::Mutex<Writer>`, and a pool of readers (`crossbeam::queue::ArrayQueue`) that
//! each keep a thread-local cache of opened data files so concurrent `get`s never contend with
//! the writer or each other beyond the lock-free `DashMap`-backed keydir lookup.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use crossbeam::utils::Backoff;
use dashmap::DashSet;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::codec::{self, HEADER_SIZE};
use crate::datafile::{self, DataFile};
use crate::error::{Error, Result};
use crate::keydir::{KeyDir, KeyDirEntry};
use crate::options::Options;
use crate::shutdown::Shutdown;

const LOCK_FILE: &str = "barrel.lock";
const HINTS_FILE: &str = "barrel.hints";
const HINTS_TMP_FILE: &str = "barrel.hints.tmp";

/// A handle to an open Bitcask-model store. Cheaply `Clone`-able; every clone shares the same
/// underlying files, keydir, and writer lock.
#[derive(Clone)]
pub struct Barrel(Arc<Inner>);

struct Inner {
    opts: Options,
    path: PathBuf,
    keydir: KeyDir,
    writer: Mutex<Writer>,
    readers: ArrayQueue<ReaderHandle>,
    /// File ids removed from disk by a past compaction. Every reader checks this before serving
    /// a read and evicts any of its own cached handles for these ids; mirrors the teacher's
    /// `Context.merged` + `readers.drop(merged)` pair. Accumulates for the life of the instance,
    /// same as the teacher's set, since the only cost of a stale entry is a cheap no-op removal
    /// on a reader's local cache.
    compacted_ids: DashSet<u64>,
    closed: AtomicBool,
    notify_shutdown: Mutex<Option<broadcast::Sender<()>>>,
}

/// State touched only while the writer lock is held: the active file, the id allocator, and
/// the full set of on-disk file ids (needed so compaction knows which ids are stale).
///
/// `active` is `None` only for a read-only instance opened against an empty directory, where
/// there is nothing to append to and nothing ever will be; every mutating path is already
/// rejected by [`Barrel::ensure_writable`] before it would need to unwrap this.
struct Writer {
    active: Option<DataFile>,
    active_fileid: u64,
    next_fileid: u64,
    all_fileids: BTreeSet<u64>,
}

impl Writer {
    fn active_mut(&mut self) -> &mut DataFile {
        self.active
            .as_mut()
            .expect("write path reached with no active file; ensure_writable should have rejected this read-only instance")
    }

    fn active_ref(&self) -> &DataFile {
        self.active
            .as_ref()
            .expect("write path reached with no active file; ensure_writable should have rejected this read-only instance")
    }
}

/// A reader's thread-local cache of opened (read-only) data files, pulled from the pool for the
/// duration of a single `get`.
struct ReaderHandle {
    cache: RefCell<HashMap<u64, DataFile>>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

impl Barrel {
    /// Opens (or creates) a Bitcask-model store per `opts`, recovering the keydir from
    /// `barrel.hints` if present, or by replaying data files otherwise. Launches background
    /// rotation/sync/compaction workers unless `opts.read_only` is set.
    pub fn open(opts: Options) -> Result<Self> {
        fs::create_dir_all(&opts.dir)?;
        let path = opts.dir.clone();

        let existing_ids = datafile::sorted_fileids(&path)?;

        if !opts.read_only {
            let lock_path = path.join(LOCK_FILE);
            if lock_path.exists() {
                return Err(Error::Locked);
            }
            fs::File::create(&lock_path)?;
        }

        let keydir = Self::recover(&path, &existing_ids, opts.debug)?;

        // A writable instance always starts a fresh active file, never appending to one left
        // over from a previous run, so a half-written last record from a prior crash is never
        // extended. A read-only instance just opens the newest existing file (if any) for its
        // own bookkeeping; it never appends.
        let (active, active_fileid, mut all_fileids): (Option<DataFile>, u64, BTreeSet<u64>) =
            if opts.read_only {
                let all: BTreeSet<u64> = existing_ids.iter().copied().collect();
                match existing_ids.last() {
                    Some(&id) => (Some(DataFile::open_readonly(&path, id)?), id, all),
                    None => (None, 0, all),
                }
            } else {
                let id = existing_ids.last().map(|id| id + 1).unwrap_or(0);
                (Some(DataFile::open(&path, id)?), id, existing_ids.iter().copied().collect())
            };
        if active.is_some() {
            all_fileids.insert(active_fileid);
        }

        let reader_pool_size = opts.concurrency.max(1);
        let readers = ArrayQueue::new(reader_pool_size);
        for _ in 0..reader_pool_size {
            let _ = readers.push(ReaderHandle {
                cache: RefCell::new(HashMap::new()),
            });
        }

        let (notify_shutdown, _) = broadcast::channel(1);

        let inner = Arc::new(Inner {
            opts: opts.clone(),
            path,
            keydir,
            writer: Mutex::new(Writer {
                active,
                active_fileid,
                next_fileid: active_fileid + 1,
                all_fileids,
            }),
            readers,
            compacted_ids: DashSet::new(),
            closed: AtomicBool::new(false),
            notify_shutdown: Mutex::new(Some(notify_shutdown.clone())),
        });

        let barrel = Self(inner);
        if !opts.read_only {
            barrel.spawn_background_workers(&opts, notify_shutdown);
        }

        Ok(barrel)
    }

    /// Recovers the keydir either from `barrel.hints`, or (if absent) by replaying every data
    /// file in ascending id order.
    fn recover(path: &Path, existing_ids: &[u64], verbose: bool) -> Result<KeyDir> {
        let hints_path = path.join(HINTS_FILE);
        if let Ok(bytes) = fs::read(&hints_path) {
            let entries = codec::decode_hints(&bytes);
            debug!(count = entries.len(), "restored keydir from hints file");
            return Ok(KeyDir::from_hint_entries(entries));
        }

        let keydir = KeyDir::new();
        for &id in existing_ids {
            Self::replay_datafile(path, id, &keydir, verbose)?;
        }
        Ok(keydir)
    }

    /// Replays a single data file into `keydir`, stopping at the first corrupt record but
    /// leaving everything decoded up to that point in place. When `verbose` (the `debug` option)
    /// is set, every replayed record is traced individually rather than just the per-file
    /// warnings on truncation/corruption.
    fn replay_datafile(path: &Path, id: u64, keydir: &KeyDir, verbose: bool) -> Result<()> {
        let mut file = DataFile::open_readonly(path, id)?;
        let mut offset = 0u64;
        let size = file.size();

        while offset < size {
            let header = match file.read_at(offset, HEADER_SIZE as u64) {
                Ok(h) => h,
                Err(_) => {
                    warn!(file_id = id, offset, "truncated header during recovery");
                    break;
                }
            };
            let key_size = u32::from_le_bytes(header[16..20].try_into().unwrap()) as u64;
            let value_size = u32::from_le_bytes(header[20..24].try_into().unwrap()) as u64;
            let record_size = HEADER_SIZE as u64 + key_size + value_size + codec::CHECKSUM_SIZE as u64;

            if offset + record_size > size {
                warn!(file_id = id, offset, "truncated record during recovery");
                break;
            }

            let bytes = file.read_at(offset, record_size)?;
            let record = match codec::decode(&bytes) {
                Ok(r) => r,
                Err(e) => {
                    warn!(file_id = id, offset, error = %e, "corrupt record during recovery, stopping replay of this file");
                    break;
                }
            };

            if record.is_tombstone() {
                if verbose {
                    debug!(file_id = id, offset, key = ?record.key, "replayed tombstone");
                }
                keydir.remove(&record.key);
            } else {
                if verbose {
                    debug!(file_id = id, offset, key = ?record.key, record_size, "replayed record");
                }
                keydir.insert(
                    record.key.clone(),
                    KeyDirEntry {
                        file_id: id,
                        value_offset: offset + HEADER_SIZE as u64 + key_size,
                        timestamp: record.timestamp,
                        expiry: record.expiry,
                        record_size,
                    },
                );
            }

            offset += record_size;
        }

        Ok(())
    }

    fn spawn_background_workers(&self, opts: &Options, notify_shutdown: broadcast::Sender<()>) {
        let rotation = self.clone();
        let check_interval = opts.check_file_size_interval;
        let mut shutdown = Shutdown::new(notify_shutdown.subscribe());
        tokio::spawn(async move {
            while !shutdown.is_shutdown() {
                tokio::select! {
                    _ = tokio::time::sleep(check_interval) => {},
                    _ = shutdown.recv() => break,
                }
                if let Err(e) = rotation.check_rotation() {
                    error!(cause = %e, "background rotation check failed");
                }
            }
        });

        if let Some(interval) = opts.sync_interval {
            let syncer = self.clone();
            let mut shutdown = Shutdown::new(notify_shutdown.subscribe());
            tokio::spawn(async move {
                while !shutdown.is_shutdown() {
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {},
                        _ = shutdown.recv() => break,
                    }
                    if let Err(e) = syncer.sync() {
                        error!(cause = %e, "background sync failed");
                    }
                }
            });
        }

        if let Some(interval) = opts.compact_interval {
            let compactor = self.clone();
            let mut shutdown = Shutdown::new(notify_shutdown.subscribe());
            tokio::spawn(async move {
                while !shutdown.is_shutdown() {
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {},
                        _ = shutdown.recv() => break,
                    }
                    if let Err(e) = compactor.compact() {
                        error!(cause = %e, "background compaction failed");
                    }
                }
            });
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.0.closed.load(Ordering::Acquire) {
            return Err(Error::AlreadyClosed);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.0.opts.read_only {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    fn validate_key(key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidKey("key must not be empty"));
        }
        if key.len() > codec::MAX_KEY_SIZE {
            return Err(Error::InvalidKey("key exceeds maximum size"));
        }
        Ok(())
    }

    /// Sets the value of a key, overwriting any existing value. Rejected for an empty value,
    /// since an empty value is reserved for tombstones.
    pub fn put(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        self.put_ex(key, value, None)
    }

    /// Sets the value of a key with an optional time-to-live. After `ttl` elapses, `get` returns
    /// `ExpiredKey` for this key until it is overwritten.
    ///
    /// `ttl` is truncated to whole seconds, since expiry is stored on disk as a `u64` of seconds
    /// since the epoch (matching the record header's `timestamp` field); a sub-second `ttl` is
    /// rounded down and may therefore expire immediately.
    pub fn put_ex(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.ensure_open()?;
        self.ensure_writable()?;

        let key = key.into();
        let value = value.into();
        Self::validate_key(&key)?;
        if value.is_empty() {
            return Err(Error::InvalidValue(
                "value must not be empty; empty values are reserved for tombstones",
            ));
        }

        let timestamp = now_secs();
        let expiry = ttl.map(|d| timestamp + d.as_secs()).unwrap_or(0);

        let mut writer = self.0.writer.lock();
        let entry = self.write_record(&mut writer, &key, &value, timestamp, expiry)?;
        self.0.keydir.insert(key, entry);

        if self.0.opts.sync_on_every_write() {
            writer.active_ref().sync_all()?;
        }
        self.maybe_rotate(&mut writer)?;
        Ok(())
    }

    /// Deletes a key, writing a tombstone record. Returns `Ok(())` whether or not the key
    /// previously existed; removes the key's keydir entry if it did.
    pub fn delete(&self, key: impl Into<Bytes>) -> Result<()> {
        self.ensure_open()?;
        self.ensure_writable()?;

        let key = key.into();
        Self::validate_key(&key)?;

        let timestamp = now_secs();
        let mut writer = self.0.writer.lock();
        self.write_record(&mut writer, &key, &[], timestamp, 0)?;
        self.0.keydir.remove(&key);

        if self.0.opts.sync_on_every_write() {
            writer.active_ref().sync_all()?;
        }
        self.maybe_rotate(&mut writer)?;
        Ok(())
    }

    /// Appends an encoded record to the active file and returns the keydir entry it implies.
    /// Does not itself touch the keydir; callers decide whether to insert (put) or remove
    /// (delete) based on this.
    fn write_record(
        &self,
        writer: &mut Writer,
        key: &[u8],
        value: &[u8],
        timestamp: u64,
        expiry: u64,
    ) -> Result<KeyDirEntry> {
        let encoded_len = codec::encoded_len(key.len(), value.len());
        if encoded_len > self.0.opts.file_size_limit {
            return Err(Error::InvalidValue(
                "record would exceed the configured file size limit",
            ));
        }

        let (bytes, value_offset_in_record) = codec::encode(key, value, timestamp, expiry);
        let record_size = bytes.len() as u64;
        let start_offset = writer.active_mut().append(&bytes)?;

        Ok(KeyDirEntry {
            file_id: writer.active_fileid,
            value_offset: start_offset + value_offset_in_record,
            timestamp,
            expiry,
            record_size,
        })
    }

    /// Rotates the active file if it has grown past the configured limit. Must run as the last
    /// step of a write, after the keydir has already been updated, so a crash mid-rotation never
    /// loses a record that a reader might already be relying on.
    fn maybe_rotate(&self, writer: &mut Writer) -> Result<()> {
        if writer.active_ref().size() >= self.0.opts.file_size_limit {
            self.rotate(writer)?;
        }
        Ok(())
    }

    fn rotate(&self, writer: &mut Writer) -> Result<()> {
        writer.active_ref().sync_all()?;
        let new_id = writer.next_fileid;
        writer.next_fileid += 1;
        let new_active = DataFile::open(&self.0.path, new_id)?;
        debug!(old = writer.active_fileid, new = new_id, "rotated active file");
        writer.active = Some(new_active);
        writer.active_fileid = new_id;
        writer.all_fileids.insert(new_id);
        Ok(())
    }

    /// Background worker entry point: acquires the writer lock only for the duration of the
    /// size check (and the rotation itself, if one is needed).
    fn check_rotation(&self) -> Result<()> {
        self.ensure_open()?;
        let mut writer = self.0.writer.lock();
        self.maybe_rotate(&mut writer)
    }

    /// Retrieves the value of a key. Fails with `MissingKey` if absent, `ExpiredKey` if past its
    /// TTL (and removes the now-dead entry from the keydir), or `ChecksumMismatch` if the record
    /// on disk has been corrupted.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Bytes> {
        self.ensure_open()?;
        let key = key.as_ref();

        let entry = self.0.keydir.get(key).ok_or(Error::MissingKey)?;
        if entry.expiry != 0 && now_secs() >= entry.expiry {
            self.0.keydir.remove(key);
            return Err(Error::ExpiredKey);
        }

        let record_offset = entry.value_offset - HEADER_SIZE as u64 - key.len() as u64;
        let bytes = self.read_record_bytes(entry.file_id, record_offset, entry.record_size)?;
        let record = codec::decode(&bytes)?;

        if record.expiry != 0 && now_secs() >= record.expiry {
            self.0.keydir.remove(key);
            return Err(Error::ExpiredKey);
        }

        Ok(record.value)
    }

    /// Reads `length` bytes at `offset` from the data file `file_id`, using a pooled reader's
    /// thread-local cache of opened file handles. Before consulting its cache, a reader drops
    /// any handle it is holding open for a file id that compaction has since deleted from disk,
    /// so a long-lived reader never accumulates an unbounded number of stale fds.
    fn read_record_bytes(&self, file_id: u64, offset: u64, length: u64) -> Result<Vec<u8>> {
        let backoff = Backoff::new();
        let handle = loop {
            if let Some(handle) = self.0.readers.pop() {
                break handle;
            }
            backoff.spin();
        };

        let result = (|| -> Result<Vec<u8>> {
            let mut cache = handle.cache.borrow_mut();
            for stale_id in self.0.compacted_ids.iter() {
                cache.remove(&*stale_id);
            }
            if !cache.contains_key(&file_id) {
                cache.insert(file_id, DataFile::open_readonly(&self.0.path, file_id)?);
            }
            let file = cache.get_mut(&file_id).expect("just inserted");
            Ok(file.read_at(offset, length)?)
        })();

        let _ = self.0.readers.push(handle);
        result
    }

    /// A snapshot of the currently live (non-tombstone, non-expired) keys. No ordering
    /// guarantees.
    pub fn list(&self) -> Result<Vec<Bytes>> {
        self.ensure_open()?;
        let now = now_secs();
        Ok(self
            .0
            .keydir
            .iter_snapshot()
            .into_iter()
            .filter(|(_, e)| e.expiry == 0 || e.expiry > now)
            .map(|(k, _)| k)
            .collect())
    }

    /// The number of distinct keys with live (non-tombstone, non-expired) keydir entries.
    pub fn len(&self) -> Result<usize> {
        Ok(self.list()?.len())
    }

    /// `true` if there are no live keys.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Calls `f` for each live key. Stops and propagates `f`'s error if it returns one.
    pub fn fold<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&Bytes) -> Result<()>,
    {
        for key in self.list()? {
            f(&key)?;
        }
        Ok(())
    }

    /// Flushes the active file's buffered writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.ensure_open()?;
        self.ensure_writable()?;
        let writer = self.0.writer.lock();
        writer.active_ref().sync_all()?;
        Ok(())
    }

    /// Compacts stale (non-active) data files into a single fresh file, dropping tombstones and
    /// expired entries, then writes a refreshed hints file. Takes the writer lock for its full
    /// duration.
    pub fn compact(&self) -> Result<()> {
        self.ensure_open()?;
        self.ensure_writable()?;

        let mut writer = self.0.writer.lock();
        let stale_ids: Vec<u64> = writer
            .all_fileids
            .iter()
            .copied()
            .filter(|id| *id != writer.active_fileid)
            .collect();
        if stale_ids.is_empty() {
            return Ok(());
        }

        let merge_id = writer.next_fileid;
        writer.next_fileid += 1;

        let result = self.run_compaction(&stale_ids, merge_id);
        match result {
            Ok(()) => {
                writer.all_fileids.retain(|id| !stale_ids.contains(id));
                writer.all_fileids.insert(merge_id);
                for id in &stale_ids {
                    let _ = fs::remove_file(datafile::datafile_path(&self.0.path, *id));
                    self.0.compacted_ids.insert(*id);
                }
                self.write_hints()?;
                Ok(())
            }
            Err(e) => {
                error!(cause = %e, "compaction failed, discarding partial merge file");
                let _ = fs::remove_file(datafile::datafile_path(&self.0.path, merge_id));
                Err(e)
            }
        }
    }

    fn run_compaction(&self, stale_ids: &[u64], merge_id: u64) -> Result<()> {
        let mut merged = DataFile::open(&self.0.path, merge_id)?;
        let now = now_secs();

        for (key, entry) in self.0.keydir.iter_snapshot() {
            if !stale_ids.contains(&entry.file_id) {
                continue;
            }
            if entry.expiry != 0 && now >= entry.expiry {
                self.0.keydir.remove(&key);
                continue;
            }

            let record_offset = entry.value_offset - HEADER_SIZE as u64 - key.len() as u64;
            let bytes = self.read_record_bytes(entry.file_id, record_offset, entry.record_size)?;
            let new_record_offset = merged.append(&bytes)?;

            self.0.keydir.insert(
                key.clone(),
                KeyDirEntry {
                    file_id: merge_id,
                    value_offset: new_record_offset + HEADER_SIZE as u64 + key.len() as u64,
                    timestamp: entry.timestamp,
                    expiry: entry.expiry,
                    record_size: entry.record_size,
                },
            );
        }

        merged.sync_all()?;
        Ok(())
    }

    fn write_hints(&self) -> Result<()> {
        let entries = self.0.keydir.to_hint_entries();
        let mut bytes = Vec::new();
        for entry in &entries {
            bytes.extend_from_slice(&codec::encode_hint_entry(entry)?);
        }

        let tmp_path = self.0.path.join(HINTS_TMP_FILE);
        fs::write(&tmp_path, &bytes)?;
        fs::rename(&tmp_path, self.0.path.join(HINTS_FILE))?;
        Ok(())
    }

    /// Writes a hints snapshot, flushes and releases file handles, and removes the lock file (if
    /// writable). Idempotent: a second call returns `AlreadyClosed` rather than re-running.
    pub fn shutdown(&self) -> Result<()> {
        if self.0.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyClosed);
        }

        if !self.0.opts.read_only {
            let writer = self.0.writer.lock();
            writer.active_ref().sync_all()?;
            drop(writer);
            self.write_hints()?;
            let _ = fs::remove_file(self.0.path.join(LOCK_FILE));
        }

        if let Some(tx) = self.0.notify_shutdown.lock().take() {
            drop(tx);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};
    use tempfile::tempdir;

    fn open(dir: &Path) -> Barrel {
        Barrel::open(Options::new(dir).compact_interval(None)).unwrap()
    }

    #[tokio::test]
    async fn s1_basic_round_trip() {
        let dir = tempdir().unwrap();
        let db = open(dir.path());

        db.put("foo", "bar").unwrap();
        assert_eq!(db.get("foo").unwrap(), Bytes::from_static(b"bar"));
        assert_eq!(db.len().unwrap(), 1);
        assert!(db.list().unwrap().contains(&Bytes::from_static(b"foo")));
    }

    #[tokio::test]
    async fn s2_overwrite_survives_compaction() {
        let dir = tempdir().unwrap();
        let db = open(dir.path());

        db.put("k", "1").unwrap();
        db.put("k", "22").unwrap();
        assert_eq!(db.get("k").unwrap(), Bytes::from_static(b"22"));

        db.compact().unwrap();
        assert_eq!(db.get("k").unwrap(), Bytes::from_static(b"22"));
    }

    #[tokio::test]
    async fn s3_delete_semantics() {
        let dir = tempdir().unwrap();
        let db = open(dir.path());

        db.put("k", "v").unwrap();
        db.delete("k").unwrap();

        assert!(matches!(db.get("k"), Err(Error::MissingKey)));
        assert_eq!(db.len().unwrap(), 0);

        db.compact().unwrap();
        assert!(matches!(db.get("k"), Err(Error::MissingKey)));
    }

    #[tokio::test]
    async fn s4_expiry() {
        let dir = tempdir().unwrap();
        let db = open(dir.path());

        db.put_ex("temp", "x", Some(Duration::from_secs(0))).unwrap();
        assert!(matches!(db.get("temp"), Err(Error::ExpiredKey)));
    }

    #[tokio::test]
    async fn s5_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let db = open(dir.path());
            db.put("a", "1").unwrap();
            db.put("b", "2").unwrap();
            db.shutdown().unwrap();
        }

        let db = open(dir.path());
        assert_eq!(db.get("a").unwrap(), Bytes::from_static(b"1"));
        assert_eq!(db.get("b").unwrap(), Bytes::from_static(b"2"));
    }

    #[tokio::test]
    async fn s6_rotation_and_read_across_files() {
        let dir = tempdir().unwrap();
        let opts = Options::new(dir.path())
            .compact_interval(None)
            .file_size_limit(256);
        let db = Barrel::open(opts).unwrap();

        for i in 0..20 {
            let key = format!("key-{i:02}");
            let value = vec![b'x'; 28];
            db.put(key.into_bytes(), value).unwrap();
        }

        let first_entry = db.0.keydir.get(b"key-00").unwrap();
        assert_ne!(first_entry.file_id, {
            let writer = db.0.writer.lock();
            writer.active_fileid
        });
        assert_eq!(db.get("key-00").unwrap(), Bytes::from(vec![b'x'; 28]));
        assert_eq!(db.get("key-19").unwrap(), Bytes::from(vec![b'x'; 28]));
    }

    #[tokio::test]
    async fn s7_lock_contention() {
        let dir = tempdir().unwrap();
        let _first = open(dir.path());

        let second = Barrel::open(Options::new(dir.path()));
        assert!(matches!(second, Err(Error::Locked)));
    }

    #[tokio::test]
    async fn s8_corruption_detection() {
        let dir = tempdir().unwrap();
        {
            let db = open(dir.path());
            db.put("k", "v").unwrap();
            db.shutdown().unwrap();
        }

        // Flip a byte inside the only data file's value region, leaving the header intact.
        let data_path = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .find(|e| e.path().extension().map(|ext| ext == "data").unwrap_or(false))
            .expect("one data file should exist")
            .path();
        let mut file = OpenOptions::new().write(true).open(&data_path).unwrap();
        file.seek(SeekFrom::Start(HEADER_SIZE as u64 + 1)).unwrap();
        file.write_all(&[0xFF]).unwrap();
        drop(file);

        let db = open(dir.path());
        assert!(matches!(db.get("k"), Err(Error::ChecksumMismatch)));
    }

    #[tokio::test]
    async fn rejects_empty_key_and_value() {
        let dir = tempdir().unwrap();
        let db = open(dir.path());

        assert!(matches!(db.put("", "v"), Err(Error::InvalidKey(_))));
        assert!(matches!(db.put("k", ""), Err(Error::InvalidValue(_))));
    }

    #[tokio::test]
    async fn rejects_a_record_that_would_exceed_the_file_size_limit() {
        let dir = tempdir().unwrap();
        let opts = Options::new(dir.path())
            .compact_interval(None)
            .file_size_limit(32);
        let db = Barrel::open(opts).unwrap();

        let oversized_value = vec![b'x'; 64];
        assert!(matches!(
            db.put("k", oversized_value),
            Err(Error::InvalidValue(_))
        ));
    }

    #[tokio::test]
    async fn read_only_instance_rejects_writes_and_creates_no_active_file() {
        let dir = tempdir().unwrap();
        {
            let db = open(dir.path());
            db.put("k", "v").unwrap();
            db.shutdown().unwrap();
        }

        let before: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();

        let ro = Barrel::open(Options::new(dir.path()).read_only(true)).unwrap();
        assert_eq!(ro.get("k").unwrap(), Bytes::from_static(b"v"));
        assert!(matches!(ro.put("k2", "v2"), Err(Error::ReadOnly)));

        let after: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(before.len(), after.len());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let dir = tempdir().unwrap();
        let db = open(dir.path());
        db.put("k", "v").unwrap();

        db.shutdown().unwrap();
        assert!(matches!(db.shutdown(), Err(Error::AlreadyClosed)));
        assert!(matches!(db.get("k"), Err(Error::AlreadyClosed)));
    }

    #[tokio::test]
    async fn compaction_drops_tombstones_and_reclaims_space() {
        let dir = tempdir().unwrap();
        let db = open(dir.path());

        for i in 0..10 {
            db.put(format!("k{i}"), "v").unwrap();
        }
        for i in 0..5 {
            db.delete(format!("k{i}")).unwrap();
        }
        assert_eq!(db.len().unwrap(), 5);

        db.compact().unwrap();
        assert_eq!(db.len().unwrap(), 5);
        for i in 0..5 {
            assert!(matches!(db.get(format!("k{i}")), Err(Error::MissingKey)));
        }
        for i in 5..10 {
            assert_eq!(db.get(format!("k{i}")).unwrap(), Bytes::from_static(b"v"));
        }
    }

    #[tokio::test]
    async fn compaction_evicts_stale_fds_from_reader_caches() {
        let dir = tempdir().unwrap();
        let opts = Options::new(dir.path())
            .compact_interval(None)
            .file_size_limit(128)
            .concurrency(1);
        let db = Barrel::open(opts).unwrap();

        for i in 0..10 {
            db.put(format!("k{i}"), vec![b'x'; 16]).unwrap();
        }

        // Warm the sole pooled reader's cache against one of the files compaction is about to
        // remove from disk.
        db.get("k0").unwrap();
        let stale_file_id = db.0.keydir.get(b"k0").unwrap().file_id;
        {
            let handle = db.0.readers.pop().unwrap();
            assert!(handle.cache.borrow().contains_key(&stale_file_id));
            db.0.readers.push(handle).ok();
        }

        db.compact().unwrap();

        // A read afterwards must drop the now-deleted file id from the reader's cache rather
        // than holding a dangling fd open for the rest of the process's life.
        assert_eq!(db.get("k0").unwrap(), Bytes::from(vec![b'x'; 16]));
        let handle = db.0.readers.pop().unwrap();
        assert!(!handle.cache.borrow().contains_key(&stale_file_id));
        db.0.readers.push(handle).ok();
    }
}
