//! The in-memory keydir: a concurrent map from key to the locator of its latest record.

use bytes::Bytes;
use dashmap::DashMap;

use crate::codec::HintEntry;

/// Locates the latest record for a key. Mirrors the four fields the spec assigns to a keydir
/// entry (`file_id`, `record_size`, `value_offset`, `timestamp`), plus `expiry` so a `get` can
/// reject an expired key without first reading it off disk.
#[derive(Debug, Clone, Copy)]
pub struct KeyDirEntry {
    pub file_id: u64,
    pub value_offset: u64,
    pub timestamp: u64,
    pub expiry: u64,
    /// Total on-disk size of the record (header + key + value + checksum). Lets a reader
    /// recover the record's start offset (`value_offset` minus the header width) and read the
    /// whole record in one seek for checksum verification.
    pub record_size: u64,
}

/// The keydir itself. Lock-free reads via `DashMap`'s internal sharding; all mutation happens
/// while the engine's writer mutex is held.
#[derive(Debug, Default)]
pub struct KeyDir {
    entries: DashMap<Bytes, KeyDirEntry>,
}

impl KeyDir {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: Bytes, entry: KeyDirEntry) -> Option<KeyDirEntry> {
        self.entries.insert(key, entry)
    }

    pub fn get(&self, key: &[u8]) -> Option<KeyDirEntry> {
        self.entries.get(key).map(|e| *e.value())
    }

    pub fn remove(&self, key: &[u8]) -> Option<KeyDirEntry> {
        self.entries.remove(key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A snapshot of the live keys. No ordering guarantees.
    pub fn keys(&self) -> Vec<Bytes> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// A snapshot of the live (key, entry) pairs, used by compaction.
    pub fn iter_snapshot(&self) -> Vec<(Bytes, KeyDirEntry)> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    /// Builds the list of hints entries for every key currently in the keydir, for writing out
    /// to `barrel.hints`.
    pub fn to_hint_entries(&self) -> Vec<HintEntry> {
        self.entries
            .iter()
            .map(|e| HintEntry {
                file_id: e.file_id,
                record_size: e.record_size,
                value_offset: e.value_offset,
                timestamp: e.timestamp,
                expiry: e.expiry,
                key: e.key().to_vec(),
            })
            .collect()
    }

    /// Rebuilds a keydir from decoded hints entries.
    pub fn from_hint_entries(entries: Vec<HintEntry>) -> Self {
        let keydir = Self::new();
        for entry in entries {
            keydir.insert(
                Bytes::from(entry.key),
                KeyDirEntry {
                    file_id: entry.file_id,
                    value_offset: entry.value_offset,
                    timestamp: entry.timestamp,
                    expiry: entry.expiry,
                    record_size: entry.record_size,
                },
            );
        }
        keydir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(file_id: u64) -> KeyDirEntry {
        KeyDirEntry {
            file_id,
            value_offset: 0,
            timestamp: 0,
            expiry: 0,
            record_size: 0,
        }
    }

    #[test]
    fn insert_get_remove() {
        let kd = KeyDir::new();
        assert!(kd.get(b"k").is_none());

        kd.insert(Bytes::from_static(b"k"), entry(1));
        assert_eq!(kd.get(b"k").unwrap().file_id, 1);
        assert_eq!(kd.len(), 1);

        kd.remove(b"k");
        assert!(kd.get(b"k").is_none());
        assert_eq!(kd.len(), 0);
    }

    #[test]
    fn hint_round_trip_preserves_locator() {
        let kd = KeyDir::new();
        kd.insert(
            Bytes::from_static(b"k"),
            KeyDirEntry {
                file_id: 7,
                value_offset: 42,
                timestamp: 100,
                expiry: 0,
                record_size: 30,
            },
        );
        let hints = kd.to_hint_entries();
        let restored = KeyDir::from_hint_entries(hints);
        let e = restored.get(b"k").unwrap();
        assert_eq!(e.file_id, 7);
        assert_eq!(e.value_offset, 42);
        assert_eq!(e.record_size, 30);
    }
}
