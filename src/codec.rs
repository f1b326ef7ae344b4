//! On-disk record codec: fixed header, key bytes, value bytes, CRC-32 trailer.
//!
//! ```text
//! +-----------+--------+----------+------------+-----+-------+----------+
//! | timestamp | expiry | key_size | value_size | key | value | checksum |
//! |    u64    |  u64   |   u32    |    u32     | ... |  ...  |   u32    |
//! +-----------+--------+----------+------------+-----+-------+----------+
//! ```
//!
//! All integers are little-endian. A `value_size` of zero denotes a tombstone.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Maximum permitted key length, in bytes.
pub const MAX_KEY_SIZE: usize = 64 * 1024;

pub(crate) const HEADER_SIZE: usize = 8 + 8 + 4 + 4;
pub(crate) const CHECKSUM_SIZE: usize = 4;

/// A fully decoded record, as read back off disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub timestamp: u64,
    pub expiry: u64,
    pub key: Bytes,
    pub value: Bytes,
}

impl Record {
    /// A tombstone record is one whose value is empty.
    pub fn is_tombstone(&self) -> bool {
        self.value.is_empty()
    }
}

/// Encodes a record and returns the full serialized bytes along with the byte offset, within
/// those bytes, at which the value begins (callers add this to the record's starting file
/// offset to get the value's absolute position).
pub fn encode(key: &[u8], value: &[u8], timestamp: u64, expiry: u64) -> (Bytes, u64) {
    let len = HEADER_SIZE + key.len() + value.len() + CHECKSUM_SIZE;
    let mut buf = BytesMut::with_capacity(len);

    buf.put_u64_le(timestamp);
    buf.put_u64_le(expiry);
    buf.put_u32_le(key.len() as u32);
    buf.put_u32_le(value.len() as u32);
    buf.put_slice(key);
    buf.put_slice(value);

    let checksum = crc32fast::hash(&buf);
    buf.put_u32_le(checksum);

    let value_offset = (HEADER_SIZE + key.len()) as u64;
    (buf.freeze(), value_offset)
}

/// Decodes a single record from `bytes`, verifying its trailing checksum.
///
/// Returns [`Error::CorruptRecord`] if `bytes` is too short to contain a header and checksum,
/// and [`Error::ChecksumMismatch`] if the stored checksum does not match the recomputed one.
pub fn decode(bytes: &[u8]) -> Result<Record> {
    if bytes.len() < HEADER_SIZE + CHECKSUM_SIZE {
        return Err(Error::CorruptRecord);
    }

    let payload_len = bytes.len() - CHECKSUM_SIZE;
    let payload = &bytes[..payload_len];
    let stored_checksum = (&bytes[payload_len..]).get_u32_le();
    if crc32fast::hash(payload) != stored_checksum {
        return Err(Error::ChecksumMismatch);
    }

    let mut cursor = payload;
    let timestamp = cursor.get_u64_le();
    let expiry = cursor.get_u64_le();
    let key_size = cursor.get_u32_le() as usize;
    let value_size = cursor.get_u32_le() as usize;

    if cursor.len() != key_size + value_size {
        return Err(Error::CorruptRecord);
    }

    let key = Bytes::copy_from_slice(&cursor[..key_size]);
    let value = Bytes::copy_from_slice(&cursor[key_size..]);

    Ok(Record {
        timestamp,
        expiry,
        key,
        value,
    })
}

/// The on-disk length of the record that `encode` would produce for a key/value pair of the
/// given sizes. Used to validate a put against `file_size_limit` before touching disk.
pub fn encoded_len(key_len: usize, value_len: usize) -> u64 {
    (HEADER_SIZE + key_len + value_len + CHECKSUM_SIZE) as u64
}

/// One entry of the hints-file snapshot: enough to rebuild a `KeyDirEntry` plus the key it
/// belongs to, without touching the data files.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HintEntry {
    pub file_id: u64,
    pub record_size: u64,
    pub value_offset: u64,
    pub timestamp: u64,
    pub expiry: u64,
    pub key: Vec<u8>,
}

/// Encodes a single hints entry as a length-prefixed `bincode` payload, so the hints file can be
/// decoded by streaming rather than loading the whole snapshot into memory at once.
pub fn encode_hint_entry(entry: &HintEntry) -> Result<Bytes> {
    let body = bincode::serialize(entry)?;
    let mut buf = BytesMut::with_capacity(4 + body.len());
    buf.put_u32_le(body.len() as u32);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Decodes hints entries out of a byte stream that is the concatenation of
/// [`encode_hint_entry`] outputs. Stops as soon as a truncated/corrupt entry is encountered,
/// returning whatever was successfully decoded up to that point, mirroring the data-file
/// recovery behavior: a crash mid-write to the hints file must not be fatal.
pub fn decode_hints(bytes: &[u8]) -> Vec<HintEntry> {
    let mut entries = Vec::new();
    let mut cursor = bytes;
    loop {
        if cursor.len() < 4 {
            break;
        }
        let body_len = (&cursor[..4]).get_u32_le() as usize;
        if cursor.len() < 4 + body_len {
            break;
        }
        match bincode::deserialize::<HintEntry>(&cursor[4..4 + body_len]) {
            Ok(entry) => entries.push(entry),
            Err(_) => break,
        }
        cursor = &cursor[4 + body_len..];
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trips_a_record() {
        let (bytes, value_offset) = encode(b"foo", b"bar", 100, 0);
        assert_eq!(value_offset, HEADER_SIZE as u64 + 3);

        let record = decode(&bytes).unwrap();
        assert_eq!(record.timestamp, 100);
        assert_eq!(record.expiry, 0);
        assert_eq!(&record.key[..], b"foo");
        assert_eq!(&record.value[..], b"bar");
        assert!(!record.is_tombstone());
    }

    #[test]
    fn round_trips_a_tombstone() {
        let (bytes, _) = encode(b"foo", b"", 100, 0);
        let record = decode(&bytes).unwrap();
        assert!(record.is_tombstone());
    }

    #[test]
    fn detects_a_flipped_byte() {
        let (bytes, _) = encode(b"foo", b"bar", 100, 0);
        let mut bytes = bytes.to_vec();
        // flip a byte inside the value
        let idx = bytes.len() - CHECKSUM_SIZE - 1;
        bytes[idx] ^= 0xFF;
        assert!(matches!(decode(&bytes), Err(Error::ChecksumMismatch)));
    }

    #[test]
    fn rejects_truncated_bytes() {
        assert!(matches!(decode(&[0u8; 4]), Err(Error::CorruptRecord)));
    }

    #[test]
    fn hint_entries_round_trip_and_stop_at_truncation() {
        let e1 = HintEntry {
            file_id: 1,
            record_size: 10,
            value_offset: 20,
            timestamp: 99,
            expiry: 0,
            key: b"a".to_vec(),
        };
        let e2 = HintEntry {
            file_id: 2,
            record_size: 30,
            value_offset: 40,
            timestamp: 100,
            expiry: 0,
            key: b"bb".to_vec(),
        };
        let mut bytes = encode_hint_entry(&e1).unwrap().to_vec();
        bytes.extend(encode_hint_entry(&e2).unwrap());

        let decoded = decode_hints(&bytes);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].key, e1.key);
        assert_eq!(decoded[1].key, e2.key);

        // truncate mid-second-entry: first entry must still decode
        bytes.truncate(bytes.len() - 3);
        let decoded = decode_hints(&bytes);
        assert_eq!(decoded.len(), 1);
    }

    proptest! {
        /// `decode(encode(r)) == r` for arbitrary non-empty keys, arbitrary values (including
        /// empty, i.e. tombstones), and arbitrary timestamp/expiry pairs.
        #[test]
        fn decode_of_encode_is_the_identity(
            key in prop::collection::vec(any::<u8>(), 1..4096),
            value in prop::collection::vec(any::<u8>(), 0..8192),
            timestamp in any::<u64>(),
            expiry in any::<u64>(),
        ) {
            let (bytes, value_offset) = encode(&key, &value, timestamp, expiry);
            prop_assert_eq!(value_offset, (HEADER_SIZE + key.len()) as u64);

            let record = decode(&bytes).unwrap();
            prop_assert_eq!(record.timestamp, timestamp);
            prop_assert_eq!(record.expiry, expiry);
            prop_assert_eq!(&record.key[..], &key[..]);
            prop_assert_eq!(&record.value[..], &value[..]);
            prop_assert_eq!(record.is_tombstone(), value.is_empty());
        }
    }
}
