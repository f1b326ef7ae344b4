//! The error taxonomy surfaced by the storage engine.

use std::io;

/// Errors returned by [`crate::Barrel`](crate::barrel::Barrel) and its collaborators.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A mutating call was made on a read-only instance.
    #[error("storage is opened read-only")]
    ReadOnly,

    /// Another writer already holds the directory lock.
    #[error("directory is locked by another writer")]
    Locked,

    /// Keydir lookup failed.
    #[error("key not found")]
    MissingKey,

    /// Key exists but is past its expiry.
    #[error("key has expired")]
    ExpiredKey,

    /// Record integrity failure on read.
    #[error("checksum mismatch, record is corrupt")]
    ChecksumMismatch,

    /// Encode/decode produced or observed malformed bytes.
    #[error("corrupt record")]
    CorruptRecord,

    /// Key precondition violated (empty, or too large).
    #[error("invalid key: {0}")]
    InvalidKey(&'static str),

    /// Value precondition violated (empty when not a tombstone, or too large).
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),

    /// Underlying file operation failed.
    #[error("I/O error - {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization of the hints file failed.
    #[error("Serialization error - {0}")]
    Serialization(#[from] bincode::Error),

    /// Operation attempted after `shutdown()`.
    #[error("storage has already been shut down")]
    AlreadyClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
