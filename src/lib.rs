//! An embedded, Bitcask-model key-value storage engine.
//!
//! Keys and values are arbitrary byte strings. Writes are appended to a log file; a
//! concurrent in-memory index (the keydir) maps each key to the location of its most recent
//! record. Background workers rotate the active file past a size threshold and periodically
//! compact stale files, and a `barrel.hints` snapshot lets a reopen skip replaying every data
//! file from scratch.

mod barrel;
mod codec;
mod datafile;
mod error;
mod keydir;
pub mod net;
mod options;
mod shutdown;

pub use barrel::Barrel;
pub use error::{Error, Result};
pub use options::Options;
