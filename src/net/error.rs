//! Errors surfaced by the net adapter's connection plumbing. Storage errors from `Barrel` are
//! not converted into this type: `Handler::dispatch` formats them directly into a `-ERR` reply
//! line, since a failed `GET`/`SET`/`DEL` is a protocol-level response, not a connection failure.

use std::io;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
