//! A minimal line-protocol adapter over [`Barrel`](crate::barrel::Barrel).
//!
//! Grounded in the teacher's `net::server` (`Context`/`Handler`/connection-limiting `Semaphore`
//! plus broadcast/mpsc shutdown-drain channels), re-specified to a plain newline-terminated
//! command protocol instead of RESP frames: `PING`, `QUIT`, `SET key value`, `GET key`,
//! `DEL key`.

mod connection;
mod error;
mod server;

pub use connection::Connection;
pub use error::Error;
pub use server::Server;
