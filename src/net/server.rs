//! Asynchronous server dispatching a line protocol to a [`Barrel`].
//!
//! Structure (`Context`/`Handler`, connection-limiting `Semaphore`, broadcast+mpsc
//! shutdown-drain channels, exponential-backoff `accept`) is carried over from the teacher's
//! `net::server`; only the framing and command set differ.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time;
use tracing::{debug, error, info};

use super::{Connection, Error};
use crate::barrel::Barrel;
use crate::shutdown::Shutdown;

/// Max number of concurrent connections the server will serve at once.
const MAX_CONNECTIONS: usize = 128;
/// Max number of seconds to back off for when retrying a failed `accept`.
const MAX_BACKOFF: u64 = 64;

/// Owns the listener and runs until `shutdown` resolves or accepting fails outright.
pub struct Server<S: Future> {
    ctx: Context,
    shutdown: S,
}

impl<S: Future> Server<S> {
    pub fn new(listener: TcpListener, barrel: Barrel, shutdown: S) -> Self {
        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, shutdown_complete_rx) = mpsc::channel(1);

        let ctx = Context {
            barrel,
            listener,
            limit_connections: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
            notify_shutdown,
            shutdown_complete_rx,
            shutdown_complete_tx,
        };

        Self { ctx, shutdown }
    }

    pub async fn run(mut self) {
        tokio::select! {
            result = self.ctx.listen() => {
                if let Err(err) = result {
                    error!(cause = %err, "failed to accept");
                }
            }
            _ = self.shutdown => {
                info!("shutting down");
            }
        }

        drop(self.ctx.notify_shutdown);
        drop(self.ctx.shutdown_complete_tx);
        self.ctx.shutdown_complete_rx.recv().await;
    }
}

struct Context {
    barrel: Barrel,
    listener: TcpListener,
    limit_connections: Arc<Semaphore>,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_rx: mpsc::Receiver<()>,
    shutdown_complete_tx: mpsc::Sender<()>,
}

struct Handler {
    barrel: Barrel,
    connection: Connection,
    limit_connections: Arc<Semaphore>,
    shutdown: Shutdown,
    _shutdown_complete: mpsc::Sender<()>,
}

impl Context {
    async fn listen(&mut self) -> Result<(), Error> {
        info!("listening for new connections");

        loop {
            self.limit_connections.acquire().await.unwrap().forget();

            let socket = self.accept().await?;

            let mut handler = Handler {
                barrel: self.barrel.clone(),
                connection: Connection::new(socket),
                limit_connections: Arc::clone(&self.limit_connections),
                shutdown: Shutdown::new(self.notify_shutdown.subscribe()),
                _shutdown_complete: self.shutdown_complete_tx.clone(),
            };

            tokio::spawn(async move {
                if let Err(err) = handler.run().await {
                    error!(cause = ?err, "connection error");
                }
            });
        }
    }

    async fn accept(&mut self) -> Result<TcpStream, Error> {
        let mut backoff = 1;
        loop {
            match self.listener.accept().await {
                Ok((socket, _)) => return Ok(socket),
                Err(err) => {
                    if backoff > MAX_BACKOFF {
                        return Err(err.into());
                    }
                }
            }
            time::sleep(Duration::from_secs(backoff)).await;
            backoff <<= 1;
        }
    }
}

impl Handler {
    #[tracing::instrument(skip(self))]
    async fn run(&mut self) -> Result<(), Error> {
        while !self.shutdown.is_shutdown() {
            let maybe_line = tokio::select! {
                res = self.connection.read_line() => res?,
                _ = self.shutdown.recv() => return Ok(()),
            };

            let line = match maybe_line {
                Some(line) => line,
                None => return Ok(()),
            };
            debug!(%line, "received command");

            if self.dispatch(&line).await? {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Parses and applies a single command line, writing the reply. Returns `true` if the
    /// connection should close after this command (`QUIT`).
    async fn dispatch(&mut self, line: &str) -> Result<bool, Error> {
        let mut parts = line.splitn(3, ' ');
        let cmd = parts.next().unwrap_or("").to_ascii_uppercase();

        match cmd.as_str() {
            "PING" => {
                self.connection.write_line("+PONG").await?;
            }
            "QUIT" => {
                self.connection.write_line("+OK").await?;
                return Ok(true);
            }
            "GET" => {
                let key = parts.next().unwrap_or("");
                if key.is_empty() {
                    self.connection
                        .write_line("-ERR wrong number of arguments for GET")
                        .await?;
                } else {
                    match self.barrel.get(key.as_bytes()) {
                        Ok(value) => {
                            let reply = format!("${}", String::from_utf8_lossy(&value));
                            self.connection.write_line(&reply).await?;
                        }
                        Err(crate::error::Error::MissingKey)
                        | Err(crate::error::Error::ExpiredKey) => {
                            self.connection.write_line("$-1").await?;
                        }
                        Err(e) => {
                            self.connection.write_line(&format!("-ERR {e}")).await?;
                        }
                    }
                }
            }
            "SET" => {
                let key = parts.next().unwrap_or("");
                let value = parts.next().unwrap_or("");
                if key.is_empty() || value.is_empty() {
                    self.connection
                        .write_line("-ERR wrong number of arguments for SET")
                        .await?;
                } else {
                    match self.barrel.put(key.as_bytes().to_vec(), value.as_bytes().to_vec()) {
                        Ok(()) => self.connection.write_line("+OK").await?,
                        Err(e) => self.connection.write_line(&format!("-ERR {e}")).await?,
                    }
                }
            }
            "DEL" => {
                let key = parts.next().unwrap_or("");
                if key.is_empty() {
                    self.connection
                        .write_line("-ERR wrong number of arguments for DEL")
                        .await?;
                } else {
                    match self.barrel.delete(key.as_bytes().to_vec()) {
                        Ok(()) => self.connection.write_line("+OK").await?,
                        Err(e) => self.connection.write_line(&format!("-ERR {e}")).await?,
                    }
                }
            }
            "" => {}
            other => {
                self.connection
                    .write_line(&format!("-ERR unknown command '{other}'"))
                    .await?;
            }
        }

        Ok(false)
    }
}

impl Drop for Handler {
    fn drop(&mut self) {
        self.limit_connections.add_permits(1);
    }
}
