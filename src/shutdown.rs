//! Graceful-shutdown signaling shared by every background worker and connection handler.
//!
//! Grounded in the teacher's `crate::shutdown::Shutdown`, used throughout
//! `storage::bitcask::Bitcask` and `net::server`: a `broadcast::Sender<()>` is held by the
//! owner and never sent on directly. Dropping it is the signal; every subscriber's `recv()`
//! resolves once the sender side is gone.

use tokio::sync::broadcast;

/// Listens for a shutdown signal broadcast by dropping the paired `Sender`.
#[derive(Debug)]
pub struct Shutdown {
    is_shutdown: bool,
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    pub fn new(notify: broadcast::Receiver<()>) -> Self {
        Self {
            is_shutdown: false,
            notify,
        }
    }

    /// Returns `true` if the shutdown signal has been received.
    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    /// Waits for the shutdown signal. Resolves immediately if it has already fired.
    pub async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }
        // The sender is never used to send a value; `Closed` (because the sender was dropped) is
        // the only way this resolves.
        let _ = self.notify.recv().await;
        self.is_shutdown = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast;

    #[tokio::test]
    async fn resolves_when_sender_drops() {
        let (tx, rx) = broadcast::channel(1);
        let mut shutdown = Shutdown::new(rx);
        assert!(!shutdown.is_shutdown());

        drop(tx);
        shutdown.recv().await;
        assert!(shutdown.is_shutdown());
    }
}
