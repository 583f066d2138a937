//! Message hub for cross-worker signaling.
//!
//! A [`MessageHub<M>`] is a fan-in mailbox: any worker can post, a single
//! owning fiber drains it on its own turn. Built directly on
//! `std::sync::mpsc`, the same primitive [`crate::thread::Thread`] uses,
//! rather than re-deriving a notification mechanism.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use crate::error::{Error, Result};

pub struct MessageHub<M> {
    tx: Sender<M>,
    rx: Receiver<M>,
}

impl<M> MessageHub<M> {
    pub fn new() -> MessageHub<M> {
        let (tx, rx) = mpsc::channel();
        MessageHub { tx, rx }
    }

    /// Handle other workers use to post into this hub.
    pub fn sender(&self) -> Sender<M> {
        self.tx.clone()
    }

    /// Non-blocking drain, called from the owning fiber's `step`.
    pub fn drain(&self) -> Vec<M> {
        let mut out = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(m) => out.push(m),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }

    /// Blocking receive with a deadline, used by fibers that have no
    /// other work while waiting.
    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Result<M> {
        self.rx.recv_timeout(timeout).map_err(Error::from)
    }
}

impl<M> Default for MessageHub<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_collects_all_pending() {
        let hub: MessageHub<u32> = MessageHub::new();
        let tx = hub.sender();
        tx.send(1).unwrap();
        tx.send(2).unwrap();
        tx.send(3).unwrap();
        assert_eq!(hub.drain(), vec![1, 2, 3]);
        assert!(hub.drain().is_empty());
    }

    #[test]
    fn test_recv_timeout_times_out() {
        let hub: MessageHub<u32> = MessageHub::new();
        let err = hub
            .recv_timeout(std::time::Duration::from_millis(10))
            .unwrap_err();
        assert_eq!(err, Error::Timeout);
    }
}
