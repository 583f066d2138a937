//! Cancellation signal shared across every fiber in a
//! [`crate::fiber::Scheduler`]. Modeled as a one-shot latch, the same
//! shape as [`crate::gate::Gate`]'s latch bit but
//! without the reader/writer accounting since only one transition
//! (armed -> pulsed) is ever needed.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::error::{Error, Result};

#[derive(Clone)]
pub struct Interrupt {
    pulsed: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Interrupt {
        Interrupt {
            pulsed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signal cancellation. Idempotent.
    pub fn pulse(&self) {
        self.pulsed.store(true, Ordering::Release);
    }

    pub fn is_pulsed(&self) -> bool {
        self.pulsed.load(Ordering::Acquire)
    }

    /// Convenience for fiber bodies that want `?` to bail out of a wait
    /// loop as soon as cancellation fires.
    pub fn check(&self) -> Result<()> {
        if self.is_pulsed() {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pulse_is_observed_across_clones() {
        let a = Interrupt::new();
        let b = a.clone();
        assert!(a.check().is_ok());
        b.pulse();
        assert_eq!(a.check().unwrap_err(), Error::Interrupted);
    }
}
