//! Order source / order sink pair: guarantees that
//! operations sharing a causal thread (e.g. one connection) execute on the
//! slice in the order they were issued, even if they arrive on the slice's
//! channel out of program order across an async boundary. Grounded on the
//! teacher's `thread::Writer<Q, R>` single-producer-per-channel ordering
//! guarantee (`thread.rs`), generalized here from "per worker thread" to
//! "per logical connection".

use std::collections::HashSet;
use std::sync::{Condvar, Mutex};

/// Issues monotonically increasing tokens for one causal thread of
/// operations. Cloneable: multiple ops from the same connection take
/// tokens from the same source before fanning out.
pub struct OrderSource {
    next: Mutex<u64>,
}

impl OrderSource {
    pub fn new() -> OrderSource {
        OrderSource { next: Mutex::new(0) }
    }

    /// Checks in the next token in this source's sequence.
    pub fn check_in(&self) -> u64 {
        let mut next = self.next.lock().unwrap();
        let token = *next;
        *next += 1;
        token
    }
}

impl Default for OrderSource {
    fn default() -> OrderSource {
        OrderSource::new()
    }
}

/// Checks tokens out on the slice thread in the order `OrderSource` handed
/// them out, blocking a token's execution until every earlier token has
/// checked out.
pub struct OrderSink {
    state: Mutex<SinkState>,
    cond: Condvar,
}

struct SinkState {
    next_expected: u64,
    arrived_out_of_order: HashSet<u64>,
}

impl OrderSink {
    pub fn new() -> OrderSink {
        OrderSink {
            state: Mutex::new(SinkState {
                next_expected: 0,
                arrived_out_of_order: HashSet::new(),
            }),
            cond: Condvar::new(),
        }
    }

    /// Blocks the calling fiber/thread until `token` is next in program
    /// order, then returns. Caller runs its operation, then calls
    /// [`OrderSink::check_out`].
    pub fn wait_turn(&self, token: u64) {
        let mut state = self.state.lock().unwrap();
        while state.next_expected != token {
            state = self.cond.wait(state).unwrap();
        }
    }

    /// Marks `token` complete and releases whichever waiter (if any) is
    /// next in sequence.
    pub fn check_out(&self, token: u64) {
        let mut state = self.state.lock().unwrap();
        debug_assert_eq!(state.next_expected, token);
        state.next_expected += 1;
        while state.arrived_out_of_order.remove(&state.next_expected) {
            state.next_expected += 1;
        }
        self.cond.notify_all();
    }
}

impl Default for OrderSink {
    fn default() -> OrderSink {
        OrderSink::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_tokens_execute_in_order() {
        let source = OrderSource::new();
        let sink = Arc::new(OrderSink::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let token = source.check_in();
            let sink = sink.clone();
            let order = order.clone();
            handles.push(thread::spawn(move || {
                sink.wait_turn(token);
                order.lock().unwrap().push(token);
                sink.check_out(token);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let got = order.lock().unwrap().clone();
        let expected: Vec<u64> = (0..8).collect();
        assert_eq!(got, expected);
    }
}
