//! Writeback policy and throttling.
//! A counting semaphore caps how many dirty frames may be in flight to
//! the block store at once; once the cache's dirty ratio crosses
//! `high_ratio` new write acquisitions block until writeback catches up,
//! the same backpressure shape a log writer applies to its flush queue.

use std::sync::{Condvar, Mutex};

pub struct Throttle {
    state: Mutex<State>,
    cond: Condvar,
    high_ratio: usize,
}

struct State {
    dirty: usize,
    total: usize,
    in_flight: usize,
    max_in_flight: usize,
}

impl Throttle {
    pub fn new(high_ratio: usize, max_in_flight: usize) -> Throttle {
        Throttle {
            state: Mutex::new(State {
                dirty: 0,
                total: 0,
                in_flight: 0,
                max_in_flight: max_in_flight.max(1),
            }),
            cond: Condvar::new(),
            high_ratio,
        }
    }

    pub fn note_resize(&self, total_frames: usize) {
        self.state.lock().unwrap().total = total_frames;
    }

    pub fn note_dirtied(&self) {
        self.state.lock().unwrap().dirty += 1;
    }

    pub fn note_cleaned(&self) {
        let mut state = self.state.lock().unwrap();
        state.dirty = state.dirty.saturating_sub(1);
        self.cond.notify_all();
    }

    fn over_high_ratio(state: &State, high_ratio: usize) -> bool {
        if state.total == 0 {
            return false;
        }
        state.dirty * 100 / state.total >= high_ratio
    }

    /// Block the caller (a fiber step should call this only when it has
    /// genuinely nothing else to do) until writeback has brought the
    /// dirty ratio back under `high_ratio`, or until a writeback slot
    /// frees up, whichever a writer actually needs.
    pub fn wait_for_headroom(&self) {
        let mut state = self.state.lock().unwrap();
        while Self::over_high_ratio(&state, self.high_ratio) && state.in_flight >= state.max_in_flight {
            state = self.cond.wait(state).unwrap();
        }
    }

    pub fn begin_flush(&self) {
        let mut state = self.state.lock().unwrap();
        while state.in_flight >= state.max_in_flight {
            state = self.cond.wait(state).unwrap();
        }
        state.in_flight += 1;
    }

    pub fn end_flush(&self) {
        let mut state = self.state.lock().unwrap();
        state.in_flight = state.in_flight.saturating_sub(1);
        self.cond.notify_all();
    }

    pub fn is_over_high_ratio(&self) -> bool {
        Self::over_high_ratio(&self.state.lock().unwrap(), self.high_ratio)
    }
}
