//! Cooperative fiber scheduler pinned to a fixed pool of OS worker threads.
//!
//! Each worker is a [`crate::thread::Thread`] gen-server (see `thread.rs`)
//! running a run-queue of fibers. A fiber is not a stackful coroutine; it
//! is a state machine that yields control back to the worker at explicit
//! suspension points rather than blocking calls. [`Task::step`] returning
//! [`Poll::Pending`] re-enqueues the fiber; [`Poll::Ready`] drops it.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use crate::error::Result;
use crate::fiber_interrupt::Interrupt;
use crate::thread::{Rx, Thread, Writer};

/// Outcome of advancing a fiber by one suspension-to-suspension step.
pub enum Poll {
    /// Fiber has more work; re-enqueue at the back of the run-queue.
    Pending,
    /// Fiber has more work, but asked to be woken only after `after`.
    PendingAfter { after: std::time::Instant },
    /// Fiber is finished.
    Ready,
}

/// A unit of cooperative work. Implementors must never block; long waits
/// are expressed by returning [`Poll::PendingAfter`] or by registering
/// with [`crate::fiber_hub::MessageHub`] and returning [`Poll::Pending`]
/// only once signalled.
pub trait Task: Send {
    fn step(&mut self, intr: &Interrupt) -> Poll;
}

enum Msg {
    Spawn(Box<dyn Task>),
    Shutdown,
}

struct Worker {
    queue: VecDeque<(Box<dyn Task>, Option<std::time::Instant>)>,
}

impl Worker {
    fn run(mut self, rx: Rx<Msg, ()>, intr: Interrupt) -> Result<()> {
        loop {
            // drain all pending control messages without blocking.
            loop {
                match rx.try_recv() {
                    Ok((Msg::Spawn(task), reply)) => {
                        self.queue.push_back((task, None));
                        if let Some(tx) = reply {
                            tx.send(()).ok();
                        }
                    }
                    Ok((Msg::Shutdown, reply)) => {
                        if let Some(tx) = reply {
                            tx.send(()).ok();
                        }
                        return Ok(());
                    }
                    Err(std::sync::mpsc::TryRecvError::Empty) => break,
                    Err(std::sync::mpsc::TryRecvError::Disconnected) => return Ok(()),
                }
            }

            let now = std::time::Instant::now();
            let ready_idx = self
                .queue
                .iter()
                .position(|(_, deadline)| deadline.map_or(true, |d| d <= now));

            match ready_idx {
                Some(idx) => {
                    let (mut task, _) = self.queue.remove(idx).unwrap();
                    match task.step(&intr) {
                        Poll::Pending => self.queue.push_back((task, None)),
                        Poll::PendingAfter { after } => self.queue.push_back((task, Some(after))),
                        Poll::Ready => {}
                    }
                }
                None => {
                    // nothing runnable right now; block on the control
                    // channel instead of busy-spinning.
                    match rx.recv_timeout(std::time::Duration::from_millis(5)) {
                        Ok((Msg::Spawn(task), reply)) => {
                            self.queue.push_back((task, None));
                            if let Some(tx) = reply {
                                tx.send(()).ok();
                            }
                        }
                        Ok((Msg::Shutdown, reply)) => {
                            if let Some(tx) = reply {
                                tx.send(()).ok();
                            }
                            return Ok(());
                        }
                        Err(_) => {}
                    }
                }
            }
        }
    }
}

/// Pool of fiber-hosting worker threads. One per OS core by default.
pub struct Scheduler {
    workers: Vec<Thread<Msg, (), ()>>,
    next: AtomicUsize,
    intr: Interrupt,
}

impl Scheduler {
    pub fn new(num_workers: usize) -> Scheduler {
        let intr = Interrupt::new();
        let workers = (0..num_workers.max(1))
            .map(|_| {
                let intr = intr.clone();
                Thread::new(move |rx: Rx<Msg, ()>| {
                    move || {
                        Worker {
                            queue: VecDeque::new(),
                        }
                        .run(rx, intr)
                    }
                })
            })
            .collect();
        Scheduler {
            workers,
            next: AtomicUsize::new(0),
            intr,
        }
    }

    /// Spawn a fiber on the next worker, round-robin. Returns once the fiber has been accepted onto the
    /// run-queue, not once it has completed.
    pub fn spawn_now(&self, task: Box<dyn Task>) -> Result<()> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        self.workers[idx].request(Msg::Spawn(task))
    }

    /// Spawn pinned to a specific worker index.
    pub fn spawn_on(&self, worker: usize, task: Box<dyn Task>) -> Result<()> {
        self.workers[worker % self.workers.len()].request(Msg::Spawn(task))
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Interrupt handle shared by every fiber on this scheduler.
    pub fn interrupt(&self) -> Interrupt {
        self.intr.clone()
    }

    /// A wake-from-outside handle pinned to one worker, for callbacks
    /// (e.g. disk-I/O completion) that run off the scheduler.
    pub fn handle_for(&self, worker: usize) -> Handle {
        Handle {
            writer: Mutex::new(self.workers[worker % self.workers.len()].to_writer()),
        }
    }

    pub fn shutdown(self) -> Result<()> {
        self.intr.pulse();
        for w in self.workers {
            w.request(Msg::Shutdown)?;
            w.close_wait()?;
        }
        Ok(())
    }
}

/// Handle used by a fiber to hand work back to its worker's queue from
/// outside (e.g. a completion callback from the disk-I/O backend waking
/// a waiting fiber).
pub struct Handle {
    writer: Mutex<Writer<Msg, ()>>,
}

impl Handle {
    pub fn wake(&self, task: Box<dyn Task>) -> Result<()> {
        self.writer.lock().unwrap().post(Msg::Spawn(task))
    }
}

#[cfg(test)]
#[path = "fiber_test.rs"]
mod fiber_test;
