//! Asynchronous disk I/O backend.
//!
//! Real O_DIRECT AIO plumbing is out of scope for a portable crate; this
//! backend gives the block store and buffer cache the same async
//! contract (submit a request, get notified on a dedicated channel) using
//! a small pool of blocking OS threads, the same `Thread`/`Writer`
//! gen-server pattern used for every other background worker in this
//! crate (see `thread.rs`) rather than hand-rolling a thread pool.
//! Fairness across accounts is enforced
//! by a weighted round-robin dispatcher, not by the OS scheduler.

use std::{
    collections::VecDeque,
    fs::File,
    io::{Read as _, Seek, SeekFrom, Write as _},
    sync::{Arc, Mutex},
};

use crate::error::Result;
use crate::thread::{Rx, Thread};

/// A priority class a caller's I/O is billed against. Higher `shares` get proportionally
/// more of the backend's throughput under contention.
#[derive(Debug, Clone, Copy)]
pub struct IoAccount {
    pub id: u32,
    pub shares: u32,
}

impl IoAccount {
    pub const FOREGROUND: IoAccount = IoAccount { id: 0, shares: 8 };
    pub const BACKGROUND: IoAccount = IoAccount { id: 1, shares: 1 };
}

pub enum Op {
    Read { fpos: u64, len: usize },
    Write { fpos: u64, data: Vec<u8> },
    Flush,
}

pub enum Completion {
    Read(Vec<u8>),
    Write(usize),
    Flush,
}

struct Request {
    account: IoAccount,
    op: Op,
    reply: std::sync::mpsc::Sender<Result<Completion>>,
}

enum Msg {
    Submit(Request),
    Shutdown,
}

/// Handle to a running disk-I/O backend thread for one open file.
pub struct Disk {
    thread: Thread<Msg, (), ()>,
}

impl Disk {
    pub fn open(file: Arc<Mutex<File>>) -> Disk {
        let thread = Thread::new(move |rx: Rx<Msg, ()>| {
            move || -> Result<()> { run(file, rx) }
        });
        Disk { thread }
    }

    /// Submit `op` under `account`'s fairness class; returns a receiver
    /// the caller's fiber polls (non-blocking) or blocks on, depending on
    /// whether it has other work.
    pub fn submit(
        &self,
        account: IoAccount,
        op: Op,
    ) -> Result<std::sync::mpsc::Receiver<Result<Completion>>> {
        let (reply, rx) = std::sync::mpsc::channel();
        self.thread.post(Msg::Submit(Request {
            account,
            op,
            reply,
        }))?;
        Ok(rx)
    }

    pub fn close(self) -> Result<()> {
        self.thread.post(Msg::Shutdown)?;
        self.thread.close_wait()
    }
}

/// Weighted round-robin queue keyed by account id: dequeuing walks
/// accounts in proportion to their `shares`, so a background scan never
/// starves a foreground request.
struct Fairness {
    queues: Vec<(IoAccount, VecDeque<Request>)>,
    credits: Vec<i64>,
}

impl Fairness {
    fn new() -> Fairness {
        Fairness {
            queues: Vec::new(),
            credits: Vec::new(),
        }
    }

    fn push(&mut self, req: Request) {
        match self.queues.iter().position(|(a, _)| a.id == req.account.id) {
            Some(idx) => self.queues[idx].1.push_back(req),
            None => {
                let account = req.account;
                let mut q = VecDeque::new();
                q.push_back(req);
                self.queues.push((account, q));
                self.credits.push(0);
            }
        }
    }

    /// Deficit round robin: each account accrues `shares` credit per
    /// round; an account with >= 1 credit dequeues one request and pays
    /// 1 credit for it. Shares proportionally bias how often a heavy
    /// account gets to pop versus a light one without ever fully
    /// starving the light one.
    fn pop(&mut self) -> Option<Request> {
        if self.queues.iter().all(|(_, q)| q.is_empty()) {
            return None;
        }
        loop {
            for idx in 0..self.queues.len() {
                if self.queues[idx].1.is_empty() {
                    continue;
                }
                self.credits[idx] += self.queues[idx].0.shares as i64;
                if self.credits[idx] >= 1 {
                    self.credits[idx] -= 1;
                    return self.queues[idx].1.pop_front();
                }
            }
        }
    }
}

fn run(file: Arc<Mutex<File>>, rx: Rx<Msg, ()>) -> Result<()> {
    let mut fair = Fairness::new();
    loop {
        match rx.recv_timeout(std::time::Duration::from_millis(5)) {
            Ok((Msg::Submit(req), reply)) => {
                fair.push(req);
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
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return Ok(()),
        }

        while let Some(req) = fair.pop() {
            let result = execute(&file, req.op);
            req.reply.send(result).ok();
        }
    }
}

fn execute(file: &Arc<Mutex<File>>, op: Op) -> Result<Completion> {
    let mut fd = file.lock().unwrap();
    match op {
        Op::Read { fpos, len } => {
            fd.seek(SeekFrom::Start(fpos))?;
            let mut buf = vec![0_u8; len];
            fd.read_exact(&mut buf)?;
            Ok(Completion::Read(buf))
        }
        Op::Write { fpos, data } => {
            fd.seek(SeekFrom::Start(fpos))?;
            fd.write_all(&data)?;
            Ok(Completion::Write(data.len()))
        }
        Op::Flush => {
            fd.sync_all()?;
            Ok(Completion::Flush)
        }
    }
}

#[cfg(test)]
#[path = "diskio_test.rs"]
mod diskio_test;
