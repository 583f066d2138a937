//! Readiness-based event queue, the thing fibers register network/timer
//! interest with instead of blocking in a `read()`/`accept()` syscall.
//! `mio` wraps epoll/kqueue readiness notifications behind one portable
//! poll loop.

use std::{collections::HashMap, time::Duration};

use mio::{Events, Interest, Poll as MioPoll, Token};

use crate::error::Result;

/// Readiness bits a caller can watch for, collapsing `mio::Interest` into
/// the subset this engine's fiber bodies actually branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

/// Wraps one `mio::Poll` instance. A reactor is normally pinned to one
/// fiber-scheduler worker thread so
/// that `pump` can be called from that worker's idle loop.
pub struct Reactor {
    poll: MioPoll,
    events: Events,
    next_token: usize,
    labels: HashMap<usize, &'static str>,
}

impl Reactor {
    pub fn new() -> Result<Reactor> {
        Ok(Reactor {
            poll: MioPoll::new()?,
            events: Events::with_capacity(256),
            next_token: 0,
            labels: HashMap::new(),
        })
    }

    /// Register interest in a source, returning the token to later
    /// `adjust`/`forget` it.
    pub fn watch<S>(&mut self, source: &mut S, interest: Readiness, label: &'static str) -> Result<Token>
    where
        S: mio::event::Source,
    {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.poll
            .registry()
            .register(source, token, to_interest(interest))?;
        self.labels.insert(token.0, label);
        Ok(token)
    }

    pub fn adjust<S>(&mut self, source: &mut S, token: Token, interest: Readiness) -> Result<()>
    where
        S: mio::event::Source,
    {
        self.poll
            .registry()
            .reregister(source, token, to_interest(interest))?;
        Ok(())
    }

    pub fn forget<S>(&mut self, source: &mut S, token: Token) -> Result<()>
    where
        S: mio::event::Source,
    {
        self.poll.registry().deregister(source)?;
        self.labels.remove(&token.0);
        Ok(())
    }

    /// Poll once, with `timeout` of `None` meaning "return immediately if
    /// nothing is ready" (fibers must never block the worker they share
    /// with other fibers).
    pub fn pump(&mut self, timeout: Option<Duration>) -> Result<Vec<(Token, Readiness)>> {
        self.poll.poll(&mut self.events, timeout)?;
        let mut out = Vec::new();
        for ev in self.events.iter() {
            out.push((
                ev.token(),
                Readiness {
                    readable: ev.is_readable(),
                    writable: ev.is_writable(),
                },
            ));
        }
        Ok(out)
    }
}

fn to_interest(r: Readiness) -> Interest {
    match (r.readable, r.writable) {
        (true, true) => Interest::READABLE | Interest::WRITABLE,
        (true, false) => Interest::READABLE,
        (false, true) => Interest::WRITABLE,
        (false, false) => Interest::READABLE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::net::{TcpListener, TcpStream};

    #[test]
    fn test_watch_reports_readable() {
        let mut reactor = Reactor::new().unwrap();
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut listener = TcpListener::bind(addr).unwrap();
        let local = listener.local_addr().unwrap();

        reactor
            .watch(
                &mut listener,
                Readiness {
                    readable: true,
                    writable: false,
                },
                "listener",
            )
            .unwrap();

        let _client = TcpStream::connect(local).unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        let mut saw_event = false;
        while std::time::Instant::now() < deadline && !saw_event {
            let events = reactor.pump(Some(Duration::from_millis(100))).unwrap();
            saw_event = !events.is_empty();
        }
        assert!(saw_event);
    }
}
