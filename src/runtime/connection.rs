//! Connection registry for the event loop.
//!
//! An ordered list of watched sockets: the listener at index 0 followed by
//! clients in the order they were accepted. Closing a client is two-phase.
//! `mark_closed` closes the socket right away but leaves a tombstone in its
//! slot, so indices stay stable while the loop walks its snapshot, and
//! `compact` drops every tombstone in one order-preserving pass.

use crate::error::{Error, Result};
use mio::event::Source;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};
use tracing::debug;

/// Token reserved for the listening socket.
pub const LISTENER_TOKEN: Token = Token(usize::MAX);

/// The socket behind a registry entry.
#[derive(Debug)]
pub enum Endpoint {
    Listener(TcpListener),
    Client(TcpStream),
    /// Socket already closed, slot awaiting compaction.
    Closed,
}

impl Endpoint {
    fn source(&mut self) -> Option<&mut dyn Source> {
        match self {
            Endpoint::Listener(listener) => Some(listener),
            Endpoint::Client(stream) => Some(stream),
            Endpoint::Closed => None,
        }
    }
}

/// A watched socket.
#[derive(Debug)]
pub struct Connection {
    token: Token,
    interest: Interest,
    endpoint: Endpoint,
}

impl Connection {
    pub fn token(&self) -> Token {
        self.token
    }

    pub fn interest(&self) -> Interest {
        self.interest
    }

    pub fn is_listener(&self) -> bool {
        self.token == LISTENER_TOKEN
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.endpoint, Endpoint::Closed)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn endpoint_mut(&mut self) -> &mut Endpoint {
        &mut self.endpoint
    }
}

/// Registry of watched sockets, capped at the process descriptor limit.
pub struct ConnectionRegistry {
    entries: Vec<Connection>,
    capacity: usize,
    marked: usize,
    next_token: usize,
    poller: Registry,
}

impl ConnectionRegistry {
    /// Create an empty registry that registers sockets with `poller`.
    pub fn new(poller: Registry, capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity: capacity.max(1),
            marked: 0,
            next_token: 0,
            poller,
        }
    }

    /// Append `endpoint` and start watching it for `interest`.
    ///
    /// The listener must be the first entry added. A full registry means the
    /// process has run out of descriptors, which is fatal.
    pub fn add(&mut self, mut endpoint: Endpoint, interest: Interest) -> Result<Token> {
        if self.entries.len() >= self.capacity {
            return Err(Error::RegistryFull {
                capacity: self.capacity,
            });
        }

        let token = match endpoint {
            Endpoint::Listener(_) => {
                debug_assert!(self.entries.is_empty(), "listener must be entry 0");
                LISTENER_TOKEN
            }
            _ => {
                let token = Token(self.next_token);
                self.next_token = self.next_token.wrapping_add(1) % LISTENER_TOKEN.0;
                token
            }
        };

        if let Some(source) = endpoint.source() {
            self.poller
                .register(source, token, interest)
                .map_err(Error::syscall("register"))?;
        }

        self.entries.push(Connection {
            token,
            interest,
            endpoint,
        });
        Ok(token)
    }

    /// Close the socket at `index` and leave a tombstone until `compact`.
    ///
    /// Returns false if the index is out of range or already closed.
    pub fn mark_closed(&mut self, index: usize) -> bool {
        let Some(conn) = self.entries.get_mut(index) else {
            return false;
        };
        let Some(source) = conn.endpoint.source() else {
            return false;
        };

        if let Err(e) = self.poller.deregister(source) {
            debug!(token = conn.token.0, error = %e, "Deregister failed");
        }
        // Dropping the socket closes the descriptor.
        conn.endpoint = Endpoint::Closed;
        self.marked += 1;
        true
    }

    /// Remove all tombstones, keeping the survivors in order.
    ///
    /// Returns the number of entries removed.
    pub fn compact(&mut self) -> usize {
        if self.marked == 0 {
            return 0;
        }
        let before = self.entries.len();
        self.entries.retain(|conn| !conn.is_closed());
        self.marked = 0;
        before - self.entries.len()
    }

    /// Close every remaining socket, the listener included.
    ///
    /// Returns the number of sockets that were still open.
    pub fn close_all(&mut self) -> usize {
        let mut closed = 0;
        for conn in &mut self.entries {
            if let Some(source) = conn.endpoint.source() {
                if let Err(e) = self.poller.deregister(source) {
                    debug!(token = conn.token.0, error = %e, "Deregister failed");
                }
                conn.endpoint = Endpoint::Closed;
                closed += 1;
            }
        }
        self.entries.clear();
        self.marked = 0;
        closed
    }

    pub fn get(&self, index: usize) -> Option<&Connection> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Connection> {
        self.entries.get_mut(index)
    }

    /// Number of entries, tombstones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Number of entries marked closed since the last compaction.
    pub fn marked(&self) -> usize {
        self.marked
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Soft limit on open descriptors for this process.
pub fn descriptor_limit() -> Result<usize> {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `limit` is a valid, writable rlimit for the duration of the call.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) };
    if rc != 0 {
        return Err(Error::syscall("getrlimit")(std::io::Error::last_os_error()));
    }

    if limit.rlim_cur == libc::RLIM_INFINITY {
        // SAFETY: sysconf has no memory-safety preconditions.
        let open_max = unsafe { libc::sysconf(libc::_SC_OPEN_MAX) };
        if open_max > 0 {
            return Ok(usize::try_from(open_max).unwrap_or(usize::MAX));
        }
        return Ok(usize::MAX);
    }
    Ok(usize::try_from(limit.rlim_cur).unwrap_or(usize::MAX))
}
