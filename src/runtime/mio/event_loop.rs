//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking accept/read/write syscalls until they
//! report `WouldBlock`. Uses epoll on Linux, kqueue on macOS.
//!
//! Each turn dispatches only the entries that were registered when the
//! turn began. Clients accepted during a turn are polled from the next
//! one on, and clients closed during a turn are compacted out at its end.

use crate::error::{Error, Result};
use crate::runtime::connection::{Connection, ConnectionRegistry, Endpoint};
use mio::event::Event;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Size of the per-read echo buffer.
const BUFFER_SIZE: usize = 1024;

/// Maximum readiness events returned by one poll.
const EVENTS_CAPACITY: usize = 1024;

/// Why the loop stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// Nothing became ready for a whole idle timeout.
    IdleTimeout,
}

/// Reason a single client connection is dropped. Never fatal to the loop.
#[derive(Debug, thiserror::Error)]
enum Disconnect {
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("read failed: {0}")]
    ReadFailed(#[source] io::Error),
    #[error("write failed: {0}")]
    WriteFailed(#[source] io::Error),
}

/// Single-threaded accept/echo loop.
pub struct EventLoop {
    poll: Poll,
    events: Events,
    connections: ConnectionRegistry,
    idle_timeout: Duration,
    buffer: [u8; BUFFER_SIZE],
}

impl EventLoop {
    /// Register `listener` as entry 0 of a registry holding at most
    /// `capacity` sockets.
    pub fn new(listener: TcpListener, capacity: usize, idle_timeout: Duration) -> Result<Self> {
        let poll = Poll::new().map_err(Error::syscall("poll"))?;
        let poller = poll
            .registry()
            .try_clone()
            .map_err(Error::syscall("poll"))?;

        let mut connections = ConnectionRegistry::new(poller, capacity);
        connections.add(Endpoint::Listener(listener), Interest::READABLE)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            connections,
            idle_timeout,
            buffer: [0; BUFFER_SIZE],
        })
    }

    /// Run until the idle timeout fires or a fatal error occurs.
    ///
    /// Every remaining socket, the listener included, is closed before
    /// returning on either path.
    pub fn run(&mut self) -> Result<Shutdown> {
        let result = loop {
            match self.turn() {
                Ok(None) => {}
                Ok(Some(shutdown)) => break Ok(shutdown),
                Err(e) => break Err(e),
            }
        };

        let closed = self.connections.close_all();
        info!(closed, "Event loop stopped");
        result
    }

    /// One poll-dispatch-compact cycle.
    ///
    /// Returns `Some` when the loop should stop.
    pub fn turn(&mut self) -> Result<Option<Shutdown>> {
        match self.poll.poll(&mut self.events, Some(self.idle_timeout)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(None),
            Err(e) => return Err(Error::syscall("poll")(e)),
        }

        if self.events.is_empty() {
            info!(timeout = ?self.idle_timeout, "Idle timeout reached");
            return Ok(Some(Shutdown::IdleTimeout));
        }

        let ready: HashMap<Token, Interest> = self
            .events
            .iter()
            .filter_map(|event| readiness(event).map(|ready| (event.token(), ready)))
            .collect();

        // Clients accepted below land past `live` and wait for the next turn.
        let live = self.connections.len();
        for index in 0..live {
            let Some(conn) = self.connections.get(index) else {
                break;
            };
            let wanted = ready
                .get(&conn.token())
                .is_some_and(|&ready| overlaps(conn.interest(), ready));
            if conn.is_closed() || !wanted {
                continue;
            }

            if conn.is_listener() {
                self.accept_connections()?;
            } else {
                self.handle_readable(index);
            }
        }

        if self.connections.marked() > 0 {
            let removed = self.connections.compact();
            debug!(
                removed,
                remaining = self.connections.len(),
                "Compacted registry"
            );
        }

        Ok(None)
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Accept until the pending queue is empty.
    fn accept_connections(&mut self) -> Result<()> {
        loop {
            let accepted = match self.connections.get(0).map(Connection::endpoint) {
                Some(Endpoint::Listener(listener)) => listener.accept(),
                _ => return Ok(()),
            };

            match accepted {
                Ok((stream, peer)) => {
                    let token = self
                        .connections
                        .add(Endpoint::Client(stream), Interest::READABLE)?;
                    debug!(
                        token = token.0,
                        peer = %peer,
                        entries = self.connections.len(),
                        "Accepted connection"
                    );
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionAborted => {
                    debug!(error = %e, "Connection aborted before accept");
                    continue;
                }
                Err(e) => return Err(Error::syscall("accept")(e)),
            }
        }
    }

    /// Drain and echo a readable client, marking it closed on disconnect.
    fn handle_readable(&mut self, index: usize) {
        let Some(conn) = self.connections.get_mut(index) else {
            return;
        };
        let token = conn.token();
        let Endpoint::Client(stream) = conn.endpoint_mut() else {
            return;
        };

        match echo_available(stream, &mut self.buffer) {
            Ok(echoed) => {
                debug!(token = token.0, bytes = echoed, "Echoed");
            }
            Err(reason) => {
                match reason {
                    Disconnect::ReadFailed(_) => {
                        warn!(token = token.0, reason = %reason, "Closing connection")
                    }
                    _ => debug!(token = token.0, reason = %reason, "Closing connection"),
                }
                self.connections.mark_closed(index);
            }
        }
    }
}

/// Readiness reported by `event`. Hang-ups and errors count as readable so
/// the drain observes the EOF or the error.
fn readiness(event: &Event) -> Option<Interest> {
    let readable = event.is_readable() || event.is_read_closed() || event.is_error();
    let writable = event.is_writable() || event.is_write_closed();
    match (readable, writable) {
        (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
        (true, false) => Some(Interest::READABLE),
        (false, true) => Some(Interest::WRITABLE),
        (false, false) => None,
    }
}

fn overlaps(interest: Interest, ready: Interest) -> bool {
    (interest.is_readable() && ready.is_readable())
        || (interest.is_writable() && ready.is_writable())
}

/// Read whatever is available on `stream` and write each chunk straight
/// back, until a read would block.
///
/// Returns the number of bytes echoed.
fn echo_available<S>(stream: &mut S, buf: &mut [u8]) -> std::result::Result<usize, Disconnect>
where
    S: Read + Write,
{
    let mut echoed = 0;
    loop {
        let n = match stream.read(buf) {
            Ok(0) => return Err(Disconnect::PeerClosed),
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(echoed),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Disconnect::ReadFailed(e)),
        };

        write_chunk(stream, &buf[..n]).map_err(Disconnect::WriteFailed)?;
        echoed += n;
    }
}

/// Write all of `chunk`. A full send buffer is an error: there is no
/// backpressure beyond what the socket buffers provide.
fn write_chunk<S: Write>(stream: &mut S, mut chunk: &[u8]) -> io::Result<()> {
    while !chunk.is_empty() {
        match stream.write(chunk) {
            Ok(0) => {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
            }
            Ok(n) => chunk = &chunk[n..],
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
