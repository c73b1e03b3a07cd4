//! Single-threaded runtime for the echo server.
//!
//! - `ListenSocket`: bound, non-blocking listening socket
//! - `ConnectionRegistry`: ordered set of watched sockets
//! - `EventLoop`: poll, accept, echo, compact

mod connection;
mod listener;
mod mio;

pub use self::mio::{EventLoop, Shutdown};
pub use connection::descriptor_limit;
pub use listener::ListenSocket;

use crate::config::Config;
use crate::error::{Error, Result};
use std::net::SocketAddr;
use tracing::info;

/// Server instance: owns the listening socket until it is started.
pub struct Server {
    config: Config,
    socket: Option<ListenSocket>,
}

impl Server {
    /// Validate the configured port and bind the listening socket.
    pub fn new(config: Config) -> Result<Self> {
        let socket = ListenSocket::create(config.port, config.ipv6_only)?;
        Ok(Server {
            config,
            socket: Some(socket),
        })
    }

    /// Address the server is bound to, available until `start`.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .as_ref()
            .ok_or(Error::AlreadyStarted)?
            .local_addr()
    }

    /// Listen and run the event loop until it stops.
    ///
    /// A server can only be started once.
    pub fn start(&mut self) -> Result<Shutdown> {
        let addr = self.local_addr()?;
        let mut socket = self.socket.take().ok_or(Error::AlreadyStarted)?;
        socket.listen(self.config.backlog)?;

        let mut event_loop = EventLoop::new(
            socket.into_mio(),
            descriptor_limit()?,
            self.config.idle_timeout,
        )?;

        info!(
            addr = %addr,
            backlog = self.config.backlog,
            ipv6_only = self.config.ipv6_only,
            idle_timeout_secs = self.config.idle_timeout.as_secs(),
            capacity = event_loop.connections().capacity(),
            "Server listening"
        );

        event_loop.run()
    }
}
