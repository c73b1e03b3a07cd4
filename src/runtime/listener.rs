//! Listening socket setup.
//!
//! The socket is bound to the IPv6 wildcard address with address reuse and
//! non-blocking mode enabled. Whether IPv4 clients can connect through
//! mapped addresses is decided explicitly by `ipv6_only` rather than left to
//! the host's `bindv6only` default.

use crate::error::{Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv6Addr, SocketAddr};

/// Check that `raw` is a usable TCP port.
pub fn validate_port(raw: i64) -> Result<u16> {
    match u16::try_from(raw) {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(Error::InvalidPort(raw)),
    }
}

/// Exclusively owned, bound, non-blocking server socket.
///
/// Dropping it closes the descriptor. A socket that failed halfway through
/// construction is closed the same way, since `socket2::Socket` owns it from
/// the first syscall on.
#[derive(Debug)]
pub struct ListenSocket {
    socket: Socket,
    listening: bool,
}

impl ListenSocket {
    /// Validate `port`, then create and bind the socket.
    pub fn create(port: i64, ipv6_only: bool) -> Result<Self> {
        let port = validate_port(port)?;

        let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))
            .map_err(Error::syscall("socket"))?;

        socket
            .set_reuse_address(true)
            .map_err(Error::syscall("setsockopt"))?;
        socket
            .set_only_v6(ipv6_only)
            .map_err(Error::syscall("setsockopt"))?;
        socket
            .set_nonblocking(true)
            .map_err(Error::syscall("fcntl"))?;

        let addr = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));
        socket.bind(&addr.into()).map_err(Error::syscall("bind"))?;

        Ok(Self {
            socket,
            listening: false,
        })
    }

    /// Start accepting connections with a pending queue of `backlog`.
    pub fn listen(&mut self, backlog: i32) -> Result<()> {
        if self.listening {
            return Err(Error::AlreadyListening);
        }
        self.socket
            .listen(backlog)
            .map_err(Error::syscall("listen"))?;
        self.listening = true;
        Ok(())
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        let addr = self
            .socket
            .local_addr()
            .map_err(Error::syscall("getsockname"))?;
        addr.as_socket().ok_or_else(|| Error::Syscall {
            op: "getsockname",
            source: io::Error::new(io::ErrorKind::InvalidData, "not an inet address"),
        })
    }

    /// Hand the descriptor over to mio. This is the one ownership transfer
    /// the socket allows.
    pub fn into_mio(self) -> mio::net::TcpListener {
        debug_assert!(self.is_listening(), "socket handed over before listen()");
        let listener: std::net::TcpListener = self.socket.into();
        mio::net::TcpListener::from_std(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn free_port() -> i64 {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        i64::from(probe.local_addr().unwrap().port())
    }

    #[test]
    fn test_validate_port() {
        assert_eq!(validate_port(1).unwrap(), 1);
        assert_eq!(validate_port(9000).unwrap(), 9000);
        assert_eq!(validate_port(65535).unwrap(), 65535);

        for raw in [0, -1, 65536, 70000, i64::MAX] {
            let err = validate_port(raw).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration);
        }
    }

    #[test]
    fn test_invalid_port_touches_no_socket() {
        match ListenSocket::create(70000, false) {
            Err(Error::InvalidPort(70000)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_create_binds_wildcard() {
        let port = free_port();
        let socket = ListenSocket::create(port, false).unwrap();
        let addr = socket.local_addr().unwrap();

        assert!(addr.is_ipv6());
        assert!(addr.ip().is_unspecified());
        assert_eq!(i64::from(addr.port()), port);
        assert!(!socket.is_listening());
    }

    #[test]
    fn test_listen_twice_fails() {
        let mut socket = ListenSocket::create(free_port(), false).unwrap();
        socket.listen(8).unwrap();
        assert!(socket.is_listening());

        let err = socket.listen(8).unwrap_err();
        assert!(matches!(err, Error::AlreadyListening));
        assert_eq!(err.kind(), ErrorKind::Resource);
    }

    #[test]
    fn test_port_in_use_fails_at_bind() {
        let port = free_port();
        let mut first = ListenSocket::create(port, false).unwrap();
        first.listen(8).unwrap();

        match ListenSocket::create(port, false) {
            Err(Error::Syscall { op: "bind", .. }) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_dual_stack_accepts_ipv4() {
        let port = free_port();
        let mut socket = ListenSocket::create(port, false).unwrap();
        socket.listen(8).unwrap();

        let client = std::net::TcpStream::connect(("127.0.0.1", port as u16));
        assert!(client.is_ok());
    }
}
