//! Error taxonomy for the echo server.
//!
//! Every fatal condition is an [`Error`]; its [`ErrorKind`] tells the caller
//! whether the configuration was rejected before any socket was touched or
//! an OS resource failed underneath a running server. Per-connection
//! failures never become an `Error`, they are resolved inside the event loop.

use std::io;

/// Broad classification of a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid user-supplied configuration.
    Configuration,
    /// A failing OS-level call or exhausted OS resource.
    Resource,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid port {0}: must be between 1 and 65535")]
    InvalidPort(i64),

    #[error("{op}() failed: {source}")]
    Syscall {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("socket is already listening")]
    AlreadyListening,

    #[error("server has already been started")]
    AlreadyStarted,

    #[error("connection registry is full ({capacity} descriptors)")]
    RegistryFull { capacity: usize },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidPort(_) => ErrorKind::Configuration,
            Error::Syscall { .. }
            | Error::AlreadyListening
            | Error::AlreadyStarted
            | Error::RegistryFull { .. } => ErrorKind::Resource,
        }
    }

    /// Returns a closure that tags an `io::Error` with the call that produced it.
    pub(crate) fn syscall(op: &'static str) -> impl FnOnce(io::Error) -> Error {
        move |source| Error::Syscall { op, source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
