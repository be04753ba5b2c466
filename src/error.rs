//! `pglink` error types.
use std::{backtrace::Backtrace, fmt, io};

use crate::{
    protocol::{ProtocolError, ServerError},
    session::ConfigError,
    types::DecodeError,
    value::PrepareError,
};

/// A specialized [`Result`] type for `pglink` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from the `pglink` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub(crate) fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

/// All possible error kind from the `pglink` library.
pub enum ErrorKind {
    /// Invalid configuration or a failed password provider.
    Config(ConfigError),
    /// Socket or TLS failure. Fatal for the session.
    Transport(io::Error),
    /// Malformed frame or a message unexpected for the current phase. Fatal.
    Protocol(ProtocolError),
    /// The SSL pre-handshake failed. Fatal.
    Ssl(SslError),
    /// Authentication failure. Fatal.
    Auth(AuthError),
    /// An `ErrorResponse` from the server, scoped to one query.
    Server(ServerError),
    /// The client side read timeout elapsed, scoped to one query.
    QueryTimeout(QueryTimeout),
    /// Parameter preparation failed before anything was written.
    Prepare(PrepareError),
    /// Column decoding failed.
    Decode(DecodeError),
    /// The query was removed from the queue before submission.
    Cancelled(Cancelled),
    /// The session was ended by the caller.
    ClientClosed(ClientClosed),
    /// The connection went away, taking queued queries with it.
    Terminated(ConnectionTerminated),
}

/// The SSL pre-handshake outcome when the stream could not be upgraded.
#[derive(Debug, thiserror::Error)]
pub enum SslError {
    /// The server answered `N`: it does not accept SSL at all.
    #[error("server refused the SSL upgrade")]
    Unsupported,
    /// The server answered something that is neither `S` nor `N`.
    #[error("unexpected byte {0:#04x} in response to SSLRequest")]
    Negotiation(u8),
}

/// Authentication failure.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("server requested unsupported authentication: {0}")]
    Unsupported(String),
    #[error("none of the offered SASL mechanisms are supported: {0}")]
    UnsupportedMechanism(String),
    #[error("a password is required for {0} authentication")]
    PasswordRequired(&'static str),
    #[error("malformed SASL message: {0}")]
    Sasl(&'static str),
    #[error("SCRAM server signature mismatch")]
    ServerSignature,
}

/// The per-query read timeout elapsed before the server completed the query.
#[derive(Debug, thiserror::Error)]
#[error("query timed out")]
pub struct QueryTimeout;

/// The query was cancelled while still waiting in the queue.
#[derive(Debug, thiserror::Error)]
#[error("query cancelled before submission")]
pub struct Cancelled;

/// The session has been ended by the caller; no further queries are accepted.
#[derive(Debug, thiserror::Error)]
#[error("session is closed")]
pub struct ClientClosed;

/// The connection terminated while queries were queued or in flight.
#[derive(Debug)]
pub struct ConnectionTerminated {
    pub(crate) unexpected: bool,
}

impl std::error::Error for ConnectionTerminated { }

impl fmt::Display for ConnectionTerminated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unexpected {
            true => f.write_str("connection terminated unexpectedly"),
            false => f.write_str("connection terminated"),
        }
    }
}

impl ConnectionTerminated {
    pub fn is_unexpected(&self) -> bool {
        self.unexpected
    }
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ConfigError>e => ErrorKind::Config(e));
from!(<io::Error>e => ErrorKind::Transport(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<SslError>e => ErrorKind::Ssl(e));
from!(<AuthError>e => ErrorKind::Auth(e));
from!(<ServerError>e => ErrorKind::Server(e));
from!(<QueryTimeout>e => ErrorKind::QueryTimeout(e));
from!(<PrepareError>e => ErrorKind::Prepare(e));
from!(<DecodeError>e => ErrorKind::Decode(e));
from!(<Cancelled>e => ErrorKind::Cancelled(e));
from!(<ClientClosed>e => ErrorKind::ClientClosed(e));
from!(<ConnectionTerminated>e => ErrorKind::Terminated(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::Transport(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Ssl(e) => e.fmt(f),
            Self::Auth(e) => e.fmt(f),
            Self::Server(e) => e.fmt(f),
            Self::QueryTimeout(e) => e.fmt(f),
            Self::Prepare(e) => e.fmt(f),
            Self::Decode(e) => e.fmt(f),
            Self::Cancelled(e) => e.fmt(f),
            Self::ClientClosed(e) => e.fmt(f),
            Self::Terminated(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
