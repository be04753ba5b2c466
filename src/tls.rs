//! The TLS upgrade seam.
//!
//! The SSL *pre-handshake* (request and one byte verdict) belongs to this
//! crate; the TLS engine itself is an external collaborator plugged in
//! through [`TlsConnect`], the same shape the `tokio-postgres` ecosystem
//! uses for its connectors.
use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

/// Upgrade a raw stream to TLS after the server accepted the SSL request.
pub trait TlsConnect<S> {
    /// The upgraded stream.
    type Stream: AsyncRead + AsyncWrite + Unpin;

    /// Perform the TLS handshake against `host`.
    fn connect(self, stream: S, host: &str) -> impl Future<Output = io::Result<Self::Stream>>;
}

/// The connector for sessions that never upgrade.
///
/// Attempting to use it still fails cleanly should a config with
/// [`SslMode::Require`][crate::SslMode::Require] reach it.
#[derive(Debug, Clone, Copy)]
pub struct NoTls;

impl<S> TlsConnect<S> for NoTls
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Stream = S;

    fn connect(self, stream: S, _host: &str) -> impl Future<Output = io::Result<Self::Stream>> {
        let _ = stream;
        std::future::ready(Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "ssl requested but no TLS connector is configured",
        )))
    }
}
