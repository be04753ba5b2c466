use std::{
    pin::Pin,
    task::{Context, Poll},
};

/// A stream that is either still raw or has been upgraded by a TLS
/// connector.
///
/// The actual TLS engine is an external collaborator; this type only keeps
/// both halves behind one `AsyncRead + AsyncWrite` surface so the session
/// does not care which one it got.
#[derive(Debug)]
pub enum MaybeTls<S, T> {
    Raw(S),
    Tls(T),
}

macro_rules! delegate {
    ($self:ident, $inner:pat => $body:expr) => {
        match $self.get_mut() {
            MaybeTls::Raw($inner) => $body,
            MaybeTls::Tls($inner) => $body,
        }
    };
}

impl<S, T> tokio::io::AsyncRead for MaybeTls<S, T>
where
    S: tokio::io::AsyncRead + Unpin,
    T: tokio::io::AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        delegate!(self, inner => Pin::new(inner).poll_read(cx, buf))
    }
}

impl<S, T> tokio::io::AsyncWrite for MaybeTls<S, T>
where
    S: tokio::io::AsyncWrite + Unpin,
    T: tokio::io::AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        delegate!(self, inner => Pin::new(inner).poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        delegate!(self, inner => Pin::new(inner).poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        delegate!(self, inner => Pin::new(inner).poll_shutdown(cx))
    }
}
