//! Framed byte stream over a socket.
use bytes::{Buf, BytesMut};
use std::{
    io,
    task::{Context, Poll, ready},
};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    Result,
    error::SslError,
    protocol::{BackendMessage, BackendProtocol, FrontendProtocol, ProtocolError, frontend},
    transport::PgTransport,
};

const DEFAULT_BUF_CAPACITY: usize = 1024;

/// Inbound frames above this size are assumed to be stream desync, not data.
pub const DEFAULT_FRAME_CAP: u32 = 64 << 20;

/// A buffered, framed postgres stream over any duplex io.
///
/// Owns the byte stream and nothing else: framing in, batched writes out.
/// Session level concerns (state, queue, events) live above it.
#[derive(Debug)]
pub struct PgStream<IO> {
    io: IO,
    read_buf: BytesMut,
    write_buf: BytesMut,
    frame_cap: u32,
    /// Total bytes consumed from the wire, for protocol error reporting.
    consumed: u64,
    /// While true, connection-reset class write errors are suppressed.
    ending: bool,
}

impl<IO> PgStream<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: IO) -> Self {
        Self::with_frame_cap(io, DEFAULT_FRAME_CAP)
    }

    pub fn with_frame_cap(io: IO, frame_cap: u32) -> Self {
        Self {
            io,
            read_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            write_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            frame_cap,
            consumed: 0,
            ending: false,
        }
    }

    /// Hand the raw io back, e.g. to a TLS connector right after the SSL
    /// pre-handshake.
    ///
    /// # Panics
    ///
    /// Panics if any buffered bytes would be lost.
    pub fn into_io(self) -> IO {
        assert!(
            self.read_buf.is_empty() && self.write_buf.is_empty(),
            "stream still holds buffered bytes"
        );
        self.io
    }

    fn suppress(&self, res: io::Result<()>) -> io::Result<()> {
        match res {
            Err(e) if self.ending && is_reset(&e) => Ok(()),
            res => res,
        }
    }

    /// Perform the SSL pre-handshake: write the fixed `SSLRequest` and read
    /// the single byte verdict.
    ///
    /// `S` means the caller may now upgrade the [`into_io`][PgStream::into_io]
    /// stream with its TLS engine; `N` means the server refuses SSL.
    pub async fn ssl_handshake(&mut self) -> Result<()> {
        frontend::SslRequest.write(&mut self.write_buf);
        std::future::poll_fn(|cx| self.poll_flush(cx)).await?;

        let verdict = std::future::poll_fn(|cx| self.poll_recv_byte(cx)).await?;
        self.consumed += 1;
        match verdict {
            b'S' => {
                // bytes before the TLS handshake would mean the server (or
                // someone in between) is desynchronized
                if !self.read_buf.is_empty() {
                    return Err(ProtocolError::UnexpectedPhase {
                        found: self.read_buf[0],
                        phase: "ssl negotiation",
                    }
                    .into());
                }
                Ok(())
            },
            b'N' => Err(SslError::Unsupported.into()),
            other => Err(SslError::Negotiation(other).into()),
        }
    }

    fn poll_recv_byte(&mut self, cx: &mut Context) -> Poll<Result<u8>> {
        while self.read_buf.is_empty() {
            self.read_buf.reserve(1);
            let n = ready!(crate::io::poll_read(&mut self.io, &mut self.read_buf, cx))?;
            if n == 0 {
                return Poll::Ready(Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()));
            }
        }
        let byte = self.read_buf[0];
        self.read_buf.advance(1);
        Poll::Ready(Ok(byte))
    }

    /// Write `Terminate` and flush, then shut the write half down.
    pub async fn end(&mut self) -> io::Result<()> {
        self.ending = true;
        self.write_buf.extend_from_slice(&frontend::Terminate::BYTES);
        std::future::poll_fn(|cx| self.poll_flush(cx)).await?;
        std::future::poll_fn(|cx| {
            let res = ready!(std::pin::Pin::new(&mut self.io).poll_shutdown(cx));
            Poll::Ready(self.suppress(res))
        })
        .await
    }

    /// Hard close: no Terminate, no flush of pending writes.
    pub async fn destroy(&mut self) {
        self.ending = true;
        self.write_buf.clear();
        let _ = std::future::poll_fn(|cx| std::pin::Pin::new(&mut self.io).poll_shutdown(cx)).await;
    }
}

fn is_reset(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected
    )
}

impl<IO> PgTransport for PgStream<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        let res = ready!(crate::io::poll_write_all(&mut self.io, &mut self.write_buf, cx));
        Poll::Ready(self.suppress(res))
    }

    fn poll_recv(&mut self, cx: &mut Context) -> Poll<Result<BackendMessage>> {
        if !self.write_buf.is_empty() {
            ready!(self.poll_flush(cx))?;
        }

        loop {
            if let Some(mut header) = self.read_buf.get(..5) {
                let msgtype = header.get_u8();
                let len = header.get_i32();

                if len < 4 {
                    return Poll::Ready(Err(ProtocolError::InvalidLength {
                        offset: self.consumed,
                        len,
                    }
                    .into()));
                }
                if len as u32 > self.frame_cap {
                    return Poll::Ready(Err(ProtocolError::FrameTooLarge {
                        offset: self.consumed,
                        len: len as u32,
                        cap: self.frame_cap,
                    }
                    .into()));
                }

                let body_len = len as usize - 4;
                if self.read_buf.len() - 5 >= body_len {
                    self.read_buf.advance(5);
                    let body = self.read_buf.split_to(body_len).freeze();
                    self.consumed += 5 + body_len as u64;

                    let message = BackendMessage::decode(msgtype, body)?;
                    #[cfg(feature = "log-verbose")]
                    log::trace!("(B){message:?}");
                    return Poll::Ready(Ok(message));
                }

                self.read_buf.reserve(5 + body_len - self.read_buf.len());
            } else {
                self.read_buf.reserve(DEFAULT_BUF_CAPACITY);
            }

            let n = ready!(crate::io::poll_read(&mut self.io, &mut self.read_buf, cx))?;
            if n == 0 {
                return Poll::Ready(Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()));
            }
        }
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        frontend::write(message, &mut self.write_buf);
    }

    fn send_startup(&mut self, startup: frontend::Startup) {
        #[cfg(feature = "log-verbose")]
        log::trace!("(F){startup:?}");
        startup.write(&mut self.write_buf);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transport::PgTransportExt;
    use tokio::io::AsyncWriteExt;

    fn frame(tag: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend_from_slice(&(body.len() as i32 + 4).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    #[tokio::test]
    async fn frames_split_across_deliveries() {
        let (client, mut server) = tokio::io::duplex(16);
        let mut stream = PgStream::new(client);

        let bytes = frame(b'Z', b"I");
        let (a, b) = bytes.split_at(3);
        server.write_all(a).await.unwrap();

        let recv = tokio::spawn(async move {
            let msg = stream.recv().await.unwrap();
            assert!(matches!(msg, BackendMessage::ReadyForQuery(_)));
        });

        tokio::task::yield_now().await;
        server.write_all(b).await.unwrap();
        recv.await.unwrap();
    }

    #[tokio::test]
    async fn frame_length_below_four_is_a_protocol_error() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut stream = PgStream::new(client);

        let mut bytes = vec![b'Z'];
        bytes.extend_from_slice(&2i32.to_be_bytes());
        server.write_all(&bytes).await.unwrap();

        let err = stream.recv().await.unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::ErrorKind::Protocol(ProtocolError::InvalidLength { offset: 0, len: 2 })
        ));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_without_reading_it() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut stream = PgStream::with_frame_cap(client, 1024);

        let mut bytes = vec![b'D'];
        bytes.extend_from_slice(&(10i32 << 20).to_be_bytes());
        server.write_all(&bytes).await.unwrap();

        let err = stream.recv().await.unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::ErrorKind::Protocol(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn ssl_handshake_verdicts() {
        for (answer, ok) in [(b'S', true), (b'N', false), (b'E', false)] {
            let (client, mut server) = tokio::io::duplex(64);
            let mut stream = PgStream::new(client);

            let server_task = tokio::spawn(async move {
                use tokio::io::AsyncReadExt;
                let mut req = [0u8; 8];
                server.read_exact(&mut req).await.unwrap();
                assert_eq!(req, frontend::SslRequest::BYTES);
                server.write_all(&[answer]).await.unwrap();
                server
            });

            let res = stream.ssl_handshake().await;
            assert_eq!(res.is_ok(), ok, "answer {answer:?}");
            if !ok {
                let err = res.unwrap_err();
                assert!(matches!(err.kind(), crate::ErrorKind::Ssl(_)));
            }
            drop(server_task.await.unwrap());
        }
    }
}
