//! The [`PgTransport`] trait.
use std::{
    io,
    task::{Context, Poll},
};

use crate::{
    Result,
    protocol::{BackendMessage, FrontendProtocol, frontend},
};

/// A buffered stream which can send and receive postgres messages.
///
/// Sends are buffered; a whole batch of messages reaches the wire on the
/// next [`poll_flush`][PgTransport::poll_flush]. This is what keeps an
/// extended-query pipeline (`Parse`/`Bind`/`Describe`/`Execute`/`Sync`)
/// inside a single write.
pub trait PgTransport: Unpin {
    /// Poll to flush the underlying io.
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>>;

    /// Poll to receive the next frame, decoded into a [`BackendMessage`].
    ///
    /// Flushes buffered messages first if there are any.
    fn poll_recv(&mut self, cx: &mut Context) -> Poll<Result<BackendMessage>>;

    /// Buffer a message towards the backend.
    fn send<F: FrontendProtocol>(&mut self, message: F);

    /// Buffer a [`Startup`][1] message towards the backend.
    ///
    /// For historical reasons, the very first message sent by the client
    /// (the startup message) has no initial message-type byte.
    ///
    /// Thus, [`Startup`][1] does not implement [`FrontendProtocol`]
    ///
    /// [1]: frontend::Startup
    fn send_startup(&mut self, startup: frontend::Startup);
}

impl<P> PgTransport for &mut P where P: PgTransport {
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        P::poll_flush(self, cx)
    }

    fn poll_recv(&mut self, cx: &mut Context) -> Poll<Result<BackendMessage>> {
        P::poll_recv(self, cx)
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        P::send(self, message);
    }

    fn send_startup(&mut self, startup: frontend::Startup) {
        P::send_startup(self, startup);
    }
}

/// An extension trait to provide a `Future` API for [`PgTransport`].
pub trait PgTransportExt: PgTransport {
    /// Flush the underlying io.
    fn flush(&mut self) -> impl Future<Output = io::Result<()>> {
        std::future::poll_fn(|cx| self.poll_flush(cx))
    }

    /// Receive a backend message.
    fn recv(&mut self) -> impl Future<Output = Result<BackendMessage>> {
        std::future::poll_fn(|cx| self.poll_recv(cx))
    }
}

impl<T> PgTransportExt for T where T: PgTransport { }
