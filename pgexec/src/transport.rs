//! The [`PgTransport`] trait.
use std::{
    io,
    task::{Context, Poll},
};

use crate::{
    Result,
    postgres::{BackendMessage, FrontendProtocol, frontend},
};

/// A buffered stream which can send and receive postgres message.
pub trait PgTransport: Unpin {
    /// Poll to flush the underlying io.
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>>;

    /// Poll to receive a message.
    ///
    /// Messages are returned as they arrive, including asynchronous ones. Interpreting
    /// `ErrorResponse` and `NoticeResponse` is left to the caller.
    fn poll_recv(&mut self, cx: &mut Context) -> Poll<Result<BackendMessage>>;

    /// Poll to shut down the write side of the underlying io.
    fn poll_shutdown(&mut self, cx: &mut Context) -> Poll<io::Result<()>>;

    /// Send message to the backend.
    ///
    /// Note that this send is buffered, caller must also call
    /// [`poll_flush`][1] or [`flush`][2] afterwards.
    ///
    /// [1]: PgTransport::poll_flush
    /// [2]: PgTransportExt::flush
    fn send<F: FrontendProtocol>(&mut self, message: F);

    /// Send [`CancelRequest`][1] message to the backend.
    ///
    /// Like startup, the cancel request has no initial message-type byte.
    ///
    /// [1]: frontend::CancelRequest
    fn send_cancel(&mut self, cancel: frontend::CancelRequest);

    /// Bytes buffered and not yet flushed.
    fn buffered(&self) -> usize;
}

impl<P> PgTransport for &mut P where P: PgTransport {
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        P::poll_flush(self, cx)
    }

    fn poll_recv(&mut self, cx: &mut Context) -> Poll<Result<BackendMessage>> {
        P::poll_recv(self, cx)
    }

    fn poll_shutdown(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        P::poll_shutdown(self, cx)
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        P::send(self, message);
    }

    fn send_cancel(&mut self, cancel: frontend::CancelRequest) {
        P::send_cancel(self, cancel);
    }

    fn buffered(&self) -> usize {
        P::buffered(self)
    }
}

/// An extension trait to provide `Future` API for [`PgTransport`].
pub trait PgTransportExt: PgTransport {
    /// Flush the underlying io.
    fn flush(&mut self) -> impl Future<Output = io::Result<()>> {
        std::future::poll_fn(|cx| self.poll_flush(cx))
    }

    /// Receive a backend message.
    fn recv(&mut self) -> impl Future<Output = Result<BackendMessage>> {
        std::future::poll_fn(|cx| self.poll_recv(cx))
    }

    /// Flush, then shut down the write side.
    fn shutdown(&mut self) -> impl Future<Output = io::Result<()>> {
        async {
            self.flush().await?;
            std::future::poll_fn(|cx| self.poll_shutdown(cx)).await
        }
    }
}

impl<P> PgTransportExt for P where P: PgTransport { }
