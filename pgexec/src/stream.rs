//! Buffered postgres stream.
use bytes::{Buf, BufMut, BytesMut};
use std::{
    io,
    pin::Pin,
    task::{Context, Poll, ready},
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::{
    Result,
    common::verbose,
    postgres::{BackendMessage, BackendProtocol, FrontendProtocol, decode_frame, frontend},
    transport::PgTransport,
};

const DEFAULT_BUF_CAPACITY: usize = 1024;

/// Buffered connection to postgres over any byte stream.
///
/// The stream is expected to be past startup and authentication.
#[derive(Debug)]
pub struct PgStream<S> {
    socket: S,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl<S> PgStream<S> {
    pub fn new(socket: S) -> Self {
        Self {
            socket,
            read_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            write_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
        }
    }

    /// Returns `true` if a received message is waiting to be read.
    pub(crate) fn has_buffered_message(&self) -> bool {
        // at least a header
        self.read_buf.len() >= 5
    }

    pub fn get_ref(&self) -> &S {
        &self.socket
    }

    pub fn into_inner(self) -> S {
        self.socket
    }
}

impl<S> PgTransport for PgStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        while self.write_buf.has_remaining() {
            let n = ready!(Pin::new(&mut self.socket).poll_write(cx, self.write_buf.chunk()))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.write_buf.advance(n);
        }
        Pin::new(&mut self.socket).poll_flush(cx)
    }

    fn poll_recv(&mut self, cx: &mut Context) -> Poll<Result<BackendMessage>> {
        loop {
            if let Some((msgtype, body)) = decode_frame(&mut self.read_buf)? {
                let message = BackendMessage::decode(msgtype, body)?;
                verbose!("(B) {}", BackendMessage::message_name(message.msgtype()));
                return Poll::Ready(Ok(message));
            }

            let n = ready!(poll_read(&mut self.socket, &mut self.read_buf, cx))?;
            if n == 0 {
                return Poll::Ready(Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()));
            }
        }
    }

    fn poll_shutdown(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        Pin::new(&mut self.socket).poll_shutdown(cx)
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        verbose!("(F) {}", F::MSGTYPE as char);
        frontend::write(message, &mut self.write_buf);
    }

    fn send_cancel(&mut self, cancel: frontend::CancelRequest) {
        cancel.write(&mut self.write_buf);
    }

    fn buffered(&self) -> usize {
        self.write_buf.len()
    }
}

fn poll_read<R>(reader: &mut R, buf: &mut BytesMut, cx: &mut Context) -> Poll<io::Result<usize>>
where
    R: AsyncRead + Unpin,
{
    if buf.capacity() == buf.len() {
        buf.reserve(DEFAULT_BUF_CAPACITY);
    }

    let n = {
        let dst = buf.chunk_mut();
        // SAFETY: `ReadBuf` only ever writes initialized bytes into the slice
        let dst = unsafe { dst.as_uninit_slice_mut() };
        let mut read = ReadBuf::uninit(dst);
        let ptr = read.filled().as_ptr();
        ready!(Pin::new(reader).poll_read(cx, &mut read)?);

        // Ensure the pointer does not change from under us
        assert_eq!(ptr, read.filled().as_ptr());
        read.filled().len()
    };

    // SAFETY: This is guaranteed to be the number of initialized (and read)
    // bytes due to the invariants provided by `ReadBuf::filled`.
    unsafe {
        buf.advance_mut(n);
    }

    Poll::Ready(Ok(n))
}
