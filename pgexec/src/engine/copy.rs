//! Bulk copy.
//!
//! A copy handle mutably borrows the executor, so nothing else runs on the connection until
//! the handle is finished or aborted. A handle dropped midway leaves the executor refusing
//! every execution with [`UsageError::CopyInProgress`] until
//! [`abort_copy`][PgExecutor::abort_copy] recovers the connection.
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use super::{CopyDirection, PgExecutor};
use crate::{
    Result,
    common::{debug, span},
    error::{Error, UsageError},
    postgres::{BackendMessage, backend::CopyResponse, frontend},
    row::CommandOutcome,
};

/// Flush copy data once this many bytes are buffered.
const COPY_FLUSH_THRESHOLD: usize = 64 * 1024;

/// A started copy.
#[derive(Debug)]
pub enum CopyOperation<'a, S> {
    /// `COPY ... FROM STDIN`
    In(CopyIn<'a, S>),
    /// `COPY ... TO STDOUT`
    Out(CopyOut<'a, S>),
    /// Bidirectional copy, used by replication.
    Both(CopyBoth<'a, S>),
}

impl<'a, S> CopyOperation<'a, S> {
    pub fn response(&self) -> &CopyResponse {
        match self {
            CopyOperation::In(e) => &e.response,
            CopyOperation::Out(e) => &e.response,
            CopyOperation::Both(e) => &e.response,
        }
    }

    /// Returns the copy-in handle, `None` for other directions.
    pub fn into_in(self) -> Option<CopyIn<'a, S>> {
        match self {
            CopyOperation::In(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the copy-out handle, `None` for other directions.
    pub fn into_out(self) -> Option<CopyOut<'a, S>> {
        match self {
            CopyOperation::Out(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the copy-both handle, `None` for other directions.
    pub fn into_both(self) -> Option<CopyBoth<'a, S>> {
        match self {
            CopyOperation::Both(e) => Some(e),
            _ => None,
        }
    }
}

/// Reply state of a copy after its data ended.
#[derive(Debug, Default)]
struct CopyEnd {
    rows: Option<u64>,
    error: Option<Error>,
    done: bool,
    /// Data chunks received.
    received: u64,
    received_bytes: u64,
}

impl CopyEnd {
    /// Rows the server reported, `chunks` when its tag carries no count.
    fn result(&mut self, chunks: u64) -> Result<u64> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(self.rows.unwrap_or(chunks)),
        }
    }
}

/// Sends rows to the server.
#[derive(Debug)]
pub struct CopyIn<'a, S> {
    engine: &'a mut PgExecutor<S>,
    response: CopyResponse,
    written: u64,
    written_bytes: u64,
}

impl<S> CopyIn<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn response(&self) -> &CopyResponse {
        &self.response
    }

    /// Chunks written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Data bytes written so far.
    pub fn written_bytes(&self) -> u64 {
        self.written_bytes
    }

    /// Send one chunk of copy data, usually one row.
    pub async fn write_row(&mut self, data: &[u8]) -> Result<()> {
        self.engine.send(frontend::CopyData { data });
        self.written += 1;
        self.written_bytes += data.len() as u64;
        if self.engine.buffered() >= COPY_FLUSH_THRESHOLD {
            self.engine.flush().await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.engine.flush().await
    }

    /// End the data and return the number of rows the server copied.
    pub async fn finish(self) -> Result<u64> {
        self.engine.send(frontend::CopyDone);
        self.engine.flush().await?;
        let mut end = CopyEnd::default();
        while !end.done {
            self.engine.copy_next(&mut end).await?;
        }
        end.result(self.written)
    }

    /// Fail the copy with `message`, the connection stays usable.
    pub async fn abort(self, message: &str) -> Result<()> {
        self.engine.fail_copy(message).await
    }
}

/// Receives rows from the server.
#[derive(Debug)]
pub struct CopyOut<'a, S> {
    engine: &'a mut PgExecutor<S>,
    response: CopyResponse,
    end: CopyEnd,
}

impl<S> CopyOut<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn response(&self) -> &CopyResponse {
        &self.response
    }

    /// Chunks received so far.
    pub fn received(&self) -> u64 {
        self.end.received
    }

    /// Data bytes received so far.
    pub fn received_bytes(&self) -> u64 {
        self.end.received_bytes
    }

    /// Next chunk of copy data, `None` once the copy completed.
    pub async fn read_row(&mut self) -> Result<Option<Bytes>> {
        while !self.end.done {
            if let Some(data) = self.engine.copy_next(&mut self.end).await? {
                return Ok(Some(data));
            }
        }
        let received = self.end.received;
        self.end.result(received).map(|_| None)
    }

    /// Discard the remaining data and return the number of rows copied.
    pub async fn finish(mut self) -> Result<u64> {
        while !self.end.done {
            self.engine.copy_next(&mut self.end).await?;
        }
        let received = self.end.received;
        self.end.result(received)
    }

    /// Stop reading, the remaining data is discarded.
    pub async fn abort(self) -> Result<()> {
        self.finish().await.map(|_| ())
    }
}

/// Exchanges data in both directions.
#[derive(Debug)]
pub struct CopyBoth<'a, S> {
    engine: &'a mut PgExecutor<S>,
    response: CopyResponse,
    end: CopyEnd,
}

impl<S> CopyBoth<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn response(&self) -> &CopyResponse {
        &self.response
    }

    pub async fn write_data(&mut self, data: &[u8]) -> Result<()> {
        self.engine.send(frontend::CopyData { data });
        self.engine.flush().await
    }

    /// Next chunk from the server, `None` once the copy completed.
    pub async fn read_data(&mut self) -> Result<Option<Bytes>> {
        while !self.end.done {
            if let Some(data) = self.engine.copy_next(&mut self.end).await? {
                return Ok(Some(data));
            }
        }
        let received = self.end.received;
        self.end.result(received).map(|_| None)
    }

    /// End our side, then discard whatever the server still sends.
    pub async fn finish(mut self) -> Result<u64> {
        self.engine.send(frontend::CopyDone);
        self.engine.flush().await?;
        while !self.end.done {
            self.engine.copy_next(&mut self.end).await?;
        }
        let received = self.end.received;
        self.end.result(received)
    }

    pub async fn abort(self, message: &str) -> Result<()> {
        self.engine.fail_copy(message).await
    }
}

impl<S> PgExecutor<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Start a copy with a `COPY` statement.
    ///
    /// The statement travels as a simple query. Anything other than a copy response ends with
    /// [`UsageError::NotCopy`], or the server error if the statement failed.
    pub async fn start_copy(&mut self, sql: &str, suppress_begin: bool) -> Result<CopyOperation<'_, S>> {
        span!("start_copy");
        self.ensure_ready()?;
        self.begin_if_needed(suppress_begin).await?;

        self.send(frontend::Query { sql });
        self.flush().await?;

        let mut error: Option<Error> = None;
        loop {
            match self.read_message().await? {
                BackendMessage::CopyInResponse(response) => {
                    self.copy = Some(CopyDirection::In);
                    return Ok(CopyOperation::In(CopyIn {
                        engine: self,
                        response: response.0,
                        written: 0,
                        written_bytes: 0,
                    }));
                },
                BackendMessage::CopyOutResponse(response) => {
                    self.copy = Some(CopyDirection::Out);
                    return Ok(CopyOperation::Out(CopyOut {
                        engine: self,
                        response: response.0,
                        end: CopyEnd::default(),
                    }));
                },
                BackendMessage::CopyBothResponse(response) => {
                    self.copy = Some(CopyDirection::Both);
                    return Ok(CopyOperation::Both(CopyBoth {
                        engine: self,
                        response: response.0,
                        end: CopyEnd::default(),
                    }));
                },
                BackendMessage::NoticeResponse(notice) => {
                    self.on_notice(notice)?;
                },
                BackendMessage::ErrorResponse(response) => {
                    let err = self.on_error_response(response)?;
                    if err.is_fatal() {
                        return Err(err);
                    }
                    error.get_or_insert(err);
                },
                BackendMessage::RowDescription(_)
                | BackendMessage::DataRow(_)
                | BackendMessage::CommandComplete(_)
                | BackendMessage::EmptyQueryResponse(_) => { },
                BackendMessage::ReadyForQuery(ready) => {
                    self.on_ready(ready);
                    return Err(error.unwrap_or_else(|| UsageError::NotCopy.into()));
                },
                message => return Err(self.unexpected(&message, "start copy")),
            }
        }
    }

    /// Recover the connection from a copy whose handle was dropped unfinished.
    ///
    /// Copy-in is failed, copy-out data is discarded. Does nothing without an active copy.
    pub async fn abort_copy(&mut self) -> Result<()> {
        match self.copy {
            None => Ok(()),
            Some(CopyDirection::In | CopyDirection::Both) => {
                self.fail_copy("copy aborted").await
            },
            Some(CopyDirection::Out) => {
                debug!("discarding copy output");
                self.drain_until_ready().await?;
                self.copy = None;
                Ok(())
            },
        }
    }

    /// Send `CopyFail` and read up to readiness, the error it causes is expected.
    async fn fail_copy(&mut self, message: &str) -> Result<()> {
        debug!("aborting copy: {message}");
        self.send(frontend::CopyFail { message });
        self.flush().await?;
        let _expected = self.drain_until_ready().await?;
        self.copy = None;
        Ok(())
    }

    /// Read one message of a copy in progress, returning data chunks.
    async fn copy_next(&mut self, end: &mut CopyEnd) -> Result<Option<Bytes>> {
        match self.read_message().await? {
            BackendMessage::CopyData(data) => {
                end.received += 1;
                end.received_bytes += data.data.len() as u64;
                return Ok(Some(data.data));
            },
            BackendMessage::CopyDone(_) => { },
            BackendMessage::CommandComplete(cmd) => end.rows = CommandOutcome::parse(cmd.tag).rows,
            BackendMessage::NoticeResponse(notice) => {
                self.on_notice(notice)?;
            },
            BackendMessage::ErrorResponse(response) => {
                let err = self.on_error_response(response)?;
                if err.is_fatal() {
                    self.copy = None;
                    return Err(err);
                }
                end.error.get_or_insert(err);
            },
            BackendMessage::ReadyForQuery(ready) => {
                self.on_ready(ready);
                self.copy = None;
                end.done = true;
            },
            message => return Err(self.unexpected(&message, "copy")),
        }
        Ok(None)
    }
}
