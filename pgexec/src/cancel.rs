//! Out of band cancellation and forced abort.
use std::sync::Arc;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::watch,
};

use crate::{
    Result,
    common::debug,
    postgres::{backend::BackendKeyData, frontend::CancelRequest},
    stream::PgStream,
    transport::{PgTransport, PgTransportExt},
};

/// Key to request cancellation of whatever the connection is running.
///
/// Obtained from `BackendKeyData` during startup. Cancellation is advisory: the executor keeps
/// reading until the server reports an error or readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelToken {
    pub process_id: u32,
    pub secret_key: u32,
}

impl From<BackendKeyData> for CancelToken {
    fn from(key: BackendKeyData) -> Self {
        Self { process_id: key.process_id, secret_key: key.secret_key }
    }
}

impl CancelToken {
    pub fn new(process_id: u32, secret_key: u32) -> Self {
        Self { process_id, secret_key }
    }

    /// Send the cancel request over `socket`, a fresh connection to the same server.
    pub async fn cancel<S>(&self, socket: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        debug!("cancel request for backend {}", self.process_id);
        let mut stream = PgStream::new(socket);
        stream.send_cancel(CancelRequest {
            process_id: self.process_id,
            secret_key: self.secret_key,
        });
        stream.shutdown().await?;
        Ok(())
    }
}

/// Force close an executor from another task.
///
/// A read blocked in the executor returns [`ClosedError`][crate::error::ClosedError] and the
/// connection is dropped without `Terminate`.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub(crate) fn new(tx: Arc<watch::Sender<bool>>) -> Self {
        Self { tx }
    }

    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}
