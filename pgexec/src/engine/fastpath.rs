//! Function calls by oid, bypassing statement parsing.
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use super::PgExecutor;
use crate::{
    Result,
    common::span,
    error::Error,
    postgres::{BackendMessage, Oid, PgFormat, frontend},
};

/// One argument of a fastpath call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastpathArg {
    pub format: PgFormat,
    /// Value bytes, `None` is NULL.
    pub value: Option<Bytes>,
}

impl FastpathArg {
    pub fn text(value: &str) -> FastpathArg {
        Self { format: PgFormat::Text, value: Some(Bytes::copy_from_slice(value.as_bytes())) }
    }

    pub fn binary(value: impl Into<Bytes>) -> FastpathArg {
        Self { format: PgFormat::Binary, value: Some(value.into()) }
    }

    pub fn null() -> FastpathArg {
        Self { format: PgFormat::Text, value: None }
    }

    /// Binary `int4` argument.
    pub fn int4(value: i32) -> FastpathArg {
        Self::binary(Bytes::copy_from_slice(&value.to_be_bytes()))
    }

    /// Binary `int8` argument.
    pub fn int8(value: i64) -> FastpathArg {
        Self::binary(Bytes::copy_from_slice(&value.to_be_bytes()))
    }
}

impl<S> PgExecutor<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Call the server function `function` in one round trip.
    ///
    /// The result is requested in binary. Returns `None` for a NULL or void result.
    pub async fn fastpath_call(
        &mut self,
        function: Oid,
        args: &[FastpathArg],
        suppress_begin: bool,
    ) -> Result<Option<Bytes>> {
        span!("fastpath", function);
        self.ensure_ready()?;
        self.begin_if_needed(suppress_begin).await?;

        let arg_formats: Vec<_> = args.iter().map(|e| e.format).collect();
        let values: Vec<_> = args.iter().map(|e| e.value.clone()).collect();
        self.send(frontend::FunctionCall {
            function,
            arg_formats: match arg_formats.iter().any(PgFormat::is_binary) {
                true => &arg_formats[..],
                false => &[],
            },
            args: &values,
            result_format: PgFormat::Binary,
        });
        self.flush().await?;

        let mut result = None;
        let mut error: Option<Error> = None;
        loop {
            match self.read_message().await? {
                BackendMessage::FunctionCallResponse(response) => result = response.value,
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
                BackendMessage::ReadyForQuery(ready) => {
                    self.on_ready(ready);
                    break;
                },
                message => return Err(self.unexpected(&message, "fastpath call")),
            }
        }

        match error {
            Some(err) => Err(err),
            None => Ok(result),
        }
    }
}
