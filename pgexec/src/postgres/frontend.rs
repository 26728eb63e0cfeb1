//! Postgres Frontend Messages
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>
use bytes::{BufMut, Bytes, BytesMut};

use super::{Oid, PgFormat};
use crate::ext::{BufMutExt, StrExt, UsizeExt};

/// Write a frontend message to `buf`.
pub fn write<F: FrontendProtocol>(msg: F, buf: &mut BytesMut) {
    // msgtype + length
    const PREFIX: usize = 1 + 4;

    let size_hint = msg.size_hint();
    buf.reserve(PREFIX + size_hint as usize);

    let offset = buf.len();
    buf.put_u8(F::MSGTYPE);
    buf.put_u32(4 + size_hint);

    msg.encode(&mut *buf);

    assert_eq!(
        buf.len() - offset,
        PREFIX + size_hint as usize,
        "Frontend message body size not equal to size hint"
    );
}

/// A type which can be encoded into postgres frontend message
pub trait FrontendProtocol {
    /// Message type.
    const MSGTYPE: u8;

    /// Size of the main body.
    ///
    /// Note that this is **only** the size of main body as oppose of actual postgres message which
    /// include the length itself.
    fn size_hint(&self) -> u32;

    /// Write the main body of the message.
    ///
    /// The lenght of body written must be equal to the
    /// length returned by [`size_hint`][FrontendProtocol::size_hint].
    fn encode(self, buf: impl BufMut);
}

/// Size of a list of nullable values, each prefixed with its `i32` length.
fn values_len(values: &[Option<Bytes>]) -> u32 {
    values.iter().fold(0, |acc, v| acc + 4 + v.as_ref().map_or(0, |v| v.len().to_u32()))
}

fn put_values(buf: &mut impl BufMut, values: &[Option<Bytes>]) {
    buf.put_u16(values.len().to_u16());
    for value in values {
        match value {
            // -1 indicates a NULL parameter value, no value bytes follow
            None => buf.put_i32(-1),
            Some(value) => {
                buf.put_i32(value.len().to_u32() as i32);
                buf.put_slice(value);
            },
        }
    }
}

fn put_formats(buf: &mut impl BufMut, formats: &[PgFormat]) {
    buf.put_u16(formats.len().to_u16());
    for format in formats {
        buf.put_u16(format.format_code());
    }
}

/// Request to cancel the query currently running on another connection.
///
/// Like the startup message, [`CancelRequest`] has no initial message-type byte, thus it does
/// not implement [`FrontendProtocol`]. It is the only message sent on the fresh connection.
///
/// To write cancel request, use [`CancelRequest::write`].
#[derive(Debug)]
pub struct CancelRequest {
    /// The process ID of the target backend.
    pub process_id: u32,
    /// The secret key for the target backend.
    pub secret_key: u32,
}

impl CancelRequest {
    /// The cancel request code. The value is chosen to contain 1234 in the most significant 16 bits,
    /// and 5678 in the least significant 16 bits.
    pub const CODE: u32 = 80_877_102;

    pub fn write(self, buf: &mut BytesMut) {
        buf.put_u32(16);
        buf.put_u32(Self::CODE);
        buf.put_u32(self.process_id);
        buf.put_u32(self.secret_key);
    }
}

/// Identifies the message as a simple query
pub struct Query<'a> {
    /// the query string itself
    pub sql: &'a str,
}

impl FrontendProtocol for Query<'_> {
    const MSGTYPE: u8 = b'Q';

    fn size_hint(&self) -> u32 {
        self.sql.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.sql);
    }
}

/// Identifies the message as a Parse command
pub struct Parse<'a> {
    /// prepared statement name (an empty string selects the unnamed prepared statement).
    pub prepare_name: &'a str,
    /// The query string to be parsed.
    pub sql: &'a str,
    /// Specifies the object ID of the parameter data type.
    ///
    /// Note that this is not an indication of the number of parameters that might appear in the query string,
    /// only the number that the frontend wants to prespecify types for.
    ///
    /// Placing a zero here is equivalent to leaving the type unspecified.
    pub oids: &'a [Oid],
}

impl FrontendProtocol for Parse<'_> {
    const MSGTYPE: u8 = b'P';

    fn size_hint(&self) -> u32 {
        self.prepare_name.nul_string_len()
            + self.sql.nul_string_len()
            + 2
            + 4 * self.oids.len().to_u32()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.prepare_name);
        buf.put_nul_string(self.sql);
        buf.put_u16(self.oids.len().to_u16());
        for &oid in self.oids {
            buf.put_u32(oid);
        }
    }
}

/// Identifies the message as a Sync command
pub struct Sync;

impl FrontendProtocol for Sync {
    const MSGTYPE: u8 = b'S';

    fn size_hint(&self) -> u32 { 0 }

    fn encode(self, _: impl BufMut) { }
}

/// Identifies the message as a Flush command
pub struct Flush;

impl FrontendProtocol for Flush {
    const MSGTYPE: u8 = b'H';

    fn size_hint(&self) -> u32 { 0 }

    fn encode(self, _: impl BufMut) { }
}

/// Identifies the message as a termination.
pub struct Terminate;

impl FrontendProtocol for Terminate {
    const MSGTYPE: u8 = b'X';

    fn size_hint(&self) -> u32 { 0 }

    fn encode(self, _: impl BufMut) { }
}

/// Identifies the message as a Bind command.
pub struct Bind<'a> {
    /// The name of the destination portal (an empty string selects the unnamed portal).
    pub portal_name: &'a str,
    /// The name of the source prepared statement (an empty string selects the unnamed prepared statement).
    pub stmt_name: &'a str,

    /// The parameter [`PgFormat`].
    ///
    /// This can be empty to indicate that there are no parameters or that the parameters
    /// all use the default format (text); or one, in which case the specified format code
    /// is applied to all parameters; or it can equal the actual number of parameters.
    pub param_formats: &'a [PgFormat],

    /// The parameter values, `None` is NULL.
    ///
    /// This must match the number of parameters needed by the query.
    pub params: &'a [Option<Bytes>],

    /// The result-columns [`PgFormat`].
    ///
    /// This can be empty to indicate that there are no result columns or that the result
    /// columns should all use the default format (text); or one, in which case the
    /// specified format code is applied to all result columns (if any); or it can equal
    /// the actual number of result columns of the query.
    pub result_formats: &'a [PgFormat],
}

impl FrontendProtocol for Bind<'_> {
    const MSGTYPE: u8 = b'B';

    fn size_hint(&self) -> u32 {
        self.portal_name.nul_string_len()
            + self.stmt_name.nul_string_len()
            + 2 + 2 * self.param_formats.len().to_u32()
            + 2 + values_len(self.params)
            + 2 + 2 * self.result_formats.len().to_u32()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.portal_name);
        buf.put_nul_string(self.stmt_name);
        put_formats(&mut buf, self.param_formats);
        put_values(&mut buf, self.params);
        put_formats(&mut buf, self.result_formats);
    }
}

/// Identifies the message as a Execute command
pub struct Execute<'a> {
    /// The name of the portal to execute (an empty string selects the unnamed portal).
    pub portal_name: &'a str,
    /// Maximum number of rows to return, if portal contains a query that returns rows
    /// (ignored otherwise). Zero denotes “no limit”.
    pub max_row: u32,
}

impl FrontendProtocol for Execute<'_> {
    const MSGTYPE: u8 = b'E';

    fn size_hint(&self) -> u32 {
        self.portal_name.nul_string_len() + 4
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.portal_name);
        buf.put_u32(self.max_row);
    }
}

/// Identifies the message as a Close command
pub struct Close<'a> {
    /// 'S' to close a prepared statement; or 'P' to close a portal.
    pub variant: u8,
    /// The name of the prepared statement or portal to close
    /// (an empty string selects the unnamed prepared statement or portal).
    pub name: &'a str,
}

impl FrontendProtocol for Close<'_> {
    const MSGTYPE: u8 = b'C';

    fn size_hint(&self) -> u32 {
        1 + self.name.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_u8(self.variant);
        buf.put_nul_string(self.name);
    }
}

/// Identifies the message as a Describe command.
pub struct Describe<'a> {
    /// 'S' to describe a prepared statement; or 'P' to describe a portal.
    pub kind: u8,
    /// The name of the prepared statement or portal to describe
    /// (an empty string selects the unnamed prepared statement or portal).
    pub name: &'a str,
}

impl FrontendProtocol for Describe<'_> {
    const MSGTYPE: u8 = b'D';

    fn size_hint(&self) -> u32 {
        1 + self.name.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_u8(self.kind);
        buf.put_nul_string(self.name);
    }
}

/// Identifies the message as COPY data.
pub struct CopyData<'a> {
    /// Data that forms part of a COPY data stream.
    ///
    /// Messages sent from the backend will always correspond to single data rows,
    /// but messages sent by frontends might divide the data stream arbitrarily.
    pub data: &'a [u8],
}

impl FrontendProtocol for CopyData<'_> {
    const MSGTYPE: u8 = b'd';

    fn size_hint(&self) -> u32 {
        self.data.len().to_u32()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_slice(self.data);
    }
}

/// Identifies the message as a COPY-complete indicator.
pub struct CopyDone;

impl FrontendProtocol for CopyDone {
    const MSGTYPE: u8 = b'c';

    fn size_hint(&self) -> u32 { 0 }

    fn encode(self, _: impl BufMut) { }
}

/// Identifies the message as a COPY-failure indicator.
pub struct CopyFail<'a> {
    /// An error message to report as the cause of failure.
    pub message: &'a str,
}

impl FrontendProtocol for CopyFail<'_> {
    const MSGTYPE: u8 = b'f';

    fn size_hint(&self) -> u32 {
        self.message.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.message);
    }
}

/// Identifies the message as a function call.
pub struct FunctionCall<'a> {
    /// Specifies the object ID of the function to call.
    pub function: Oid,
    /// The argument format codes, with the same rules as [`Bind::param_formats`].
    pub arg_formats: &'a [PgFormat],
    /// The arguments, `None` is NULL.
    pub args: &'a [Option<Bytes>],
    /// The format code for the function result.
    pub result_format: PgFormat,
}

impl FrontendProtocol for FunctionCall<'_> {
    const MSGTYPE: u8 = b'F';

    fn size_hint(&self) -> u32 {
        4
            + 2 + 2 * self.arg_formats.len().to_u32()
            + 2 + values_len(self.args)
            + 2
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_u32(self.function);
        put_formats(&mut buf, self.arg_formats);
        put_values(&mut buf, self.args);
        buf.put_u16(self.result_format.format_code());
    }
}
