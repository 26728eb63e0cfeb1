//! Postgres Backend Messages
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>
use bytes::Bytes;

use super::{Oid, PgFormat, ProtocolError};
use crate::{common::ByteStr, ext::BytesExt, transaction::TransactionState};

/// A type that can be decoded into postgres backend message
pub trait BackendProtocol: Sized {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError>;
}

macro_rules! match_backend {
    ($($name:ident,)*) => {
        /// Postgres backend messages
        #[derive(Debug)]
        pub enum BackendMessage {
            $($name($name),)*
        }

        impl BackendMessage {
            pub fn msgtype(&self) -> u8 {
                match self {
                    $(Self::$name(_) => $name::MSGTYPE,)*
                }
            }

            /// Get message name from message type.
            ///
            /// Returns `"Unknown"` for unknown message type.
            pub fn message_name(msgtype: u8) -> &'static str {
                match msgtype {
                    $($name::MSGTYPE => stringify!($name),)*
                    _ => "Unknown",
                }
            }
        }

        impl BackendProtocol for BackendMessage {
            fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
                let message = match msgtype {
                    $($name::MSGTYPE => Self::$name(<$name as BackendProtocol>::decode(msgtype, body)?),)*
                    _ => return Err(ProtocolError::unknown(msgtype)),
                };
                Ok(message)
            }
        }
    };
}

match_backend! {
    Authentication,
    BackendKeyData,
    BindComplete,
    CloseComplete,
    CommandComplete,
    CopyData,
    CopyDone,
    CopyInResponse,
    CopyOutResponse,
    CopyBothResponse,
    DataRow,
    EmptyQueryResponse,
    ErrorResponse,
    FunctionCallResponse,
    NegotiateProtocolVersion,
    NoData,
    NoticeResponse,
    NotificationResponse,
    ParameterDescription,
    ParameterStatus,
    ParseComplete,
    PortalSuspended,
    ReadyForQuery,
    RowDescription,
}

macro_rules! assert_msgtype {
    ($typ:ident) => {
        if Self::MSGTYPE != $typ {
            return Err(ProtocolError::unexpected(Self::MSGTYPE, $typ))
        }
    };
}

macro_rules! unit_msg {
    ($(
        $(#[$doc:meta])* struct $name:ident, $ty:literal;
    )*) => {$(
        $(#[$doc])*
        #[derive(Debug)]
        pub struct $name;

        impl $name {
            pub const MSGTYPE: u8 = $ty;
        }

        impl BackendProtocol for $name {
            fn decode(msgtype: u8, _: Bytes) -> Result<Self, ProtocolError> {
                assert_msgtype!(msgtype);
                Ok(Self)
            }
        }
    )*};
}

unit_msg! {
    /// Identifies the message as a Bind-complete indicator.
    struct BindComplete, b'2';

    /// Identifies the message as a Close-complete indicator.
    struct CloseComplete, b'3';

    /// Identifies the message as a COPY-complete indicator.
    struct CopyDone, b'c';

    /// Identifies the message as a response to an empty query string.
    ///
    /// This substitutes for CommandComplete.
    struct EmptyQueryResponse, b'I';

    /// Identifies the message as a no-data indicator.
    struct NoData, b'n';

    /// Identifies the message as a Parse-complete indicator.
    struct ParseComplete, b'1';

    /// Identifies the message as a portal-suspended indicator.
    ///
    /// Note this only appears if an Execute message's row-count limit was reached.
    struct PortalSuspended, b's';
}

/// Identifies the message as an authentication request.
///
/// Authentication itself happens before the engine owns the stream, only the outcome is
/// interpreted here.
#[derive(Debug)]
pub enum Authentication {
    /// Specifies that the authentication was successful.
    Ok,
    /// Any other authentication request, with its code and remaining body.
    Other {
        code: u32,
        data: Bytes,
    },
}

impl Authentication {
    pub const MSGTYPE: u8 = b'R';
}

impl BackendProtocol for Authentication {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        let auth = match body.try_u32()? {
            0 => Authentication::Ok,
            code => Authentication::Other { code, data: body },
        };
        Ok(auth)
    }
}

/// Identifies the message as cancellation key data.
///
/// The frontend must save these values if it wishes to be able to issue CancelRequest messages later.
#[derive(Debug)]
pub struct BackendKeyData {
    /// The process ID of this backend.
    pub process_id: u32,
    /// The secret key of this backend.
    pub secret_key: u32,
}

impl BackendKeyData {
    pub const MSGTYPE: u8 = b'K';
}

impl BackendProtocol for BackendKeyData {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            process_id: body.try_u32()?,
            secret_key: body.try_u32()?,
        })
    }
}

/// Identifies the message as a run-time parameter status report
#[derive(Debug)]
pub struct ParameterStatus {
    /// The name of the run-time parameter being reported
    pub name: ByteStr,
    /// The current value of the parameter
    pub value: ByteStr,
}

impl ParameterStatus {
    pub const MSGTYPE: u8 = b'S';
}

impl BackendProtocol for ParameterStatus {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            name: body.get_nul_bytestr()?,
            value: body.get_nul_bytestr()?,
        })
    }
}

/// A warning message. The frontend should display the message.
///
/// Use [`DbError::parse`][super::DbError::parse] to read the fields.
#[derive(Debug)]
pub struct NoticeResponse {
    pub body: Bytes,
}

impl NoticeResponse {
    pub const MSGTYPE: u8 = b'N';
}

impl BackendProtocol for NoticeResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { body })
    }
}

/// Identifies the message as an error
///
/// The message body consists of one or more identified fields, followed by a zero byte as a terminator.
/// Fields can appear in any order. Use [`DbError::parse`][super::DbError::parse] to read them.
#[derive(Debug)]
pub struct ErrorResponse {
    pub body: Bytes,
}

impl ErrorResponse {
    pub const MSGTYPE: u8 = b'E';
}

impl BackendProtocol for ErrorResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { body })
    }
}

/// Identifies the message as a notification response.
#[derive(Debug)]
pub struct NotificationResponse {
    /// The process ID of the notifying backend process.
    pub process_id: u32,
    /// The name of the channel that the notify has been raised on.
    pub channel: ByteStr,
    /// The “payload” string passed from the notifying process.
    pub payload: ByteStr,
}

impl NotificationResponse {
    pub const MSGTYPE: u8 = b'A';
}

impl BackendProtocol for NotificationResponse {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            process_id: body.try_u32()?,
            channel: body.get_nul_bytestr()?,
            payload: body.get_nul_bytestr()?,
        })
    }
}

/// Identifies the message type. ReadyForQuery is sent whenever the backend is ready for a new query cycle.
#[derive(Debug)]
pub struct ReadyForQuery {
    /// Current backend transaction status indicator.
    pub status: TransactionState,
}

impl ReadyForQuery {
    pub const MSGTYPE: u8 = b'Z';
}

impl BackendProtocol for ReadyForQuery {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        let Some(status) = TransactionState::from_status(body.try_u8()?) else {
            return Err(ProtocolError::malformed("unknown transaction status"));
        };
        Ok(Self { status })
    }
}

/// Identifies the message as a row description
#[derive(Debug)]
pub struct RowDescription {
    /// Specifies the number of fields in a row (can be zero).
    pub field_len: u16,
    /// Undecoded field list, see [`FieldDescription`][crate::FieldDescription].
    pub body: Bytes,
}

impl RowDescription {
    pub const MSGTYPE: u8 = b'T';
}

impl BackendProtocol for RowDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            field_len: body.try_u16()?,
            body,
        })
    }
}

/// Identifies the message as a data row.
#[derive(Debug)]
pub struct DataRow {
    /// The number of column values that follow (possibly zero).
    pub column_len: u16,
    pub body: Bytes,
}

impl DataRow {
    pub const MSGTYPE: u8 = b'D';
}

impl BackendProtocol for DataRow {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            column_len: body.try_u16()?,
            body,
        })
    }
}

/// Identifies the message as a command-completed response
///
/// For an INSERT command, the tag is INSERT oid rows, where rows is the number of rows inserted.
/// oid used to be the object ID of the inserted row if rows was 1 and the target table had OIDs,
/// but OIDs system columns are not supported anymore; therefore oid is always 0.
///
/// For a DELETE, UPDATE, MERGE, SELECT, MOVE, FETCH or COPY command, the tag is the command
/// name followed by the number of rows affected.
#[derive(Debug)]
pub struct CommandComplete {
    /// The command tag. This is usually a single word that identifies which SQL command was completed.
    pub tag: ByteStr,
}

impl CommandComplete {
    pub const MSGTYPE: u8 = b'C';
}

impl BackendProtocol for CommandComplete {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            tag: body.get_nul_bytestr()?,
        })
    }
}

/// Identifies the message as a protocol version negotiation message.
#[derive(Debug)]
pub struct NegotiateProtocolVersion {
    /// Newest minor protocol version supported by the server for the major protocol version requested by the client.
    pub minor: u32,
    /// Number of protocol options not recognized by the server.
    pub len: u32,
    /// Then, for protocol option not recognized by the server, there is the following:
    pub opt_names: Bytes,
}

impl NegotiateProtocolVersion {
    pub const MSGTYPE: u8 = b'v';
}

impl BackendProtocol for NegotiateProtocolVersion {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            minor: body.try_u32()?,
            len: body.try_u32()?,
            opt_names: body,
        })
    }
}

/// Identifies the message as a parameter description.
#[derive(Debug)]
pub struct ParameterDescription {
    /// Specifies the object ID of each parameter data type.
    pub oids: Vec<Oid>,
}

impl ParameterDescription {
    pub const MSGTYPE: u8 = b't';
}

impl BackendProtocol for ParameterDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        let len = body.try_u16()?;
        let mut oids = Vec::with_capacity(len as usize);
        for _ in 0..len {
            oids.push(body.try_u32()?);
        }
        Ok(Self { oids })
    }
}

/// Identifies the message as COPY data.
#[derive(Debug)]
pub struct CopyData {
    /// Data that forms part of a COPY data stream.
    pub data: Bytes,
}

impl CopyData {
    pub const MSGTYPE: u8 = b'd';
}

impl BackendProtocol for CopyData {
    fn decode(msgtype: u8, data: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { data })
    }
}

/// Shared body of the three copy responses.
#[derive(Debug)]
pub struct CopyResponse {
    /// Overall COPY format, textual or binary.
    pub format: PgFormat,
    /// The format codes to be used for each column.
    pub column_formats: Vec<PgFormat>,
}

impl CopyResponse {
    fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        let format = read_format(&mut body)?;
        let len = body.try_u16()?;
        let mut column_formats = Vec::with_capacity(len as usize);
        for _ in 0..len {
            let code = body.try_u16()?;
            let Some(format) = PgFormat::from_code(code) else {
                return Err(ProtocolError::malformed("unknown format code"));
            };
            column_formats.push(format);
        }
        Ok(Self { format, column_formats })
    }
}

fn read_format(body: &mut Bytes) -> Result<PgFormat, ProtocolError> {
    match body.try_u8()? {
        0 => Ok(PgFormat::Text),
        1 => Ok(PgFormat::Binary),
        _ => Err(ProtocolError::malformed("unknown format code")),
    }
}

macro_rules! copy_response {
    ($($(#[$doc:meta])* struct $name:ident, $ty:literal;)*) => {$(
        $(#[$doc])*
        #[derive(Debug)]
        pub struct $name(pub CopyResponse);

        impl $name {
            pub const MSGTYPE: u8 = $ty;
        }

        impl BackendProtocol for $name {
            fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
                assert_msgtype!(msgtype);
                CopyResponse::decode(body).map(Self)
            }
        }
    )*};
}

copy_response! {
    /// Identifies the message as a Start Copy In response.
    ///
    /// The frontend must now send copy-in data.
    struct CopyInResponse, b'G';

    /// Identifies the message as a Start Copy Out response.
    ///
    /// This message will be followed by copy-out data.
    struct CopyOutResponse, b'H';

    /// Identifies the message as a Start Copy Both response.
    ///
    /// This message is used only for Streaming Replication.
    struct CopyBothResponse, b'W';
}

/// Identifies the message as a function call result.
#[derive(Debug)]
pub struct FunctionCallResponse {
    /// The value of the function result, `None` is NULL.
    pub value: Option<Bytes>,
}

impl FunctionCallResponse {
    pub const MSGTYPE: u8 = b'V';
}

impl BackendProtocol for FunctionCallResponse {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        let value = match body.try_i32()? {
            -1 => None,
            len if len < 0 => return Err(ProtocolError::malformed("negative value length")),
            len => Some(body.try_split_to(len as usize)?),
        };
        Ok(Self { value })
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn decode_dispatch() {
        let msg = BackendMessage::decode(b'Z', Bytes::from_static(b"E")).unwrap();
        let BackendMessage::ReadyForQuery(ready) = msg else {
            panic!("expected ReadyForQuery")
        };
        assert_eq!(ready.status, TransactionState::Failed);

        let err = BackendMessage::decode(b'?', Bytes::new()).unwrap_err();
        assert!(matches!(err, ProtocolError::Unexpected { found: b'?', .. }));
    }

    #[test]
    fn truncated_bodies() {
        assert!(BackendMessage::decode(b'K', Bytes::from_static(&[0, 0, 0, 1])).is_err());
        assert!(BackendMessage::decode(b'Z', Bytes::from_static(b"X")).is_err());
        assert!(BackendMessage::decode(b'V', Bytes::from_static(&[0, 0, 0, 9, 1])).is_err());
    }

    #[test]
    fn copy_response() {
        let body = Bytes::from_static(&[0, 0, 2, 0, 0, 0, 1]);
        let BackendMessage::CopyInResponse(res) = BackendMessage::decode(b'G', body).unwrap() else {
            panic!("expected CopyInResponse")
        };
        assert_eq!(res.0.format, PgFormat::Text);
        assert_eq!(res.0.column_formats, [PgFormat::Text, PgFormat::Binary]);
    }

    #[test]
    fn notification() {
        let body = Bytes::from_static(b"\0\0\0\x07jobs\0ready\0");
        let BackendMessage::NotificationResponse(n) = BackendMessage::decode(b'A', body).unwrap() else {
            panic!("expected NotificationResponse")
        };
        assert_eq!(n.process_id, 7);
        assert_eq!(n.channel, "jobs");
        assert_eq!(n.payload, "ready");
    }
}
