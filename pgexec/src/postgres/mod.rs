//! Postgres Frontend and Backend Protocol
//!
//! Docs here mostly quoted from the official postgres documentation.
//!
//! ## Messaging Overview
//!
//! All communication is through a stream of messages. The first byte of a message identifies the message type,
//! and the next four bytes specify the length of the rest of the message (this length count includes itself,
//! but not the message-type byte). The remaining contents of the message are determined by the message type.
//!
//! ```text
//! ┏━━━━┳━━━━━━━━━━━━━━━━━━━┳━━━━━━┓
//! ┃ Ty ┃       Length      ┃ Body ┃
//! ┣━━━━╋━━━━━━━━━━━━━━━━━━━╋━━━━━━┫
//! ┃ u8 ┃        u32        ┃ [u8] ┃
//! ┣━━━━╋━━━━━━━━━━━━━━━━━━━╋━━━━━━┫
//! ┃ 43 ┃ 00 | 00 | 00 | 32 ┃  ..  ┃
//! ┗━━━━┻━━━━━━━━━━━━━━━━━━━┻━━━━━━┛
//! ```
//!
//! Only the messages exchanged after authentication are implemented here. The only untagged
//! message the engine writes is [`CancelRequest`][frontend::CancelRequest], which travels on
//! a separate connection.
//!
//! ## [`Format`][PgFormat] and Format Codes
//!
//! Data of a particular data type might be transmitted in any of several different formats.
//! As of PostgreSQL 7.4 the only supported formats are “text” and “binary”. Text has format
//! code zero, and Binary has format code one.
//!
//! <https://www.postgresql.org/docs/17/protocol-overview.html>

mod pg_type;
mod pg_format;
mod codec;
mod db_error;

pub mod frontend;
pub mod backend;

mod error;

pub use pg_type::{Oid, oid};
pub use pg_format::PgFormat;
pub use codec::{MAX_MESSAGE_LEN, decode_frame};
pub use db_error::{DbError, Severity};

pub use frontend::FrontendProtocol;
pub use backend::{BackendMessage, BackendProtocol};
pub use error::ProtocolError;
