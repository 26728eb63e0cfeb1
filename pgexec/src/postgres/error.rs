//! Protocol error
use std::fmt;

use super::BackendMessage;

/// An error when translating buffer from postgres.
///
/// Any protocol error leaves the stream in an unknown position, so it is always fatal to the
/// connection.
pub enum ProtocolError {
    Unexpected {
        expect: Option<u8>,
        found: u8,
        phase: Option<&'static str>,
    },
    Malformed {
        reason: &'static str,
    },
    FrameLength {
        msgtype: u8,
        len: i32,
    },
    /// A reply does not answer any message still waiting for one.
    Desync,
}

impl std::error::Error for ProtocolError { }

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ProtocolError::Unexpected { expect, found, phase } => {
                let found = BackendMessage::message_name(found);
                match expect {
                    Some(m) => {
                        write!(
                            f,
                            "Expected message `{}` found `{found}`",
                            BackendMessage::message_name(m),
                        )?
                    },
                    None => write!(f, "Unexpected message `{found}`")?,
                }
                if let Some(phase) = phase {
                    write!(f, " in `{phase}`")?
                }
                Ok(())
            },
            ProtocolError::Malformed { reason } => write!(f, "Malformed backend message: {reason}"),
            ProtocolError::FrameLength { msgtype, len } => write!(
                f,
                "Invalid frame length {len} for message `{}`",
                BackendMessage::message_name(msgtype),
            ),
            ProtocolError::Desync => f.write_str("Backend replies out of step with sent messages"),
        }
    }
}

impl fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl ProtocolError {
    pub(crate) fn unknown(found: u8) -> ProtocolError {
        Self::Unexpected {
            expect: None,
            found,
            phase: None,
        }
    }

    pub(crate) fn unexpected(expect: u8, found: u8) -> ProtocolError {
        Self::Unexpected {
            expect: Some(expect),
            found,
            phase: None,
        }
    }

    pub(crate) fn unexpected_phase(found: u8, phase: &'static str) -> ProtocolError {
        Self::Unexpected {
            expect: None,
            found,
            phase: Some(phase),
        }
    }

    pub(crate) fn malformed(reason: &'static str) -> ProtocolError {
        Self::Malformed { reason }
    }
}
