//! `pgexec` error types.
use std::{backtrace::Backtrace, fmt, io, str::Utf8Error};

use crate::{
    config::ParseError,
    postgres::{DbError, Oid, ProtocolError},
};

/// A specialized [`Result`] type for `pgexec` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `pgexec` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Prefix the error message with `context`.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Returns `true` if the connection cannot be used after this error.
    ///
    /// Io failure, malformed frame, protocol desynchronization, timeout, and server reported
    /// `FATAL`/`PANIC` are fatal. Statement level errors and caller mistakes are not.
    pub fn is_fatal(&self) -> bool {
        match &self.kind {
            ErrorKind::Protocol(_)
            | ErrorKind::Io(_)
            | ErrorKind::Timeout(_)
            | ErrorKind::Closed(_) => true,
            ErrorKind::Database(db) => db.severity().is_some_and(|s| s.is_fatal()),
            ErrorKind::Config(_) | ErrorKind::Utf8(_) | ErrorKind::Usage(_) => false,
        }
    }

    /// Returns the server reported error, if any.
    pub fn as_database(&self) -> Option<&DbError> {
        match &self.kind {
            ErrorKind::Database(db) => Some(db),
            _ => None,
        }
    }

    /// Returns the SQLSTATE of server reported error, if any.
    pub fn sqlstate(&self) -> Option<&str> {
        self.as_database().map(DbError::code)
    }

    pub fn as_usage(&self) -> Option<&UsageError> {
        match &self.kind {
            ErrorKind::Usage(e) => Some(e),
            _ => None,
        }
    }
}

/// All possible error kind from `pgexec` library.
pub enum ErrorKind {
    Config(ParseError),
    Protocol(ProtocolError),
    Io(io::Error),
    Timeout(TimeoutError),
    Closed(ClosedError),
    Database(DbError),
    Utf8(Utf8Error),
    Usage(UsageError),
}

crate::common::unit_error! {
    /// A read did not complete within the configured network timeout.
    pub struct TimeoutError("network timeout while waiting for the server");
}

crate::common::unit_error! {
    /// The connection was closed or aborted, or previously hit a fatal error.
    pub struct ClosedError("connection is closed");
}

/// Caller contract violation, reported without contacting the server.
#[derive(Clone, PartialEq, Eq)]
pub enum UsageError {
    /// Query was created by another executor.
    ForeignQuery,
    /// Query record was released from the statement cache.
    StaleQuery,
    /// Parameter list was created for another query.
    ForeignParameters,
    /// A copy operation owns the connection.
    CopyInProgress,
    /// A `COPY` statement reached plain execution, use `start_copy` instead.
    CopyNotAllowed,
    /// `start_copy` was given a statement that did not start a copy.
    NotCopy,
    /// Execution options that contradict each other.
    InvalidOptions(&'static str),
    /// Parameter index out of range.
    ParameterIndex {
        index: usize,
        count: usize,
    },
    /// A parameter was not bound before execution.
    UnsetParameter(usize),
    /// Binary parameter whose type is not registered for binary send.
    BinaryNotPermitted {
        index: usize,
        oid: Oid,
    },
    /// Binary parameter in the simple dialect.
    BinaryInSimpleQuery(usize),
    /// The portal was closed by the end of its transaction.
    CursorClosed,
    /// Batch queries and parameter lists differ in length.
    BatchLength {
        queries: usize,
        params: usize,
    },
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ParseError>e => ErrorKind::Config(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<io::Error>e => ErrorKind::Io(e));
from!(<TimeoutError>e => ErrorKind::Timeout(e));
from!(<ClosedError>e => ErrorKind::Closed(e));
from!(<DbError>e => ErrorKind::Database(e));
from!(<Utf8Error>e => ErrorKind::Utf8(e));
from!(<UsageError>e => ErrorKind::Usage(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Timeout(e) => e.fmt(f),
            Self::Closed(e) => e.fmt(f),
            Self::Database(e) => e.fmt(f),
            Self::Utf8(e) => e.fmt(f),
            Self::Usage(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for UsageError { }

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ForeignQuery => f.write_str("query belongs to another executor"),
            Self::StaleQuery => f.write_str("query was released from the statement cache"),
            Self::ForeignParameters => f.write_str("parameter list belongs to another query"),
            Self::CopyInProgress => f.write_str("a copy operation is in progress"),
            Self::CopyNotAllowed => f.write_str("COPY must be started with `start_copy`"),
            Self::NotCopy => f.write_str("statement did not start a copy"),
            Self::InvalidOptions(msg) => write!(f, "invalid query options: {msg}"),
            Self::ParameterIndex { index, count } => {
                write!(f, "parameter index {index} out of range, query has {count} parameters")
            },
            Self::UnsetParameter(i) => write!(f, "parameter ${i} is not set"),
            Self::BinaryNotPermitted { index, oid } => {
                write!(f, "parameter ${index} of type {oid} cannot be sent in binary")
            },
            Self::BinaryInSimpleQuery(i) => {
                write!(f, "parameter ${i} is binary, simple query only accepts text")
            },
            Self::CursorClosed => f.write_str("cursor was closed"),
            Self::BatchLength { queries, params } => {
                write!(f, "batch has {queries} queries but {params} parameter lists")
            },
        }
    }
}

impl fmt::Debug for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
