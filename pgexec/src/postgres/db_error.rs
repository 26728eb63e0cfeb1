//! Fields of `ErrorResponse` and `NoticeResponse`.
use bytes::Bytes;
use std::fmt;

use super::ProtocolError;
use crate::{common::ByteStr, ext::BytesExt};

/// Message severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Fatal,
    Panic,
    Warning,
    Notice,
    Debug,
    Info,
    Log,
}

impl Severity {
    fn parse(s: &str) -> Option<Severity> {
        let severity = match s {
            "ERROR" => Severity::Error,
            "FATAL" => Severity::Fatal,
            "PANIC" => Severity::Panic,
            "WARNING" => Severity::Warning,
            "NOTICE" => Severity::Notice,
            "DEBUG" => Severity::Debug,
            "INFO" => Severity::Info,
            "LOG" => Severity::Log,
            _ => return None,
        };
        Some(severity)
    }

    /// Returns `true` for severities after which the server closes the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Severity::Fatal | Severity::Panic)
    }
}

/// An error or notice reported by the server.
///
/// The message body consists of one or more identified fields, followed by a zero byte as a
/// terminator. Fields can appear in any order. Fields of unrecognized type are ignored.
///
/// <https://www.postgresql.org/docs/current/protocol-error-fields.html>
#[derive(Clone)]
pub struct DbError {
    severity: Option<Severity>,
    code: ByteStr,
    message: ByteStr,
    detail: Option<ByteStr>,
    hint: Option<ByteStr>,
    position: Option<u32>,
    where_: Option<ByteStr>,
    schema: Option<ByteStr>,
    table: Option<ByteStr>,
    column: Option<ByteStr>,
    constraint: Option<ByteStr>,
    routine: Option<ByteStr>,
}

impl DbError {
    /// Parse message body of `ErrorResponse` or `NoticeResponse`.
    pub fn parse(mut body: Bytes) -> Result<DbError, ProtocolError> {
        let mut severity = None;
        let mut localized = None;
        let mut code = None;
        let mut message = None;
        let mut detail = None;
        let mut hint = None;
        let mut position = None;
        let mut where_ = None;
        let mut schema = None;
        let mut table = None;
        let mut column = None;
        let mut constraint = None;
        let mut routine = None;

        loop {
            let field = body.try_u8()?;
            if field == b'\0' {
                break;
            }
            let value = body.get_nul_bytestr()?;
            match field {
                b'V' => severity = Severity::parse(&value),
                b'S' => localized = Severity::parse(&value),
                b'C' => code = Some(value),
                b'M' => message = Some(value),
                b'D' => detail = Some(value),
                b'H' => hint = Some(value),
                b'P' => position = value.parse().ok(),
                b'W' => where_ = Some(value),
                b's' => schema = Some(value),
                b't' => table = Some(value),
                b'c' => column = Some(value),
                b'n' => constraint = Some(value),
                b'R' => routine = Some(value),
                _ => { },
            }
        }

        // `V` is absent before 9.6, fallback to the localized one which usually still match
        let severity = severity.or(localized);

        let Some(code) = code else {
            return Err(ProtocolError::malformed("error response without SQLSTATE"));
        };
        let Some(message) = message else {
            return Err(ProtocolError::malformed("error response without message"));
        };

        Ok(DbError {
            severity, code, message, detail, hint, position,
            where_, schema, table, column, constraint, routine,
        })
    }

    pub fn severity(&self) -> Option<Severity> {
        self.severity
    }

    /// The SQLSTATE code for the error.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The primary human-readable error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    /// Error cursor position as an index into the original query string, counted in characters.
    pub fn position(&self) -> Option<u32> {
        self.position
    }

    /// Call stack traceback of active procedural language functions.
    pub fn where_(&self) -> Option<&str> {
        self.where_.as_deref()
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn column(&self) -> Option<&str> {
        self.column.as_deref()
    }

    pub fn constraint(&self) -> Option<&str> {
        self.constraint.as_deref()
    }

    /// Name of the source-code routine reporting the error.
    pub fn routine(&self) -> Option<&str> {
        self.routine.as_deref()
    }
}

impl std::error::Error for DbError { }

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            Some(s) => write!(f, "{s:?}: {} ({})", self.message, self.code)?,
            None => write!(f, "{} ({})", self.message, self.code)?,
        }
        if let Some(detail) = &self.detail {
            write!(f, "\n  detail: {detail}")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {hint}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbError")
            .field("severity", &self.severity)
            .field("code", &self.code)
            .field("message", &self.message)
            .field("routine", &self.routine)
            .finish_non_exhaustive()
    }
}
