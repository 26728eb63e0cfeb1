//! Scripted postgres backend over an in-memory pipe.
#![allow(dead_code)]
use bytes::{Buf, BufMut, Bytes, BytesMut};
use pgexec::{Config, PgExecutor};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

pub const INT4: u32 = 23;
pub const TEXT: u32 = 25;

/// Engine over one end of a pipe, the other end is the scripted backend.
pub fn pair(config: Config) -> (PgExecutor<DuplexStream>, Backend) {
    let (client, server) = duplex(1024 * 1024);
    (PgExecutor::new(client, config), Backend { io: server, buf: BytesMut::new() })
}

/// A frontend message as received by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frontend {
    Query(String),
    Parse { name: String, sql: String, oids: Vec<u32> },
    Bind {
        portal: String,
        statement: String,
        param_formats: Vec<u16>,
        params: Vec<Option<Vec<u8>>>,
        result_formats: Vec<u16>,
    },
    Describe { kind: u8, name: String },
    Execute { portal: String, max_rows: u32 },
    Close { kind: u8, name: String },
    Sync,
    Flush,
    CopyData(Vec<u8>),
    CopyDone,
    CopyFail(String),
    FunctionCall { function: u32, arg_formats: Vec<u16>, args: Vec<Option<Vec<u8>>>, result_format: u16 },
    Terminate,
}

impl Frontend {
    pub fn query(&self) -> Option<&str> {
        match self {
            Frontend::Query(sql) => Some(sql),
            _ => None,
        }
    }

    pub fn parse_sql(&self) -> Option<&str> {
        match self {
            Frontend::Parse { sql, .. } => Some(sql),
            _ => None,
        }
    }
}

pub struct Backend {
    io: DuplexStream,
    buf: BytesMut,
}

impl Backend {
    /// Read one frontend message.
    pub async fn recv(&mut self) -> Frontend {
        loop {
            if self.buf.len() >= 5 {
                let len = u32::from_be_bytes(self.buf[1..5].try_into().unwrap()) as usize;
                if self.buf.len() > len {
                    let msgtype = self.buf.get_u8();
                    let _ = self.buf.get_u32();
                    let body = self.buf.split_to(len - 4).freeze();
                    return decode_frontend(msgtype, body);
                }
            }
            let n = self.io.read_buf(&mut self.buf).await.unwrap();
            assert_ne!(n, 0, "client closed the connection");
        }
    }

    /// Read messages up to and including `Sync`.
    pub async fn recv_until_sync(&mut self) -> Vec<Frontend> {
        let mut messages = vec![];
        loop {
            let message = self.recv().await;
            let done = message == Frontend::Sync;
            messages.push(message);
            if done {
                return messages;
            }
        }
    }

    /// Read one message, expected to be a simple query.
    pub async fn recv_query(&mut self) -> String {
        match self.recv().await {
            Frontend::Query(sql) => sql,
            message => panic!("expected Query, got {message:?}"),
        }
    }

    /// Returns `true` if the client closed its side.
    pub async fn is_closed(&mut self) -> bool {
        self.io.read_buf(&mut self.buf).await.unwrap() == 0
    }

    pub async fn send(&mut self, messages: &[Bytes]) {
        for message in messages {
            self.io.write_all(message).await.unwrap();
        }
        self.io.flush().await.unwrap();
    }

    /// Answer a simple `BEGIN`-like command with its tag and readiness.
    pub async fn reply_command(&mut self, tag: &str, status: u8) {
        self.send(&[command_complete(tag), ready(status)]).await;
    }
}

fn get_string(body: &mut Bytes) -> String {
    let end = body.iter().position(|&b| b == 0).unwrap();
    let value = String::from_utf8(body.split_to(end).to_vec()).unwrap();
    body.advance(1);
    value
}

fn get_values(body: &mut Bytes) -> Vec<Option<Vec<u8>>> {
    let len = body.get_u16();
    (0..len)
        .map(|_| match body.get_i32() {
            -1 => None,
            n => Some(body.split_to(n as usize).to_vec()),
        })
        .collect()
}

fn get_u16s(body: &mut Bytes) -> Vec<u16> {
    let len = body.get_u16();
    (0..len).map(|_| body.get_u16()).collect()
}

fn decode_frontend(msgtype: u8, mut body: Bytes) -> Frontend {
    match msgtype {
        b'Q' => Frontend::Query(get_string(&mut body)),
        b'P' => {
            let name = get_string(&mut body);
            let sql = get_string(&mut body);
            let len = body.get_u16();
            let oids = (0..len).map(|_| body.get_u32()).collect();
            Frontend::Parse { name, sql, oids }
        },
        b'B' => Frontend::Bind {
            portal: get_string(&mut body),
            statement: get_string(&mut body),
            param_formats: get_u16s(&mut body),
            params: get_values(&mut body),
            result_formats: get_u16s(&mut body),
        },
        b'D' => {
            let kind = body.get_u8();
            Frontend::Describe { kind, name: get_string(&mut body) }
        },
        b'E' => {
            let portal = get_string(&mut body);
            Frontend::Execute { portal, max_rows: body.get_u32() }
        },
        b'C' => {
            let kind = body.get_u8();
            Frontend::Close { kind, name: get_string(&mut body) }
        },
        b'S' => Frontend::Sync,
        b'H' => Frontend::Flush,
        b'd' => Frontend::CopyData(body.to_vec()),
        b'c' => Frontend::CopyDone,
        b'f' => Frontend::CopyFail(get_string(&mut body)),
        b'F' => Frontend::FunctionCall {
            function: body.get_u32(),
            arg_formats: get_u16s(&mut body),
            args: get_values(&mut body),
            result_format: body.get_u16(),
        },
        b'X' => Frontend::Terminate,
        other => panic!("unknown frontend message {:?}", other as char),
    }
}

fn frame(msgtype: u8, body: impl FnOnce(&mut BytesMut)) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(msgtype);
    buf.put_u32(0);
    body(&mut buf);
    let len = (buf.len() - 1) as u32;
    buf[1..5].copy_from_slice(&len.to_be_bytes());
    buf.freeze()
}

fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_slice(value.as_bytes());
    buf.put_u8(0);
}

pub fn parse_complete() -> Bytes {
    frame(b'1', |_| { })
}

pub fn bind_complete() -> Bytes {
    frame(b'2', |_| { })
}

pub fn close_complete() -> Bytes {
    frame(b'3', |_| { })
}

pub fn no_data() -> Bytes {
    frame(b'n', |_| { })
}

pub fn portal_suspended() -> Bytes {
    frame(b's', |_| { })
}

pub fn empty_query() -> Bytes {
    frame(b'I', |_| { })
}

pub fn ready(status: u8) -> Bytes {
    frame(b'Z', |buf| buf.put_u8(status))
}

pub fn command_complete(tag: &str) -> Bytes {
    frame(b'C', |buf| put_string(buf, tag))
}

pub fn parameter_description(oids: &[u32]) -> Bytes {
    frame(b't', |buf| {
        buf.put_u16(oids.len() as u16);
        oids.iter().for_each(|&oid| buf.put_u32(oid));
    })
}

/// Text format columns.
pub fn row_description(fields: &[(&str, u32)]) -> Bytes {
    frame(b'T', |buf| {
        buf.put_u16(fields.len() as u16);
        for &(name, oid) in fields {
            put_string(buf, name);
            buf.put_u32(0);
            buf.put_i16(0);
            buf.put_u32(oid);
            buf.put_i16(-1);
            buf.put_i32(-1);
            buf.put_u16(0);
        }
    })
}

pub fn data_row(values: &[Option<&str>]) -> Bytes {
    frame(b'D', |buf| {
        buf.put_u16(values.len() as u16);
        for value in values {
            match value {
                Some(value) => {
                    buf.put_i32(value.len() as i32);
                    buf.put_slice(value.as_bytes());
                },
                None => buf.put_i32(-1),
            }
        }
    })
}

fn error_fields(buf: &mut BytesMut, severity: &str, code: &str, message: &str) {
    for (field, value) in [(b'S', severity), (b'V', severity), (b'C', code), (b'M', message)] {
        buf.put_u8(field);
        put_string(buf, value);
    }
    buf.put_u8(0);
}

pub fn error(code: &str, message: &str) -> Bytes {
    frame(b'E', |buf| error_fields(buf, "ERROR", code, message))
}

pub fn fatal(code: &str, message: &str) -> Bytes {
    frame(b'E', |buf| error_fields(buf, "FATAL", code, message))
}

pub fn notice(message: &str) -> Bytes {
    frame(b'N', |buf| error_fields(buf, "WARNING", "01000", message))
}

pub fn notification(process_id: u32, channel: &str, payload: &str) -> Bytes {
    frame(b'A', |buf| {
        buf.put_u32(process_id);
        put_string(buf, channel);
        put_string(buf, payload);
    })
}

pub fn parameter_status(name: &str, value: &str) -> Bytes {
    frame(b'S', |buf| {
        put_string(buf, name);
        put_string(buf, value);
    })
}

fn copy_response(msgtype: u8, columns: u16) -> Bytes {
    frame(msgtype, |buf| {
        buf.put_u8(0);
        buf.put_u16(columns);
        (0..columns).for_each(|_| buf.put_u16(0));
    })
}

pub fn copy_in_response(columns: u16) -> Bytes {
    copy_response(b'G', columns)
}

pub fn copy_out_response(columns: u16) -> Bytes {
    copy_response(b'H', columns)
}

pub fn copy_data(data: &[u8]) -> Bytes {
    frame(b'd', |buf| buf.put_slice(data))
}

pub fn copy_done() -> Bytes {
    frame(b'c', |_| { })
}

pub fn function_call_response(value: Option<&[u8]>) -> Bytes {
    frame(b'V', |buf| match value {
        Some(value) => {
            buf.put_i32(value.len() as i32);
            buf.put_slice(value);
        },
        None => buf.put_i32(-1),
    })
}
