use bytes::{Buf, BufMut, Bytes};

use crate::{common::ByteStr, postgres::ProtocolError};

/// Integer signess in postgres docs is awful.
pub trait UsizeExt {
    /// Length is `usize` in rust, while sometime postgres want `u32`,
    /// this will panic when overflow instead of wrapping.
    fn to_u32(self) -> u32;
    /// Length is `usize` in rust, while sometime postgres want `u16`,
    /// this will panic when overflow instead of wrapping.
    fn to_u16(self) -> u16;
}

/// Nul string operation.
pub trait StrExt {
    /// String length plus nul (1).
    fn nul_string_len(&self) -> u32;
}

/// Nul string operation in [`BufMut`]
pub trait BufMutExt {
    /// Write string and nul termination.
    fn put_nul_string(&mut self, string: &str);
}

/// Bounds checked reads over a backend message body.
///
/// A body shorter than its message type requires means the stream is desynchronized, so
/// every read reports [`ProtocolError`] instead of panicking like [`Buf`] does.
pub trait BytesExt {
    fn try_u8(&mut self) -> Result<u8, ProtocolError>;

    fn try_u16(&mut self) -> Result<u16, ProtocolError>;

    fn try_i16(&mut self) -> Result<i16, ProtocolError>;

    fn try_u32(&mut self) -> Result<u32, ProtocolError>;

    fn try_i32(&mut self) -> Result<i32, ProtocolError>;

    /// Split off exactly `len` bytes.
    fn try_split_to(&mut self, len: usize) -> Result<Bytes, ProtocolError>;

    /// Read nul terminated bytes, excluding the nul.
    fn get_nul_bytes(&mut self) -> Result<Bytes, ProtocolError>;

    /// Read nul terminated string.
    ///
    /// Using [`ByteStr`] avoid allocating [`Vec`] as it required for [`String::from_utf8`]
    fn get_nul_bytestr(&mut self) -> Result<ByteStr, ProtocolError>;
}

/// Helper trait to [`Display`][std::fmt::Display] bytes.
pub trait FmtExt {
    /// Lossy [`Display`][std::fmt::Display] bytes.
    fn lossy(&self) -> LossyFmt<'_>;
}

/// Lossy [`Display`][std::fmt::Display] implementation for bytes.
pub struct LossyFmt<'a>(pub &'a [u8]);

impl UsizeExt for usize {
    fn to_u32(self) -> u32 {
        self.try_into().expect("message size too large for protocol")
    }

    fn to_u16(self) -> u16 {
        self.try_into().expect("message size too large for protocol")
    }
}

impl StrExt for str {
    fn nul_string_len(&self) -> u32 {
        self.len().to_u32() + 1/* nul */
    }
}

impl<B: BufMut> BufMutExt for B {
    fn put_nul_string(&mut self, string: &str) {
        self.put(string.as_bytes());
        self.put_u8(b'\0');
    }
}

macro_rules! checked {
    ($name:ident, $get:ident, $ty:ty) => {
        fn $name(&mut self) -> Result<$ty, ProtocolError> {
            if self.remaining() < size_of::<$ty>() {
                return Err(ProtocolError::malformed("message body too short"));
            }
            Ok(self.$get())
        }
    };
}

impl BytesExt for Bytes {
    checked!(try_u8, get_u8, u8);
    checked!(try_u16, get_u16, u16);
    checked!(try_i16, get_i16, i16);
    checked!(try_u32, get_u32, u32);
    checked!(try_i32, get_i32, i32);

    fn try_split_to(&mut self, len: usize) -> Result<Bytes, ProtocolError> {
        if self.len() < len {
            return Err(ProtocolError::malformed("message body too short"));
        }
        Ok(self.split_to(len))
    }

    fn get_nul_bytes(&mut self) -> Result<Bytes, ProtocolError> {
        let Some(end) = self.iter().position(|e| matches!(e, b'\0')) else {
            return Err(ProtocolError::malformed("string is not nul terminated"));
        };
        let me = self.split_to(end);
        Buf::advance(self, 1); // nul
        Ok(me)
    }

    fn get_nul_bytestr(&mut self) -> Result<ByteStr, ProtocolError> {
        let bytes = self.get_nul_bytes()?;
        ByteStr::from_utf8(bytes).map_err(|_| ProtocolError::malformed("string is not utf8"))
    }
}

impl FmtExt for [u8] {
    fn lossy(&self) -> LossyFmt<'_> {
        LossyFmt(self)
    }
}

impl std::fmt::Display for LossyFmt<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for &b in self.0 {
            if b.is_ascii_graphic() || b.is_ascii_whitespace() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:x}")?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for LossyFmt<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b\"{self}\"")
    }
}
