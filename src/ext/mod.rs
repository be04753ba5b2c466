//! Byte level helpers for the protocol codec.
use bytes::{Buf, BufMut, Bytes};

use crate::protocol::ProtocolError;

/// Integer signess in postgres docs is awful.
pub trait UsizeExt {
    /// length is usize in rust, while sometime postgres want i32,
    /// this will panic when overflow instead of wrapping
    fn to_i32(self) -> i32;
    /// length is usize in rust, while sometime postgres want i16,
    /// this will panic when overflow instead of wrapping
    fn to_i16(self) -> i16;
}

impl UsizeExt for usize {
    fn to_i32(self) -> i32 {
        self.try_into().expect("message size too large for protocol")
    }

    fn to_i16(self) -> i16 {
        self.try_into().expect("message size too large for protocol")
    }
}

pub trait StrExt {
    /// postgres String must be nul terminated
    fn nul_string_len(&self) -> i32;
}

impl StrExt for str {
    fn nul_string_len(&self) -> i32 {
        self.len().to_i32() + 1/* nul */
    }
}

pub trait BufMutExt {
    /// postgres String must be nul terminated
    fn put_nul_string(&mut self, string: &str);
}

impl<B: BufMut> BufMutExt for B {
    fn put_nul_string(&mut self, string: &str) {
        self.put(string.as_bytes());
        self.put_u8(b'\0');
    }
}

pub trait BytesExt {
    /// split off a nul terminated string, without the terminator
    fn get_nul_bytes(&mut self) -> Result<Bytes, ProtocolError>;

    fn get_nul_string(&mut self) -> Result<String, ProtocolError>;
}

impl BytesExt for Bytes {
    fn get_nul_bytes(&mut self) -> Result<Bytes, ProtocolError> {
        let Some(end) = self.iter().position(|e| matches!(e, b'\0')) else {
            return Err(ProtocolError::UnterminatedString);
        };
        let me = self.split_to(end);
        Buf::advance(self, 1); // nul
        Ok(me)
    }

    fn get_nul_string(&mut self) -> Result<String, ProtocolError> {
        let bytes = self.get_nul_bytes()?;
        String::from_utf8(bytes.into()).map_err(|e| ProtocolError::NonUtf8(e.utf8_error()))
    }
}

/// Guarded reads for backend message bodies.
///
/// `bytes::Buf` getters panic on underrun; backend decoding must instead
/// surface [`ProtocolError::Truncated`].
pub trait BufExt {
    fn try_get_u8_(&mut self, msg: &'static str) -> Result<u8, ProtocolError>;
    fn try_get_i16_(&mut self, msg: &'static str) -> Result<i16, ProtocolError>;
    fn try_get_i32_(&mut self, msg: &'static str) -> Result<i32, ProtocolError>;
    fn try_get_u32_(&mut self, msg: &'static str) -> Result<u32, ProtocolError>;
}

impl<B: Buf> BufExt for B {
    fn try_get_u8_(&mut self, msg: &'static str) -> Result<u8, ProtocolError> {
        match self.remaining() >= 1 {
            true => Ok(self.get_u8()),
            false => Err(ProtocolError::Truncated { msg }),
        }
    }

    fn try_get_i16_(&mut self, msg: &'static str) -> Result<i16, ProtocolError> {
        match self.remaining() >= 2 {
            true => Ok(self.get_i16()),
            false => Err(ProtocolError::Truncated { msg }),
        }
    }

    fn try_get_i32_(&mut self, msg: &'static str) -> Result<i32, ProtocolError> {
        match self.remaining() >= 4 {
            true => Ok(self.get_i32()),
            false => Err(ProtocolError::Truncated { msg }),
        }
    }

    fn try_get_u32_(&mut self, msg: &'static str) -> Result<u32, ProtocolError> {
        match self.remaining() >= 4 {
            true => Ok(self.get_u32()),
            false => Err(ProtocolError::Truncated { msg }),
        }
    }
}
