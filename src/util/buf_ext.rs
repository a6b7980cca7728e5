use bytes::{Buf, BufMut};
use bytes_varint::{VarIntSupport, VarIntSupportMut};

use crate::error::DecodeError;


/// Decoding helpers on top of [Buf]. All of them fail with a [DecodeError] instead of panicking
///  on short input, so a truncated datagram never takes down the loop that decodes it.
pub trait BufExt: Buf + Sized {
    fn try_get_len(&mut self) -> Result<usize, DecodeError> {
        if !self.has_remaining() {
            return Err(DecodeError::Truncated);
        }
        let len = self.try_get_u32_varint()
            .map_err(|_| DecodeError::InvalidVarInt)? as usize;
        // every element takes at least one byte, so this is a cheap plausibility check before allocating
        if len > self.remaining() {
            return Err(DecodeError::Truncated);
        }
        Ok(len)
    }

    fn try_get_string(&mut self) -> Result<String, DecodeError> {
        let len = self.try_get_len()?;
        let mut raw = vec![0u8; len];
        self.try_copy_to_slice(&mut raw)?;
        String::from_utf8(raw)
            .map_err(|_| DecodeError::InvalidUtf8)
    }

    fn try_get_string_list(&mut self) -> Result<Vec<String>, DecodeError> {
        let len = self.try_get_len()?;
        let mut result = Vec::with_capacity(len);
        for _ in 0..len {
            result.push(self.try_get_string()?);
        }
        Ok(result)
    }

    fn try_get_bool(&mut self) -> Result<bool, DecodeError> {
        match self.try_get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(DecodeError::InvalidDiscriminator { what: "boolean", value }),
        }
    }

    /// reads a presence flag, followed by the value if present
    fn try_get_option<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, DecodeError>) -> Result<Option<T>, DecodeError> {
        if self.try_get_bool()? {
            Ok(Some(f(self)?))
        }
        else {
            Ok(None)
        }
    }
}

pub trait BufMutExt: BufMut + Sized {
    fn put_len(&mut self, len: usize) {
        self.put_u32_varint(len as u32); //TODO reject collections with more than u32::MAX elements
    }

    fn put_string(&mut self, s: &str) {
        self.put_len(s.len());
        self.put_slice(s.as_bytes());
    }

    fn put_string_list(&mut self, strings: &[String]) {
        self.put_len(strings.len());
        for s in strings {
            self.put_string(s);
        }
    }

    fn put_bool(&mut self, b: bool) {
        self.put_u8(if b { 1 } else { 0 });
    }

    fn put_option<T: ?Sized>(&mut self, value: Option<&T>, f: impl FnOnce(&mut Self, &T)) {
        match value {
            Some(v) => {
                self.put_bool(true);
                f(self, v);
            }
            None => self.put_bool(false),
        }
    }
}

impl <T: Buf> BufExt for T {
}

impl <T: BufMut> BufMutExt for T {
}
