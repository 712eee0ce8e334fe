//! OER primitives over [`bytes::Buf`] / [`bytes::BufMut`].
//!
//! Lengths use the short form (one byte) below 128 and the long form
//! (`0x80 | n` followed by an `n`-byte big-endian length) otherwise.
//! Variable-length unsigned integers are a length prefix followed by the
//! minimal big-endian encoding, never fewer than one byte.

use bytes::{Buf, BufMut, Bytes};

use super::PacketError;

/// Reading helpers. Every read checks the remaining length first, so a
/// truncated input is an error rather than a panic.
pub trait OerReadExt: Buf {
    fn read_u8(&mut self) -> Result<u8, PacketError> {
        if self.remaining() < 1 {
            return Err(PacketError::UnexpectedEnd);
        }
        Ok(self.get_u8())
    }

    fn read_u64(&mut self) -> Result<u64, PacketError> {
        if self.remaining() < 8 {
            return Err(PacketError::UnexpectedEnd);
        }
        Ok(self.get_u64())
    }

    fn read_bytes(&mut self, len: usize) -> Result<Bytes, PacketError> {
        if self.remaining() < len {
            return Err(PacketError::UnexpectedEnd);
        }
        Ok(self.copy_to_bytes(len))
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], PacketError> {
        if self.remaining() < N {
            return Err(PacketError::UnexpectedEnd);
        }
        let mut out = [0u8; N];
        self.copy_to_slice(&mut out);
        Ok(out)
    }

    fn read_length_prefix(&mut self) -> Result<usize, PacketError> {
        let first = self.read_u8()?;
        if first & 0x80 == 0 {
            return Ok(first as usize);
        }
        let width = first & 0x7f;
        if width == 0 || width as usize > std::mem::size_of::<usize>() {
            return Err(PacketError::InvalidLengthPrefix(width));
        }
        let mut len = 0usize;
        for _ in 0..width {
            len = (len << 8) | self.read_u8()? as usize;
        }
        Ok(len)
    }

    fn read_var_octet_string(&mut self) -> Result<Bytes, PacketError> {
        let len = self.read_length_prefix()?;
        self.read_bytes(len)
    }

    fn read_var_uint(&mut self) -> Result<u64, PacketError> {
        let len = self.read_length_prefix()?;
        if len == 0 {
            return Err(PacketError::UnexpectedEnd);
        }
        if len > 8 {
            return Err(PacketError::VarUintTooLarge);
        }
        let mut value = 0u64;
        for _ in 0..len {
            value = (value << 8) | self.read_u8()? as u64;
        }
        Ok(value)
    }

    fn read_utf8_string(&mut self) -> Result<String, PacketError> {
        let raw = self.read_var_octet_string()?;
        String::from_utf8(raw.to_vec()).map_err(|_| PacketError::InvalidUtf8)
    }
}

impl<B: Buf + ?Sized> OerReadExt for B {}

/// Writing helpers.
pub trait OerWriteExt: BufMut {
    fn put_length_prefix(&mut self, len: usize) {
        if len < 128 {
            self.put_u8(len as u8);
            return;
        }
        let width = byte_width(len as u64);
        self.put_u8(0x80 | width as u8);
        self.put_uint(len as u64, width);
    }

    fn put_var_octet_string(&mut self, data: &[u8]) {
        self.put_length_prefix(data.len());
        self.put_slice(data);
    }

    fn put_var_uint(&mut self, value: u64) {
        let width = byte_width(value);
        self.put_length_prefix(width);
        self.put_uint(value, width);
    }
}

impl<B: BufMut + ?Sized> OerWriteExt for B {}

/// Bytes needed for the minimal big-endian encoding of `value` (at least 1).
fn byte_width(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(8).max(1)
}

/// Encoded size of a var-uint, for pre-sizing buffers.
pub fn var_uint_size(value: u64) -> usize {
    1 + byte_width(value)
}
