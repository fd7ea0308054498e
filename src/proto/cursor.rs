//! Big-endian read and write cursors for the fixed-layout wire format.
//!
//! Fixed-width strings are zero padded when written. Reading one yields the
//! bytes before the first zero byte, or the whole slot when there is none.

use bytes::{BufMut, BytesMut};

use crate::error::CodecError;

/// Appends typed fields to a growing buffer.
#[derive(Debug, Default)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> BytesMut {
        self.buf
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn put_slice(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    /// Write `data` into a `width` byte slot, zero padded.
    pub fn put_bytes(&mut self, data: &[u8], width: usize) -> Result<(), CodecError> {
        if data.len() > width {
            return Err(CodecError::Overflow {
                len: data.len(),
                width,
            });
        }
        self.buf.put_slice(data);
        self.buf.put_bytes(0, width - data.len());
        Ok(())
    }

    pub fn put_str(&mut self, s: &str, width: usize) -> Result<(), CodecError> {
        self.put_bytes(s.as_bytes(), width)
    }

    /// Write a string preceded by a one byte length.
    pub fn put_var_str(&mut self, s: &str) -> Result<(), CodecError> {
        let len = u8::try_from(s.len()).map_err(|_| CodecError::Overflow {
            len: s.len(),
            width: u8::MAX as usize,
        })?;
        self.buf.put_u8(len);
        self.buf.put_slice(s.as_bytes());
        Ok(())
    }

    /// Write a decimal digit string as `width` bytes of BCD, left padded with zeros.
    pub fn put_bcd(&mut self, digits: &str, width: usize) -> Result<(), CodecError> {
        let packed = to_bcd(digits)?;
        if packed.len() > width {
            return Err(CodecError::Overflow {
                len: packed.len(),
                width,
            });
        }
        self.buf.put_bytes(0, width - packed.len());
        self.buf.put_slice(&packed);
        Ok(())
    }

    pub fn put_bcd_u64(&mut self, v: u64, width: usize) -> Result<(), CodecError> {
        self.put_bcd(&v.to_string(), width)
    }
}

/// Consumes typed fields from a borrowed buffer.
#[derive(Debug)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub fn get_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn get_u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_bytes(&mut self, width: usize) -> Result<Vec<u8>, CodecError> {
        Ok(self.take(width)?.to_vec())
    }

    pub fn get_str(&mut self, width: usize) -> Result<String, CodecError> {
        let raw = self.take(width)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        String::from_utf8(raw[..end].to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn get_var_str(&mut self) -> Result<String, CodecError> {
        let len = self.get_u8()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn get_bcd(&mut self, width: usize) -> Result<String, CodecError> {
        from_bcd(self.take(width)?)
    }

    /// Read a BCD number. Leading zeros are dropped and an empty field is 0.
    pub fn get_bcd_u64(&mut self, width: usize) -> Result<u64, CodecError> {
        let digits = self.get_bcd(width)?;
        let digits = digits.trim_start_matches('0');
        if digits.is_empty() {
            return Ok(0);
        }
        digits.parse().map_err(|_| CodecError::Overflow {
            len: digits.len(),
            width: u64::MAX.to_string().len(),
        })
    }
}

/// Pack a decimal digit string, two digits per byte, high nibble first.
/// Odd-length input gets a leading zero digit.
pub fn to_bcd(digits: &str) -> Result<Vec<u8>, CodecError> {
    let mut nibbles = Vec::with_capacity(digits.len() + 1);
    if digits.len() % 2 == 1 {
        nibbles.push(0);
    }
    for c in digits.chars() {
        let d = c.to_digit(10).ok_or(CodecError::InvalidDigit(c))?;
        nibbles.push(d as u8);
    }

    Ok(nibbles.chunks(2).map(|p| (p[0] << 4) | p[1]).collect())
}

pub fn from_bcd(data: &[u8]) -> Result<String, CodecError> {
    let mut s = String::with_capacity(data.len() * 2);
    for &b in data {
        let (hi, lo) = (b >> 4, b & 0x0f);
        if hi > 9 || lo > 9 {
            return Err(CodecError::InvalidBcd(b));
        }
        s.push(char::from(b'0' + hi));
        s.push(char::from(b'0' + lo));
    }
    Ok(s)
}
