//! Payload primitives
//!
//! A bounds-checked reader over a payload slice plus the compact
//! integer encodings. Writers append to a `Vec<u8>` through the
//! `bytes::BufMut` extension methods directly.

use bytes::BufMut;

/// Bounds-checked cursor over a message payload.
///
/// Read failures carry a short reason string; the codec wraps them into
/// `ProtocolError::Malformed` together with the command name.
pub(crate) struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        PayloadReader { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read(&mut self, n: usize) -> Result<&'a [u8], String> {
        if self.remaining() < n {
            return Err(format!(
                "truncated payload: wanted {n} bytes, {} remain",
                self.remaining()
            ));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, String> {
        Ok(self.read(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16, String> {
        let b = self.read(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u16_be(&mut self) -> Result<u16, String> {
        let b = self.read(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32_le(&mut self) -> Result<u32, String> {
        let b = self.read(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64_le(&mut self) -> Result<u64, String> {
        let b = self.read(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn read_hash(&mut self) -> Result<crate::Hash, String> {
        let b = self.read(32)?;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(b);
        Ok(hash)
    }

    /// Compact length: 1 byte below 0xFD, else a 0xFD/0xFE/0xFF marker
    /// followed by a little-endian u16/u32/u64.
    pub fn read_varint(&mut self) -> Result<u64, String> {
        match self.read_u8()? {
            n @ 0x00..=0xfc => Ok(n as u64),
            0xfd => Ok(self.read_u16_le()? as u64),
            0xfe => Ok(self.read_u32_le()? as u64),
            0xff => self.read_u64_le(),
        }
    }

    pub fn read_varbytes(&mut self, max: usize) -> Result<Vec<u8>, String> {
        let len = self.read_varint()?;
        if len > max as u64 {
            return Err(format!("byte string of {len} bytes exceeds limit of {max}"));
        }
        Ok(self.read(len as usize)?.to_vec())
    }

    pub fn read_varstr(&mut self, max: usize) -> Result<String, String> {
        let bytes = self.read_varbytes(max)?;
        String::from_utf8(bytes).map_err(|_| "string is not valid UTF-8".to_string())
    }
}

pub(crate) fn write_varint(buf: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => buf.put_u8(value as u8),
        0xfd..=0xffff => {
            buf.put_u8(0xfd);
            buf.put_u16_le(value as u16);
        }
        0x1_0000..=0xffff_ffff => {
            buf.put_u8(0xfe);
            buf.put_u32_le(value as u32);
        }
        _ => {
            buf.put_u8(0xff);
            buf.put_u64_le(value);
        }
    }
}

pub(crate) fn write_varbytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(buf, bytes.len() as u64);
    buf.put_slice(bytes);
}

pub(crate) fn write_varstr(buf: &mut Vec<u8>, s: &str) {
    write_varbytes(buf, s.as_bytes());
}
