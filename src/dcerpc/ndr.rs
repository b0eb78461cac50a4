//! NDR (Network Data Representation) encoding/decoding for DCE/RPC
//!
//! Little-endian NDR 2.0 only. Alignment is relative to the start of the
//! stub data, which is how DCE/RPC request and response bodies are marshalled.

use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

/// First referent id handed out for non-null pointers
const FIRST_REFERENT: u32 = 0x0002_0000;

/// NDR encoder
pub struct NdrEncoder {
    buffer: Vec<u8>,
    next_referent: u32,
}

impl Default for NdrEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl NdrEncoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            next_referent: FIRST_REFERENT,
        }
    }

    /// Get the encoded bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    fn align(&mut self, alignment: usize) {
        let padding = (alignment - (self.buffer.len() % alignment)) % alignment;
        self.buffer.resize(self.buffer.len() + padding, 0);
    }

    pub fn encode_u8(&mut self, value: u8) -> Result<()> {
        self.buffer.push(value);
        Ok(())
    }

    pub fn encode_u16(&mut self, value: u16) -> Result<()> {
        self.align(2);
        self.buffer.write_u16::<LittleEndian>(value)?;
        Ok(())
    }

    pub fn encode_u32(&mut self, value: u32) -> Result<()> {
        self.align(4);
        self.buffer.write_u32::<LittleEndian>(value)?;
        Ok(())
    }

    /// Write a fresh non-null referent id
    pub fn encode_referent(&mut self) -> Result<()> {
        let referent = self.next_referent;
        self.next_referent = self.next_referent.wrapping_add(4);
        self.encode_u32(referent)
    }

    pub fn encode_null_ptr(&mut self) -> Result<()> {
        self.encode_u32(0)
    }

    /// Encode a unique pointer whose pointee follows immediately
    pub fn encode_unique_ptr<T, F>(&mut self, value: Option<&T>, encode_fn: F) -> Result<()>
    where
        F: FnOnce(&mut Self, &T) -> Result<()>,
    {
        match value {
            Some(val) => {
                self.encode_referent()?;
                encode_fn(self, val)
            }
            None => self.encode_null_ptr(),
        }
    }

    /// Encode a NUL-terminated wide string as a conformant varying array
    pub fn encode_string(&mut self, string: &str) -> Result<()> {
        let utf16: Vec<u16> = string.encode_utf16().chain(std::iter::once(0)).collect();
        let count = utf16.len() as u32;
        // Max count, offset, actual count
        self.encode_u32(count)?;
        self.encode_u32(0)?;
        self.encode_u32(count)?;
        for ch in utf16 {
            self.encode_u16(ch)?;
        }
        Ok(())
    }
}

/// NDR decoder
pub struct NdrDecoder<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> NdrDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    /// Get remaining bytes count
    pub fn remaining(&self) -> usize {
        let pos = self.cursor.position() as usize;
        self.cursor.get_ref().len().saturating_sub(pos)
    }

    /// Skip alignment padding
    pub fn align(&mut self, alignment: u64) -> Result<()> {
        let pos = self.cursor.position();
        let padding = (alignment - (pos % alignment)) % alignment;
        if padding as usize > self.remaining() {
            return Err(Error::BufferTooSmall {
                need: (pos + padding) as usize,
                have: self.cursor.get_ref().len(),
            });
        }
        self.cursor.set_position(pos + padding);
        Ok(())
    }

    pub fn decode_u8(&mut self) -> Result<u8> {
        Ok(self.cursor.read_u8()?)
    }

    pub fn decode_u16(&mut self) -> Result<u16> {
        self.align(2)?;
        Ok(self.cursor.read_u16::<LittleEndian>()?)
    }

    pub fn decode_u32(&mut self) -> Result<u32> {
        self.align(4)?;
        Ok(self.cursor.read_u32::<LittleEndian>()?)
    }

    /// Pointer referent id, `None` for a null pointer
    pub fn decode_pointer(&mut self) -> Result<Option<u32>> {
        let referent = self.decode_u32()?;
        Ok((referent != 0).then_some(referent))
    }

    /// Conformant array length, checked against the bytes left to decode
    pub fn decode_count(&mut self, min_element_size: usize) -> Result<usize> {
        let count = self.decode_u32()? as usize;
        let need = count.saturating_mul(min_element_size);
        if need > self.remaining() {
            return Err(Error::ParseError(format!(
                "NDR array of {} elements exceeds remaining {} bytes",
                count,
                self.remaining()
            )));
        }
        Ok(count)
    }

    /// Decode a conformant varying wide string, dropping the terminator
    pub fn decode_string(&mut self) -> Result<String> {
        let max_count = self.decode_u32()?;
        let offset = self.decode_u32()?;
        let actual = self.decode_count(2)?;
        if offset != 0 || actual as u64 > u64::from(max_count) {
            return Err(Error::ParseError(format!(
                "Invalid NDR string bounds: max {} offset {} actual {}",
                max_count, offset, actual
            )));
        }

        let mut utf16 = Vec::with_capacity(actual);
        for _ in 0..actual {
            utf16.push(self.decode_u16()?);
        }
        let len = utf16.iter().position(|&c| c == 0).unwrap_or(utf16.len());
        String::from_utf16(&utf16[..len])
            .map_err(|e| Error::ParseError(format!("Invalid UTF-16: {}", e)))
    }

    pub fn decode_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        if len > self.remaining() {
            return Err(Error::BufferTooSmall {
                need: self.position() as usize + len,
                have: self.cursor.get_ref().len(),
            });
        }
        let mut bytes = vec![0u8; len];
        self.cursor.read_exact(&mut bytes)?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ndr_alignment() {
        let mut encoder = NdrEncoder::new();
        encoder.encode_u8(0x42).unwrap();
        encoder.encode_u16(0x1234).unwrap();
        encoder.encode_u32(0xDEADBEEF).unwrap();

        let bytes = encoder.into_bytes();
        assert_eq!(bytes, vec![0x42, 0, 0x34, 0x12, 0xEF, 0xBE, 0xAD, 0xDE]);

        let mut decoder = NdrDecoder::new(&bytes);
        assert_eq!(decoder.decode_u8().unwrap(), 0x42);
        assert_eq!(decoder.decode_u16().unwrap(), 0x1234);
        assert_eq!(decoder.decode_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(decoder.remaining(), 0);
    }

    #[test]
    fn test_ndr_string() {
        let mut encoder = NdrEncoder::new();
        encoder.encode_string("IPC$").unwrap();

        let bytes = encoder.into_bytes();
        // 12 bytes of bounds, 5 UTF-16 units including terminator
        assert_eq!(bytes.len(), 12 + 10);

        let mut decoder = NdrDecoder::new(&bytes);
        assert_eq!(decoder.decode_string().unwrap(), "IPC$");
    }

    #[test]
    fn test_referents_increase() {
        let mut encoder = NdrEncoder::new();
        encoder.encode_referent().unwrap();
        encoder.encode_unique_ptr(None::<&u32>, |e, v| e.encode_u32(*v)).unwrap();
        encoder.encode_unique_ptr(Some(&7u32), |e, v| e.encode_u32(*v)).unwrap();

        let bytes = encoder.into_bytes();
        let mut decoder = NdrDecoder::new(&bytes);
        assert_eq!(decoder.decode_pointer().unwrap(), Some(0x0002_0000));
        assert_eq!(decoder.decode_pointer().unwrap(), None);
        assert_eq!(decoder.decode_pointer().unwrap(), Some(0x0002_0004));
        assert_eq!(decoder.decode_u32().unwrap(), 7);
    }

    #[test]
    fn test_huge_count_rejected() {
        let mut encoder = NdrEncoder::new();
        encoder.encode_u32(0x4000_0000).unwrap();
        encoder.encode_u32(0).unwrap();
        encoder.encode_u32(0x4000_0000).unwrap();

        let bytes = encoder.into_bytes();
        let mut decoder = NdrDecoder::new(&bytes);
        assert!(decoder.decode_string().is_err());
    }

    #[test]
    fn test_string_actual_exceeds_max() {
        let mut encoder = NdrEncoder::new();
        encoder.encode_u32(1).unwrap();
        encoder.encode_u32(0).unwrap();
        encoder.encode_u32(2).unwrap();
        encoder.encode_u16(b'A' as u16).unwrap();
        encoder.encode_u16(0).unwrap();

        let bytes = encoder.into_bytes();
        assert!(NdrDecoder::new(&bytes).decode_string().is_err());
    }
}
