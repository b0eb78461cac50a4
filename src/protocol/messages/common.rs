//! Common types and traits for SMB2 messages

use crate::error::{Error, Result};
use crate::protocol::smb2_constants::{header_flags, Smb2Command, SMB2_HEADER_SIZE};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::convert::TryFrom;
use std::io::{self, Read};

/// Trait for SMB messages that can be parsed from and serialized to bytes
pub trait SmbMessage: Sized {
    /// Parse message body (the bytes following the 64-byte header)
    fn parse(buf: &[u8]) -> Result<Self>;

    /// Serialize message body
    fn serialize(&self) -> Result<Vec<u8>>;

    /// Get the size of the message body when serialized
    fn size(&self) -> usize;
}

/// SMB2 Protocol ID (0xFE 'S' 'M' 'B')
pub const SMB2_PROTOCOL_ID: u32 = 0x424D53FE;

/// Credits asked for on every request
pub const DEFAULT_CREDIT_REQUEST: u16 = 64;

/// SMB2 Header (64 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2Header {
    pub protocol_id: u32,
    pub structure_size: u16,
    pub credit_charge: u16,
    pub status: u32,
    pub command: Smb2Command,
    pub credits: u16,
    pub flags: u32,
    pub next_command: u32,
    pub message_id: u64,
    pub reserved: u32,
    pub tree_id: u32,
    pub session_id: u64,
    pub signature: [u8; 16],
}

impl Smb2Header {
    pub fn new_with_command(command: Smb2Command) -> Self {
        Self {
            protocol_id: SMB2_PROTOCOL_ID,
            structure_size: 64,
            credit_charge: 0,
            status: 0,
            command,
            credits: 1,
            flags: 0,
            next_command: 0,
            message_id: 0,
            reserved: 0,
            tree_id: 0,
            session_id: 0,
            signature: [0; 16],
        }
    }

    /// Synchronous request header
    pub fn request(command: Smb2Command, message_id: u64, session_id: u64, tree_id: u32) -> Self {
        Self {
            credit_charge: 1,
            credits: DEFAULT_CREDIT_REQUEST,
            message_id,
            session_id,
            tree_id,
            ..Self::new_with_command(command)
        }
    }

    /// Response header answering `request` with `status`
    pub fn response_to(request: &Smb2Header, status: u32) -> Self {
        Self {
            status,
            credit_charge: request.credit_charge,
            credits: request.credits.max(1),
            flags: header_flags::RESPONSE,
            message_id: request.message_id,
            tree_id: request.tree_id,
            session_id: request.session_id,
            ..Self::new_with_command(request.command)
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < SMB2_HEADER_SIZE {
            return Err(Error::BufferTooSmall {
                need: SMB2_HEADER_SIZE,
                have: buf.len(),
            });
        }

        let mut cursor = io::Cursor::new(buf);
        let protocol_id = cursor.read_u32::<LittleEndian>()?;

        if protocol_id != SMB2_PROTOCOL_ID {
            return Err(Error::InvalidHeader(format!(
                "Invalid protocol ID: 0x{:08x}",
                protocol_id
            )));
        }

        let structure_size = cursor.read_u16::<LittleEndian>()?;
        let credit_charge = cursor.read_u16::<LittleEndian>()?;
        let status = cursor.read_u32::<LittleEndian>()?;
        let command = Smb2Command::try_from(cursor.read_u16::<LittleEndian>()?)?;
        let credits = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u32::<LittleEndian>()?;
        let next_command = cursor.read_u32::<LittleEndian>()?;
        let message_id = cursor.read_u64::<LittleEndian>()?;
        let reserved = cursor.read_u32::<LittleEndian>()?;
        let tree_id = cursor.read_u32::<LittleEndian>()?;
        let session_id = cursor.read_u64::<LittleEndian>()?;

        let mut signature = [0u8; 16];
        cursor.read_exact(&mut signature)?;

        Ok(Self {
            protocol_id,
            structure_size,
            credit_charge,
            status,
            command,
            credits,
            flags,
            next_command,
            message_id,
            reserved,
            tree_id,
            session_id,
            signature,
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(SMB2_HEADER_SIZE);
        buf.write_u32::<LittleEndian>(self.protocol_id)?;
        buf.write_u16::<LittleEndian>(self.structure_size)?;
        buf.write_u16::<LittleEndian>(self.credit_charge)?;
        buf.write_u32::<LittleEndian>(self.status)?;
        buf.write_u16::<LittleEndian>(self.command as u16)?;
        buf.write_u16::<LittleEndian>(self.credits)?;
        buf.write_u32::<LittleEndian>(self.flags)?;
        buf.write_u32::<LittleEndian>(self.next_command)?;
        buf.write_u64::<LittleEndian>(self.message_id)?;
        buf.write_u32::<LittleEndian>(self.reserved)?;
        buf.write_u32::<LittleEndian>(self.tree_id)?;
        buf.write_u64::<LittleEndian>(self.session_id)?;
        buf.extend_from_slice(&self.signature);
        Ok(buf)
    }

    pub fn is_response(&self) -> bool {
        self.flags & header_flags::RESPONSE != 0
    }

    pub fn is_async(&self) -> bool {
        self.flags & header_flags::ASYNC_COMMAND != 0
    }
}

/// Serialize a header followed by a message body
pub fn encode_message<M: SmbMessage>(header: &Smb2Header, body: &M) -> Result<Vec<u8>> {
    let mut buf = header.serialize()?;
    buf.extend_from_slice(&body.serialize()?);
    Ok(buf)
}

/// Split a received message into its header and body
pub fn decode_message(buf: &[u8]) -> Result<(Smb2Header, &[u8])> {
    let header = Smb2Header::parse(buf)?;
    Ok((header, &buf[SMB2_HEADER_SIZE..]))
}

/// File ID for SMB2 operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FileId {
    pub persistent: u64,
    pub volatile: u64,
}

impl FileId {
    pub fn with_values(persistent: u64, volatile: u64) -> Self {
        Self {
            persistent,
            volatile,
        }
    }

    pub(crate) fn read_from<R: Read>(cursor: &mut R) -> Result<Self> {
        let persistent = cursor.read_u64::<LittleEndian>()?;
        let volatile = cursor.read_u64::<LittleEndian>()?;
        Ok(Self::with_values(persistent, volatile))
    }

    pub(crate) fn write_to(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.write_u64::<LittleEndian>(self.persistent)?;
        buf.write_u64::<LittleEndian>(self.volatile)?;
        Ok(())
    }
}

/// Read a UTF-16LE string from a byte slice
pub(crate) fn utf16le_to_string(bytes: &[u8]) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(Error::ParseError("odd length UTF-16 string".to_string()));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16(&units).map_err(|e| Error::ParseError(format!("invalid UTF-16: {}", e)))
}

/// Encode a string as UTF-16LE without terminator
pub(crate) fn string_to_utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

/// Slice `len` bytes at a header-relative `offset` out of a message body
pub(crate) fn body_slice(body: &[u8], offset: u16, len: usize) -> Result<&[u8]> {
    if len == 0 {
        return Ok(&[]);
    }
    let start = (offset as usize)
        .checked_sub(SMB2_HEADER_SIZE)
        .ok_or_else(|| Error::ParseError(format!("buffer offset {} inside header", offset)))?;
    let end = start + len;
    if end > body.len() {
        return Err(Error::BufferTooSmall {
            need: end,
            have: body.len(),
        });
    }
    Ok(&body[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip_keeps_ids() {
        let header = Smb2Header::request(Smb2Command::TreeConnect, 7, 0x1122_3344, 9);
        let bytes = header.serialize().unwrap();
        assert_eq!(bytes.len(), SMB2_HEADER_SIZE);
        assert_eq!(&bytes[0..4], &[0xFE, b'S', b'M', b'B']);

        let parsed = Smb2Header::parse(&bytes).unwrap();
        assert_eq!(parsed.message_id, 7);
        assert_eq!(parsed.session_id, 0x1122_3344);
        assert_eq!(parsed.tree_id, 9);
        assert_eq!(parsed.credit_charge, 1);
        assert!(!parsed.is_response());
    }

    #[test]
    fn test_response_header() {
        let request = Smb2Header::request(Smb2Command::Logoff, 3, 42, 0);
        let response = Smb2Header::response_to(&request, 0xC0000203);
        assert!(response.is_response());
        assert!(!response.is_async());
        assert_eq!(response.command, Smb2Command::Logoff);
        assert_eq!(response.message_id, 3);
        assert_eq!(response.session_id, 42);
        assert_eq!(response.status, 0xC0000203);
    }

    #[test]
    fn test_header_rejects_smb1() {
        let mut bytes = Smb2Header::new_with_command(Smb2Command::Negotiate)
            .serialize()
            .unwrap();
        bytes[0] = 0xFF;
        assert!(matches!(
            Smb2Header::parse(&bytes),
            Err(Error::InvalidHeader(_))
        ));
        assert!(Smb2Header::parse(&bytes[..10]).is_err());
    }

    #[test]
    fn test_body_slice() {
        let body = [0u8, 1, 2, 3, 4, 5];
        assert_eq!(body_slice(&body, 66, 3).unwrap(), &[2, 3, 4]);
        assert!(body_slice(&body, 66, 10).is_err());
        assert!(body_slice(&body, 10, 2).is_err());
        assert!(body_slice(&body, 0, 0).unwrap().is_empty());
    }

    #[test]
    fn test_utf16_helpers() {
        let encoded = string_to_utf16le("IPC$");
        assert_eq!(encoded, vec![b'I', 0, b'P', 0, b'C', 0, b'$', 0]);
        assert_eq!(utf16le_to_string(&encoded).unwrap(), "IPC$");
        assert!(utf16le_to_string(&[0x41]).is_err());
    }
}
