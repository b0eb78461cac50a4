//! SMB2 Session Setup and Logoff messages

use super::common::{body_slice, SmbMessage};
use crate::error::{Error, Result};
use crate::protocol::smb2_constants::{
    structure_size, SecurityMode, Smb2Capabilities, SMB2_HEADER_SIZE,
};
use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Write};

/// SMB2 SessionSetup Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2SessionSetupRequest {
    pub structure_size: u16,
    pub flags: u8,
    pub security_mode: SecurityMode,
    pub capabilities: Smb2Capabilities,
    pub channel: u32,
    pub previous_session_id: u64,
    pub security_blob: Vec<u8>,
}

impl Smb2SessionSetupRequest {
    pub fn new(security_blob: Vec<u8>) -> Self {
        Self {
            structure_size: structure_size::SESSION_SETUP_REQUEST,
            flags: 0,
            security_mode: SecurityMode::SIGNING_ENABLED,
            capabilities: Smb2Capabilities::DFS,
            channel: 0,
            previous_session_id: 0,
            security_blob,
        }
    }
}

impl SmbMessage for Smb2SessionSetupRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 24 {
            return Err(Error::ParseError("SessionSetup request too short".into()));
        }

        let mut cursor = io::Cursor::new(buf);
        let structure_size = cursor.read_u16::<LittleEndian>()?;

        if structure_size != structure_size::SESSION_SETUP_REQUEST {
            return Err(Error::ParseError(format!(
                "Invalid SessionSetup request structure size: {}",
                structure_size
            )));
        }

        let flags = cursor.read_u8()?;
        let security_mode = SecurityMode::from_bits_truncate(cursor.read_u8()? as u16);
        let capabilities = Smb2Capabilities::from_bits_truncate(cursor.read_u32::<LittleEndian>()?);
        let channel = cursor.read_u32::<LittleEndian>()?;
        let security_buffer_offset = cursor.read_u16::<LittleEndian>()?;
        let security_buffer_length = cursor.read_u16::<LittleEndian>()?;
        let previous_session_id = cursor.read_u64::<LittleEndian>()?;

        let security_blob =
            body_slice(buf, security_buffer_offset, security_buffer_length as usize)?.to_vec();

        Ok(Self {
            structure_size,
            flags,
            security_mode,
            capabilities,
            channel,
            previous_session_id,
            security_blob,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(self.structure_size)?;
        buf.write_u8(self.flags)?;
        buf.write_u8(self.security_mode.bits() as u8)?;
        buf.write_u32::<LittleEndian>(self.capabilities.bits())?;
        buf.write_u32::<LittleEndian>(self.channel)?;
        buf.write_u16::<LittleEndian>((SMB2_HEADER_SIZE + 24) as u16)?;
        buf.write_u16::<LittleEndian>(self.security_blob.len() as u16)?;
        buf.write_u64::<LittleEndian>(self.previous_session_id)?;
        buf.write_all(&self.security_blob)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        24 + self.security_blob.len()
    }
}

bitflags! {
    /// SMB2 session flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SessionFlags: u16 {
        const IS_GUEST = 0x0001;
        const IS_NULL = 0x0002;
        const ENCRYPT_DATA = 0x0004;
    }
}

/// SMB2 SessionSetup Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2SessionSetupResponse {
    pub structure_size: u16,
    pub session_flags: SessionFlags,
    pub security_blob: Vec<u8>,
}

impl Smb2SessionSetupResponse {
    pub fn new(session_flags: SessionFlags, security_blob: Vec<u8>) -> Self {
        Self {
            structure_size: structure_size::SESSION_SETUP_RESPONSE,
            session_flags,
            security_blob,
        }
    }
}

impl SmbMessage for Smb2SessionSetupResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 8 {
            return Err(Error::ParseError("SessionSetup response too short".into()));
        }

        let mut cursor = io::Cursor::new(buf);
        let structure_size = cursor.read_u16::<LittleEndian>()?;

        if structure_size != structure_size::SESSION_SETUP_RESPONSE {
            return Err(Error::ParseError(format!(
                "Invalid SessionSetup response structure size: {}",
                structure_size
            )));
        }

        let session_flags = SessionFlags::from_bits_truncate(cursor.read_u16::<LittleEndian>()?);
        let security_buffer_offset = cursor.read_u16::<LittleEndian>()?;
        let security_buffer_length = cursor.read_u16::<LittleEndian>()?;

        let security_blob =
            body_slice(buf, security_buffer_offset, security_buffer_length as usize)?.to_vec();

        Ok(Self {
            structure_size,
            session_flags,
            security_blob,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(self.structure_size)?;
        buf.write_u16::<LittleEndian>(self.session_flags.bits())?;

        let security_buffer_offset = if self.security_blob.is_empty() {
            0
        } else {
            (SMB2_HEADER_SIZE + 8) as u16
        };

        buf.write_u16::<LittleEndian>(security_buffer_offset)?;
        buf.write_u16::<LittleEndian>(self.security_blob.len() as u16)?;
        buf.write_all(&self.security_blob)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        8 + self.security_blob.len()
    }
}

/// SMB2 LOGOFF; request and response share the same 4-byte layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Smb2Logoff {
    pub structure_size: u16,
}

impl Default for Smb2Logoff {
    fn default() -> Self {
        Self {
            structure_size: structure_size::LOGOFF,
        }
    }
}

impl SmbMessage for Smb2Logoff {
    fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 4 {
            return Err(Error::ParseError("Logoff message too short".into()));
        }
        let structure_size = u16::from_le_bytes([buf[0], buf[1]]);
        if structure_size != structure_size::LOGOFF {
            return Err(Error::ParseError(format!(
                "Invalid Logoff structure size: {}",
                structure_size
            )));
        }
        Ok(Self { structure_size })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(4);
        buf.write_u16::<LittleEndian>(self.structure_size)?;
        buf.write_u16::<LittleEndian>(0)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_setup_request_serialization() {
        let req = Smb2SessionSetupRequest::new(vec![0x60, 0x01, 0x00]);
        let serialized = req.serialize().unwrap();
        assert_eq!(serialized.len(), 27);

        let structure_size = u16::from_le_bytes([serialized[0], serialized[1]]);
        assert_eq!(structure_size, structure_size::SESSION_SETUP_REQUEST);
        // blob offset is relative to the start of the SMB2 header
        assert_eq!(u16::from_le_bytes([serialized[12], serialized[13]]), 88);

        let parsed = Smb2SessionSetupRequest::parse(&serialized).unwrap();
        assert_eq!(parsed.security_blob, vec![0x60, 0x01, 0x00]);
    }

    #[test]
    fn test_session_setup_response_roundtrip() {
        let response = Smb2SessionSetupResponse::new(SessionFlags::IS_GUEST, vec![0xa1, 0x00]);
        let bytes = response.serialize().unwrap();
        let parsed = Smb2SessionSetupResponse::parse(&bytes).unwrap();
        assert_eq!(parsed.session_flags, SessionFlags::IS_GUEST);
        assert_eq!(parsed.security_blob, vec![0xa1, 0x00]);

        let empty = Smb2SessionSetupResponse::new(SessionFlags::empty(), Vec::new());
        let parsed = Smb2SessionSetupResponse::parse(&empty.serialize().unwrap()).unwrap();
        assert!(parsed.security_blob.is_empty());
    }

    #[test]
    fn test_session_setup_response_bad_offset() {
        let mut bytes = Smb2SessionSetupResponse::new(SessionFlags::empty(), vec![1, 2, 3])
            .serialize()
            .unwrap();
        bytes[6] = 0xFF;
        assert!(Smb2SessionSetupResponse::parse(&bytes).is_err());
    }

    #[test]
    fn test_logoff_layout() {
        let bytes = Smb2Logoff::default().serialize().unwrap();
        assert_eq!(bytes, vec![4, 0, 0, 0]);
        assert!(Smb2Logoff::parse(&bytes).is_ok());
        assert!(Smb2Logoff::parse(&[9, 0, 0, 0]).is_err());
    }
}
