//! SMB2 Tree Connect and Tree Disconnect messages

use super::common::{body_slice, string_to_utf16le, utf16le_to_string, SmbMessage};
use crate::error::{Error, Result};
use crate::protocol::smb2_constants::{structure_size, SMB2_HEADER_SIZE};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::convert::TryFrom;
use std::io::{self, Write};

/// SMB2 TreeConnect Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2TreeConnectRequest {
    pub structure_size: u16,
    pub flags: u16,
    /// UNC path, e.g. `\\server\IPC$`
    pub path: String,
}

impl Smb2TreeConnectRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            structure_size: structure_size::TREE_CONNECT_REQUEST,
            flags: 0,
            path: path.into(),
        }
    }
}

impl SmbMessage for Smb2TreeConnectRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 8 {
            return Err(Error::ParseError("TreeConnect request too short".into()));
        }

        let mut cursor = io::Cursor::new(buf);
        let structure_size = cursor.read_u16::<LittleEndian>()?;

        if structure_size != structure_size::TREE_CONNECT_REQUEST {
            return Err(Error::ParseError(format!(
                "Invalid TreeConnect request structure size: {}",
                structure_size
            )));
        }

        let flags = cursor.read_u16::<LittleEndian>()?;
        let path_offset = cursor.read_u16::<LittleEndian>()?;
        let path_length = cursor.read_u16::<LittleEndian>()?;
        let path = utf16le_to_string(body_slice(buf, path_offset, path_length as usize)?)?;

        Ok(Self {
            structure_size,
            flags,
            path,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let path_bytes = string_to_utf16le(&self.path);

        let mut buf = Vec::with_capacity(8 + path_bytes.len());
        buf.write_u16::<LittleEndian>(self.structure_size)?;
        buf.write_u16::<LittleEndian>(self.flags)?;
        buf.write_u16::<LittleEndian>((SMB2_HEADER_SIZE + 8) as u16)?;
        buf.write_u16::<LittleEndian>(path_bytes.len() as u16)?;
        buf.write_all(&path_bytes)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        8 + self.path.encode_utf16().count() * 2
    }
}

/// Share types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShareType {
    Disk = 0x01,
    Pipe = 0x02,
    Print = 0x03,
}

impl TryFrom<u8> for ShareType {
    type Error = Error;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Disk),
            0x02 => Ok(Self::Pipe),
            0x03 => Ok(Self::Print),
            _ => Err(Error::ParseError(format!("Invalid share type: {}", value))),
        }
    }
}

/// SMB2 TreeConnect Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2TreeConnectResponse {
    pub structure_size: u16,
    pub share_type: ShareType,
    pub share_flags: u32,
    pub capabilities: u32,
    pub maximal_access: u32,
}

impl Smb2TreeConnectResponse {
    pub fn new(share_type: ShareType) -> Self {
        Self {
            structure_size: structure_size::TREE_CONNECT_RESPONSE,
            share_type,
            share_flags: 0,
            capabilities: 0,
            maximal_access: 0x001F01FF,
        }
    }
}

impl SmbMessage for Smb2TreeConnectResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 16 {
            return Err(Error::ParseError("TreeConnect response too short".into()));
        }

        let mut cursor = io::Cursor::new(buf);
        let structure_size = cursor.read_u16::<LittleEndian>()?;

        if structure_size != structure_size::TREE_CONNECT_RESPONSE {
            return Err(Error::ParseError(format!(
                "Invalid TreeConnect response structure size: {}",
                structure_size
            )));
        }

        let share_type = ShareType::try_from(cursor.read_u8()?)?;
        let _reserved = cursor.read_u8()?;
        let share_flags = cursor.read_u32::<LittleEndian>()?;
        let capabilities = cursor.read_u32::<LittleEndian>()?;
        let maximal_access = cursor.read_u32::<LittleEndian>()?;

        Ok(Self {
            structure_size,
            share_type,
            share_flags,
            capabilities,
            maximal_access,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(16);
        buf.write_u16::<LittleEndian>(self.structure_size)?;
        buf.write_u8(self.share_type as u8)?;
        buf.write_u8(0)?;
        buf.write_u32::<LittleEndian>(self.share_flags)?;
        buf.write_u32::<LittleEndian>(self.capabilities)?;
        buf.write_u32::<LittleEndian>(self.maximal_access)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        16
    }
}

/// SMB2 TREE_DISCONNECT; request and response share the same layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Smb2TreeDisconnect {
    pub structure_size: u16,
}

impl Default for Smb2TreeDisconnect {
    fn default() -> Self {
        Self {
            structure_size: structure_size::TREE_DISCONNECT,
        }
    }
}

impl SmbMessage for Smb2TreeDisconnect {
    fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 4 {
            return Err(Error::ParseError("TreeDisconnect message too short".into()));
        }
        let structure_size = u16::from_le_bytes([buf[0], buf[1]]);
        if structure_size != structure_size::TREE_DISCONNECT {
            return Err(Error::ParseError(format!(
                "Invalid TreeDisconnect structure size: {}",
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
