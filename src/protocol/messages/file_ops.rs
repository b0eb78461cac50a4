//! SMB2 Create, Close and Read messages used to drive named pipes

use super::common::{body_slice, string_to_utf16le, utf16le_to_string, FileId, SmbMessage};
use crate::error::{Error, Result};
use crate::protocol::smb2_constants::{
    impersonation_level, oplock_level, structure_size, CreateDisposition, CreateOptions,
    DesiredAccess, FileAttributes, ShareAccess, SMB2_HEADER_SIZE,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::convert::TryFrom;
use std::io::{self, Write};

/// SMB2 Create (Open) Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2CreateRequest {
    pub structure_size: u16,
    pub requested_oplock_level: u8,
    pub impersonation_level: u32,
    pub desired_access: DesiredAccess,
    pub file_attributes: FileAttributes,
    pub share_access: ShareAccess,
    pub create_disposition: CreateDisposition,
    pub create_options: CreateOptions,
    pub file_name: String,
}

impl Smb2CreateRequest {
    /// Open an existing named pipe on an IPC$ tree for read/write
    pub fn open_pipe(pipe_name: impl Into<String>) -> Self {
        Self {
            structure_size: structure_size::CREATE_REQUEST,
            requested_oplock_level: oplock_level::NONE,
            impersonation_level: impersonation_level::IMPERSONATION,
            desired_access: DesiredAccess::PIPE_READ_WRITE,
            file_attributes: FileAttributes::empty(),
            share_access: ShareAccess::FILE_SHARE_READ | ShareAccess::FILE_SHARE_WRITE,
            create_disposition: CreateDisposition::Open,
            create_options: CreateOptions::FILE_NON_DIRECTORY_FILE,
            file_name: pipe_name.into(),
        }
    }
}

impl SmbMessage for Smb2CreateRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 56 {
            return Err(Error::ParseError("Create request too short".into()));
        }

        let mut cursor = io::Cursor::new(buf);
        let structure_size = cursor.read_u16::<LittleEndian>()?;

        if structure_size != structure_size::CREATE_REQUEST {
            return Err(Error::ParseError(format!(
                "Invalid Create request structure size: {}",
                structure_size
            )));
        }

        let _security_flags = cursor.read_u8()?;
        let requested_oplock_level = cursor.read_u8()?;
        let impersonation_level = cursor.read_u32::<LittleEndian>()?;
        let _smb_create_flags = cursor.read_u64::<LittleEndian>()?;
        let _reserved = cursor.read_u64::<LittleEndian>()?;
        let desired_access = DesiredAccess::from_bits_truncate(cursor.read_u32::<LittleEndian>()?);
        let file_attributes = FileAttributes::from_bits_truncate(cursor.read_u32::<LittleEndian>()?);
        let share_access = ShareAccess::from_bits_truncate(cursor.read_u32::<LittleEndian>()?);
        let create_disposition = CreateDisposition::try_from(cursor.read_u32::<LittleEndian>()?)?;
        let create_options = CreateOptions::from_bits_truncate(cursor.read_u32::<LittleEndian>()?);
        let name_offset = cursor.read_u16::<LittleEndian>()?;
        let name_length = cursor.read_u16::<LittleEndian>()?;

        let file_name = utf16le_to_string(body_slice(buf, name_offset, name_length as usize)?)?;

        Ok(Self {
            structure_size,
            requested_oplock_level,
            impersonation_level,
            desired_access,
            file_attributes,
            share_access,
            create_disposition,
            create_options,
            file_name,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let name_bytes = string_to_utf16le(&self.file_name);

        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(self.structure_size)?;
        buf.write_u8(0)?;
        buf.write_u8(self.requested_oplock_level)?;
        buf.write_u32::<LittleEndian>(self.impersonation_level)?;
        buf.write_u64::<LittleEndian>(0)?;
        buf.write_u64::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(self.desired_access.bits())?;
        buf.write_u32::<LittleEndian>(self.file_attributes.bits())?;
        buf.write_u32::<LittleEndian>(self.share_access.bits())?;
        buf.write_u32::<LittleEndian>(self.create_disposition as u32)?;
        buf.write_u32::<LittleEndian>(self.create_options.bits())?;
        buf.write_u16::<LittleEndian>((SMB2_HEADER_SIZE + 56) as u16)?;
        buf.write_u16::<LittleEndian>(name_bytes.len() as u16)?;
        buf.write_u32::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(0)?;

        if name_bytes.is_empty() {
            // the variable part must hold at least one byte
            buf.write_u8(0)?;
        } else {
            buf.write_all(&name_bytes)?;
        }

        Ok(buf)
    }

    fn size(&self) -> usize {
        56 + (self.file_name.encode_utf16().count() * 2).max(1)
    }
}

/// SMB2 Create (Open) Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2CreateResponse {
    pub structure_size: u16,
    pub oplock_level: u8,
    pub create_action: u32,
    pub end_of_file: u64,
    pub file_attributes: FileAttributes,
    pub file_id: FileId,
}

impl Smb2CreateResponse {
    pub fn new(file_id: FileId) -> Self {
        Self {
            structure_size: structure_size::CREATE_RESPONSE,
            oplock_level: oplock_level::NONE,
            create_action: 1,
            end_of_file: 0,
            file_attributes: FileAttributes::NORMAL,
            file_id,
        }
    }
}

impl SmbMessage for Smb2CreateResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 88 {
            return Err(Error::ParseError("Create response too short".into()));
        }

        let mut cursor = io::Cursor::new(buf);
        let structure_size = cursor.read_u16::<LittleEndian>()?;

        if structure_size != structure_size::CREATE_RESPONSE {
            return Err(Error::ParseError(format!(
                "Invalid Create response structure size: {}",
                structure_size
            )));
        }

        let oplock_level = cursor.read_u8()?;
        let _flags = cursor.read_u8()?;
        let create_action = cursor.read_u32::<LittleEndian>()?;
        // creation, last access, last write and change times
        for _ in 0..4 {
            cursor.read_u64::<LittleEndian>()?;
        }
        let _allocation_size = cursor.read_u64::<LittleEndian>()?;
        let end_of_file = cursor.read_u64::<LittleEndian>()?;
        let file_attributes = FileAttributes::from_bits_truncate(cursor.read_u32::<LittleEndian>()?);
        let _reserved2 = cursor.read_u32::<LittleEndian>()?;
        let file_id = FileId::read_from(&mut cursor)?;

        Ok(Self {
            structure_size,
            oplock_level,
            create_action,
            end_of_file,
            file_attributes,
            file_id,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(88);
        buf.write_u16::<LittleEndian>(self.structure_size)?;
        buf.write_u8(self.oplock_level)?;
        buf.write_u8(0)?;
        buf.write_u32::<LittleEndian>(self.create_action)?;
        for _ in 0..4 {
            buf.write_u64::<LittleEndian>(0)?;
        }
        buf.write_u64::<LittleEndian>(0)?;
        buf.write_u64::<LittleEndian>(self.end_of_file)?;
        buf.write_u32::<LittleEndian>(self.file_attributes.bits())?;
        buf.write_u32::<LittleEndian>(0)?;
        self.file_id.write_to(&mut buf)?;
        buf.write_u32::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(0)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        88
    }
}

/// SMB2 Close Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2CloseRequest {
    pub structure_size: u16,
    pub flags: u16,
    pub file_id: FileId,
}

impl Smb2CloseRequest {
    pub fn new(file_id: FileId) -> Self {
        Self {
            structure_size: structure_size::CLOSE_REQUEST,
            flags: 0,
            file_id,
        }
    }
}

impl SmbMessage for Smb2CloseRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 24 {
            return Err(Error::ParseError("Close request too short".into()));
        }

        let mut cursor = io::Cursor::new(buf);
        let structure_size = cursor.read_u16::<LittleEndian>()?;

        if structure_size != structure_size::CLOSE_REQUEST {
            return Err(Error::ParseError(format!(
                "Invalid Close request structure size: {}",
                structure_size
            )));
        }

        let flags = cursor.read_u16::<LittleEndian>()?;
        let _reserved = cursor.read_u32::<LittleEndian>()?;
        let file_id = FileId::read_from(&mut cursor)?;

        Ok(Self {
            structure_size,
            flags,
            file_id,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(24);
        buf.write_u16::<LittleEndian>(self.structure_size)?;
        buf.write_u16::<LittleEndian>(self.flags)?;
        buf.write_u32::<LittleEndian>(0)?;
        self.file_id.write_to(&mut buf)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        24
    }
}

/// SMB2 Close Response; only the fixed prefix is interpreted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2CloseResponse {
    pub structure_size: u16,
    pub flags: u16,
}

impl Default for Smb2CloseResponse {
    fn default() -> Self {
        Self {
            structure_size: structure_size::CLOSE_RESPONSE,
            flags: 0,
        }
    }
}

impl SmbMessage for Smb2CloseResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 60 {
            return Err(Error::ParseError("Close response too short".into()));
        }

        let mut cursor = io::Cursor::new(buf);
        let structure_size = cursor.read_u16::<LittleEndian>()?;

        if structure_size != structure_size::CLOSE_RESPONSE {
            return Err(Error::ParseError(format!(
                "Invalid Close response structure size: {}",
                structure_size
            )));
        }

        let flags = cursor.read_u16::<LittleEndian>()?;
        Ok(Self {
            structure_size,
            flags,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(60);
        buf.write_u16::<LittleEndian>(self.structure_size)?;
        buf.write_u16::<LittleEndian>(self.flags)?;
        buf.resize(60, 0);
        Ok(buf)
    }

    fn size(&self) -> usize {
        60
    }
}

/// SMB2 Read Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2ReadRequest {
    pub structure_size: u16,
    pub length: u32,
    pub offset: u64,
    pub file_id: FileId,
    pub minimum_count: u32,
}

impl Smb2ReadRequest {
    pub fn new(file_id: FileId, offset: u64, length: u32) -> Self {
        Self {
            structure_size: structure_size::READ_REQUEST,
            length,
            offset,
            file_id,
            minimum_count: 0,
        }
    }
}

impl SmbMessage for Smb2ReadRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 48 {
            return Err(Error::ParseError("Read request too short".into()));
        }

        let mut cursor = io::Cursor::new(buf);
        let structure_size = cursor.read_u16::<LittleEndian>()?;

        if structure_size != structure_size::READ_REQUEST {
            return Err(Error::ParseError(format!(
                "Invalid Read request structure size: {}",
                structure_size
            )));
        }

        let _padding = cursor.read_u8()?;
        let _flags = cursor.read_u8()?;
        let length = cursor.read_u32::<LittleEndian>()?;
        let offset = cursor.read_u64::<LittleEndian>()?;
        let file_id = FileId::read_from(&mut cursor)?;
        let minimum_count = cursor.read_u32::<LittleEndian>()?;

        Ok(Self {
            structure_size,
            length,
            offset,
            file_id,
            minimum_count,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(49);
        buf.write_u16::<LittleEndian>(self.structure_size)?;
        buf.write_u8(0)?;
        buf.write_u8(0)?;
        buf.write_u32::<LittleEndian>(self.length)?;
        buf.write_u64::<LittleEndian>(self.offset)?;
        self.file_id.write_to(&mut buf)?;
        buf.write_u32::<LittleEndian>(self.minimum_count)?;
        // channel, remaining bytes, channel info offset/length
        buf.write_u32::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(0)?;
        buf.write_u16::<LittleEndian>(0)?;
        buf.write_u16::<LittleEndian>(0)?;
        // one byte of buffer is required even when empty
        buf.write_u8(0)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        49
    }
}

/// SMB2 Read Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2ReadResponse {
    pub structure_size: u16,
    pub data_remaining: u32,
    pub data: Vec<u8>,
}

impl Smb2ReadResponse {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            structure_size: structure_size::READ_RESPONSE,
            data_remaining: 0,
            data,
        }
    }
}

impl SmbMessage for Smb2ReadResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 16 {
            return Err(Error::ParseError("Read response too short".into()));
        }

        let mut cursor = io::Cursor::new(buf);
        let structure_size = cursor.read_u16::<LittleEndian>()?;

        if structure_size != structure_size::READ_RESPONSE {
            return Err(Error::ParseError(format!(
                "Invalid Read response structure size: {}",
                structure_size
            )));
        }

        let data_offset = cursor.read_u8()?;
        let _reserved = cursor.read_u8()?;
        let data_length = cursor.read_u32::<LittleEndian>()?;
        let data_remaining = cursor.read_u32::<LittleEndian>()?;

        let data = body_slice(buf, data_offset as u16, data_length as usize)?.to_vec();

        Ok(Self {
            structure_size,
            data_remaining,
            data,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(self.structure_size)?;
        buf.write_u8((SMB2_HEADER_SIZE + 16) as u8)?;
        buf.write_u8(0)?;
        buf.write_u32::<LittleEndian>(self.data.len() as u32)?;
        buf.write_u32::<LittleEndian>(self.data_remaining)?;
        buf.write_u32::<LittleEndian>(0)?;
        buf.write_all(&self.data)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        16 + self.data.len()
    }
}
