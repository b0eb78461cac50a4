//! SMB2 IOCTL request and response messages

use crate::error::{Error, Result};
use crate::protocol::messages::common::{FileId, SmbMessage};
use crate::protocol::smb2_constants::{structure_size, SMB2_HEADER_SIZE};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Write then read a named pipe in one round trip
pub const FSCTL_PIPE_TRANSCEIVE: u32 = 0x0011c017;

/// IOCTL flag: the control code is an FSCTL
pub const SMB2_0_IOCTL_IS_FSCTL: u32 = 0x00000001;

/// Largest fragment we ask the server to return in one IOCTL
pub const DEFAULT_MAX_OUTPUT_RESPONSE: u32 = 65536;

fn slice_at(data: &[u8], offset: u32, count: u32) -> Result<Vec<u8>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let start = (offset as usize)
        .checked_sub(SMB2_HEADER_SIZE)
        .ok_or_else(|| Error::ParseError(format!("IOCTL buffer offset {} inside header", offset)))?;
    let end = start + count as usize;
    if end > data.len() {
        return Err(Error::BufferTooSmall {
            need: end,
            have: data.len(),
        });
    }
    Ok(data[start..end].to_vec())
}

/// SMB2 IOCTL request structure
#[derive(Debug, Clone)]
pub struct Smb2IoctlRequest {
    pub structure_size: u16,
    pub ctl_code: u32,
    pub file_id: FileId,
    pub max_input_response: u32,
    pub max_output_response: u32,
    pub flags: u32,
    pub input_buffer: Vec<u8>,
}

impl Smb2IoctlRequest {
    /// FSCTL_PIPE_TRANSCEIVE carrying `input` on the pipe `file_id`
    pub fn pipe_transceive(file_id: FileId, input: Vec<u8>) -> Self {
        Self {
            ctl_code: FSCTL_PIPE_TRANSCEIVE,
            file_id,
            input_buffer: input,
            ..Self::default()
        }
    }
}

impl Default for Smb2IoctlRequest {
    fn default() -> Self {
        Self {
            structure_size: structure_size::IOCTL_REQUEST,
            ctl_code: 0,
            file_id: FileId::default(),
            max_input_response: 0,
            max_output_response: DEFAULT_MAX_OUTPUT_RESPONSE,
            flags: SMB2_0_IOCTL_IS_FSCTL,
            input_buffer: Vec::new(),
        }
    }
}

impl SmbMessage for Smb2IoctlRequest {
    fn size(&self) -> usize {
        56 + self.input_buffer.len()
    }

    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 56 {
            return Err(Error::ParseError("IOCTL request too short".into()));
        }

        let mut cursor = Cursor::new(data);

        let structure_size = cursor.read_u16::<LittleEndian>()?;
        if structure_size != structure_size::IOCTL_REQUEST {
            return Err(Error::ParseError(format!(
                "Invalid IOCTL request structure size: {}",
                structure_size
            )));
        }

        let _reserved = cursor.read_u16::<LittleEndian>()?;
        let ctl_code = cursor.read_u32::<LittleEndian>()?;
        let file_id = FileId::read_from(&mut cursor)?;
        let input_offset = cursor.read_u32::<LittleEndian>()?;
        let input_count = cursor.read_u32::<LittleEndian>()?;
        let max_input_response = cursor.read_u32::<LittleEndian>()?;
        let _output_offset = cursor.read_u32::<LittleEndian>()?;
        let _output_count = cursor.read_u32::<LittleEndian>()?;
        let max_output_response = cursor.read_u32::<LittleEndian>()?;
        let flags = cursor.read_u32::<LittleEndian>()?;

        let input_buffer = slice_at(data, input_offset, input_count)?;

        Ok(Self {
            structure_size,
            ctl_code,
            file_id,
            max_input_response,
            max_output_response,
            flags,
            input_buffer,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut result = Vec::with_capacity(self.size());

        result.write_u16::<LittleEndian>(self.structure_size)?;
        result.write_u16::<LittleEndian>(0)?;
        result.write_u32::<LittleEndian>(self.ctl_code)?;
        self.file_id.write_to(&mut result)?;

        let input_offset: u32 = if self.input_buffer.is_empty() {
            0
        } else {
            (SMB2_HEADER_SIZE + 56) as u32
        };

        result.write_u32::<LittleEndian>(input_offset)?;
        result.write_u32::<LittleEndian>(self.input_buffer.len() as u32)?;
        result.write_u32::<LittleEndian>(self.max_input_response)?;
        result.write_u32::<LittleEndian>(0)?;
        result.write_u32::<LittleEndian>(0)?;
        result.write_u32::<LittleEndian>(self.max_output_response)?;
        result.write_u32::<LittleEndian>(self.flags)?;
        result.write_u32::<LittleEndian>(0)?;
        result.extend_from_slice(&self.input_buffer);

        Ok(result)
    }
}

/// SMB2 IOCTL response structure
#[derive(Debug, Clone)]
pub struct Smb2IoctlResponse {
    pub structure_size: u16,
    pub ctl_code: u32,
    pub file_id: FileId,
    pub flags: u32,
    pub output_buffer: Vec<u8>,
}

impl Smb2IoctlResponse {
    pub fn new(ctl_code: u32, file_id: FileId, output: Vec<u8>) -> Self {
        Self {
            structure_size: structure_size::IOCTL_RESPONSE,
            ctl_code,
            file_id,
            flags: 0,
            output_buffer: output,
        }
    }
}

impl SmbMessage for Smb2IoctlResponse {
    fn size(&self) -> usize {
        48 + self.output_buffer.len()
    }

    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 48 {
            return Err(Error::ParseError("IOCTL response too short".into()));
        }

        let mut cursor = Cursor::new(data);

        let structure_size = cursor.read_u16::<LittleEndian>()?;
        if structure_size != structure_size::IOCTL_RESPONSE {
            return Err(Error::ParseError(format!(
                "Invalid IOCTL response structure size: {}",
                structure_size
            )));
        }

        let _reserved = cursor.read_u16::<LittleEndian>()?;
        let ctl_code = cursor.read_u32::<LittleEndian>()?;
        let file_id = FileId::read_from(&mut cursor)?;
        let _input_offset = cursor.read_u32::<LittleEndian>()?;
        let _input_count = cursor.read_u32::<LittleEndian>()?;
        let output_offset = cursor.read_u32::<LittleEndian>()?;
        let output_count = cursor.read_u32::<LittleEndian>()?;
        let flags = cursor.read_u32::<LittleEndian>()?;

        let output_buffer = slice_at(data, output_offset, output_count)?;

        Ok(Self {
            structure_size,
            ctl_code,
            file_id,
            flags,
            output_buffer,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut result = Vec::with_capacity(self.size());

        result.write_u16::<LittleEndian>(self.structure_size)?;
        result.write_u16::<LittleEndian>(0)?;
        result.write_u32::<LittleEndian>(self.ctl_code)?;
        self.file_id.write_to(&mut result)?;

        let buffer_offset = (SMB2_HEADER_SIZE + 48) as u32;
        let output_offset = if self.output_buffer.is_empty() {
            0
        } else {
            buffer_offset
        };

        result.write_u32::<LittleEndian>(buffer_offset)?;
        result.write_u32::<LittleEndian>(0)?;
        result.write_u32::<LittleEndian>(output_offset)?;
        result.write_u32::<LittleEndian>(self.output_buffer.len() as u32)?;
        result.write_u32::<LittleEndian>(self.flags)?;
        result.write_u32::<LittleEndian>(0)?;
        result.extend_from_slice(&self.output_buffer);

        Ok(result)
    }
}
