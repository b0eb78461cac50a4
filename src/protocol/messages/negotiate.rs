//! SMB2 Negotiate messages

use super::common::{body_slice, SmbMessage};
use crate::error::{Error, Result};
use crate::protocol::smb2_constants::{
    structure_size, SecurityMode, Smb2Capabilities, Smb2Dialect, SMB2_HEADER_SIZE,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};
use std::convert::TryFrom;
use std::io::{self, Read, Write};
use uuid::Uuid;

/// 100ns intervals between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_EPOCH: u64 = 116_444_736_000_000_000;

/// Convert a Windows FILETIME to UTC, `None` for zero or out of range values
pub fn filetime_to_utc(filetime: u64) -> Option<DateTime<Utc>> {
    let since_unix = filetime.checked_sub(FILETIME_UNIX_EPOCH)?;
    if filetime == 0 {
        return None;
    }
    let secs = i64::try_from(since_unix / 10_000_000).ok()?;
    let nanos = ((since_unix % 10_000_000) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
}

/// Convert UTC to a Windows FILETIME
pub fn utc_to_filetime(time: DateTime<Utc>) -> u64 {
    let secs = time.timestamp().max(0) as u64;
    secs * 10_000_000 + u64::from(time.timestamp_subsec_nanos()) / 100 + FILETIME_UNIX_EPOCH
}

/// SMB2 Negotiate Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2NegotiateRequest {
    pub structure_size: u16,
    pub security_mode: SecurityMode,
    pub capabilities: Smb2Capabilities,
    pub client_guid: Uuid,
    pub dialects: Vec<Smb2Dialect>,
}

impl Smb2NegotiateRequest {
    pub fn new(dialects: Vec<Smb2Dialect>) -> Self {
        Self {
            structure_size: structure_size::NEGOTIATE_REQUEST,
            security_mode: SecurityMode::SIGNING_ENABLED,
            capabilities: Smb2Capabilities::DFS,
            client_guid: Uuid::new_v4(),
            dialects,
        }
    }
}

impl SmbMessage for Smb2NegotiateRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 36 {
            return Err(Error::ParseError("Negotiate request too short".into()));
        }

        let mut cursor = io::Cursor::new(buf);
        let structure_size = cursor.read_u16::<LittleEndian>()?;

        if structure_size != structure_size::NEGOTIATE_REQUEST {
            return Err(Error::ParseError(format!(
                "Invalid negotiate request structure size: {}",
                structure_size
            )));
        }

        let dialect_count = cursor.read_u16::<LittleEndian>()?;
        let security_mode = SecurityMode::from_bits_truncate(cursor.read_u16::<LittleEndian>()?);
        let _reserved = cursor.read_u16::<LittleEndian>()?;
        let capabilities = Smb2Capabilities::from_bits_truncate(cursor.read_u32::<LittleEndian>()?);

        let mut guid_bytes = [0u8; 16];
        cursor.read_exact(&mut guid_bytes)?;
        let client_guid = Uuid::from_bytes_le(guid_bytes);

        let _client_start_time = cursor.read_u64::<LittleEndian>()?;

        // Dialects we don't know are skipped rather than rejected
        let mut dialects = Vec::with_capacity(dialect_count as usize);
        for _ in 0..dialect_count {
            if let Ok(dialect) = Smb2Dialect::try_from(cursor.read_u16::<LittleEndian>()?) {
                dialects.push(dialect);
            }
        }

        Ok(Self {
            structure_size,
            security_mode,
            capabilities,
            client_guid,
            dialects,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(self.structure_size)?;
        buf.write_u16::<LittleEndian>(self.dialects.len() as u16)?;
        buf.write_u16::<LittleEndian>(self.security_mode.bits())?;
        buf.write_u16::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(self.capabilities.bits())?;
        buf.write_all(&self.client_guid.to_bytes_le())?;
        buf.write_u64::<LittleEndian>(0)?;

        for dialect in &self.dialects {
            buf.write_u16::<LittleEndian>(dialect.to_u16())?;
        }

        Ok(buf)
    }

    fn size(&self) -> usize {
        36 + self.dialects.len() * 2
    }
}

/// SMB2 Negotiate Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2NegotiateResponse {
    pub structure_size: u16,
    pub security_mode: SecurityMode,
    pub dialect_revision: Smb2Dialect,
    pub server_guid: Uuid,
    pub capabilities: Smb2Capabilities,
    pub max_transact_size: u32,
    pub max_read_size: u32,
    pub max_write_size: u32,
    pub system_time: u64,
    pub server_start_time: u64,
    pub security_blob: Vec<u8>,
}

impl Smb2NegotiateResponse {
    pub fn new(dialect: Smb2Dialect) -> Self {
        Self {
            structure_size: structure_size::NEGOTIATE_RESPONSE,
            security_mode: SecurityMode::SIGNING_ENABLED,
            dialect_revision: dialect,
            server_guid: Uuid::new_v4(),
            capabilities: Smb2Capabilities::DFS,
            max_transact_size: 1048576,
            max_read_size: 1048576,
            max_write_size: 1048576,
            system_time: utc_to_filetime(Utc::now()),
            server_start_time: 0,
            security_blob: Vec::new(),
        }
    }

    pub fn signing_required(&self) -> bool {
        self.security_mode.contains(SecurityMode::SIGNING_REQUIRED)
    }

    pub fn system_time_utc(&self) -> Option<DateTime<Utc>> {
        filetime_to_utc(self.system_time)
    }
}

impl SmbMessage for Smb2NegotiateResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 64 {
            return Err(Error::ParseError("Negotiate response too short".into()));
        }

        let mut cursor = io::Cursor::new(buf);
        let structure_size = cursor.read_u16::<LittleEndian>()?;

        if structure_size != structure_size::NEGOTIATE_RESPONSE {
            return Err(Error::ParseError(format!(
                "Invalid negotiate response structure size: {}",
                structure_size
            )));
        }

        let security_mode = SecurityMode::from_bits_truncate(cursor.read_u16::<LittleEndian>()?);
        let dialect_revision = Smb2Dialect::try_from(cursor.read_u16::<LittleEndian>()?)?;
        let _negotiate_context_count = cursor.read_u16::<LittleEndian>()?;

        let mut guid_bytes = [0u8; 16];
        cursor.read_exact(&mut guid_bytes)?;
        let server_guid = Uuid::from_bytes_le(guid_bytes);

        let capabilities = Smb2Capabilities::from_bits_truncate(cursor.read_u32::<LittleEndian>()?);
        let max_transact_size = cursor.read_u32::<LittleEndian>()?;
        let max_read_size = cursor.read_u32::<LittleEndian>()?;
        let max_write_size = cursor.read_u32::<LittleEndian>()?;
        let system_time = cursor.read_u64::<LittleEndian>()?;
        let server_start_time = cursor.read_u64::<LittleEndian>()?;
        let security_buffer_offset = cursor.read_u16::<LittleEndian>()?;
        let security_buffer_length = cursor.read_u16::<LittleEndian>()?;

        let security_blob =
            body_slice(buf, security_buffer_offset, security_buffer_length as usize)?.to_vec();

        Ok(Self {
            structure_size,
            security_mode,
            dialect_revision,
            server_guid,
            capabilities,
            max_transact_size,
            max_read_size,
            max_write_size,
            system_time,
            server_start_time,
            security_blob,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(self.structure_size)?;
        buf.write_u16::<LittleEndian>(self.security_mode.bits())?;
        buf.write_u16::<LittleEndian>(self.dialect_revision.to_u16())?;
        buf.write_u16::<LittleEndian>(0)?;
        buf.write_all(&self.server_guid.to_bytes_le())?;
        buf.write_u32::<LittleEndian>(self.capabilities.bits())?;
        buf.write_u32::<LittleEndian>(self.max_transact_size)?;
        buf.write_u32::<LittleEndian>(self.max_read_size)?;
        buf.write_u32::<LittleEndian>(self.max_write_size)?;
        buf.write_u64::<LittleEndian>(self.system_time)?;
        buf.write_u64::<LittleEndian>(self.server_start_time)?;

        let security_buffer_offset = if self.security_blob.is_empty() {
            0
        } else {
            (SMB2_HEADER_SIZE + 64) as u16
        };

        buf.write_u16::<LittleEndian>(security_buffer_offset)?;
        buf.write_u16::<LittleEndian>(self.security_blob.len() as u16)?;
        buf.write_u32::<LittleEndian>(0)?;
        buf.write_all(&self.security_blob)?;

        Ok(buf)
    }

    fn size(&self) -> usize {
        64 + self.security_blob.len()
    }
}
