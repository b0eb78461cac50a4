//! Session message framing for SMB over TCP
//!
//! SMB2 on port 445 ("direct hosting") reuses the NetBIOS session service
//! header from RFC 1002: one type byte followed by a big-endian length.
//! Direct hosting widens the length to the full 24 bits.

use crate::error::{Error, Result};
use bytes::BufMut;
use std::convert::TryFrom;

/// NetBIOS message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NetBiosMessageType {
    SessionMessage = 0x00,
    SessionRequest = 0x81,
    PositiveResponse = 0x82,
    NegativeResponse = 0x83,
    RetargetResponse = 0x84,
    Keepalive = 0x85,
}

impl TryFrom<u8> for NetBiosMessageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(NetBiosMessageType::SessionMessage),
            0x81 => Ok(NetBiosMessageType::SessionRequest),
            0x82 => Ok(NetBiosMessageType::PositiveResponse),
            0x83 => Ok(NetBiosMessageType::NegativeResponse),
            0x84 => Ok(NetBiosMessageType::RetargetResponse),
            0x85 => Ok(NetBiosMessageType::Keepalive),
            _ => Err(Error::Protocol(format!(
                "Invalid NetBIOS message type: 0x{:02x}",
                value
            ))),
        }
    }
}

/// Session service header (4 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetBiosHeader {
    pub message_type: NetBiosMessageType,
    pub length: u32,
}

impl NetBiosHeader {
    /// Maximum payload length on a direct-hosted connection (24 bits)
    pub const MAX_LENGTH: u32 = 0x00FF_FFFF;

    /// Header size in bytes
    pub const SIZE: usize = 4;

    pub fn new(message_type: NetBiosMessageType, length: u32) -> Result<Self> {
        if length > Self::MAX_LENGTH {
            return Err(Error::InvalidParameter(format!(
                "NetBIOS length {} exceeds maximum {}",
                length,
                Self::MAX_LENGTH
            )));
        }
        Ok(Self {
            message_type,
            length,
        })
    }

    pub fn session_message(length: u32) -> Result<Self> {
        Self::new(NetBiosMessageType::SessionMessage, length)
    }

    /// Parse a header from the start of `buf`
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(Error::BufferTooSmall {
                need: Self::SIZE,
                have: buf.len(),
            });
        }

        let message_type = NetBiosMessageType::try_from(buf[0])?;
        let length = u32::from_be_bytes([0, buf[1], buf[2], buf[3]]);

        Ok(Self {
            message_type,
            length,
        })
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        let len = self.length.to_be_bytes();
        [self.message_type as u8, len[1], len[2], len[3]]
    }

    pub fn write_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(&self.to_bytes());
    }
}

/// A framed session message
#[derive(Debug, Clone)]
pub struct NetBiosMessage {
    pub header: NetBiosHeader,
    pub payload: Vec<u8>,
}

impl NetBiosMessage {
    pub fn session_message(payload: Vec<u8>) -> Result<Self> {
        let length = u32::try_from(payload.len())
            .map_err(|_| Error::InvalidParameter("payload too large for framing".to_string()))?;
        let header = NetBiosHeader::session_message(length)?;
        Ok(Self { header, payload })
    }

    pub fn keepalive() -> Self {
        Self {
            header: NetBiosHeader {
                message_type: NetBiosMessageType::Keepalive,
                length: 0,
            },
            payload: Vec::new(),
        }
    }

    pub fn is_keepalive(&self) -> bool {
        self.header.message_type == NetBiosMessageType::Keepalive
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(NetBiosHeader::SIZE + self.payload.len());
        self.header.write_to(&mut bytes);
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Parse a complete message; `buf` may hold trailing bytes
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let header = NetBiosHeader::parse(buf)?;

        let total_len = NetBiosHeader::SIZE + header.length as usize;
        if buf.len() < total_len {
            return Err(Error::BufferTooSmall {
                need: total_len,
                have: buf.len(),
            });
        }

        let payload = buf[NetBiosHeader::SIZE..total_len].to_vec();
        Ok(Self { header, payload })
    }

    /// Total size on the wire
    pub fn size(&self) -> usize {
        NetBiosHeader::SIZE + self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_netbios_header_parse() {
        let bytes = [0x00, 0x00, 0x12, 0x34];
        let header = NetBiosHeader::parse(&bytes).unwrap();
        assert_eq!(header.message_type, NetBiosMessageType::SessionMessage);
        assert_eq!(header.length, 0x1234);
    }

    #[test]
    fn test_netbios_header_uses_24_bit_length() {
        let bytes = [0x00, 0x02, 0x00, 0x01];
        let header = NetBiosHeader::parse(&bytes).unwrap();
        assert_eq!(header.length, 0x020001);

        let header = NetBiosHeader::session_message(0x0ABCDE).unwrap();
        assert_eq!(header.to_bytes(), [0x00, 0x0A, 0xBC, 0xDE]);
    }

    #[test]
    fn test_netbios_header_max_length() {
        assert!(NetBiosHeader::session_message(NetBiosHeader::MAX_LENGTH).is_ok());
        assert!(NetBiosHeader::session_message(0x0100_0000).is_err());
    }

    #[test]
    fn test_netbios_header_rejects_unknown_type() {
        assert!(NetBiosHeader::parse(&[0x42, 0, 0, 0]).is_err());
        assert!(NetBiosHeader::parse(&[0x00, 0]).is_err());
    }

    #[test]
    fn test_netbios_message_parse_with_trailing_bytes() {
        let msg = NetBiosMessage::session_message(vec![1, 2, 3, 4, 5]).unwrap();
        let mut bytes = msg.to_bytes();
        assert_eq!(bytes.len(), msg.size());
        bytes.extend_from_slice(&[9, 9]);

        let parsed = NetBiosMessage::parse(&bytes).unwrap();
        assert_eq!(parsed.payload, vec![1, 2, 3, 4, 5]);
        assert!(!parsed.is_keepalive());
    }

    #[test]
    fn test_keepalive_message() {
        let msg = NetBiosMessage::keepalive();
        assert!(msg.is_keepalive());
        assert_eq!(msg.to_bytes(), [0x85, 0x00, 0x00, 0x00]);
    }
}
