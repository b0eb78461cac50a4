//! DCE/RPC over SMB named pipes
//!
//! Connection-oriented DCE/RPC (version 5.0) as carried over `\PIPE\srvsvc`:
//! PDU framing in [`packet`], NDR marshalling in [`ndr`] and the one SRVSVC
//! call this crate makes in [`srvsvc`].

pub mod ndr;
pub mod packet;
pub mod srvsvc;

use std::convert::TryFrom;
use uuid::Uuid;

/// DCE/RPC protocol version
pub const DCERPC_VERSION_MAJOR: u8 = 5;
pub const DCERPC_VERSION_MINOR: u8 = 0;

/// Fragment size offered in BIND
pub const DEFAULT_MAX_FRAG: u16 = 4280;

/// DCE/RPC packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Request = 0,
    Response = 2,
    Fault = 3,
    Bind = 11,
    BindAck = 12,
    BindNak = 13,
    AlterContext = 14,
    AlterContextResp = 15,
    Shutdown = 17,
}

impl TryFrom<u8> for PacketType {
    type Error = crate::error::Error;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketType::Request),
            2 => Ok(PacketType::Response),
            3 => Ok(PacketType::Fault),
            11 => Ok(PacketType::Bind),
            12 => Ok(PacketType::BindAck),
            13 => Ok(PacketType::BindNak),
            14 => Ok(PacketType::AlterContext),
            15 => Ok(PacketType::AlterContextResp),
            17 => Ok(PacketType::Shutdown),
            _ => Err(crate::error::Error::ParseError(format!(
                "Unknown packet type: {}",
                value
            ))),
        }
    }
}

/// DCE/RPC packet flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketFlags(pub u8);

impl PacketFlags {
    pub const FIRST_FRAG: u8 = 0x01;
    pub const LAST_FRAG: u8 = 0x02;
    pub const PENDING_CANCEL: u8 = 0x04;
    pub const CONC_MPX: u8 = 0x10;
    pub const DID_NOT_EXECUTE: u8 = 0x20;
    pub const OBJECT_UUID: u8 = 0x80;

    /// A PDU that is both first and last fragment
    pub fn single() -> Self {
        Self(Self::FIRST_FRAG | Self::LAST_FRAG)
    }

    pub fn with_flags(flags: u8) -> Self {
        Self(flags)
    }

    pub fn is_first_frag(&self) -> bool {
        self.0 & Self::FIRST_FRAG != 0
    }

    pub fn is_last_frag(&self) -> bool {
        self.0 & Self::LAST_FRAG != 0
    }
}

/// Interface or transfer syntax identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntaxId {
    pub uuid: Uuid,
    pub version_major: u16,
    pub version_minor: u16,
}

/// Well-known syntaxes
pub mod interfaces {
    use super::SyntaxId;
    use uuid::uuid;

    /// Server Service, used for share enumeration
    pub const SRVSVC: SyntaxId = SyntaxId {
        uuid: uuid!("4B324FC8-1670-01D3-1278-5A47BF6EE188"),
        version_major: 3,
        version_minor: 0,
    };

    /// NDR 2.0 transfer syntax
    pub const NDR: SyntaxId = SyntaxId {
        uuid: uuid!("8A885D04-1CEB-11C9-9FE8-08002B104860"),
        version_major: 2,
        version_minor: 0,
    };
}

/// Readable text for the fault and reject codes servers commonly return
pub fn describe_fault(status: u32) -> String {
    let name = match status {
        0x00000005 => "access denied",
        0x1c010002 => "operation number out of range",
        0x1c010003 => "unknown interface",
        0x1c01000b => "protocol error",
        0x1c00001c => "remote fault",
        0x1c000006 => "invalid bound",
        _ => return format!("status 0x{:08x}", status),
    };
    format!("{} (0x{:08x})", name, status)
}
