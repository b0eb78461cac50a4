//! SMB2/3 constants used by the share-enumeration client

use bitflags::bitflags;
use std::fmt;

/// SMB2 magic as bytes
pub const SMB2_MAGIC: [u8; 4] = [0xFE, b'S', b'M', b'B'];

/// SMB2 header size
pub const SMB2_HEADER_SIZE: usize = 64;

/// Message id used by servers for unsolicited notifications (oplock breaks)
pub const UNSOLICITED_MESSAGE_ID: u64 = u64::MAX;

pub mod structure_size {
    pub const NEGOTIATE_REQUEST: u16 = 36;
    pub const NEGOTIATE_RESPONSE: u16 = 65;
    pub const SESSION_SETUP_REQUEST: u16 = 25;
    pub const SESSION_SETUP_RESPONSE: u16 = 9;
    pub const LOGOFF: u16 = 4;
    pub const TREE_CONNECT_REQUEST: u16 = 9;
    pub const TREE_CONNECT_RESPONSE: u16 = 16;
    pub const TREE_DISCONNECT: u16 = 4;
    pub const CREATE_REQUEST: u16 = 57;
    pub const CREATE_RESPONSE: u16 = 89;
    pub const CLOSE_REQUEST: u16 = 24;
    pub const CLOSE_RESPONSE: u16 = 60;
    pub const READ_REQUEST: u16 = 49;
    pub const READ_RESPONSE: u16 = 17;
    pub const IOCTL_REQUEST: u16 = 57;
    pub const IOCTL_RESPONSE: u16 = 49;
}

/// SMB2 header flags
pub mod header_flags {
    pub const RESPONSE: u32 = 0x00000001;
    pub const ASYNC_COMMAND: u32 = 0x00000002;
    pub const SIGNED: u32 = 0x00000008;
}

bitflags! {
    /// File attributes as defined in MS-FSCC
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileAttributes: u32 {
        const READONLY            = 0x00000001;
        const HIDDEN              = 0x00000002;
        const SYSTEM              = 0x00000004;
        const DIRECTORY           = 0x00000010;
        const ARCHIVE             = 0x00000020;
        const NORMAL              = 0x00000080;
    }
}

bitflags! {
    /// Access rights requested on CREATE
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DesiredAccess: u32 {
        const READ_CONTROL             = 0x00020000;
        const SYNCHRONIZE              = 0x00100000;

        const FILE_READ_DATA           = 0x00000001;
        const FILE_WRITE_DATA          = 0x00000002;
        const FILE_APPEND_DATA         = 0x00000004;
        const FILE_READ_EA             = 0x00000008;
        const FILE_WRITE_EA            = 0x00000010;
        const FILE_READ_ATTRIBUTES     = 0x00000080;
        const FILE_WRITE_ATTRIBUTES    = 0x00000100;

        /// Read/write access used to open a named pipe for RPC
        const PIPE_READ_WRITE          = Self::FILE_READ_DATA.bits() |
                                         Self::FILE_WRITE_DATA.bits() |
                                         Self::FILE_APPEND_DATA.bits() |
                                         Self::FILE_READ_EA.bits() |
                                         Self::FILE_WRITE_EA.bits() |
                                         Self::FILE_READ_ATTRIBUTES.bits() |
                                         Self::FILE_WRITE_ATTRIBUTES.bits() |
                                         Self::READ_CONTROL.bits() |
                                         Self::SYNCHRONIZE.bits();
    }
}

bitflags! {
    /// File share access rights
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShareAccess: u32 {
        const FILE_SHARE_READ   = 0x00000001;
        const FILE_SHARE_WRITE  = 0x00000002;
        const FILE_SHARE_DELETE = 0x00000004;
    }
}

/// Create disposition values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CreateDisposition {
    Supersede = 0x00000000,
    Open = 0x00000001,
    Create = 0x00000002,
    OpenIf = 0x00000003,
    Overwrite = 0x00000004,
    OverwriteIf = 0x00000005,
}

impl TryFrom<u32> for CreateDisposition {
    type Error = crate::Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x00000000 => Ok(CreateDisposition::Supersede),
            0x00000001 => Ok(CreateDisposition::Open),
            0x00000002 => Ok(CreateDisposition::Create),
            0x00000003 => Ok(CreateDisposition::OpenIf),
            0x00000004 => Ok(CreateDisposition::Overwrite),
            0x00000005 => Ok(CreateDisposition::OverwriteIf),
            _ => Err(crate::Error::ParseError(format!(
                "Invalid create disposition: {}",
                value
            ))),
        }
    }
}

bitflags! {
    /// File create options
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CreateOptions: u32 {
        const FILE_DIRECTORY_FILE            = 0x00000001;
        const FILE_WRITE_THROUGH             = 0x00000002;
        const FILE_SEQUENTIAL_ONLY           = 0x00000004;
        const FILE_SYNCHRONOUS_IO_NONALERT   = 0x00000020;
        const FILE_NON_DIRECTORY_FILE        = 0x00000040;
    }
}

/// Impersonation levels
pub mod impersonation_level {
    pub const ANONYMOUS: u32 = 0x00000000;
    pub const IDENTIFICATION: u32 = 0x00000001;
    pub const IMPERSONATION: u32 = 0x00000002;
}

/// Oplock levels
pub mod oplock_level {
    pub const NONE: u8 = 0x00;
}

/// SMB2 Commands (opcodes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Smb2Command {
    Negotiate = 0x00,
    SessionSetup = 0x01,
    Logoff = 0x02,
    TreeConnect = 0x03,
    TreeDisconnect = 0x04,
    Create = 0x05,
    Close = 0x06,
    Flush = 0x07,
    Read = 0x08,
    Write = 0x09,
    Lock = 0x0A,
    Ioctl = 0x0B,
    Cancel = 0x0C,
    KeepAlive = 0x0D,
    QueryDirectory = 0x0E,
    Notify = 0x0F,
    GetInfo = 0x10,
    SetInfo = 0x11,
    Break = 0x12,
}

impl TryFrom<u16> for Smb2Command {
    type Error = crate::Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Negotiate),
            0x01 => Ok(Self::SessionSetup),
            0x02 => Ok(Self::Logoff),
            0x03 => Ok(Self::TreeConnect),
            0x04 => Ok(Self::TreeDisconnect),
            0x05 => Ok(Self::Create),
            0x06 => Ok(Self::Close),
            0x07 => Ok(Self::Flush),
            0x08 => Ok(Self::Read),
            0x09 => Ok(Self::Write),
            0x0A => Ok(Self::Lock),
            0x0B => Ok(Self::Ioctl),
            0x0C => Ok(Self::Cancel),
            0x0D => Ok(Self::KeepAlive),
            0x0E => Ok(Self::QueryDirectory),
            0x0F => Ok(Self::Notify),
            0x10 => Ok(Self::GetInfo),
            0x11 => Ok(Self::SetInfo),
            0x12 => Ok(Self::Break),
            _ => Err(crate::Error::ParseError(format!(
                "Invalid SMB2 command: 0x{:04x}",
                value
            ))),
        }
    }
}

impl Smb2Command {
    pub fn from_u16(value: u16) -> crate::Result<Self> {
        value.try_into()
    }

    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

bitflags! {
    /// SMB2 negotiate security mode
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SecurityMode: u16 {
        const SIGNING_ENABLED = 0x0001;
        const SIGNING_REQUIRED = 0x0002;
    }
}

bitflags! {
    /// SMB2 capabilities
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Smb2Capabilities: u32 {
        const DFS = 0x00000001;
        const LEASING = 0x00000002;
        const LARGE_MTU = 0x00000004;
        const MULTI_CHANNEL = 0x00000008;
        const PERSISTENT_HANDLES = 0x00000010;
        const DIRECTORY_LEASING = 0x00000020;
        const ENCRYPTION = 0x00000040;
    }
}

/// SMB2 dialect versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum Smb2Dialect {
    Smb202 = 0x0202,
    Smb210 = 0x0210,
    Smb300 = 0x0300,
    Smb302 = 0x0302,
    Smb311 = 0x0311,
}

impl TryFrom<u16> for Smb2Dialect {
    type Error = crate::Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0202 => Ok(Self::Smb202),
            0x0210 => Ok(Self::Smb210),
            0x0300 => Ok(Self::Smb300),
            0x0302 => Ok(Self::Smb302),
            0x0311 => Ok(Self::Smb311),
            _ => Err(crate::Error::ParseError(format!(
                "Unknown SMB2 dialect: 0x{:04x}",
                value
            ))),
        }
    }
}

impl Smb2Dialect {
    pub fn from_u16(value: u16) -> crate::Result<Self> {
        value.try_into()
    }

    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Dialects offered by the client, lowest first
    pub fn client_dialects() -> Vec<Smb2Dialect> {
        vec![Self::Smb202, Self::Smb210, Self::Smb300, Self::Smb302]
    }
}

impl fmt::Display for Smb2Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Smb2Dialect::Smb202 => "SMB 2.0.2",
            Smb2Dialect::Smb210 => "SMB 2.1",
            Smb2Dialect::Smb300 => "SMB 3.0",
            Smb2Dialect::Smb302 => "SMB 3.0.2",
            Smb2Dialect::Smb311 => "SMB 3.1.1",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// SMB2 close flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CloseFlags: u16 {
        const POSTQUERY_ATTRIB = 0x0001;
    }
}
