//! SMB2 protocol definitions

pub mod messages;
pub mod smb2_constants;
