//! SMB2 protocol messages organized by category

pub mod common;
pub mod file_ops;
pub mod ioctl;
pub mod negotiate;
pub mod session;
pub mod tree;

// Re-export commonly used types
pub use common::{decode_message, encode_message, FileId, Smb2Header, SmbMessage, SMB2_PROTOCOL_ID};
pub use file_ops::{Smb2CloseRequest, Smb2CloseResponse, Smb2CreateRequest, Smb2CreateResponse};
pub use file_ops::{Smb2ReadRequest, Smb2ReadResponse};
pub use ioctl::{Smb2IoctlRequest, Smb2IoctlResponse, FSCTL_PIPE_TRANSCEIVE};
pub use negotiate::{Smb2NegotiateRequest, Smb2NegotiateResponse};
pub use session::{SessionFlags, Smb2Logoff, Smb2SessionSetupRequest, Smb2SessionSetupResponse};
pub use tree::{ShareType, Smb2TreeConnectRequest, Smb2TreeConnectResponse, Smb2TreeDisconnect};
