//! Error types for the SMB client and the session state machine

use crate::protocol::smb2_constants::Smb2Command;
use std::convert::TryFrom;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the protocol layers
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Protocol parsing error
    #[error("Protocol parsing error: {0}")]
    ParseError(String),

    /// Invalid SMB header
    #[error("Invalid SMB header: {0}")]
    InvalidHeader(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Connection error
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Buffer too small
    #[error("Buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    /// Timeout occurred
    #[error("Operation timed out")]
    Timeout,

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Crypto error
    #[error("Crypto error: {0}")]
    CryptoError(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Server answered a request with a failure status
    #[error("{command:?} failed: {}", describe_status(*.status))]
    Status { command: Smb2Command, status: u32 },

    /// DCE/RPC fault or non-zero WERROR from a remote call
    #[error("RPC call failed: {0}")]
    Rpc(String),

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// True when the error proves the SMB session can no longer be used.
    ///
    /// SMB2 sessions are bound to their connection, so a dead transport ends
    /// the session as well.
    pub fn is_session_terminated(&self) -> bool {
        match self {
            Error::Io(_) | Error::ConnectionClosed => true,
            Error::Status { status, .. } => matches!(
                NtStatus::try_from(*status),
                Ok(NtStatus::UserSessionDeleted) | Ok(NtStatus::NetworkSessionExpired)
            ),
            _ => false,
        }
    }

    /// True when the connection itself failed, as opposed to the exchange on it
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::ConnectionClosed | Error::Timeout | Error::ConnectionError(_)
        )
    }

    /// Decoders read from in-memory cursors, so an underrun there means the
    /// message was short, not that the transport failed.
    pub fn truncated_in(self, what: impl fmt::Display) -> Self {
        match self {
            Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Error::ParseError(format!("{} is truncated", what))
            }
            other => other,
        }
    }

    /// Status code carried by the error, if any
    pub fn status(&self) -> Option<NtStatus> {
        match self {
            Error::Status { status, .. } => NtStatus::try_from(*status).ok(),
            _ => None,
        }
    }
}

/// SMB protocol status codes (subset of NTSTATUS)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum NtStatus {
    /// The operation completed successfully
    Success = 0x00000000,
    /// The operation is still in progress
    Pending = 0x00000103,
    /// The data was too large to fit into the specified buffer
    BufferOverflow = 0x80000005,
    /// More processing required
    MoreProcessingRequired = 0xC0000016,
    /// The request is not supported
    NotSupported = 0xC00000BB,
    /// Access denied
    AccessDenied = 0xC0000022,
    /// The object name is not found
    ObjectNameNotFound = 0xC0000034,
    /// The specified handle is invalid
    InvalidHandle = 0xC0000008,
    /// The parameter is incorrect
    InvalidParameter = 0xC000000D,
    /// The user name or password is incorrect
    LogonFailure = 0xC000006D,
    /// Account restriction
    AccountRestriction = 0xC000006E,
    /// Password expired
    PasswordExpired = 0xC0000071,
    /// Account is disabled
    AccountDisabled = 0xC0000072,
    /// The specified network name is no longer available
    NetworkNameDeleted = 0xC00000C9,
    /// Bad network name
    BadNetworkName = 0xC00000CC,
    /// Pipe disconnected
    PipeDisconnected = 0xC00000B0,
    /// The session was deleted on the server
    UserSessionDeleted = 0xC0000203,
    /// The session has expired
    NetworkSessionExpired = 0xC000035C,
    /// Insufficient resources
    InsufficientResources = 0xC000009A,
}

impl TryFrom<u32> for NtStatus {
    type Error = ();

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        match value {
            0x00000000 => Ok(NtStatus::Success),
            0x00000103 => Ok(NtStatus::Pending),
            0x80000005 => Ok(NtStatus::BufferOverflow),
            0xC0000016 => Ok(NtStatus::MoreProcessingRequired),
            0xC00000BB => Ok(NtStatus::NotSupported),
            0xC0000022 => Ok(NtStatus::AccessDenied),
            0xC0000034 => Ok(NtStatus::ObjectNameNotFound),
            0xC0000008 => Ok(NtStatus::InvalidHandle),
            0xC000000D => Ok(NtStatus::InvalidParameter),
            0xC000006D => Ok(NtStatus::LogonFailure),
            0xC000006E => Ok(NtStatus::AccountRestriction),
            0xC0000071 => Ok(NtStatus::PasswordExpired),
            0xC0000072 => Ok(NtStatus::AccountDisabled),
            0xC00000C9 => Ok(NtStatus::NetworkNameDeleted),
            0xC00000CC => Ok(NtStatus::BadNetworkName),
            0xC00000B0 => Ok(NtStatus::PipeDisconnected),
            0xC0000203 => Ok(NtStatus::UserSessionDeleted),
            0xC000035C => Ok(NtStatus::NetworkSessionExpired),
            0xC000009A => Ok(NtStatus::InsufficientResources),
            _ => Err(()),
        }
    }
}

impl NtStatus {
    /// Check if this is a success status
    pub fn is_success(self) -> bool {
        self == NtStatus::Success
    }

    /// Check if this is an error status
    pub fn is_error(self) -> bool {
        (self as u32) & 0xC0000000 == 0xC0000000
    }

    /// Check if this is a warning status
    pub fn is_warning(self) -> bool {
        (self as u32) & 0x80000000 == 0x80000000 && !self.is_error()
    }

    pub fn to_u32(self) -> u32 {
        self as u32
    }

    fn message(self) -> &'static str {
        match self {
            NtStatus::Success => "Success",
            NtStatus::Pending => "Pending",
            NtStatus::BufferOverflow => "Buffer overflow",
            NtStatus::MoreProcessingRequired => "More processing required",
            NtStatus::NotSupported => "Not supported",
            NtStatus::AccessDenied => "Access denied",
            NtStatus::ObjectNameNotFound => "Object name not found",
            NtStatus::InvalidHandle => "Invalid handle",
            NtStatus::InvalidParameter => "Invalid parameter",
            NtStatus::LogonFailure => "Logon failure",
            NtStatus::AccountRestriction => "Account restriction",
            NtStatus::PasswordExpired => "Password expired",
            NtStatus::AccountDisabled => "Account disabled",
            NtStatus::NetworkNameDeleted => "Network name deleted",
            NtStatus::BadNetworkName => "Bad network name",
            NtStatus::PipeDisconnected => "Pipe disconnected",
            NtStatus::UserSessionDeleted => "User session deleted",
            NtStatus::NetworkSessionExpired => "Network session expired",
            NtStatus::InsufficientResources => "Insufficient resources",
        }
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:08X})", self.message(), *self as u32)
    }
}

/// Human readable form of a raw status code
pub fn describe_status(status: u32) -> String {
    match NtStatus::try_from(status) {
        Ok(known) => known.to_string(),
        Err(()) => format!("NTSTATUS 0x{:08X}", status),
    }
}

/// Classification of failures reported by the session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The transport to the server could not be opened
    Connection,
    /// The handshake or the credentials were rejected
    Authentication,
    /// Share enumeration, logoff or probing failed at the protocol layer
    Protocol,
    /// Invalid arguments or an operation not allowed in the current state
    Usage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Connection => "connection error",
            ErrorKind::Authentication => "authentication error",
            ErrorKind::Protocol => "protocol error",
            ErrorKind::Usage => "usage error",
        };
        f.write_str(name)
    }
}

/// Structured outcome of a failed session operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct SessionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SessionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Usage, message)
    }

    pub fn connection(err: &Error) -> Self {
        Self::new(ErrorKind::Connection, err.to_string())
    }

    pub fn authentication(err: &Error) -> Self {
        Self::new(ErrorKind::Authentication, err.to_string())
    }

    pub fn protocol(err: &Error) -> Self {
        Self::new(ErrorKind::Protocol, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ntstatus_success() {
        assert!(NtStatus::Success.is_success());
        assert!(!NtStatus::Success.is_error());
        assert!(!NtStatus::Success.is_warning());
    }

    #[test]
    fn test_ntstatus_error() {
        assert!(!NtStatus::LogonFailure.is_success());
        assert!(NtStatus::LogonFailure.is_error());
        assert!(!NtStatus::LogonFailure.is_warning());
    }

    #[test]
    fn test_ntstatus_warning() {
        assert!(NtStatus::BufferOverflow.is_warning());
        assert!(!NtStatus::BufferOverflow.is_error());
        assert!(!NtStatus::Pending.is_warning());
    }

    #[test]
    fn test_ntstatus_unknown_code() {
        assert!(NtStatus::try_from(0xC0FFEE00).is_err());
        assert_eq!(describe_status(0xC0FFEE00), "NTSTATUS 0xC0FFEE00");
        assert_eq!(describe_status(0xC0000022), "Access denied (0xC0000022)");
    }

    #[test]
    fn test_status_error_display() {
        let err = Error::Status {
            command: Smb2Command::SessionSetup,
            status: NtStatus::LogonFailure.to_u32(),
        };
        assert_eq!(err.to_string(), "SessionSetup failed: Logon failure (0xC000006D)");
        assert_eq!(err.status(), Some(NtStatus::LogonFailure));
    }

    #[test]
    fn test_session_terminated_classification() {
        assert!(Error::ConnectionClosed.is_session_terminated());
        assert!(Error::Io(io::Error::from(io::ErrorKind::BrokenPipe)).is_session_terminated());
        assert!(Error::Status {
            command: Smb2Command::Logoff,
            status: NtStatus::UserSessionDeleted.to_u32(),
        }
        .is_session_terminated());
        assert!(Error::Status {
            command: Smb2Command::Logoff,
            status: NtStatus::NetworkSessionExpired.to_u32(),
        }
        .is_session_terminated());
        assert!(!Error::Status {
            command: Smb2Command::Logoff,
            status: NtStatus::AccessDenied.to_u32(),
        }
        .is_session_terminated());
        assert!(!Error::Timeout.is_session_terminated());
    }

    #[test]
    fn test_truncated_decode_is_not_a_dead_session() {
        let short = Error::from(io::Error::from(io::ErrorKind::UnexpectedEof));
        let err = short.truncated_in("Logoff response");
        assert!(matches!(&err, Error::ParseError(msg) if msg == "Logoff response is truncated"));
        assert!(!err.is_session_terminated());
        assert!(!err.is_transport_failure());

        let reset = Error::Io(io::Error::from(io::ErrorKind::ConnectionReset)).truncated_in("x");
        assert!(reset.is_session_terminated());
        assert!(reset.is_transport_failure());
        assert!(Error::Timeout.is_transport_failure());
        assert!(!Error::ParseError("bad".into()).is_transport_failure());
    }

    #[test]
    fn test_session_error_display() {
        let err = SessionError::usage("missing password");
        assert_eq!(err.kind, ErrorKind::Usage);
        assert_eq!(err.to_string(), "usage error: missing password");

        let err = SessionError::connection(&Error::Timeout);
        assert_eq!(err.kind, ErrorKind::Connection);
        assert_eq!(err.message, "Operation timed out");
    }
}
