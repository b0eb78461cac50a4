//! Seams between the session state machine and the wire protocol

use crate::auth::Credentials;
use crate::client::ServerInfo;
use crate::error::Result;
use crate::transport::SmbTransport;
use async_trait::async_trait;

/// How a handshake proves its identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Initiator {
    /// NTLMv2 with a local (no domain) or domain account
    Ntlm(Credentials),
}

impl Initiator {
    pub fn username(&self) -> &str {
        match self {
            Initiator::Ntlm(creds) => &creds.username,
        }
    }
}

/// Performs the handshake over an open transport
#[async_trait]
pub trait ProtocolDialer: Send + Sync {
    /// Negotiate and authenticate, returning the session handle
    async fn dial(
        &self,
        transport: Box<dyn SmbTransport>,
        initiator: &Initiator,
    ) -> Result<Box<dyn ProtocolSession>>;

    /// Negotiate and run the first NTLM round only
    async fn probe(&self, transport: Box<dyn SmbTransport>) -> Result<ServerInfo>;
}

/// An authenticated session handle
#[async_trait]
pub trait ProtocolSession: Send {
    /// Share names in the order the server returned them
    async fn list_share_names(&mut self) -> Result<Vec<String>>;

    /// End the session server-side
    async fn logoff(&mut self) -> Result<()>;
}
