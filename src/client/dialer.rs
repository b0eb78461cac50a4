//! SMB2 implementation of the protocol session seam

use super::{RpcPipe, ServerInfo, SmbConnection};
use crate::dcerpc::interfaces;
use crate::dcerpc::srvsvc::{
    decode_share_enum_all_response, encode_share_enum_all_request, OPNUM_NETR_SHARE_ENUM_ALL,
    SRVSVC_PIPE,
};
use crate::error::Result;
use crate::protocol::messages::FileId;
use crate::session::protocol::{Initiator, ProtocolDialer, ProtocolSession};
use crate::transport::SmbTransport;
use async_trait::async_trait;
use tracing::{debug, info};

const IPC_SHARE: &str = "IPC$";

/// Dials SMB2 sessions authenticated with SPNEGO/NTLMv2
#[derive(Debug, Clone, Copy, Default)]
pub struct SmbDialer;

impl SmbDialer {
    pub fn new() -> Self {
        Self
    }
}

async fn handshake(conn: &mut SmbConnection, initiator: &Initiator) -> Result<()> {
    conn.negotiate().await?;
    match initiator {
        Initiator::Ntlm(credentials) => conn.authenticate(credentials).await,
    }
}

async fn server_info(conn: &mut SmbConnection) -> Result<ServerInfo> {
    let negotiate = conn.negotiate().await?;
    let challenge = conn.challenge().await?;
    Ok(ServerInfo::new(&negotiate, &challenge))
}

/// Close a connection that will not be handed out
async fn abandon(conn: &mut SmbConnection) {
    if let Err(e) = conn.disconnect().await {
        debug!("closing abandoned connection failed: {}", e);
    }
}

#[async_trait]
impl ProtocolDialer for SmbDialer {
    async fn dial(
        &self,
        transport: Box<dyn SmbTransport>,
        initiator: &Initiator,
    ) -> Result<Box<dyn ProtocolSession>> {
        let mut conn = SmbConnection::new(transport);
        if let Err(e) = handshake(&mut conn, initiator).await {
            abandon(&mut conn).await;
            return Err(e);
        }

        info!(
            server = conn.server_name(),
            user = initiator.username(),
            session_id = conn.session_id(),
            "SMB session established"
        );
        Ok(Box::new(SmbSession { conn }))
    }

    async fn probe(&self, transport: Box<dyn SmbTransport>) -> Result<ServerInfo> {
        let mut conn = SmbConnection::new(transport);
        let result = server_info(&mut conn).await;
        abandon(&mut conn).await;
        result
    }
}

/// An authenticated SMB2 session
pub struct SmbSession {
    conn: SmbConnection,
}

impl SmbSession {
    async fn enumerate_on_tree(&mut self, tree_id: u32) -> Result<Vec<String>> {
        let file_id = self.conn.open_pipe(tree_id, SRVSVC_PIPE).await?;
        let result = self.share_enum(tree_id, file_id).await;
        let closed = self.conn.close(tree_id, file_id).await;
        let shares = result?;
        closed?;
        Ok(shares)
    }

    async fn share_enum(&mut self, tree_id: u32, file_id: FileId) -> Result<Vec<String>> {
        let server_name = format!("\\\\{}", self.conn.server_name());
        let mut pipe = RpcPipe::new(&mut self.conn, tree_id, file_id);
        pipe.bind(interfaces::SRVSVC).await?;

        let stub = pipe
            .call(
                OPNUM_NETR_SHARE_ENUM_ALL,
                encode_share_enum_all_request(&server_name)?,
            )
            .await?;
        let result = decode_share_enum_all_response(&stub)
            .map_err(|e| e.truncated_in("NetrShareEnumAll reply"))?;
        debug!(
            returned = result.shares.len(),
            total = result.total_entries,
            "NetrShareEnumAll"
        );
        Ok(result.shares.into_iter().map(|share| share.name).collect())
    }
}

#[async_trait]
impl ProtocolSession for SmbSession {
    async fn list_share_names(&mut self) -> Result<Vec<String>> {
        let tree_id = self.conn.tree_connect(IPC_SHARE).await?;
        let result = self.enumerate_on_tree(tree_id).await;
        let disconnected = self.conn.tree_disconnect(tree_id).await;
        let shares = result?;
        disconnected?;
        Ok(shares)
    }

    async fn logoff(&mut self) -> Result<()> {
        self.conn.logoff().await?;
        if let Err(e) = self.conn.disconnect().await {
            debug!("closing connection after logoff failed: {}", e);
        }
        Ok(())
    }
}
