//! DCE/RPC calls over an open SMB2 named pipe

use super::SmbConnection;
use crate::dcerpc::packet::{
    BindAckPacket, BindPacket, FaultPacket, RequestPacket, ResponsePacket, RpcHeader,
    RPC_HEADER_SIZE,
};
use crate::dcerpc::{PacketType, SyntaxId};
use crate::error::{Error, Result};
use crate::protocol::messages::FileId;
use tracing::debug;

/// A bound RPC client on one pipe handle
pub struct RpcPipe<'a> {
    conn: &'a mut SmbConnection,
    tree_id: u32,
    file_id: FileId,
    context_id: u16,
    next_call_id: u32,
}

impl<'a> RpcPipe<'a> {
    pub fn new(conn: &'a mut SmbConnection, tree_id: u32, file_id: FileId) -> Self {
        Self {
            conn,
            tree_id,
            file_id,
            context_id: 0,
            next_call_id: 1,
        }
    }

    fn call_id(&mut self) -> u32 {
        let id = self.next_call_id;
        self.next_call_id = self.next_call_id.wrapping_add(1);
        id
    }

    pub async fn bind(&mut self, interface: SyntaxId) -> Result<()> {
        let call_id = self.call_id();
        let bind = BindPacket::new(call_id, interface);
        let reply = self
            .conn
            .transceive(self.tree_id, self.file_id, bind.serialize()?)
            .await?;

        let ack = BindAckPacket::parse(&reply).map_err(|e| e.truncated_in("bind_ack"))?;
        if ack.call_id != call_id {
            return Err(Error::Rpc(format!(
                "bind ack for call {} while binding with call {}",
                ack.call_id, call_id
            )));
        }
        if !ack.is_accepted() {
            return Err(Error::Rpc(format!(
                "server rejected interface {} v{}.{}",
                interface.uuid, interface.version_major, interface.version_minor
            )));
        }

        self.context_id = bind.context_id;
        debug!(interface = %interface.uuid, max_recv_frag = ack.max_recv_frag, "rpc bound");
        Ok(())
    }

    /// Invoke `opnum` and return the reassembled response stub
    pub async fn call(&mut self, opnum: u16, stub: Vec<u8>) -> Result<Vec<u8>> {
        let call_id = self.call_id();
        let request = RequestPacket::new(call_id, self.context_id, opnum, stub);
        let mut pending = self
            .conn
            .transceive(self.tree_id, self.file_id, request.serialize()?)
            .await?;

        let mut result = Vec::new();
        let mut fragments = 0usize;
        loop {
            while needs_more(&pending) {
                let more = self.conn.read(self.tree_id, self.file_id).await?;
                if more.is_empty() {
                    return Err(Error::Rpc("pipe returned no data inside a fragment".into()));
                }
                pending.extend_from_slice(&more);
            }

            let header = RpcHeader::parse(&pending).map_err(|e| e.truncated_in("RPC header"))?;
            if header.call_id != call_id {
                return Err(Error::Rpc(format!(
                    "reply for call {} while waiting for {}",
                    header.call_id, call_id
                )));
            }
            match header.packet_type {
                PacketType::Response => {
                    let fragment = ResponsePacket::parse(&header, &pending)
                        .map_err(|e| e.truncated_in("RPC response"))?;
                    result.extend_from_slice(&fragment.stub_data);
                }
                PacketType::Fault => {
                    return Err(FaultPacket::parse(&header, &pending)
                        .map_err(|e| e.truncated_in("RPC fault"))?
                        .into_error());
                }
                other => {
                    return Err(Error::Rpc(format!(
                        "unexpected {:?} PDU in reply to call {}",
                        other, call_id
                    )));
                }
            }

            fragments += 1;
            pending.drain(..header.frag_length as usize);
            if header.packet_flags.is_last_frag() {
                break;
            }
        }

        debug!(opnum, fragments, len = result.len(), "rpc call complete");
        Ok(result)
    }
}

/// True until `pending` holds a whole fragment
fn needs_more(pending: &[u8]) -> bool {
    if pending.len() < RPC_HEADER_SIZE {
        return true;
    }
    let frag_length = u16::from_le_bytes([pending[8], pending[9]]) as usize;
    pending.len() < frag_length
}
