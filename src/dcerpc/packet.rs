//! DCE/RPC packet structures and serialization

use crate::dcerpc::{
    describe_fault, interfaces, PacketFlags, PacketType, SyntaxId, DCERPC_VERSION_MAJOR,
    DCERPC_VERSION_MINOR, DEFAULT_MAX_FRAG,
};
use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::convert::TryFrom;
use std::io::{Cursor, Read, Write};
use uuid::Uuid;

/// Size of the common header
pub const RPC_HEADER_SIZE: usize = 16;

/// Little-endian integers, ASCII characters, IEEE floats
const DATA_REPRESENTATION: [u8; 4] = [0x10, 0x00, 0x00, 0x00];

/// Common DCE/RPC packet header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcHeader {
    pub version_major: u8,
    pub version_minor: u8,
    pub packet_type: PacketType,
    pub packet_flags: PacketFlags,
    pub data_representation: [u8; 4],
    pub frag_length: u16,
    pub auth_length: u16,
    pub call_id: u32,
}

impl RpcHeader {
    pub fn new(packet_type: PacketType, call_id: u32) -> Self {
        Self {
            version_major: DCERPC_VERSION_MAJOR,
            version_minor: DCERPC_VERSION_MINOR,
            packet_type,
            packet_flags: PacketFlags::single(),
            data_representation: DATA_REPRESENTATION,
            frag_length: RPC_HEADER_SIZE as u16,
            auth_length: 0,
            call_id,
        }
    }

    pub fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(self.version_major)?;
        writer.write_u8(self.version_minor)?;
        writer.write_u8(self.packet_type as u8)?;
        writer.write_u8(self.packet_flags.0)?;
        writer.write_all(&self.data_representation)?;
        writer.write_u16::<LittleEndian>(self.frag_length)?;
        writer.write_u16::<LittleEndian>(self.auth_length)?;
        writer.write_u32::<LittleEndian>(self.call_id)?;
        Ok(())
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < RPC_HEADER_SIZE {
            return Err(Error::BufferTooSmall {
                need: RPC_HEADER_SIZE,
                have: data.len(),
            });
        }
        let mut reader = Cursor::new(data);
        let version_major = reader.read_u8()?;
        let version_minor = reader.read_u8()?;
        let packet_type = reader.read_u8()?;
        let packet_flags = reader.read_u8()?;

        let mut data_representation = [0u8; 4];
        reader.read_exact(&mut data_representation)?;

        let frag_length = reader.read_u16::<LittleEndian>()?;
        let auth_length = reader.read_u16::<LittleEndian>()?;
        let call_id = reader.read_u32::<LittleEndian>()?;

        if version_major != DCERPC_VERSION_MAJOR {
            return Err(Error::ParseError(format!(
                "Unsupported DCE/RPC version {}.{}",
                version_major, version_minor
            )));
        }
        if data_representation[0] & 0xf0 != 0x10 {
            return Err(Error::ParseError(
                "Big-endian DCE/RPC data representation is not supported".into(),
            ));
        }
        if (frag_length as usize) < RPC_HEADER_SIZE {
            return Err(Error::ParseError(format!(
                "Invalid DCE/RPC fragment length {}",
                frag_length
            )));
        }

        Ok(Self {
            version_major,
            version_minor,
            packet_type: PacketType::try_from(packet_type)?,
            packet_flags: PacketFlags(packet_flags),
            data_representation,
            frag_length,
            auth_length,
            call_id,
        })
    }

    /// Body of a complete PDU, without header and auth trailer
    fn body<'a>(&self, data: &'a [u8]) -> Result<&'a [u8]> {
        let frag_length = self.frag_length as usize;
        if data.len() < frag_length {
            return Err(Error::BufferTooSmall {
                need: frag_length,
                have: data.len(),
            });
        }
        let trailer = if self.auth_length > 0 {
            self.auth_length as usize + 8
        } else {
            0
        };
        let end = frag_length
            .checked_sub(trailer)
            .filter(|end| *end >= RPC_HEADER_SIZE)
            .ok_or_else(|| {
                Error::ParseError(format!(
                    "DCE/RPC auth length {} exceeds fragment",
                    self.auth_length
                ))
            })?;
        Ok(&data[RPC_HEADER_SIZE..end])
    }
}

/// Write `header` then `body`, fixing up the fragment length
fn finish_pdu(mut header: RpcHeader, body: &[u8]) -> Result<Vec<u8>> {
    let total = RPC_HEADER_SIZE + body.len();
    header.frag_length = u16::try_from(total)
        .map_err(|_| Error::InvalidParameter(format!("DCE/RPC PDU too large: {} bytes", total)))?;
    let mut buffer = Vec::with_capacity(total);
    header.serialize(&mut buffer)?;
    buffer.extend_from_slice(body);
    Ok(buffer)
}

fn write_syntax(buffer: &mut Vec<u8>, syntax: &SyntaxId) -> Result<()> {
    buffer.write_all(&syntax.uuid.to_bytes_le())?;
    buffer.write_u16::<LittleEndian>(syntax.version_major)?;
    buffer.write_u16::<LittleEndian>(syntax.version_minor)?;
    Ok(())
}

fn read_syntax(reader: &mut Cursor<&[u8]>) -> Result<SyntaxId> {
    let mut uuid = [0u8; 16];
    reader.read_exact(&mut uuid)?;
    let version_major = reader.read_u16::<LittleEndian>()?;
    let version_minor = reader.read_u16::<LittleEndian>()?;
    Ok(SyntaxId {
        uuid: Uuid::from_bytes_le(uuid),
        version_major,
        version_minor,
    })
}

/// Bind packet - establishes the presentation context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindPacket {
    pub call_id: u32,
    pub max_xmit_frag: u16,
    pub max_recv_frag: u16,
    pub assoc_group_id: u32,
    pub context_id: u16,
    pub abstract_syntax: SyntaxId,
    pub transfer_syntax: SyntaxId,
}

impl BindPacket {
    pub fn new(call_id: u32, interface: SyntaxId) -> Self {
        Self {
            call_id,
            max_xmit_frag: DEFAULT_MAX_FRAG,
            max_recv_frag: DEFAULT_MAX_FRAG,
            assoc_group_id: 0,
            context_id: 0,
            abstract_syntax: interface,
            transfer_syntax: interfaces::NDR,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut body = Vec::with_capacity(56);
        body.write_u16::<LittleEndian>(self.max_xmit_frag)?;
        body.write_u16::<LittleEndian>(self.max_recv_frag)?;
        body.write_u32::<LittleEndian>(self.assoc_group_id)?;
        // One context item, then padding
        body.write_u8(1)?;
        body.write_all(&[0, 0, 0])?;

        body.write_u16::<LittleEndian>(self.context_id)?;
        // One transfer syntax, reserved
        body.write_u8(1)?;
        body.write_u8(0)?;
        write_syntax(&mut body, &self.abstract_syntax)?;
        write_syntax(&mut body, &self.transfer_syntax)?;

        finish_pdu(RpcHeader::new(PacketType::Bind, self.call_id), &body)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = RpcHeader::parse(data)?;
        if header.packet_type != PacketType::Bind {
            return Err(Error::ParseError(format!(
                "Expected bind, got {:?}",
                header.packet_type
            )));
        }
        let mut reader = Cursor::new(header.body(data)?);
        let max_xmit_frag = reader.read_u16::<LittleEndian>()?;
        let max_recv_frag = reader.read_u16::<LittleEndian>()?;
        let assoc_group_id = reader.read_u32::<LittleEndian>()?;
        let num_contexts = reader.read_u8()?;
        if num_contexts == 0 {
            return Err(Error::ParseError("Bind carries no context items".into()));
        }
        let mut pad = [0u8; 3];
        reader.read_exact(&mut pad)?;
        let context_id = reader.read_u16::<LittleEndian>()?;
        let _num_transfer = reader.read_u8()?;
        let _reserved = reader.read_u8()?;
        let abstract_syntax = read_syntax(&mut reader)?;
        let transfer_syntax = read_syntax(&mut reader)?;

        Ok(Self {
            call_id: header.call_id,
            max_xmit_frag,
            max_recv_frag,
            assoc_group_id,
            context_id,
            abstract_syntax,
            transfer_syntax,
        })
    }
}

/// Presentation context result codes
pub mod ack_result {
    pub const ACCEPTANCE: u16 = 0;
    pub const USER_REJECTION: u16 = 1;
    pub const PROVIDER_REJECTION: u16 = 2;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextResult {
    pub result: u16,
    pub reason: u16,
    pub transfer_syntax: SyntaxId,
}

/// Bind acknowledgment packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindAckPacket {
    pub call_id: u32,
    pub max_xmit_frag: u16,
    pub max_recv_frag: u16,
    pub assoc_group_id: u32,
    /// Secondary address, e.g. `\PIPE\srvsvc`
    pub secondary_addr: String,
    pub results: Vec<ContextResult>,
}

impl BindAckPacket {
    pub fn accept(bind: &BindPacket, secondary_addr: &str) -> Self {
        Self {
            call_id: bind.call_id,
            max_xmit_frag: bind.max_xmit_frag,
            max_recv_frag: bind.max_recv_frag,
            assoc_group_id: 0x12345,
            secondary_addr: secondary_addr.to_string(),
            results: vec![ContextResult {
                result: ack_result::ACCEPTANCE,
                reason: 0,
                transfer_syntax: bind.transfer_syntax,
            }],
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.results
            .first()
            .map_or(false, |r| r.result == ack_result::ACCEPTANCE)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        body.write_u16::<LittleEndian>(self.max_xmit_frag)?;
        body.write_u16::<LittleEndian>(self.max_recv_frag)?;
        body.write_u32::<LittleEndian>(self.assoc_group_id)?;

        let mut addr = self.secondary_addr.as_bytes().to_vec();
        addr.push(0);
        body.write_u16::<LittleEndian>(addr.len() as u16)?;
        body.write_all(&addr)?;
        while (RPC_HEADER_SIZE + body.len()) % 4 != 0 {
            body.push(0);
        }

        body.write_u8(self.results.len() as u8)?;
        body.write_all(&[0, 0, 0])?;
        for result in &self.results {
            body.write_u16::<LittleEndian>(result.result)?;
            body.write_u16::<LittleEndian>(result.reason)?;
            write_syntax(&mut body, &result.transfer_syntax)?;
        }

        finish_pdu(RpcHeader::new(PacketType::BindAck, self.call_id), &body)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = RpcHeader::parse(data)?;
        match header.packet_type {
            PacketType::BindAck => {}
            PacketType::BindNak => {
                let body = header.body(data)?;
                let reason = if body.len() >= 2 {
                    u16::from_le_bytes([body[0], body[1]])
                } else {
                    0
                };
                return Err(Error::Rpc(format!("bind rejected, reason {}", reason)));
            }
            other => {
                return Err(Error::Rpc(format!("expected bind ack, got {:?}", other)));
            }
        }

        let body = header.body(data)?;
        let mut reader = Cursor::new(body);
        let max_xmit_frag = reader.read_u16::<LittleEndian>()?;
        let max_recv_frag = reader.read_u16::<LittleEndian>()?;
        let assoc_group_id = reader.read_u32::<LittleEndian>()?;

        let addr_len = reader.read_u16::<LittleEndian>()? as usize;
        let start = reader.position() as usize;
        let addr = body.get(start..start + addr_len).ok_or(Error::BufferTooSmall {
            need: start + addr_len,
            have: body.len(),
        })?;
        let secondary_addr = String::from_utf8_lossy(addr)
            .trim_end_matches('\0')
            .to_string();
        let mut pos = start + addr_len;
        // Results start 4-byte aligned relative to the PDU
        while (RPC_HEADER_SIZE + pos) % 4 != 0 {
            pos += 1;
        }
        reader.set_position(pos as u64);

        let num_results = reader.read_u8()?;
        let mut pad = [0u8; 3];
        reader.read_exact(&mut pad)?;
        let mut results = Vec::with_capacity(num_results as usize);
        for _ in 0..num_results {
            let result = reader.read_u16::<LittleEndian>()?;
            let reason = reader.read_u16::<LittleEndian>()?;
            let transfer_syntax = read_syntax(&mut reader)?;
            results.push(ContextResult {
                result,
                reason,
                transfer_syntax,
            });
        }

        Ok(Self {
            call_id: header.call_id,
            max_xmit_frag,
            max_recv_frag,
            assoc_group_id,
            secondary_addr,
            results,
        })
    }
}

/// Request packet - actual RPC call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPacket {
    pub call_id: u32,
    pub context_id: u16,
    pub opnum: u16,
    pub stub_data: Vec<u8>,
}

impl RequestPacket {
    pub fn new(call_id: u32, context_id: u16, opnum: u16, stub_data: Vec<u8>) -> Self {
        Self {
            call_id,
            context_id,
            opnum,
            stub_data,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut body = Vec::with_capacity(8 + self.stub_data.len());
        // alloc_hint
        body.write_u32::<LittleEndian>(self.stub_data.len() as u32)?;
        body.write_u16::<LittleEndian>(self.context_id)?;
        body.write_u16::<LittleEndian>(self.opnum)?;
        body.write_all(&self.stub_data)?;
        finish_pdu(RpcHeader::new(PacketType::Request, self.call_id), &body)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = RpcHeader::parse(data)?;
        if header.packet_type != PacketType::Request {
            return Err(Error::ParseError(format!(
                "Expected request, got {:?}",
                header.packet_type
            )));
        }
        let body = header.body(data)?;
        if body.len() < 8 {
            return Err(Error::ParseError("Request PDU too short".into()));
        }
        let mut reader = Cursor::new(body);
        let _alloc_hint = reader.read_u32::<LittleEndian>()?;
        let context_id = reader.read_u16::<LittleEndian>()?;
        let opnum = reader.read_u16::<LittleEndian>()?;
        if header.packet_flags.0 & PacketFlags::OBJECT_UUID != 0 {
            return Err(Error::ParseError("Object UUID requests are not supported".into()));
        }
        Ok(Self {
            call_id: header.call_id,
            context_id,
            opnum,
            stub_data: body[8..].to_vec(),
        })
    }
}

/// Response packet - one fragment of an RPC call result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePacket {
    pub call_id: u32,
    pub flags: PacketFlags,
    pub alloc_hint: u32,
    pub context_id: u16,
    pub stub_data: Vec<u8>,
}

impl ResponsePacket {
    /// Split `stub` into response fragments of at most `max_frag` bytes each
    pub fn fragments(call_id: u32, context_id: u16, stub: &[u8], max_frag: usize) -> Vec<Self> {
        let chunk = max_frag.saturating_sub(RPC_HEADER_SIZE + 8).max(1);
        let pieces: Vec<&[u8]> = if stub.is_empty() {
            vec![stub]
        } else {
            stub.chunks(chunk).collect()
        };
        let last = pieces.len() - 1;
        let mut remaining = stub.len();

        pieces
            .into_iter()
            .enumerate()
            .map(|(i, piece)| {
                let mut flags = 0;
                if i == 0 {
                    flags |= PacketFlags::FIRST_FRAG;
                }
                if i == last {
                    flags |= PacketFlags::LAST_FRAG;
                }
                let fragment = Self {
                    call_id,
                    flags: PacketFlags(flags),
                    alloc_hint: remaining as u32,
                    context_id,
                    stub_data: piece.to_vec(),
                };
                remaining -= piece.len();
                fragment
            })
            .collect()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut body = Vec::with_capacity(8 + self.stub_data.len());
        body.write_u32::<LittleEndian>(self.alloc_hint)?;
        body.write_u16::<LittleEndian>(self.context_id)?;
        // cancel count, reserved
        body.write_u8(0)?;
        body.write_u8(0)?;
        body.write_all(&self.stub_data)?;

        let mut header = RpcHeader::new(PacketType::Response, self.call_id);
        header.packet_flags = self.flags;
        finish_pdu(header, &body)
    }

    pub fn parse(header: &RpcHeader, data: &[u8]) -> Result<Self> {
        let body = header.body(data)?;
        if body.len() < 8 {
            return Err(Error::ParseError("Response PDU too short".into()));
        }
        let mut reader = Cursor::new(body);
        let alloc_hint = reader.read_u32::<LittleEndian>()?;
        let context_id = reader.read_u16::<LittleEndian>()?;
        Ok(Self {
            call_id: header.call_id,
            flags: header.packet_flags,
            alloc_hint,
            context_id,
            stub_data: body[8..].to_vec(),
        })
    }
}

/// Fault packet - RPC error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultPacket {
    pub call_id: u32,
    pub context_id: u16,
    pub status: u32,
}

impl FaultPacket {
    pub fn new(call_id: u32, context_id: u16, status: u32) -> Self {
        Self {
            call_id,
            context_id,
            status,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut body = Vec::with_capacity(16);
        body.write_u32::<LittleEndian>(0)?;
        body.write_u16::<LittleEndian>(self.context_id)?;
        body.write_u8(0)?;
        body.write_u8(0)?;
        body.write_u32::<LittleEndian>(self.status)?;
        body.write_u32::<LittleEndian>(0)?;
        finish_pdu(RpcHeader::new(PacketType::Fault, self.call_id), &body)
    }

    pub fn parse(header: &RpcHeader, data: &[u8]) -> Result<Self> {
        let body = header.body(data)?;
        if body.len() < 12 {
            return Err(Error::ParseError("Fault PDU too short".into()));
        }
        let mut reader = Cursor::new(body);
        let _alloc_hint = reader.read_u32::<LittleEndian>()?;
        let context_id = reader.read_u16::<LittleEndian>()?;
        let _cancel_count = reader.read_u8()?;
        let _reserved = reader.read_u8()?;
        let status = reader.read_u32::<LittleEndian>()?;
        Ok(Self {
            call_id: header.call_id,
            context_id,
            status,
        })
    }

    pub fn into_error(self) -> Error {
        Error::Rpc(format!("fault {}", describe_fault(self.status)))
    }
}
