//! In-process SMB2 server speaking just enough of the protocol for share listing
//!
//! One task accepts loopback connections; each connection is served by its
//! own task over a [`TcpTransport`], so framing is exercised on both ends.

use crate::auth::ntlm::{
    av_id, NtlmAuthenticateMessage, NtlmChallengeMessage, NtlmVersion, MIC_OFFSET,
};
use crate::auth::ntlm_crypto::{hmac_md5, ntlmv2_hash, ntlmv2_session_key, verify_ntlmv2_response};
use crate::auth::spnego::{find_ntlm_token, NegState, NegTokenResp, NTLMSSP_OID};
use crate::dcerpc::interfaces;
use crate::dcerpc::packet::{
    BindAckPacket, BindPacket, FaultPacket, RequestPacket, ResponsePacket, RpcHeader,
};
use crate::dcerpc::srvsvc::{encode_share_enum_all_response, ShareInfo1, OPNUM_NETR_SHARE_ENUM_ALL};
use crate::dcerpc::PacketType;
use crate::error::{NtStatus, Result};
use crate::protocol::messages::negotiate::utc_to_filetime;
use crate::protocol::messages::{
    decode_message, FileId, ShareType, Smb2CloseResponse, Smb2CreateRequest, Smb2CreateResponse,
    Smb2Header, Smb2IoctlRequest, Smb2IoctlResponse, Smb2Logoff, Smb2NegotiateRequest,
    Smb2NegotiateResponse, Smb2ReadRequest, Smb2ReadResponse, Smb2SessionSetupRequest,
    Smb2SessionSetupResponse, Smb2TreeConnectRequest, Smb2TreeConnectResponse, Smb2TreeDisconnect,
    SmbMessage, SessionFlags, FSCTL_PIPE_TRANSCEIVE,
};
use crate::protocol::smb2_constants::{SecurityMode, Smb2Command, Smb2Dialect};
use crate::transport::{SmbTransport, TcpTransport};
use chrono::{TimeZone, Utc};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::debug;

const SESSION_ID: u64 = 0x0000_4000_0000_0011;
const TREE_ID: u32 = 7;
const PIPE_ID: FileId = FileId {
    persistent: 0x11,
    volatile: 0x22,
};
const SERVER_CHALLENGE: [u8; 8] = [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef];

/// Minimal SMB2 ERROR response body
const ERROR_BODY: [u8; 9] = [9, 0, 0, 0, 0, 0, 0, 0, 0];

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub username: String,
    pub password: String,
    /// Domain the client must present, `None` accepts any
    pub domain: Option<String>,
    pub shares: Vec<ShareInfo1>,
    /// Largest RPC response fragment
    pub max_frag: usize,
    /// Send MsvAvTimestamp and require a valid MIC
    pub timestamp: bool,
    pub require_signing: bool,
    pub logoff_status: NtStatus,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            username: "alice".into(),
            password: "S3cret!".into(),
            domain: None,
            shares: vec![
                share("IPC$", 0x8000_0003, "Remote IPC"),
                share("public", 0, "Everyone"),
                share("backup", 0, ""),
            ],
            max_frag: 4280,
            timestamp: true,
            require_signing: false,
            logoff_status: NtStatus::Success,
        }
    }
}

pub fn share(name: &str, share_type: u32, remark: &str) -> ShareInfo1 {
    ShareInfo1 {
        name: name.to_string(),
        share_type,
        remark: remark.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections: AtomicUsize,
    pub sessions: AtomicUsize,
    pub logoffs: AtomicUsize,
    pub share_enums: AtomicUsize,
}

pub struct FakeServer {
    addr: SocketAddr,
    pub stats: Arc<ServerStats>,
    handle: JoinHandle<()>,
}

impl FakeServer {
    pub async fn start(options: ServerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let options = Arc::new(options);
        let stats = Arc::new(ServerStats::default());

        let accept_stats = stats.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                accept_stats.connections.fetch_add(1, Ordering::SeqCst);
                let conn = Connection::new(options.clone(), accept_stats.clone());
                tokio::spawn(async move {
                    if let Err(e) = conn.serve(TcpTransport::from_stream(stream)).await {
                        debug!(%peer, "fake server connection ended: {}", e);
                    }
                });
            }
        });

        Self {
            addr,
            stats,
            handle,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct Connection {
    options: Arc<ServerOptions>,
    stats: Arc<ServerStats>,
    negotiate_token: Vec<u8>,
    challenge_token: Vec<u8>,
    authenticated: bool,
    pending_read: Vec<u8>,
}

impl Connection {
    fn new(options: Arc<ServerOptions>, stats: Arc<ServerStats>) -> Self {
        Self {
            options,
            stats,
            negotiate_token: Vec::new(),
            challenge_token: Vec::new(),
            authenticated: false,
            pending_read: Vec::new(),
        }
    }

    async fn serve(mut self, mut transport: TcpTransport) -> Result<()> {
        loop {
            let data = transport.receive_message().await?;
            let (header, body) = decode_message(&data)?;

            let (status, body) = self.dispatch(&header, body)?;
            let mut response = Smb2Header::response_to(&header, status.to_u32());
            if header.command == Smb2Command::SessionSetup {
                response.session_id = SESSION_ID;
            }
            if header.command == Smb2Command::TreeConnect && status == NtStatus::Success {
                response.tree_id = TREE_ID;
            }

            let mut frame = response.serialize()?;
            match body {
                Some(body) => frame.extend_from_slice(&body),
                None => frame.extend_from_slice(&ERROR_BODY),
            }
            transport.send_message(&frame).await?;
        }
    }

    /// Status plus response body; `None` sends the ERROR body
    fn dispatch(&mut self, header: &Smb2Header, body: &[u8]) -> Result<(NtStatus, Option<Vec<u8>>)> {
        if !matches!(header.command, Smb2Command::Negotiate | Smb2Command::SessionSetup)
            && (!self.authenticated || header.session_id != SESSION_ID)
        {
            return Ok((NtStatus::UserSessionDeleted, None));
        }

        match header.command {
            Smb2Command::Negotiate => {
                let request = Smb2NegotiateRequest::parse(body)?;
                assert!(request.dialects.contains(&Smb2Dialect::Smb210));
                let mut response = Smb2NegotiateResponse::new(Smb2Dialect::Smb210);
                response.system_time =
                    utc_to_filetime(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
                if self.options.require_signing {
                    response.security_mode |= SecurityMode::SIGNING_REQUIRED;
                }
                Ok((NtStatus::Success, Some(response.serialize()?)))
            }
            Smb2Command::SessionSetup => self.session_setup(body),
            Smb2Command::TreeConnect => {
                let request = Smb2TreeConnectRequest::parse(body)?;
                if self.options.require_signing {
                    return Ok((NtStatus::AccessDenied, None));
                }
                if request.path != "\\\\127.0.0.1\\IPC$" {
                    return Ok((NtStatus::BadNetworkName, None));
                }
                let response = Smb2TreeConnectResponse::new(ShareType::Pipe);
                Ok((NtStatus::Success, Some(response.serialize()?)))
            }
            Smb2Command::Create => {
                let request = Smb2CreateRequest::parse(body)?;
                if header.tree_id != TREE_ID || request.file_name != "srvsvc" {
                    return Ok((NtStatus::ObjectNameNotFound, None));
                }
                Ok((NtStatus::Success, Some(Smb2CreateResponse::new(PIPE_ID).serialize()?)))
            }
            Smb2Command::Ioctl => {
                let request = Smb2IoctlRequest::parse(body)?;
                assert_eq!(request.ctl_code, FSCTL_PIPE_TRANSCEIVE);
                assert_eq!(request.file_id, PIPE_ID);
                let output = self.rpc(&request.input_buffer)?;
                let response = Smb2IoctlResponse::new(FSCTL_PIPE_TRANSCEIVE, PIPE_ID, output);
                Ok((NtStatus::Success, Some(response.serialize()?)))
            }
            Smb2Command::Read => {
                let request = Smb2ReadRequest::parse(body)?;
                let take = (request.length as usize).min(self.pending_read.len());
                let data: Vec<u8> = self.pending_read.drain(..take).collect();
                Ok((NtStatus::Success, Some(Smb2ReadResponse::new(data).serialize()?)))
            }
            Smb2Command::Close => Ok((
                NtStatus::Success,
                Some(Smb2CloseResponse::default().serialize()?),
            )),
            Smb2Command::TreeDisconnect => Ok((
                NtStatus::Success,
                Some(Smb2TreeDisconnect::default().serialize()?),
            )),
            Smb2Command::Logoff => {
                self.stats.logoffs.fetch_add(1, Ordering::SeqCst);
                let status = self.options.logoff_status;
                if status == NtStatus::Success {
                    self.authenticated = false;
                    Ok((status, Some(Smb2Logoff::default().serialize()?)))
                } else {
                    Ok((status, None))
                }
            }
            _ => Ok((NtStatus::NotSupported, None)),
        }
    }

    fn session_setup(&mut self, body: &[u8]) -> Result<(NtStatus, Option<Vec<u8>>)> {
        let request = Smb2SessionSetupRequest::parse(body)?;
        let token = find_ntlm_token(&request.security_blob)
            .map(<[u8]>::to_vec)
            .unwrap_or_default();

        match token.get(8) {
            // NEGOTIATE
            Some(1) => {
                self.negotiate_token = token;

                let mut challenge = NtlmChallengeMessage::new("FAKESRV", SERVER_CHALLENGE);
                let info = &mut challenge.target_info;
                info.set_name(av_id::NB_COMPUTER_NAME, "FAKESRV");
                info.set_name(av_id::NB_DOMAIN_NAME, "WORKGROUP");
                info.set_name(av_id::DNS_COMPUTER_NAME, "fakesrv.test");
                if self.options.timestamp {
                    info.set_timestamp(utc_to_filetime(Utc::now()));
                }
                challenge.version = Some(NtlmVersion {
                    major: 6,
                    minor: 3,
                    build: 9600,
                    ntlm_revision: 15,
                });
                self.challenge_token = challenge.serialize()?;

                let blob = NegTokenResp {
                    neg_state: Some(NegState::AcceptIncomplete),
                    supported_mech: Some(NTLMSSP_OID.to_vec()),
                    response_token: Some(self.challenge_token.clone()),
                }
                .encode();
                let response = Smb2SessionSetupResponse::new(SessionFlags::empty(), blob);
                Ok((NtStatus::MoreProcessingRequired, Some(response.serialize()?)))
            }
            // AUTHENTICATE
            Some(3) if !self.challenge_token.is_empty() => {
                if !self.verify(&token)? {
                    return Ok((NtStatus::LogonFailure, None));
                }
                self.authenticated = true;
                self.stats.sessions.fetch_add(1, Ordering::SeqCst);

                let blob = NegTokenResp {
                    neg_state: Some(NegState::AcceptCompleted),
                    ..NegTokenResp::default()
                }
                .encode();
                let response = Smb2SessionSetupResponse::new(SessionFlags::empty(), blob);
                Ok((NtStatus::Success, Some(response.serialize()?)))
            }
            _ => Ok((NtStatus::InvalidParameter, None)),
        }
    }

    fn verify(&self, token: &[u8]) -> Result<bool> {
        let auth = NtlmAuthenticateMessage::parse(token)?;
        if auth.user_name != self.options.username {
            return Ok(false);
        }
        if let Some(domain) = &self.options.domain {
            if &auth.domain != domain {
                return Ok(false);
            }
        }

        let hash = ntlmv2_hash(&self.options.username, &auth.domain, &self.options.password)?;
        if !verify_ntlmv2_response(&hash, &SERVER_CHALLENGE, &auth.nt_response)? {
            return Ok(false);
        }

        if self.options.timestamp {
            let Some(mic) = auth.mic else {
                return Ok(false);
            };
            let key = ntlmv2_session_key(&hash, &auth.nt_response)?;
            let mut zeroed = token.to_vec();
            zeroed[MIC_OFFSET..MIC_OFFSET + 16].fill(0);
            let expected = hmac_md5(
                &key,
                &[
                    self.negotiate_token.as_slice(),
                    self.challenge_token.as_slice(),
                    zeroed.as_slice(),
                ],
            )?;
            if expected != mic {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn rpc(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let header = RpcHeader::parse(input)?;
        match header.packet_type {
            PacketType::Bind => {
                let bind = BindPacket::parse(input)?;
                assert_eq!(bind.abstract_syntax, interfaces::SRVSVC);
                assert_eq!(bind.transfer_syntax, interfaces::NDR);
                BindAckPacket::accept(&bind, "\\PIPE\\srvsvc").serialize()
            }
            PacketType::Request => {
                let request = RequestPacket::parse(input)?;
                if request.opnum != OPNUM_NETR_SHARE_ENUM_ALL {
                    return FaultPacket::new(request.call_id, request.context_id, 0x1c010002)
                        .serialize();
                }
                self.stats.share_enums.fetch_add(1, Ordering::SeqCst);

                let stub = encode_share_enum_all_response(&self.options.shares, 0)?;
                let mut fragments = ResponsePacket::fragments(
                    request.call_id,
                    request.context_id,
                    &stub,
                    self.options.max_frag,
                )
                .into_iter();

                // First fragment answers the IOCTL, the rest waits for READs
                let first = match fragments.next() {
                    Some(fragment) => fragment.serialize()?,
                    None => Vec::new(),
                };
                for fragment in fragments {
                    self.pending_read.extend_from_slice(&fragment.serialize()?);
                }
                Ok(first)
            }
            other => panic!("unexpected {:?} PDU on the pipe", other),
        }
    }
}
