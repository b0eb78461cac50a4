//! SMB2 client implementation
//!
//! [`SmbConnection`] runs single SMB2 exchanges over one [`SmbTransport`].
//! [`SmbDialer`] and [`SmbSession`] sequence them into the handshake, share
//! enumeration and logoff the session state machine asks for.

mod dialer;
mod info;
mod rpc;

pub use dialer::{SmbDialer, SmbSession};
pub use info::ServerInfo;
pub use rpc::RpcPipe;

use crate::auth::ntlm::{NtlmChallengeMessage, NtlmClient};
use crate::auth::spnego::{encode_neg_token_init, server_ntlm_token, NegState, NegTokenResp};
use crate::auth::Credentials;
use crate::error::{Error, NtStatus, Result};
use crate::protocol::messages::{
    decode_message, encode_message, FileId, SessionFlags, Smb2CloseRequest, Smb2CloseResponse,
    Smb2CreateRequest, Smb2CreateResponse, Smb2Header, Smb2IoctlRequest, Smb2IoctlResponse,
    Smb2Logoff, Smb2NegotiateRequest, Smb2NegotiateResponse, Smb2ReadRequest, Smb2ReadResponse,
    Smb2SessionSetupRequest, Smb2SessionSetupResponse, Smb2TreeConnectRequest,
    Smb2TreeConnectResponse, Smb2TreeDisconnect, SmbMessage,
};
use crate::protocol::smb2_constants::{Smb2Command, Smb2Dialect, UNSOLICITED_MESSAGE_ID};
use crate::transport::SmbTransport;
use tracing::{debug, trace, warn};

/// Name used in UNC paths when the peer address is unknown
const FALLBACK_SERVER_NAME: &str = "*SMBSERVER";

/// Largest READ issued before the server has told us its limit
const DEFAULT_MAX_READ: u32 = 65536;

/// Decode a response body; running short is a malformed reply
fn parse_body<R: SmbMessage>(command: Smb2Command, body: &[u8]) -> Result<R> {
    R::parse(body).map_err(|e| e.truncated_in(format!("{:?} response", command)))
}

/// One SMB2 connection and the session established on it
pub struct SmbConnection {
    transport: Box<dyn SmbTransport>,
    message_id: u64,
    session_id: u64,
    server_name: String,
    dialect: Option<Smb2Dialect>,
    max_read_size: u32,
}

impl SmbConnection {
    pub fn new(transport: Box<dyn SmbTransport>) -> Self {
        let server_name = transport
            .remote_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|_| FALLBACK_SERVER_NAME.to_string());

        Self {
            transport,
            message_id: 0,
            session_id: 0,
            server_name,
            dialect: None,
            max_read_size: DEFAULT_MAX_READ,
        }
    }

    /// Server name used in `\\server\share` paths
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn dialect(&self) -> Option<Smb2Dialect> {
        self.dialect
    }

    /// Send one request and wait for its final response.
    ///
    /// Success and the statuses in `accepted` return the response; any
    /// other status becomes [`Error::Status`].
    async fn request<M: SmbMessage>(
        &mut self,
        command: Smb2Command,
        tree_id: u32,
        body: &M,
        accepted: &[NtStatus],
    ) -> Result<(Smb2Header, Vec<u8>)> {
        let message_id = self.message_id;
        self.message_id += 1;

        let header = Smb2Header::request(command, message_id, self.session_id, tree_id);
        let bytes = encode_message(&header, body)?;
        trace!(?command, message_id, len = bytes.len(), "sending request");
        self.transport.send_message(&bytes).await?;

        loop {
            let frame = self.transport.receive_message().await?;
            let (response, body) = decode_message(&frame)?;

            if !response.is_response() {
                return Err(Error::Protocol(format!(
                    "server sent a request while {:?} was outstanding",
                    command
                )));
            }
            if response.message_id == UNSOLICITED_MESSAGE_ID {
                debug!(command = ?response.command, "ignoring unsolicited server message");
                continue;
            }
            if response.message_id != message_id {
                return Err(Error::Protocol(format!(
                    "response for message {} while waiting for {}",
                    response.message_id, message_id
                )));
            }
            if response.is_async() && response.status == NtStatus::Pending.to_u32() {
                trace!(?command, message_id, "interim response");
                continue;
            }
            if response.command != command {
                return Err(Error::Protocol(format!(
                    "{:?} answered with {:?}",
                    command, response.command
                )));
            }

            let status = response.status;
            if status != NtStatus::Success.to_u32()
                && !accepted.iter().any(|s| s.to_u32() == status)
            {
                return Err(Error::Status { command, status });
            }
            return Ok((response, body.to_vec()));
        }
    }

    /// Negotiate the dialect
    pub async fn negotiate(&mut self) -> Result<Smb2NegotiateResponse> {
        let request = Smb2NegotiateRequest::new(Smb2Dialect::client_dialects());
        let (_, body) = self
            .request(Smb2Command::Negotiate, 0, &request, &[])
            .await?;
        let response = parse_body::<Smb2NegotiateResponse>(Smb2Command::Negotiate, &body)?;

        self.dialect = Some(response.dialect_revision);
        if response.max_read_size > 0 {
            self.max_read_size = response.max_read_size.min(DEFAULT_MAX_READ);
        }
        debug!(
            dialect = %response.dialect_revision,
            server_guid = %response.server_guid,
            "negotiated"
        );
        if response.signing_required() {
            warn!("server requires signing, which this client does not implement");
        }
        Ok(response)
    }

    async fn session_setup(
        &mut self,
        security_blob: Vec<u8>,
        accepted: &[NtStatus],
    ) -> Result<(Smb2Header, Smb2SessionSetupResponse)> {
        let request = Smb2SessionSetupRequest::new(security_blob);
        let (header, body) = self
            .request(Smb2Command::SessionSetup, 0, &request, accepted)
            .await?;
        let response = parse_body(Smb2Command::SessionSetup, &body)?;
        Ok((header, response))
    }

    /// First session setup round: returns the NTLM CHALLENGE bytes
    async fn ntlm_challenge(&mut self, ntlm: &mut NtlmClient) -> Result<Vec<u8>> {
        let negotiate = ntlm.negotiate_message()?;
        let (header, response) = self
            .session_setup(
                encode_neg_token_init(&negotiate),
                &[NtStatus::MoreProcessingRequired],
            )
            .await?;

        if header.status != NtStatus::MoreProcessingRequired.to_u32() {
            return Err(Error::Protocol(
                "session setup completed without an NTLM challenge".into(),
            ));
        }
        self.session_id = header.session_id;
        debug!(session_id = self.session_id, "received NTLM challenge");

        server_ntlm_token(&response.security_blob).map_err(|e| e.truncated_in("SPNEGO response"))
    }

    /// Two-round SPNEGO/NTLMv2 session setup
    pub async fn authenticate(&mut self, credentials: &Credentials) -> Result<()> {
        let mut ntlm = NtlmClient::new(
            &credentials.username,
            &credentials.password,
            credentials.ntlm_domain(),
        );
        let challenge = self.ntlm_challenge(&mut ntlm).await?;

        let authenticate = ntlm.authenticate_message(&challenge)?;
        let blob = NegTokenResp::with_token(&authenticate).encode();
        let (header, response) = self.session_setup(blob, &[]).await?;

        if !response.security_blob.is_empty() {
            let resp = NegTokenResp::parse(&response.security_blob)
                .map_err(|e| e.truncated_in("SPNEGO response"))?;
            if resp.neg_state == Some(NegState::Reject) {
                return Err(Error::AuthenticationFailed(
                    "server rejected the NTLM response".into(),
                ));
            }
        }

        self.session_id = header.session_id;
        if response.session_flags.contains(SessionFlags::IS_GUEST) {
            warn!(user = %credentials.username, "server logged the session on as guest");
        }
        debug!(
            session_id = self.session_id,
            flags = ?response.session_flags,
            "session established"
        );
        Ok(())
    }

    /// Run only the first NTLM round and return the decoded challenge
    pub async fn challenge(&mut self) -> Result<NtlmChallengeMessage> {
        let mut ntlm = NtlmClient::new("", "", "");
        let token = self.ntlm_challenge(&mut ntlm).await?;
        NtlmChallengeMessage::parse(&token).map_err(|e| e.truncated_in("NTLM challenge"))
    }

    /// Connect to `share` on this server and return the tree id
    pub async fn tree_connect(&mut self, share: &str) -> Result<u32> {
        let path = format!("\\\\{}\\{}", self.server_name, share);
        let request = Smb2TreeConnectRequest::new(path.clone());
        let (header, body) = self
            .request(Smb2Command::TreeConnect, 0, &request, &[])
            .await?;
        let response = parse_body::<Smb2TreeConnectResponse>(Smb2Command::TreeConnect, &body)?;
        debug!(%path, tree_id = header.tree_id, share_type = ?response.share_type, "tree connected");
        Ok(header.tree_id)
    }

    pub async fn tree_disconnect(&mut self, tree_id: u32) -> Result<()> {
        let (_, body) = self
            .request(
                Smb2Command::TreeDisconnect,
                tree_id,
                &Smb2TreeDisconnect::default(),
                &[],
            )
            .await?;
        parse_body::<Smb2TreeDisconnect>(Smb2Command::TreeDisconnect, &body)?;
        debug!(tree_id, "tree disconnected");
        Ok(())
    }

    /// Open a named pipe on an IPC$ tree
    pub async fn open_pipe(&mut self, tree_id: u32, name: &str) -> Result<FileId> {
        let request = Smb2CreateRequest::open_pipe(name);
        let (_, body) = self
            .request(Smb2Command::Create, tree_id, &request, &[])
            .await?;
        let response = parse_body::<Smb2CreateResponse>(Smb2Command::Create, &body)?;
        debug!(pipe = name, file_id = ?response.file_id, "pipe opened");
        Ok(response.file_id)
    }

    /// Write `input` to a pipe and read its reply in one IOCTL.
    ///
    /// A reply larger than the output buffer comes back with
    /// STATUS_BUFFER_OVERFLOW; the rest is fetched with [`read`](Self::read).
    pub async fn transceive(&mut self, tree_id: u32, file_id: FileId, input: Vec<u8>) -> Result<Vec<u8>> {
        let request = Smb2IoctlRequest::pipe_transceive(file_id, input);
        let (_, body) = self
            .request(Smb2Command::Ioctl, tree_id, &request, &[NtStatus::BufferOverflow])
            .await?;
        let response: Smb2IoctlResponse = parse_body(Smb2Command::Ioctl, &body)?;
        Ok(response.output_buffer)
    }

    pub async fn read(&mut self, tree_id: u32, file_id: FileId) -> Result<Vec<u8>> {
        let request = Smb2ReadRequest::new(file_id, 0, self.max_read_size);
        let (_, body) = self
            .request(Smb2Command::Read, tree_id, &request, &[NtStatus::BufferOverflow])
            .await?;
        let response: Smb2ReadResponse = parse_body(Smb2Command::Read, &body)?;
        Ok(response.data)
    }

    pub async fn close(&mut self, tree_id: u32, file_id: FileId) -> Result<()> {
        let (_, body) = self
            .request(Smb2Command::Close, tree_id, &Smb2CloseRequest::new(file_id), &[])
            .await?;
        parse_body::<Smb2CloseResponse>(Smb2Command::Close, &body)?;
        Ok(())
    }

    /// End the session; the connection stays open
    pub async fn logoff(&mut self) -> Result<()> {
        let (_, body) = self
            .request(Smb2Command::Logoff, 0, &Smb2Logoff::default(), &[])
            .await?;
        parse_body::<Smb2Logoff>(Smb2Command::Logoff, &body)?;
        debug!(session_id = self.session_id, "logged off");
        self.session_id = 0;
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        self.transport.close().await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocol::smb2_constants::header_flags;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    /// Transport that replays canned responses and records what was sent
    pub(crate) struct ScriptedTransport {
        pub responses: VecDeque<Vec<u8>>,
        pub sent: Arc<Mutex<Vec<Vec<u8>>>>,
        pub closed: bool,
    }

    impl ScriptedTransport {
        pub fn new(responses: Vec<Vec<u8>>) -> (Self, Arc<Mutex<Vec<Vec<u8>>>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            let transport = Self {
                responses: responses.into(),
                sent: sent.clone(),
                closed: false,
            };
            (transport, sent)
        }
    }

    #[async_trait]
    impl SmbTransport for ScriptedTransport {
        async fn send_message(&mut self, payload: &[u8]) -> Result<()> {
            self.sent.lock().unwrap().push(payload.to_vec());
            Ok(())
        }

        async fn receive_message(&mut self) -> Result<Vec<u8>> {
            self.responses.pop_front().ok_or(Error::ConnectionClosed)
        }

        fn is_connected(&self) -> bool {
            !self.closed
        }

        async fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }

        fn remote_addr(&self) -> Result<SocketAddr> {
            Ok("192.0.2.10:445".parse().unwrap())
        }
    }

    pub(crate) fn response<M: SmbMessage>(command: Smb2Command, message_id: u64, status: NtStatus, body: &M) -> Vec<u8> {
        let request = Smb2Header::request(command, message_id, 0x55, 0);
        let header = Smb2Header::response_to(&request, status.to_u32());
        encode_message(&header, body).unwrap()
    }

    fn sent_headers(sent: &Arc<Mutex<Vec<Vec<u8>>>>) -> Vec<Smb2Header> {
        sent.lock()
            .unwrap()
            .iter()
            .map(|frame| decode_message(frame).unwrap().0)
            .collect()
    }

    #[tokio::test]
    async fn test_message_ids_start_at_zero() {
        let (transport, sent) = ScriptedTransport::new(vec![
            response(
                Smb2Command::Negotiate,
                0,
                NtStatus::Success,
                &Smb2NegotiateResponse::new(Smb2Dialect::Smb210),
            ),
            response(Smb2Command::Logoff, 1, NtStatus::Success, &Smb2Logoff::default()),
        ]);
        let mut conn = SmbConnection::new(Box::new(transport));

        let negotiated = conn.negotiate().await.unwrap();
        assert_eq!(negotiated.dialect_revision, Smb2Dialect::Smb210);
        assert_eq!(conn.dialect(), Some(Smb2Dialect::Smb210));
        conn.logoff().await.unwrap();

        let ids: Vec<u64> = sent_headers(&sent).iter().map(|h| h.message_id).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_interim_and_unsolicited_responses_skipped() {
        let request = Smb2Header::request(Smb2Command::Logoff, 0, 0, 0);
        let mut interim = Smb2Header::response_to(&request, NtStatus::Pending.to_u32());
        interim.flags |= header_flags::ASYNC_COMMAND;
        let mut unsolicited = Smb2Header::response_to(&request, 0);
        unsolicited.message_id = UNSOLICITED_MESSAGE_ID;

        let (transport, _) = ScriptedTransport::new(vec![
            encode_message(&unsolicited, &Smb2Logoff::default()).unwrap(),
            encode_message(&interim, &Smb2Logoff::default()).unwrap(),
            response(Smb2Command::Logoff, 0, NtStatus::Success, &Smb2Logoff::default()),
        ]);
        let mut conn = SmbConnection::new(Box::new(transport));
        conn.logoff().await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_status_is_reported() {
        let (transport, _) = ScriptedTransport::new(vec![response(
            Smb2Command::TreeConnect,
            0,
            NtStatus::AccessDenied,
            &Smb2TreeDisconnect::default(),
        )]);
        let mut conn = SmbConnection::new(Box::new(transport));

        let err = conn.tree_connect("IPC$").await.unwrap_err();
        assert_eq!(err.status(), Some(NtStatus::AccessDenied));
    }

    #[tokio::test]
    async fn test_mismatched_message_id_rejected() {
        let (transport, _) = ScriptedTransport::new(vec![response(
            Smb2Command::Logoff,
            7,
            NtStatus::Success,
            &Smb2Logoff::default(),
        )]);
        let mut conn = SmbConnection::new(Box::new(transport));
        assert!(matches!(conn.logoff().await, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_tree_connect_uses_peer_address() {
        let (transport, sent) = ScriptedTransport::new(vec![response(
            Smb2Command::TreeConnect,
            0,
            NtStatus::Success,
            &Smb2TreeConnectResponse::new(crate::protocol::messages::ShareType::Pipe),
        )]);
        let mut conn = SmbConnection::new(Box::new(transport));
        assert_eq!(conn.server_name(), "192.0.2.10");

        conn.tree_connect("IPC$").await.unwrap();
        let frames = sent.lock().unwrap();
        let (_, body) = decode_message(&frames[0]).unwrap();
        let request = Smb2TreeConnectRequest::parse(body).unwrap();
        assert_eq!(request.path, "\\\\192.0.2.10\\IPC$");
    }

    #[tokio::test]
    async fn test_truncated_logoff_reply_is_malformed() {
        let request = Smb2Header::request(Smb2Command::Logoff, 0, 0x55, 0);
        let header = Smb2Header::response_to(&request, 0);
        let mut frame = header.serialize().unwrap();
        frame.extend_from_slice(&[4, 0]);

        let (transport, _) = ScriptedTransport::new(vec![frame]);
        let mut conn = SmbConnection::new(Box::new(transport));
        let err = conn.logoff().await.unwrap_err();
        assert!(matches!(err, Error::ParseError(_)));
        assert!(!err.is_session_terminated());
    }

    #[tokio::test]
    async fn test_closed_transport() {
        let (transport, _) = ScriptedTransport::new(Vec::new());
        let mut conn = SmbConnection::new(Box::new(transport));
        let err = conn.negotiate().await.unwrap_err();
        assert!(err.is_session_terminated());
    }
}
