//! NTLM authentication messages and the client side of the exchange
//!
//! Implements the three NTLMSSP messages (NEGOTIATE, CHALLENGE, AUTHENTICATE)
//! and an NTLMv2 client. The CHALLENGE target info is decoded into AV pairs so
//! callers can report the names the server discloses before authentication.

use crate::auth::ntlm_crypto::{
    generate_client_challenge, hmac_md5, lmv2_response, ntlmv2_hash, ntlmv2_response,
    ntlmv2_session_key, windows_timestamp_now, NtlmV2Blob,
};
use crate::error::{Error, Result};
use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::convert::TryFrom;
use std::fmt;
use std::io::{self, Read};

/// NTLM signature - "NTLMSSP\0"
pub const NTLMSSP_SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

/// Offset of the MIC field inside an AUTHENTICATE message
pub const MIC_OFFSET: usize = 72;

const NEGOTIATE_FIXED_SIZE: usize = 40;
const CHALLENGE_FIXED_SIZE: usize = 48;
const AUTHENTICATE_FIXED_SIZE: usize = 64;
const AUTHENTICATE_WITH_MIC_SIZE: usize = 88;

/// NTLM message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum NtlmMessageType {
    /// Type 1: Negotiate message (client -> server)
    Negotiate = 0x00000001,
    /// Type 2: Challenge message (server -> client)
    Challenge = 0x00000002,
    /// Type 3: Authenticate message (client -> server)
    Authenticate = 0x00000003,
}

impl TryFrom<u32> for NtlmMessageType {
    type Error = Error;

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        match value {
            0x00000001 => Ok(Self::Negotiate),
            0x00000002 => Ok(Self::Challenge),
            0x00000003 => Ok(Self::Authenticate),
            _ => Err(Error::ParseError(format!(
                "Invalid NTLM message type: {}",
                value
            ))),
        }
    }
}

bitflags! {
    /// NTLM negotiation flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NtlmFlags: u32 {
        const NEGOTIATE_UNICODE = 0x00000001;
        const NEGOTIATE_OEM = 0x00000002;
        const REQUEST_TARGET = 0x00000004;
        const NEGOTIATE_SIGN = 0x00000010;
        const NEGOTIATE_SEAL = 0x00000020;
        const NEGOTIATE_LM_KEY = 0x00000080;
        const NEGOTIATE_NTLM = 0x00000200;
        const NEGOTIATE_ANONYMOUS = 0x00000800;
        const NEGOTIATE_DOMAIN_SUPPLIED = 0x00001000;
        const NEGOTIATE_WORKSTATION_SUPPLIED = 0x00002000;
        const NEGOTIATE_ALWAYS_SIGN = 0x00008000;
        const TARGET_TYPE_DOMAIN = 0x00010000;
        const TARGET_TYPE_SERVER = 0x00020000;
        /// Extended session security
        const NEGOTIATE_EXTENDED_SECURITY = 0x00080000;
        const NEGOTIATE_IDENTIFY = 0x00100000;
        const REQUEST_NON_NT_SESSION_KEY = 0x00400000;
        const NEGOTIATE_TARGET_INFO = 0x00800000;
        const NEGOTIATE_VERSION = 0x02000000;
        const NEGOTIATE_128 = 0x20000000;
        const NEGOTIATE_KEY_EXCHANGE = 0x40000000;
        const NEGOTIATE_56 = 0x80000000;
    }
}

impl NtlmFlags {
    /// Flags offered by the client in its NEGOTIATE message
    pub fn client_default() -> Self {
        Self::NEGOTIATE_UNICODE
            | Self::REQUEST_TARGET
            | Self::NEGOTIATE_NTLM
            | Self::NEGOTIATE_ALWAYS_SIGN
            | Self::NEGOTIATE_EXTENDED_SECURITY
            | Self::NEGOTIATE_TARGET_INFO
            | Self::NEGOTIATE_128
            | Self::NEGOTIATE_56
            | Self::NEGOTIATE_VERSION
    }
}

/// Security buffer descriptor for NTLM messages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityBuffer {
    /// Length of the buffer data
    pub length: u16,
    /// Maximum length of the buffer
    pub max_length: u16,
    /// Offset from the beginning of the NTLM message
    pub offset: u32,
}

impl SecurityBuffer {
    pub fn with_data(data_len: usize, offset: usize) -> Self {
        Self {
            length: data_len as u16,
            max_length: data_len as u16,
            offset: offset as u32,
        }
    }

    pub fn parse(cursor: &mut io::Cursor<&[u8]>) -> Result<Self> {
        let length = cursor.read_u16::<LittleEndian>()?;
        let max_length = cursor.read_u16::<LittleEndian>()?;
        let offset = cursor.read_u32::<LittleEndian>()?;

        Ok(Self {
            length,
            max_length,
            offset,
        })
    }

    pub fn serialize(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.write_u16::<LittleEndian>(self.length)?;
        buf.write_u16::<LittleEndian>(self.max_length)?;
        buf.write_u32::<LittleEndian>(self.offset)?;
        Ok(())
    }

    /// Slice of `data` this buffer points at
    pub fn extract_data<'a>(&self, data: &'a [u8]) -> Result<&'a [u8]> {
        if self.length == 0 {
            return Ok(&[]);
        }
        let start = self.offset as usize;
        let end = start + self.length as usize;
        if end > data.len() {
            return Err(Error::BufferTooSmall {
                need: end,
                have: data.len(),
            });
        }
        Ok(&data[start..end])
    }
}

/// Smallest payload offset among non-empty buffers
fn payload_start(buffers: &[&SecurityBuffer]) -> Option<usize> {
    buffers
        .iter()
        .filter(|b| b.length > 0)
        .map(|b| b.offset as usize)
        .min()
}

fn read_signature(cursor: &mut io::Cursor<&[u8]>, expected: NtlmMessageType) -> Result<()> {
    let mut signature = [0u8; 8];
    cursor.read_exact(&mut signature)?;
    if &signature != NTLMSSP_SIGNATURE {
        return Err(Error::ParseError("Invalid NTLM signature".into()));
    }
    let message_type = NtlmMessageType::try_from(cursor.read_u32::<LittleEndian>()?)?;
    if message_type != expected {
        return Err(Error::ParseError(format!(
            "Expected NTLM {:?} message, got {:?}",
            expected, message_type
        )));
    }
    Ok(())
}

fn encode_string(text: &str, flags: NtlmFlags) -> Vec<u8> {
    if flags.contains(NtlmFlags::NEGOTIATE_UNICODE) {
        text.encode_utf16().flat_map(|ch| ch.to_le_bytes()).collect()
    } else {
        text.as_bytes().to_vec()
    }
}

fn decode_string(bytes: &[u8], flags: NtlmFlags) -> String {
    if flags.contains(NtlmFlags::NEGOTIATE_UNICODE) {
        decode_utf16(bytes)
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

fn decode_utf16(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// NTLM version information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtlmVersion {
    pub major: u8,
    pub minor: u8,
    pub build: u16,
    pub ntlm_revision: u8,
}

impl NtlmVersion {
    /// Version advertised by this client
    pub const CLIENT: NtlmVersion = NtlmVersion {
        major: 10,
        minor: 0,
        build: 19041,
        ntlm_revision: 15,
    };

    pub fn parse(cursor: &mut io::Cursor<&[u8]>) -> Result<Self> {
        let major = cursor.read_u8()?;
        let minor = cursor.read_u8()?;
        let build = cursor.read_u16::<LittleEndian>()?;
        let mut reserved = [0u8; 3];
        cursor.read_exact(&mut reserved)?;
        let ntlm_revision = cursor.read_u8()?;
        Ok(Self {
            major,
            minor,
            build,
            ntlm_revision,
        })
    }

    pub fn serialize(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.write_u8(self.major)?;
        buf.write_u8(self.minor)?;
        buf.write_u16::<LittleEndian>(self.build)?;
        buf.extend_from_slice(&[0, 0, 0]);
        buf.write_u8(self.ntlm_revision)?;
        Ok(())
    }
}

impl fmt::Display for NtlmVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} (build {})", self.major, self.minor, self.build)
    }
}

/// AV pair identifiers found in CHALLENGE target info
pub mod av_id {
    pub const EOL: u16 = 0x0000;
    pub const NB_COMPUTER_NAME: u16 = 0x0001;
    pub const NB_DOMAIN_NAME: u16 = 0x0002;
    pub const DNS_COMPUTER_NAME: u16 = 0x0003;
    pub const DNS_DOMAIN_NAME: u16 = 0x0004;
    pub const DNS_TREE_NAME: u16 = 0x0005;
    pub const FLAGS: u16 = 0x0006;
    pub const TIMESTAMP: u16 = 0x0007;
}

/// MsvAvFlags bit: the AUTHENTICATE message carries a MIC
pub const AV_FLAG_MIC_PRESENT: u32 = 0x00000002;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvPair {
    pub id: u16,
    pub value: Vec<u8>,
}

/// Decoded target info, pairs kept in wire order without the terminator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetInfo {
    pub pairs: Vec<AvPair>,
}

impl TargetInfo {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = io::Cursor::new(data);
        let mut pairs = Vec::new();

        while (cursor.position() as usize) + 4 <= data.len() {
            let id = cursor.read_u16::<LittleEndian>()?;
            let len = cursor.read_u16::<LittleEndian>()? as usize;
            if id == av_id::EOL {
                break;
            }
            let start = cursor.position() as usize;
            if start + len > data.len() {
                return Err(Error::BufferTooSmall {
                    need: start + len,
                    have: data.len(),
                });
            }
            pairs.push(AvPair {
                id,
                value: data[start..start + len].to_vec(),
            });
            cursor.set_position((start + len) as u64);
        }

        Ok(Self { pairs })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for pair in &self.pairs {
            buf.extend_from_slice(&pair.id.to_le_bytes());
            buf.extend_from_slice(&(pair.value.len() as u16).to_le_bytes());
            buf.extend_from_slice(&pair.value);
        }
        buf.extend_from_slice(&[0, 0, 0, 0]);
        buf
    }

    pub fn get(&self, id: u16) -> Option<&[u8]> {
        self.pairs
            .iter()
            .find(|pair| pair.id == id)
            .map(|pair| pair.value.as_slice())
    }

    /// UTF-16LE string value of a name pair
    pub fn name(&self, id: u16) -> Option<String> {
        self.get(id).map(decode_utf16)
    }

    pub fn set_name(&mut self, id: u16, value: &str) {
        self.set(id, encode_string(value, NtlmFlags::NEGOTIATE_UNICODE));
    }

    /// Server FILETIME, present on servers that expect a MIC
    pub fn timestamp(&self) -> Option<u64> {
        let value = self.get(av_id::TIMESTAMP)?;
        let bytes: [u8; 8] = value.try_into().ok()?;
        Some(u64::from_le_bytes(bytes))
    }

    pub fn set_timestamp(&mut self, filetime: u64) {
        self.set(av_id::TIMESTAMP, filetime.to_le_bytes().to_vec());
    }

    pub fn flags(&self) -> u32 {
        self.get(av_id::FLAGS)
            .and_then(|value| <[u8; 4]>::try_from(value).ok())
            .map(u32::from_le_bytes)
            .unwrap_or(0)
    }

    pub fn add_flags(&mut self, flags: u32) {
        let merged = self.flags() | flags;
        self.set(av_id::FLAGS, merged.to_le_bytes().to_vec());
    }

    fn set(&mut self, id: u16, value: Vec<u8>) {
        match self.pairs.iter_mut().find(|pair| pair.id == id) {
            Some(pair) => pair.value = value,
            None => self.pairs.push(AvPair { id, value }),
        }
    }
}

/// Type 1 message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtlmNegotiateMessage {
    pub flags: NtlmFlags,
    pub version: Option<NtlmVersion>,
}

impl NtlmNegotiateMessage {
    pub fn new(flags: NtlmFlags) -> Self {
        let version = flags
            .contains(NtlmFlags::NEGOTIATE_VERSION)
            .then_some(NtlmVersion::CLIENT);
        Self { flags, version }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 32 {
            return Err(Error::ParseError("NTLM negotiate message too short".into()));
        }

        let mut cursor = io::Cursor::new(data);
        read_signature(&mut cursor, NtlmMessageType::Negotiate)?;
        let flags = NtlmFlags::from_bits_truncate(cursor.read_u32::<LittleEndian>()?);
        let _domain = SecurityBuffer::parse(&mut cursor)?;
        let _workstation = SecurityBuffer::parse(&mut cursor)?;

        let version = if flags.contains(NtlmFlags::NEGOTIATE_VERSION)
            && data.len() >= NEGOTIATE_FIXED_SIZE
        {
            Some(NtlmVersion::parse(&mut cursor)?)
        } else {
            None
        };

        Ok(Self { flags, version })
    }

    /// Domain and workstation are never supplied; both buffers stay empty.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(NEGOTIATE_FIXED_SIZE);
        buf.extend_from_slice(NTLMSSP_SIGNATURE);
        buf.write_u32::<LittleEndian>(NtlmMessageType::Negotiate as u32)?;
        buf.write_u32::<LittleEndian>(self.flags.bits())?;

        let empty = SecurityBuffer::with_data(0, NEGOTIATE_FIXED_SIZE);
        empty.serialize(&mut buf)?;
        empty.serialize(&mut buf)?;

        match self.version {
            Some(version) => version.serialize(&mut buf)?,
            None => buf.extend_from_slice(&[0; 8]),
        }
        Ok(buf)
    }
}

/// Type 2 message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtlmChallengeMessage {
    pub flags: NtlmFlags,
    pub server_challenge: [u8; 8],
    pub target_name: String,
    pub target_info: TargetInfo,
    pub version: Option<NtlmVersion>,
}

impl NtlmChallengeMessage {
    pub fn new(target_name: impl Into<String>, server_challenge: [u8; 8]) -> Self {
        Self {
            flags: NtlmFlags::NEGOTIATE_UNICODE
                | NtlmFlags::REQUEST_TARGET
                | NtlmFlags::NEGOTIATE_NTLM
                | NtlmFlags::NEGOTIATE_ALWAYS_SIGN
                | NtlmFlags::TARGET_TYPE_SERVER
                | NtlmFlags::NEGOTIATE_EXTENDED_SECURITY
                | NtlmFlags::NEGOTIATE_TARGET_INFO
                | NtlmFlags::NEGOTIATE_128
                | NtlmFlags::NEGOTIATE_56,
            server_challenge,
            target_name: target_name.into(),
            target_info: TargetInfo::default(),
            version: None,
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < CHALLENGE_FIXED_SIZE {
            return Err(Error::ParseError("NTLM challenge message too short".into()));
        }

        let mut cursor = io::Cursor::new(data);
        read_signature(&mut cursor, NtlmMessageType::Challenge)?;

        let target_name_buf = SecurityBuffer::parse(&mut cursor)?;
        let flags = NtlmFlags::from_bits_truncate(cursor.read_u32::<LittleEndian>()?);
        let mut server_challenge = [0u8; 8];
        cursor.read_exact(&mut server_challenge)?;
        let mut reserved = [0u8; 8];
        cursor.read_exact(&mut reserved)?;
        let target_info_buf = SecurityBuffer::parse(&mut cursor)?;

        let payload = payload_start(&[&target_name_buf, &target_info_buf]).unwrap_or(data.len());
        let version = if flags.contains(NtlmFlags::NEGOTIATE_VERSION)
            && payload >= CHALLENGE_FIXED_SIZE + 8
            && data.len() >= CHALLENGE_FIXED_SIZE + 8
        {
            Some(NtlmVersion::parse(&mut cursor)?)
        } else {
            None
        };

        let target_name = decode_string(target_name_buf.extract_data(data)?, flags);
        let target_info = TargetInfo::parse(target_info_buf.extract_data(data)?)?;

        Ok(Self {
            flags,
            server_challenge,
            target_name,
            target_info,
            version,
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let target_name = encode_string(&self.target_name, self.flags);
        let target_info = if self.target_info.pairs.is_empty() {
            Vec::new()
        } else {
            self.target_info.to_bytes()
        };

        let mut flags = self.flags;
        flags.set(NtlmFlags::NEGOTIATE_VERSION, self.version.is_some());
        let mut offset = CHALLENGE_FIXED_SIZE + if self.version.is_some() { 8 } else { 0 };

        let mut buf = Vec::with_capacity(offset + target_name.len() + target_info.len());
        buf.extend_from_slice(NTLMSSP_SIGNATURE);
        buf.write_u32::<LittleEndian>(NtlmMessageType::Challenge as u32)?;

        SecurityBuffer::with_data(target_name.len(), offset).serialize(&mut buf)?;
        offset += target_name.len();

        buf.write_u32::<LittleEndian>(flags.bits())?;
        buf.extend_from_slice(&self.server_challenge);
        buf.extend_from_slice(&[0; 8]);
        SecurityBuffer::with_data(target_info.len(), offset).serialize(&mut buf)?;

        if let Some(version) = self.version {
            version.serialize(&mut buf)?;
        }

        buf.extend_from_slice(&target_name);
        buf.extend_from_slice(&target_info);
        Ok(buf)
    }
}

/// Type 3 message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtlmAuthenticateMessage {
    pub flags: NtlmFlags,
    pub lm_response: Vec<u8>,
    pub nt_response: Vec<u8>,
    pub domain: String,
    pub user_name: String,
    pub workstation: String,
    pub encrypted_session_key: Vec<u8>,
    pub version: Option<NtlmVersion>,
    pub mic: Option<[u8; 16]>,
}

impl NtlmAuthenticateMessage {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < AUTHENTICATE_FIXED_SIZE {
            return Err(Error::ParseError(
                "NTLM authenticate message too short".into(),
            ));
        }

        let mut cursor = io::Cursor::new(data);
        read_signature(&mut cursor, NtlmMessageType::Authenticate)?;

        let lm = SecurityBuffer::parse(&mut cursor)?;
        let nt = SecurityBuffer::parse(&mut cursor)?;
        let domain = SecurityBuffer::parse(&mut cursor)?;
        let user = SecurityBuffer::parse(&mut cursor)?;
        let workstation = SecurityBuffer::parse(&mut cursor)?;
        let session_key = SecurityBuffer::parse(&mut cursor)?;
        let flags = NtlmFlags::from_bits_truncate(cursor.read_u32::<LittleEndian>()?);

        let payload = payload_start(&[&lm, &nt, &domain, &user, &workstation, &session_key])
            .unwrap_or(data.len());
        let (version, mic) =
            if payload >= AUTHENTICATE_WITH_MIC_SIZE && data.len() >= AUTHENTICATE_WITH_MIC_SIZE {
                let version = NtlmVersion::parse(&mut cursor)?;
                let mut mic = [0u8; 16];
                cursor.read_exact(&mut mic)?;
                (Some(version), Some(mic))
            } else {
                (None, None)
            };

        Ok(Self {
            flags,
            lm_response: lm.extract_data(data)?.to_vec(),
            nt_response: nt.extract_data(data)?.to_vec(),
            domain: decode_string(domain.extract_data(data)?, flags),
            user_name: decode_string(user.extract_data(data)?, flags),
            workstation: decode_string(workstation.extract_data(data)?, flags),
            encrypted_session_key: session_key.extract_data(data)?.to_vec(),
            version,
            mic,
        })
    }

    /// Always emits the version and MIC fields; a missing MIC is written as zeros.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let domain = encode_string(&self.domain, self.flags);
        let user = encode_string(&self.user_name, self.flags);
        let workstation = encode_string(&self.workstation, self.flags);

        let fields: [&[u8]; 6] = [
            &self.lm_response,
            &self.nt_response,
            &domain,
            &user,
            &workstation,
            &self.encrypted_session_key,
        ];

        let mut buf = Vec::with_capacity(
            AUTHENTICATE_WITH_MIC_SIZE + fields.iter().map(|f| f.len()).sum::<usize>(),
        );
        buf.extend_from_slice(NTLMSSP_SIGNATURE);
        buf.write_u32::<LittleEndian>(NtlmMessageType::Authenticate as u32)?;

        let mut offset = AUTHENTICATE_WITH_MIC_SIZE;
        for field in &fields {
            SecurityBuffer::with_data(field.len(), offset).serialize(&mut buf)?;
            offset += field.len();
        }

        buf.write_u32::<LittleEndian>(self.flags.bits())?;
        self.version
            .unwrap_or(NtlmVersion::CLIENT)
            .serialize(&mut buf)?;
        buf.extend_from_slice(&self.mic.unwrap_or([0; 16]));

        for field in &fields {
            buf.extend_from_slice(field);
        }
        Ok(buf)
    }
}

/// NTLMv2 client context for one authentication exchange
#[derive(Clone)]
pub struct NtlmClient {
    username: String,
    password: String,
    domain: String,
    workstation: String,
    negotiate: Option<Vec<u8>>,
}

impl fmt::Debug for NtlmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NtlmClient")
            .field("username", &self.username)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

impl NtlmClient {
    /// `domain` is empty for local accounts
    pub fn new(username: &str, password: &str, domain: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            domain: domain.to_string(),
            workstation: String::new(),
            negotiate: None,
        }
    }

    /// Build the Type 1 message; kept for the MIC computed later
    pub fn negotiate_message(&mut self) -> Result<Vec<u8>> {
        let bytes = NtlmNegotiateMessage::new(NtlmFlags::client_default()).serialize()?;
        self.negotiate = Some(bytes.clone());
        Ok(bytes)
    }

    /// Answer the server's Type 2 message with an NTLMv2 Type 3 message
    pub fn authenticate_message(&self, challenge: &[u8]) -> Result<Vec<u8>> {
        let parsed = NtlmChallengeMessage::parse(challenge)?;
        let timestamp = parsed
            .target_info
            .timestamp()
            .unwrap_or_else(windows_timestamp_now);
        self.build_authenticate(challenge, &parsed, generate_client_challenge(), timestamp)
    }

    fn build_authenticate(
        &self,
        challenge_bytes: &[u8],
        challenge: &NtlmChallengeMessage,
        client_challenge: [u8; 8],
        timestamp: u64,
    ) -> Result<Vec<u8>> {
        let negotiate = self
            .negotiate
            .as_deref()
            .ok_or_else(|| Error::InvalidState("NTLM negotiate message not sent".into()))?;

        let hash = ntlmv2_hash(&self.username, &self.domain, &self.password)?;

        // Servers that send a timestamp expect a MIC and a zeroed LM response.
        let with_mic = challenge.target_info.timestamp().is_some();
        let mut target_info = challenge.target_info.clone();
        if with_mic {
            target_info.add_flags(AV_FLAG_MIC_PRESENT);
        }

        let blob = NtlmV2Blob::new(timestamp, client_challenge, target_info.to_bytes());
        let nt_response = ntlmv2_response(&hash, &challenge.server_challenge, &blob)?;
        let lm_response = if with_mic {
            vec![0; 24]
        } else {
            lmv2_response(&hash, &challenge.server_challenge, &client_challenge)?
        };
        let session_key = ntlmv2_session_key(&hash, &nt_response)?;

        let flags = challenge.flags & NtlmFlags::client_default();

        let message = NtlmAuthenticateMessage {
            flags,
            lm_response,
            nt_response,
            domain: self.domain.clone(),
            user_name: self.username.clone(),
            workstation: self.workstation.clone(),
            encrypted_session_key: Vec::new(),
            version: Some(NtlmVersion::CLIENT),
            mic: None,
        };

        let mut bytes = message.serialize()?;
        if with_mic {
            let mic = hmac_md5(&session_key, &[negotiate, challenge_bytes, &bytes[..]])?;
            bytes[MIC_OFFSET..MIC_OFFSET + 16].copy_from_slice(&mic);
        }
        Ok(bytes)
    }
}
