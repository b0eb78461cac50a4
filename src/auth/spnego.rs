//! SPNEGO wrapping of NTLM tokens
//!
//! Only the subset of DER needed to carry NTLMSSP through SMB2 SESSION_SETUP:
//! the initial `negTokenInit` (GSS-API framed) and `negTokenResp`.

use crate::auth::ntlm::NTLMSSP_SIGNATURE;
use crate::error::{Error, Result};

/// 1.3.6.1.5.5.2
const SPNEGO_OID: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x02];
/// 1.3.6.1.4.1.311.2.2.10
pub const NTLMSSP_OID: &[u8] = &[0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x02, 0x0a];

mod tag {
    pub const APPLICATION_0: u8 = 0x60;
    pub const NEG_TOKEN_INIT: u8 = 0xa0;
    pub const NEG_TOKEN_RESP: u8 = 0xa1;
    pub const SEQUENCE: u8 = 0x30;
    pub const OID: u8 = 0x06;
    pub const OCTET_STRING: u8 = 0x04;
    pub const ENUMERATED: u8 = 0x0a;
    pub const CONTEXT_0: u8 = 0xa0;
    pub const CONTEXT_1: u8 = 0xa1;
    pub const CONTEXT_2: u8 = 0xa2;
}

/// negState values of a `negTokenResp`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegState {
    AcceptCompleted = 0,
    AcceptIncomplete = 1,
    Reject = 2,
    RequestMic = 3,
}

impl TryFrom<u8> for NegState {
    type Error = Error;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::AcceptCompleted),
            1 => Ok(Self::AcceptIncomplete),
            2 => Ok(Self::Reject),
            3 => Ok(Self::RequestMic),
            _ => Err(Error::ParseError(format!("Invalid SPNEGO negState: {}", value))),
        }
    }
}

fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
    } else if len <= 0xff {
        out.push(0x81);
        out.push(len as u8);
    } else if len <= 0xffff {
        out.push(0x82);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(0x83);
        out.extend_from_slice(&(len as u32).to_be_bytes()[1..]);
    }
}

fn tlv(tag: u8, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 6);
    out.push(tag);
    encode_length(value.len(), &mut out);
    out.extend_from_slice(value);
    out
}

/// Split one DER element off the front of `data`: (tag, value, rest)
fn read_tlv(data: &[u8]) -> Result<(u8, &[u8], &[u8])> {
    if data.len() < 2 {
        return Err(Error::ParseError("Truncated DER element".into()));
    }
    let tag = data[0];
    let first = data[1];
    let (len, header) = if first < 0x80 {
        (first as usize, 2)
    } else {
        let count = (first & 0x7f) as usize;
        if count == 0 || count > 4 || data.len() < 2 + count {
            return Err(Error::ParseError("Invalid DER length".into()));
        }
        let len = data[2..2 + count]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize);
        (len, 2 + count)
    };
    let end = header
        .checked_add(len)
        .ok_or_else(|| Error::ParseError("Invalid DER length".into()))?;
    if data.len() < end {
        return Err(Error::BufferTooSmall {
            need: end,
            have: data.len(),
        });
    }
    Ok((tag, &data[header..end], &data[end..]))
}

fn expect_tlv(data: &[u8], expected: u8) -> Result<(&[u8], &[u8])> {
    let (tag, value, rest) = read_tlv(data)?;
    if tag != expected {
        return Err(Error::ParseError(format!(
            "Unexpected DER tag 0x{:02x}, wanted 0x{:02x}",
            tag, expected
        )));
    }
    Ok((value, rest))
}

/// Initial GSS-API token offering NTLMSSP with `mech_token` as the first NTLM message
pub fn encode_neg_token_init(mech_token: &[u8]) -> Vec<u8> {
    let mech_types = tlv(tag::CONTEXT_0, &tlv(tag::SEQUENCE, &tlv(tag::OID, NTLMSSP_OID)));
    let token = tlv(tag::CONTEXT_2, &tlv(tag::OCTET_STRING, mech_token));

    let mut fields = mech_types;
    fields.extend_from_slice(&token);
    let neg_token_init = tlv(tag::NEG_TOKEN_INIT, &tlv(tag::SEQUENCE, &fields));

    let mut body = tlv(tag::OID, SPNEGO_OID);
    body.extend_from_slice(&neg_token_init);
    tlv(tag::APPLICATION_0, &body)
}

/// Decoded `negTokenResp`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NegTokenResp {
    pub neg_state: Option<NegState>,
    pub supported_mech: Option<Vec<u8>>,
    pub response_token: Option<Vec<u8>>,
}

impl NegTokenResp {
    /// Continuation token sent by the client
    pub fn with_token(token: &[u8]) -> Self {
        Self {
            response_token: Some(token.to_vec()),
            ..Self::default()
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut fields = Vec::new();
        if let Some(state) = self.neg_state {
            fields.extend(tlv(tag::CONTEXT_0, &tlv(tag::ENUMERATED, &[state as u8])));
        }
        if let Some(mech) = &self.supported_mech {
            fields.extend(tlv(tag::CONTEXT_1, &tlv(tag::OID, mech)));
        }
        if let Some(token) = &self.response_token {
            fields.extend(tlv(tag::CONTEXT_2, &tlv(tag::OCTET_STRING, token)));
        }
        tlv(tag::NEG_TOKEN_RESP, &tlv(tag::SEQUENCE, &fields))
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let (outer, _) = expect_tlv(data, tag::NEG_TOKEN_RESP)?;
        let (mut fields, _) = expect_tlv(outer, tag::SEQUENCE)?;

        let mut resp = Self::default();
        while !fields.is_empty() {
            let (field_tag, value, rest) = read_tlv(fields)?;
            match field_tag {
                tag::CONTEXT_0 => {
                    let (state, _) = expect_tlv(value, tag::ENUMERATED)?;
                    let byte = state
                        .first()
                        .ok_or_else(|| Error::ParseError("Empty SPNEGO negState".into()))?;
                    resp.neg_state = Some(NegState::try_from(*byte)?);
                }
                tag::CONTEXT_1 => {
                    let (mech, _) = expect_tlv(value, tag::OID)?;
                    resp.supported_mech = Some(mech.to_vec());
                }
                tag::CONTEXT_2 => {
                    let (token, _) = expect_tlv(value, tag::OCTET_STRING)?;
                    resp.response_token = Some(token.to_vec());
                }
                // mechListMIC and unknown fields
                _ => {}
            }
            fields = rest;
        }
        Ok(resp)
    }
}

/// NTLM token carried by a server SESSION_SETUP blob
///
/// Accepts a bare NTLMSSP message as well as a `negTokenResp`. A rejected
/// negotiation is an authentication failure.
pub fn server_ntlm_token(blob: &[u8]) -> Result<Vec<u8>> {
    if blob.starts_with(NTLMSSP_SIGNATURE) {
        return Ok(blob.to_vec());
    }
    let resp = NegTokenResp::parse(blob)?;
    if resp.neg_state == Some(NegState::Reject) {
        return Err(Error::AuthenticationFailed(
            "server rejected SPNEGO negotiation".into(),
        ));
    }
    if let Some(mech) = &resp.supported_mech {
        if mech.as_slice() != NTLMSSP_OID {
            return Err(Error::AuthenticationFailed(
                "server selected a mechanism other than NTLMSSP".into(),
            ));
        }
    }
    resp.response_token
        .ok_or_else(|| Error::Protocol("SPNEGO response carries no NTLM token".into()))
}

/// Locate the NTLMSSP message inside any SPNEGO token
pub fn find_ntlm_token(blob: &[u8]) -> Option<&[u8]> {
    blob.windows(NTLMSSP_SIGNATURE.len())
        .position(|window| window == NTLMSSP_SIGNATURE)
        .map(|start| &blob[start..])
}
