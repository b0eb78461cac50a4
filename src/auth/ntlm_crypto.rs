//! NTLM cryptographic functions

use crate::error::{Error, Result};
use crate::protocol::messages::negotiate::utc_to_filetime;
use byteorder::{LittleEndian, WriteBytesExt};
use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;
use rand::RngCore;

/// HMAC-MD5 over the concatenation of `parts`
pub fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 16]> {
    let mut mac = Hmac::<Md5>::new_from_slice(key)
        .map_err(|e| Error::CryptoError(format!("HMAC error: {}", e)))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

fn utf16le(text: &str) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(text.len() * 2);
    for ch in text.encode_utf16() {
        bytes.write_u16::<LittleEndian>(ch)?;
    }
    Ok(bytes)
}

/// NT one-way function: MD4 of the UTF-16LE password
pub fn ntlm_hash(password: &str) -> Result<[u8; 16]> {
    let mut hasher = Md4::new();
    hasher.update(utf16le(password)?);
    Ok(hasher.finalize().into())
}

/// NTOWFv2: HMAC-MD5(NT hash, UPPER(user) + domain)
///
/// Only the user name is uppercased; the domain is used as given.
pub fn ntlmv2_hash(username: &str, domain: &str, password: &str) -> Result<[u8; 16]> {
    let key = ntlm_hash(password)?;
    let identity = utf16le(&format!("{}{}", username.to_uppercase(), domain))?;
    hmac_md5(&key, &[identity.as_slice()])
}

/// LMv2 response: HMAC-MD5(hash, server + client challenge) followed by the client challenge
pub fn lmv2_response(
    ntlmv2_hash: &[u8],
    server_challenge: &[u8; 8],
    client_challenge: &[u8; 8],
) -> Result<Vec<u8>> {
    let proof = hmac_md5(ntlmv2_hash, &[&server_challenge[..], &client_challenge[..]])?;
    let mut response = proof.to_vec();
    response.extend_from_slice(client_challenge);
    Ok(response)
}

/// Client blob hashed into the NTLMv2 response
#[derive(Debug, Clone)]
pub struct NtlmV2Blob {
    pub timestamp: u64,
    pub client_challenge: [u8; 8],
    /// Target info as sent back to the server, terminator included
    pub target_info: Vec<u8>,
}

impl NtlmV2Blob {
    pub fn new(timestamp: u64, client_challenge: [u8; 8], target_info: Vec<u8>) -> Self {
        Self {
            timestamp,
            client_challenge,
            target_info,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut blob = Vec::with_capacity(32 + self.target_info.len());
        // RespType, HiRespType and reserved
        blob.extend_from_slice(&[0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        blob.write_u64::<LittleEndian>(self.timestamp)?;
        blob.extend_from_slice(&self.client_challenge);
        blob.extend_from_slice(&[0x00; 4]);
        blob.extend_from_slice(&self.target_info);
        blob.extend_from_slice(&[0x00; 4]);
        Ok(blob)
    }
}

/// NTLMv2 response: NTProofStr followed by the blob
pub fn ntlmv2_response(
    ntlmv2_hash: &[u8],
    server_challenge: &[u8; 8],
    blob: &NtlmV2Blob,
) -> Result<Vec<u8>> {
    let blob_bytes = blob.to_bytes()?;
    let proof = hmac_md5(ntlmv2_hash, &[&server_challenge[..], &blob_bytes[..]])?;

    let mut response = proof.to_vec();
    response.extend_from_slice(&blob_bytes);
    Ok(response)
}

/// Check an NTLMv2 response against the expected hash
pub fn verify_ntlmv2_response(
    ntlmv2_hash: &[u8],
    server_challenge: &[u8; 8],
    nt_response: &[u8],
) -> Result<bool> {
    if nt_response.len() < 16 + 28 {
        return Ok(false);
    }
    let (proof, blob) = nt_response.split_at(16);
    let expected = hmac_md5(ntlmv2_hash, &[&server_challenge[..], blob])?;
    Ok(expected.as_slice() == proof)
}

/// Session base key: HMAC-MD5(hash, NTProofStr)
pub fn ntlmv2_session_key(ntlmv2_hash: &[u8], nt_response: &[u8]) -> Result<[u8; 16]> {
    if nt_response.len() < 16 {
        return Err(Error::CryptoError("NTLMv2 response too short".into()));
    }
    hmac_md5(ntlmv2_hash, &[&nt_response[..16]])
}

pub fn generate_client_challenge() -> [u8; 8] {
    let mut challenge = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut challenge);
    challenge
}

/// Current time as a Windows FILETIME
pub fn windows_timestamp_now() -> u64 {
    utc_to_filetime(chrono::Utc::now())
}
