//! SRVSVC NetrShareEnumAll marshalling

use crate::dcerpc::ndr::{NdrDecoder, NdrEncoder};
use crate::error::{Error, Result};

/// NetrShareEnumAll operation number
pub const OPNUM_NETR_SHARE_ENUM_ALL: u16 = 15;

/// Pipe name opened on IPC$
pub const SRVSVC_PIPE: &str = "srvsvc";

/// Share type values (STYPE_*)
pub mod share_type {
    pub const DISKTREE: u32 = 0x0000_0000;
    pub const PRINTQ: u32 = 0x0000_0001;
    pub const DEVICE: u32 = 0x0000_0002;
    pub const IPC: u32 = 0x0000_0003;
    pub const SPECIAL: u32 = 0x8000_0000;
}

/// ERROR_MORE_DATA: the server truncated the list
const WERR_MORE_DATA: u32 = 234;

/// SHARE_INFO_1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareInfo1 {
    pub name: String,
    pub share_type: u32,
    pub remark: String,
}

/// Stub data for NetrShareEnumAll at level 1
///
/// `server_name` is the UNC server name, e.g. `\\10.0.0.5`.
pub fn encode_share_enum_all_request(server_name: &str) -> Result<Vec<u8>> {
    let mut encoder = NdrEncoder::new();

    // ServerName: [unique, string] wchar_t*
    encoder.encode_unique_ptr(Some(&server_name), |enc, name| enc.encode_string(name))?;

    // InfoStruct: level, union switch, then a SHARE_INFO_1_CONTAINER with no buffer
    encoder.encode_u32(1)?;
    encoder.encode_u32(1)?;
    encoder.encode_referent()?;
    encoder.encode_u32(0)?;
    encoder.encode_null_ptr()?;

    // PreferedMaximumLength: everything in one reply
    encoder.encode_u32(u32::MAX)?;
    // ResumeHandle
    encoder.encode_null_ptr()?;

    Ok(encoder.into_bytes())
}

/// Decoded NetrShareEnumAll reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareEnumResult {
    pub shares: Vec<ShareInfo1>,
    pub total_entries: u32,
}

/// Decode the NetrShareEnumAll reply; shares keep the server's order
pub fn decode_share_enum_all_response(stub: &[u8]) -> Result<ShareEnumResult> {
    let mut decoder = NdrDecoder::new(stub);

    let level = decoder.decode_u32()?;
    let switch = decoder.decode_u32()?;
    if level != 1 || switch != 1 {
        return Err(Error::Rpc(format!(
            "NetrShareEnumAll returned info level {} (switch {})",
            level, switch
        )));
    }

    let mut shares = Vec::new();
    if decoder.decode_pointer()?.is_some() {
        let entries_read = decoder.decode_u32()?;
        if decoder.decode_pointer()?.is_some() {
            // Each SHARE_INFO_1 is two pointers and a type
            let max_count = decoder.decode_count(12)?;
            if (entries_read as usize) > max_count {
                return Err(Error::Rpc(format!(
                    "NetrShareEnumAll read {} entries into an array of {}",
                    entries_read, max_count
                )));
            }

            let mut fixed = Vec::with_capacity(max_count);
            for _ in 0..max_count {
                let name_ptr = decoder.decode_pointer()?;
                let share_type = decoder.decode_u32()?;
                let remark_ptr = decoder.decode_pointer()?;
                fixed.push((name_ptr, share_type, remark_ptr));
            }

            // Deferred strings follow in array order
            for (name_ptr, share_type, remark_ptr) in fixed {
                let name = match name_ptr {
                    Some(_) => decoder.decode_string()?,
                    None => String::new(),
                };
                let remark = match remark_ptr {
                    Some(_) => decoder.decode_string()?,
                    None => String::new(),
                };
                shares.push(ShareInfo1 {
                    name,
                    share_type,
                    remark,
                });
            }
        }
    }

    let total_entries = decoder.decode_u32()?;
    if decoder.decode_pointer()?.is_some() {
        let _resume_handle = decoder.decode_u32()?;
    }
    let status = decoder.decode_u32()?;

    match status {
        0 => Ok(ShareEnumResult {
            shares,
            total_entries,
        }),
        WERR_MORE_DATA => Err(Error::Rpc(format!(
            "NetrShareEnumAll returned {} of {} shares (ERROR_MORE_DATA)",
            shares.len(),
            total_entries
        ))),
        other => Err(Error::Rpc(format!(
            "NetrShareEnumAll failed with WERROR 0x{:08x}",
            other
        ))),
    }
}

/// Server side of NetrShareEnumAll, used by the loopback test server
#[cfg(test)]
pub(crate) fn encode_share_enum_all_response(shares: &[ShareInfo1], status: u32) -> Result<Vec<u8>> {
    let mut encoder = NdrEncoder::new();
    encoder.encode_u32(1)?;
    encoder.encode_u32(1)?;

    encoder.encode_referent()?;
    encoder.encode_u32(shares.len() as u32)?;
    if shares.is_empty() {
        encoder.encode_null_ptr()?;
    } else {
        encoder.encode_referent()?;
        encoder.encode_u32(shares.len() as u32)?;
        for share in shares {
            encoder.encode_referent()?;
            encoder.encode_u32(share.share_type)?;
            encoder.encode_referent()?;
        }
        for share in shares {
            encoder.encode_string(&share.name)?;
            encoder.encode_string(&share.remark)?;
        }
    }

    encoder.encode_u32(shares.len() as u32)?;
    encoder.encode_null_ptr()?;
    encoder.encode_u32(status)?;
    Ok(encoder.into_bytes())
}
