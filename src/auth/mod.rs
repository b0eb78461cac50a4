//! Credentials and the NTLM/SPNEGO authentication used by SMB session setup

pub mod ntlm;
pub mod ntlm_crypto;
pub mod spnego;

use crate::error::{Error, Result};
use std::fmt;

/// User credentials for an NTLM logon
///
/// `domain` is `None` for local accounts.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub domain: Option<String>,
}

impl Credentials {
    /// Local account credentials; both fields must be non-empty
    pub fn local(username: &str, password: &str) -> Result<Self> {
        require("username", username)?;
        require("password", password)?;
        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
            domain: None,
        })
    }

    /// Domain account credentials; all fields must be non-empty
    pub fn domain(domain: &str, username: &str, password: &str) -> Result<Self> {
        require("domain", domain)?;
        let mut creds = Self::local(username, password)?;
        creds.domain = Some(domain.to_string());
        Ok(creds)
    }

    /// Domain used in the NTLMv2 hash, empty for local accounts
    pub fn ntlm_domain(&self) -> &str {
        self.domain.as_deref().unwrap_or("")
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidParameter(format!("{} must not be empty", field)));
    }
    Ok(())
}

// Never print the password.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}
