//! Server details learned from NEGOTIATE and the NTLM challenge

use crate::auth::ntlm::{av_id, NtlmChallengeMessage, NtlmVersion};
use crate::protocol::messages::Smb2NegotiateResponse;
use crate::protocol::smb2_constants::Smb2Dialect;
use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub dialect: Smb2Dialect,
    pub server_guid: Uuid,
    pub signing_required: bool,
    pub system_time: Option<DateTime<Utc>>,
    pub target_name: String,
    pub netbios_computer_name: Option<String>,
    pub netbios_domain_name: Option<String>,
    pub dns_computer_name: Option<String>,
    pub dns_domain_name: Option<String>,
    pub dns_tree_name: Option<String>,
    pub os_version: Option<NtlmVersion>,
}

impl ServerInfo {
    pub fn new(negotiate: &Smb2NegotiateResponse, challenge: &NtlmChallengeMessage) -> Self {
        let info = &challenge.target_info;
        Self {
            dialect: negotiate.dialect_revision,
            server_guid: negotiate.server_guid,
            signing_required: negotiate.signing_required(),
            system_time: negotiate.system_time_utc(),
            target_name: challenge.target_name.clone(),
            netbios_computer_name: info.name(av_id::NB_COMPUTER_NAME),
            netbios_domain_name: info.name(av_id::NB_DOMAIN_NAME),
            dns_computer_name: info.name(av_id::DNS_COMPUTER_NAME),
            dns_domain_name: info.name(av_id::DNS_DOMAIN_NAME),
            dns_tree_name: info.name(av_id::DNS_TREE_NAME),
            os_version: challenge.version,
        }
    }
}

fn or_unknown(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("-")
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dialect:\t\t{}", self.dialect)?;
        writeln!(f, "Server GUID:\t\t{}", self.server_guid)?;
        writeln!(
            f,
            "Signing required:\t{}",
            if self.signing_required { "yes" } else { "no" }
        )?;
        match self.system_time {
            Some(time) => writeln!(f, "System time:\t\t{}", time.format("%Y-%m-%d %H:%M:%S UTC"))?,
            None => writeln!(f, "System time:\t\t-")?,
        }
        writeln!(f, "Target name:\t\t{}", self.target_name)?;
        writeln!(f, "NetBIOS computer:\t{}", or_unknown(&self.netbios_computer_name))?;
        writeln!(f, "NetBIOS domain:\t\t{}", or_unknown(&self.netbios_domain_name))?;
        writeln!(f, "DNS computer:\t\t{}", or_unknown(&self.dns_computer_name))?;
        writeln!(f, "DNS domain:\t\t{}", or_unknown(&self.dns_domain_name))?;
        writeln!(f, "DNS tree:\t\t{}", or_unknown(&self.dns_tree_name))?;
        match &self.os_version {
            Some(version) => write!(f, "OS version:\t\t{}", version),
            None => write!(f, "OS version:\t\t-"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::negotiate::utc_to_filetime;
    use chrono::TimeZone;

    #[test]
    fn test_server_info_from_handshake() {
        let mut negotiate = Smb2NegotiateResponse::new(Smb2Dialect::Smb302);
        let time = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        negotiate.system_time = utc_to_filetime(time);

        let mut challenge = NtlmChallengeMessage::new("CORP", [1; 8]);
        challenge.target_info.set_name(av_id::NB_COMPUTER_NAME, "FILES01");
        challenge.target_info.set_name(av_id::DNS_DOMAIN_NAME, "corp.example");
        challenge.version = Some(NtlmVersion {
            major: 6,
            minor: 3,
            build: 9600,
            ntlm_revision: 15,
        });

        let info = ServerInfo::new(&negotiate, &challenge);
        assert_eq!(info.dialect, Smb2Dialect::Smb302);
        assert_eq!(info.system_time, Some(time));
        assert_eq!(info.netbios_computer_name.as_deref(), Some("FILES01"));
        assert_eq!(info.netbios_domain_name, None);

        let text = info.to_string();
        assert!(text.contains("Dialect:\t\tSMB 3.0.2"));
        assert!(text.contains("System time:\t\t2024-03-01 12:30:00 UTC"));
        assert!(text.contains("DNS domain:\t\tcorp.example"));
        assert!(text.contains("NetBIOS domain:\t\t-"));
        assert!(text.ends_with("OS version:\t\t6.3 (build 9600)"));
    }
}
