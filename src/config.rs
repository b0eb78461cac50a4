//! Command line configuration

use crate::auth::Credentials;
use crate::session::DEFAULT_PORT;
use clap::Parser;
use std::time::Duration;
use tracing::warn;

#[derive(Parser, Debug, Clone)]
#[command(name = "smb-shares")]
#[command(about = "Interactive SMB2 client that authenticates and lists server shares", long_about = None)]
pub struct Args {
    /// SMB server address or hostname
    #[arg(short = 's', long)]
    pub server: String,

    /// TCP port
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Username used by `auth local` without arguments
    #[arg(short = 'u', long)]
    pub username: Option<String>,

    /// Password used by `auth local` without arguments
    #[arg(short = 'P', long)]
    pub password: Option<String>,

    /// Domain for the startup credentials
    #[arg(short = 'd', long)]
    pub domain: Option<String>,

    /// Connect and per-request timeout in seconds
    #[arg(short = 't', long, default_value_t = 30)]
    pub timeout: u64,

    /// Log level, overridden by RUST_LOG
    #[arg(short = 'l', long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Credentials from the flags, if both username and password were given
    pub fn startup_credentials(&self) -> Option<Credentials> {
        let username = self.username.as_deref().filter(|s| !s.is_empty());
        let password = self.password.as_deref().filter(|s| !s.is_empty());

        let (username, password) = match (username, password) {
            (Some(username), Some(password)) => (username, password),
            (None, Some(_)) => {
                warn!("Password set but username missing");
                return None;
            }
            (Some(_), None) => {
                warn!("Username set but password missing");
                return None;
            }
            (None, None) => {
                if self.domain.is_some() {
                    warn!("Domain set but username and password missing");
                }
                return None;
            }
        };

        let credentials = match self.domain.as_deref().filter(|s| !s.is_empty()) {
            Some(domain) => Credentials::domain(domain, username, password),
            None => Credentials::local(username, password),
        };
        match credentials {
            Ok(credentials) => Some(credentials),
            Err(e) => {
                warn!("Ignoring startup credentials: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("smb-shares").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["--server", "10.0.0.5"]);
        assert_eq!(args.server, "10.0.0.5");
        assert_eq!(args.port, 445);
        assert_eq!(args.timeout(), Duration::from_secs(30));
        assert_eq!(args.log_level, "info");
        assert_eq!(args.startup_credentials(), None);
    }

    #[test]
    fn test_server_is_required() {
        assert!(Args::try_parse_from(["smb-shares", "--port", "139"]).is_err());
    }

    #[test]
    fn test_credentials_need_both_fields() {
        let args = parse(&["-s", "srv", "-u", "alice"]);
        assert_eq!(args.startup_credentials(), None);

        let args = parse(&["-s", "srv", "-P", "pw"]);
        assert_eq!(args.startup_credentials(), None);

        let args = parse(&["-s", "srv", "-u", "alice", "-P", "pw"]);
        assert_eq!(
            args.startup_credentials(),
            Some(Credentials::local("alice", "pw").unwrap())
        );
    }

    #[test]
    fn test_domain_credentials() {
        let args = parse(&["-s", "srv", "-u", "alice", "-P", "pw", "-d", "CORP"]);
        let creds = args.startup_credentials().unwrap();
        assert_eq!(creds.domain.as_deref(), Some("CORP"));
    }
}
