//! Interactive command loop
//!
//! Reads commands from any `AsyncBufRead`, runs them against a
//! [`ClientSession`] and writes the results to any `AsyncWrite`.

pub mod command;

pub use command::{parse_command, Command, Topic};

use crate::auth::Credentials;
use crate::error::{ErrorKind, Result};
use crate::session::{ClientSession, SessionResult};
use std::future::Future;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

const PROMPT: &str = "\n> ";

const HELP: &str = "Available commands:

auth\t\t\tAuthenticate (local or domain)
exit\t\t\tLeave the shell
help\t\t\tShow help message
info\t\t\tGet server info from NTLM handshake
logout\t\t\tLog out of the SMB session
shares\t\t\tList SMB shares
status\t\t\tShow connection status
usage\t\t\tShow some useful examples";

fn usage_text(topic: Topic) -> &'static str {
    match topic {
        Topic::Auth => "Usage: auth COMMAND\n\nCommands:\nlocal\ndomain",
        Topic::AuthLocal => "Usage: auth local USERNAME PASSWORD",
        Topic::AuthDomain => "Usage: auth domain DOMAIN USERNAME PASSWORD",
        Topic::All => {
            "Examples:

auth local alice S3cret\t\tAuthenticate with a local account
auth domain CORP alice S3cret\tAuthenticate with a domain account
auth local\t\t\tAuthenticate with the --username/--password given at startup
shares\t\t\t\tList the shares of the server
info\t\t\t\tShow what the server reveals before authentication
usage auth local\t\tShow the syntax of one command"
        }
    }
}

enum Flow {
    Continue,
    Exit,
}

pub struct Shell<R, W> {
    session: ClientSession,
    startup_credentials: Option<Credentials>,
    input: R,
    output: W,
}

impl<R, W> Shell<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        session: ClientSession,
        startup_credentials: Option<Credentials>,
        input: R,
        output: W,
    ) -> Self {
        Self {
            session,
            startup_credentials,
            input,
            output,
        }
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    pub fn into_output(self) -> W {
        self.output
    }

    /// Run until `exit`, end of input or `shutdown` resolves.
    ///
    /// The session is shut down on every exit path, including I/O errors.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut line = Vec::new();

        let result = loop {
            if let Err(e) = self.write(PROMPT).await {
                break Err(e);
            }

            line.clear();
            let read = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break Ok(());
                }
                read = self.input.read_until(b'\n', &mut line) => read,
            };

            match read {
                Ok(0) => {
                    debug!("end of input");
                    break Ok(());
                }
                Ok(_) => {
                    // Undecodable bytes become U+FFFD instead of ending the loop
                    let command = parse_command(&String::from_utf8_lossy(&line));
                    match self.execute(command).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Exit) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                }
                Err(e) => break Err(e.into()),
            }
        };

        self.session.shutdown().await;
        result
    }

    async fn execute(&mut self, command: Command) -> Result<Flow> {
        debug!(?command, "executing");
        match command {
            Command::Empty => {}
            Command::Help => self.write_line(HELP).await?,
            Command::Usage(topic) => self.write_line(usage_text(topic)).await?,
            Command::AuthLocal { username, password } => {
                let outcome = self.session.authenticate_local(&username, &password).await;
                self.report_auth(outcome).await?;
            }
            Command::AuthDomain {
                domain,
                username,
                password,
            } => {
                let outcome = self
                    .session
                    .authenticate_domain(&domain, &username, &password)
                    .await;
                self.report_auth(outcome).await?;
            }
            Command::AuthLocalDefault => match self.startup_credentials.clone() {
                Some(creds) => {
                    let outcome = match &creds.domain {
                        Some(domain) => {
                            self.session
                                .authenticate_domain(domain, &creds.username, &creds.password)
                                .await
                        }
                        None => {
                            self.session
                                .authenticate_local(&creds.username, &creds.password)
                                .await
                        }
                    };
                    self.report_auth(outcome).await?;
                }
                None => self.write_line(usage_text(Topic::AuthLocal)).await?,
            },
            Command::Logout => match self.session.logout().await {
                Ok(()) => self.write_line("Logged out of the SMB session").await?,
                Err(e) if e.kind == ErrorKind::Usage => {
                    self.write_line("The current session is not authenticated, can't log out")
                        .await?
                }
                Err(e) => self.write_line(&format!("Failed to log out: {}", e)).await?,
            },
            Command::Shares => match self.session.list_shares().await {
                Ok(shares) => {
                    let mut text =
                        format!("List of shares on SMB server {}:", self.session.server());
                    for share in shares {
                        text.push_str("\n\t- ");
                        text.push_str(&share);
                    }
                    self.write_line(&text).await?;
                }
                Err(e) => self.write_line(&format!("Error listing shares: {}", e)).await?,
            },
            Command::Status => {
                let status = self.session.status().to_string();
                self.write_line(&status).await?;
            }
            Command::Info => match self.session.server_info().await {
                Ok(info) => self.write_line(&info.to_string()).await?,
                Err(e) => {
                    self.write_line(&format!("Failed to get server info: {}", e))
                        .await?
                }
            },
            Command::Exit => return Ok(Flow::Exit),
            Command::Unknown(verb) => {
                self.write_line(&format!(
                    "Unknown command '{}', type 'help' for the list of commands",
                    verb
                ))
                .await?
            }
        }
        Ok(Flow::Continue)
    }

    async fn report_auth(&mut self, outcome: SessionResult<()>) -> Result<()> {
        match outcome {
            Ok(()) => self.write_line("Authentication performed successfully").await,
            Err(e) => self.write_line(&format!("Failed to authenticate: {}", e)).await,
        }
    }

    async fn write(&mut self, text: &str) -> Result<()> {
        self.output.write_all(text.as_bytes()).await?;
        self.output.flush().await?;
        Ok(())
    }

    async fn write_line(&mut self, text: &str) -> Result<()> {
        self.write(text).await?;
        self.write("\n").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::client::ServerInfo;
    use crate::session::{AuthState, Initiator, ProtocolDialer, ProtocolSession};
    use crate::transport::{SmbTransport, TransportProvider};
    use async_trait::async_trait;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct NullTransport;

    #[async_trait]
    impl SmbTransport for NullTransport {
        async fn send_message(&mut self, _payload: &[u8]) -> crate::Result<()> {
            Ok(())
        }
        async fn receive_message(&mut self) -> crate::Result<Vec<u8>> {
            Err(Error::ConnectionClosed)
        }
        fn is_connected(&self) -> bool {
            true
        }
        async fn close(&mut self) -> crate::Result<()> {
            Ok(())
        }
        fn remote_addr(&self) -> crate::Result<SocketAddr> {
            Err(Error::ConnectionClosed)
        }
    }

    struct NullProvider;

    #[async_trait]
    impl TransportProvider for NullProvider {
        async fn connect(&self, _host: &str, _port: u16) -> crate::Result<Box<dyn SmbTransport>> {
            Ok(Box::new(NullTransport))
        }
    }

    /// Accepts any password except "wrong"; counts logoffs
    struct FakeDialer {
        logoffs: Arc<AtomicUsize>,
    }

    struct FakeSession {
        logoffs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ProtocolDialer for FakeDialer {
        async fn dial(
            &self,
            _transport: Box<dyn SmbTransport>,
            initiator: &Initiator,
        ) -> crate::Result<Box<dyn ProtocolSession>> {
            let Initiator::Ntlm(creds) = initiator;
            if creds.password == "wrong" {
                return Err(Error::AuthenticationFailed("bad password".into()));
            }
            Ok(Box::new(FakeSession {
                logoffs: self.logoffs.clone(),
            }))
        }

        async fn probe(&self, _transport: Box<dyn SmbTransport>) -> crate::Result<ServerInfo> {
            Err(Error::Timeout)
        }
    }

    #[async_trait]
    impl ProtocolSession for FakeSession {
        async fn list_share_names(&mut self) -> crate::Result<Vec<String>> {
            Ok(vec!["IPC$".into(), "public".into(), "backup".into()])
        }

        async fn logoff(&mut self) -> crate::Result<()> {
            self.logoffs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn shell(input: &str, startup: Option<Credentials>) -> (Shell<&[u8], Vec<u8>>, Arc<AtomicUsize>) {
        let logoffs = Arc::new(AtomicUsize::new(0));
        let session = ClientSession::new(
            "10.0.0.5",
            445,
            Box::new(NullProvider),
            Box::new(FakeDialer {
                logoffs: logoffs.clone(),
            }),
        );
        (Shell::new(session, startup, input.as_bytes(), Vec::new()), logoffs)
    }

    async fn run(input: &str, startup: Option<Credentials>) -> (String, AuthState, usize) {
        let (mut shell, logoffs) = shell(input, startup);
        shell.run(std::future::pending()).await.unwrap();
        let state = shell.session().auth_state();
        let output = String::from_utf8(shell.into_output()).unwrap();
        (output, state, logoffs.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_auth_and_list_shares() {
        let (output, _, _) = run("auth local alice pw\nshares\n", None).await;
        assert!(output.contains("Authentication performed successfully"));
        assert!(output.contains(
            "List of shares on SMB server 10.0.0.5:\n\t- IPC$\n\t- public\n\t- backup\n"
        ));
    }

    #[tokio::test]
    async fn test_failed_auth_message() {
        let (output, state, _) = run("auth local alice wrong\n", None).await;
        assert!(output.contains("Failed to authenticate: authentication error"));
        assert_eq!(state, AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_logout_messages() {
        let (output, _, logoffs) = run("logout\nauth local a b\nlogout\n", None).await;
        assert!(output.contains("The current session is not authenticated, can't log out"));
        assert!(output.contains("Logged out of the SMB session"));
        assert_eq!(logoffs, 1);
    }

    #[tokio::test]
    async fn test_shares_before_auth() {
        let (output, _, _) = run("shares\n", None).await;
        assert!(output.contains("Error listing shares: usage error: unauthenticated"));
    }

    #[tokio::test]
    async fn test_help_usage_and_unknown() {
        let (output, _, _) = run("HELP\nauth\nauth local x\n\nfrobnicate\n", None).await;
        assert!(output.contains("Available commands:\n\nauth\t\t\tAuthenticate (local or domain)"));
        assert!(output.contains("Usage: auth COMMAND\n\nCommands:\nlocal\ndomain"));
        assert!(output.contains("Usage: auth local USERNAME PASSWORD"));
        assert!(output.contains("Unknown command 'frobnicate', type 'help'"));
    }

    #[tokio::test]
    async fn test_auth_local_uses_startup_credentials() {
        let (output, state, _) = run("auth local\n", None).await;
        assert!(output.contains("Usage: auth local USERNAME PASSWORD"));
        assert_eq!(state, AuthState::Unauthenticated);

        let creds = Credentials::local("alice", "pw").unwrap();
        let (mut shell, _) = shell("auth local\nstatus\nexit\n", Some(creds));
        shell.run(std::future::pending()).await.unwrap();
        let output = String::from_utf8(shell.into_output()).unwrap();
        assert!(output.contains("Authentication performed successfully"));
        assert!(output.contains("State:\t\tauthenticated\nMethod:\t\tlocal\nUser:\t\talice"));
    }

    #[tokio::test]
    async fn test_exit_and_end_of_input_release_session() {
        let (output, state, logoffs) = run("auth local a b\nexit\nshares\n", None).await;
        assert!(!output.contains("List of shares"));
        assert_eq!(state, AuthState::Unauthenticated);
        assert_eq!(logoffs, 1);

        let (_, state, logoffs) = run("auth domain CORP a b\n", None).await;
        assert_eq!(state, AuthState::Unauthenticated);
        assert_eq!(logoffs, 1);
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_loop() {
        let (mut shell, logoffs) = shell("auth local a b\n", None);
        shell.run(std::future::ready(())).await.unwrap();
        // The signal wins before any line is read
        assert_eq!(shell.session().auth_state(), AuthState::Unauthenticated);
        assert_eq!(logoffs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_end_loop() {
        let (mut shell, _) = shell("", None);
        shell.input = &b"auth local alice pw\nauth local b\xe9b pw\nstatus\n"[..];
        shell.run(std::future::pending()).await.unwrap();
        let state = shell.session().auth_state();
        let output = String::from_utf8(shell.into_output()).unwrap();

        assert_eq!(output.matches("Authentication performed successfully").count(), 2);
        assert!(output.contains("User:\t\tb\u{fffd}b"));
        assert_eq!(state, AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_info_failure_is_reported() {
        let (output, _, _) = run("info\n", None).await;
        assert!(output.contains("Failed to get server info: protocol error: Operation timed out"));
    }
}
