//! Session and authentication state machine
//!
//! [`ClientSession`] owns the one SMB session a shell works with. It checks
//! preconditions, drives the transport provider and protocol dialer, and
//! commits state only after a collaborator call has fully succeeded. Every
//! failure comes back as a [`SessionError`] whose kind tells connection,
//! authentication, protocol and usage problems apart.
//!
//! The protocol handle is held inside the `Authenticated` state itself, so
//! "handle present iff authenticated" cannot be broken by a stray assignment.

pub mod protocol;

pub use protocol::{Initiator, ProtocolDialer, ProtocolSession};

use crate::auth::Credentials;
use crate::client::ServerInfo;
use crate::error::SessionError;
use crate::transport::TransportProvider;
use std::fmt;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Default SMB port for direct-hosted TCP
pub const DEFAULT_PORT: u16 = 445;

pub type SessionResult<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated,
    /// Unauthenticated after an explicit logout
    LoggedOut,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::Authenticated => "authenticated",
            AuthState::LoggedOut => "logged out",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    None,
    Local,
    Domain,
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuthMethod::None => "none",
            AuthMethod::Local => "local",
            AuthMethod::Domain => "domain",
        })
    }
}

/// Snapshot returned by [`ClientSession::status`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub server: String,
    pub port: u16,
    pub auth_state: AuthState,
    pub auth_method: AuthMethod,
    pub username: Option<String>,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Server:\t\t{}:{}", self.server, self.port)?;
        writeln!(f, "State:\t\t{}", self.auth_state)?;
        writeln!(f, "Method:\t\t{}", self.auth_method)?;
        write!(f, "User:\t\t{}", self.username.as_deref().unwrap_or("-"))
    }
}

enum Link {
    Unauthenticated,
    LoggedOut,
    Authenticated {
        method: AuthMethod,
        handle: Box<dyn ProtocolSession>,
    },
}

pub struct ClientSession {
    server: String,
    port: u16,
    credentials: Option<Credentials>,
    link: Link,
    transports: Box<dyn TransportProvider>,
    dialer: Box<dyn ProtocolDialer>,
    span: Span,
}

impl ClientSession {
    pub fn new(
        server: impl Into<String>,
        port: u16,
        transports: Box<dyn TransportProvider>,
        dialer: Box<dyn ProtocolDialer>,
    ) -> Self {
        let server = server.into();
        let span = info_span!("session", server = %server, port);
        Self {
            server,
            port,
            credentials: None,
            link: Link::Unauthenticated,
            transports,
            dialer,
            span,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn auth_state(&self) -> AuthState {
        match self.link {
            Link::Unauthenticated => AuthState::Unauthenticated,
            Link::LoggedOut => AuthState::LoggedOut,
            Link::Authenticated { .. } => AuthState::Authenticated,
        }
    }

    pub fn auth_method(&self) -> AuthMethod {
        match self.link {
            Link::Authenticated { method, .. } => method,
            _ => AuthMethod::None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        let username = self.credentials.as_ref().map(|creds| match &creds.domain {
            Some(domain) => format!("{}\\{}", domain, creds.username),
            None => creds.username.clone(),
        });
        SessionStatus {
            server: self.server.clone(),
            port: self.port,
            auth_state: self.auth_state(),
            auth_method: self.auth_method(),
            username,
        }
    }

    pub async fn authenticate_local(&mut self, username: &str, password: &str) -> SessionResult<()> {
        let credentials =
            Credentials::local(username, password).map_err(|e| SessionError::usage(e.to_string()))?;
        let span = self.span.clone();
        self.authenticate(AuthMethod::Local, credentials)
            .instrument(span)
            .await
    }

    pub async fn authenticate_domain(
        &mut self,
        domain: &str,
        username: &str,
        password: &str,
    ) -> SessionResult<()> {
        let credentials = Credentials::domain(domain, username, password)
            .map_err(|e| SessionError::usage(e.to_string()))?;
        let span = self.span.clone();
        self.authenticate(AuthMethod::Domain, credentials)
            .instrument(span)
            .await
    }

    async fn authenticate(&mut self, method: AuthMethod, credentials: Credentials) -> SessionResult<()> {
        self.release("re-authentication").await;

        let transport = self
            .transports
            .connect(&self.server, self.port)
            .await
            .map_err(|e| {
                warn!("connection failed: {}", e);
                SessionError::connection(&e)
            })?;

        let initiator = Initiator::Ntlm(credentials.clone());
        let handle = self.dialer.dial(transport, &initiator).await.map_err(|e| {
            if e.is_transport_failure() {
                warn!("connection lost during handshake: {}", e);
                SessionError::connection(&e)
            } else {
                warn!(user = %credentials.username, "authentication failed: {}", e);
                SessionError::authentication(&e)
            }
        })?;

        info!(user = %credentials.username, %method, "authenticated");
        self.link = Link::Authenticated { method, handle };
        self.credentials = Some(credentials);
        Ok(())
    }

    /// Log off and drop a held handle. Logoff errors are logged, not returned.
    async fn release(&mut self, reason: &str) {
        if !matches!(self.link, Link::Authenticated { .. }) {
            return;
        }
        if let Link::Authenticated { mut handle, .. } =
            std::mem::replace(&mut self.link, Link::Unauthenticated)
        {
            debug!(reason, "releasing session handle");
            if let Err(e) = handle.logoff().await {
                warn!(reason, "logoff failed, dropping handle: {}", e);
            }
            self.credentials = None;
        }
    }

    pub async fn logout(&mut self) -> SessionResult<()> {
        let span = self.span.clone();
        self.logout_inner().instrument(span).await
    }

    async fn logout_inner(&mut self) -> SessionResult<()> {
        let handle = match &mut self.link {
            Link::Authenticated { handle, .. } => handle,
            _ => {
                return Err(SessionError::usage(
                    "the current session is not authenticated",
                ))
            }
        };

        match handle.logoff().await {
            Ok(()) => {
                info!("logged out");
                self.link = Link::LoggedOut;
                self.credentials = None;
                Ok(())
            }
            Err(e) if e.is_session_terminated() => {
                warn!("logoff failed on a dead session, dropping it: {}", e);
                self.link = Link::LoggedOut;
                self.credentials = None;
                Err(SessionError::protocol(&e))
            }
            Err(e) => {
                error!("logoff failed: {}", e);
                Err(SessionError::protocol(&e))
            }
        }
    }

    /// Share names exactly as the server listed them
    pub async fn list_shares(&mut self) -> SessionResult<Vec<String>> {
        let span = self.span.clone();
        self.list_shares_inner().instrument(span).await
    }

    async fn list_shares_inner(&mut self) -> SessionResult<Vec<String>> {
        let handle = match &mut self.link {
            Link::Authenticated { handle, .. } => handle,
            _ => return Err(SessionError::usage("unauthenticated")),
        };

        let shares = handle.list_share_names().await.map_err(|e| {
            error!("share enumeration failed: {}", e);
            SessionError::protocol(&e)
        })?;
        debug!(count = shares.len(), "listed shares");
        Ok(shares)
    }

    /// Probe the server over a fresh connection; session state is untouched
    pub async fn server_info(&self) -> SessionResult<ServerInfo> {
        self.server_info_inner().instrument(self.span.clone()).await
    }

    async fn server_info_inner(&self) -> SessionResult<ServerInfo> {
        let transport = self
            .transports
            .connect(&self.server, self.port)
            .await
            .map_err(|e| SessionError::connection(&e))?;
        let info = self
            .dialer
            .probe(transport)
            .await
            .map_err(|e| SessionError::protocol(&e))?;
        debug!(dialect = %info.dialect, "probed server");
        Ok(info)
    }

    /// Release the session on the way out
    pub async fn shutdown(&mut self) {
        let span = self.span.clone();
        self.release("shutdown").instrument(span).await;
    }
}
