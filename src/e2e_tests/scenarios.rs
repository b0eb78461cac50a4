//! End-to-end scenarios over loopback TCP
//!
//! Each test starts a [`FakeServer`] and talks to it through the same
//! provider, dialer and session types the binary uses.

use super::fake_server::share;
use super::{FakeServer, ServerOptions};
use crate::client::SmbDialer;
use crate::error::{ErrorKind, NtStatus};
use crate::session::{AuthMethod, AuthState, ClientSession};
use crate::shell::Shell;
use crate::transport::TcpProvider;
use std::sync::atomic::Ordering;
use std::time::Duration;

fn session_for(port: u16) -> ClientSession {
    ClientSession::new(
        "127.0.0.1",
        port,
        Box::new(TcpProvider::new(Duration::from_secs(5))),
        Box::new(SmbDialer::new()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_auth_and_list_shares() {
        let server = FakeServer::start(ServerOptions::default()).await;
        let mut session = session_for(server.port());

        session.authenticate_local("alice", "S3cret!").await.unwrap();
        assert_eq!(session.auth_state(), AuthState::Authenticated);
        assert_eq!(session.auth_method(), AuthMethod::Local);

        let shares = session.list_shares().await.unwrap();
        assert_eq!(shares, vec!["IPC$", "public", "backup"]);
        assert_eq!(server.stats.sessions.load(Ordering::SeqCst), 1);
        assert_eq!(server.stats.share_enums.load(Ordering::SeqCst), 1);

        // The session stays usable for repeated listings
        let again = session.list_shares().await.unwrap();
        assert_eq!(again, shares);
        assert_eq!(server.stats.connections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fragmented_share_enumeration() {
        let shares: Vec<_> = (0..40)
            .map(|i| share(&format!("share{:02}", i), 0, "a longer remark to pad the reply"))
            .collect();
        let server = FakeServer::start(ServerOptions {
            shares,
            max_frag: 96,
            ..ServerOptions::default()
        })
        .await;
        let mut session = session_for(server.port());

        session.authenticate_local("alice", "S3cret!").await.unwrap();
        let names = session.list_shares().await.unwrap();
        assert_eq!(names.len(), 40);
        assert_eq!(names[0], "share00");
        assert_eq!(names[39], "share39");
    }

    #[tokio::test]
    async fn test_wrong_password_is_an_authentication_error() {
        let server = FakeServer::start(ServerOptions::default()).await;
        let mut session = session_for(server.port());

        let err = session
            .authenticate_local("alice", "not-it")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Authentication);
        assert_eq!(session.auth_state(), AuthState::Unauthenticated);
        assert_eq!(session.auth_method(), AuthMethod::None);
        assert_eq!(server.stats.sessions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_auth_without_timestamp_skips_mic() {
        let server = FakeServer::start(ServerOptions {
            timestamp: false,
            ..ServerOptions::default()
        })
        .await;
        let mut session = session_for(server.port());

        session.authenticate_local("alice", "S3cret!").await.unwrap();
        assert_eq!(session.list_shares().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_domain_auth() {
        let server = FakeServer::start(ServerOptions {
            domain: Some("CORP".into()),
            ..ServerOptions::default()
        })
        .await;
        let mut session = session_for(server.port());

        let err = session
            .authenticate_domain("OTHER", "alice", "S3cret!")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Authentication);

        session
            .authenticate_domain("CORP", "alice", "S3cret!")
            .await
            .unwrap();
        assert_eq!(session.auth_method(), AuthMethod::Domain);
        assert_eq!(session.status().username.as_deref(), Some("CORP\\alice"));
        assert_eq!(session.list_shares().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_logout_and_reauthenticate() {
        let server = FakeServer::start(ServerOptions::default()).await;
        let mut session = session_for(server.port());

        session.authenticate_local("alice", "S3cret!").await.unwrap();
        session.logout().await.unwrap();
        assert_eq!(session.auth_state(), AuthState::LoggedOut);
        assert_eq!(server.stats.logoffs.load(Ordering::SeqCst), 1);

        let err = session.list_shares().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Usage);

        session.authenticate_local("alice", "S3cret!").await.unwrap();
        assert_eq!(session.list_shares().await.unwrap().len(), 3);
        assert_eq!(server.stats.connections.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reauthentication_releases_previous_session() {
        let server = FakeServer::start(ServerOptions::default()).await;
        let mut session = session_for(server.port());

        session.authenticate_local("alice", "S3cret!").await.unwrap();
        session.authenticate_local("alice", "S3cret!").await.unwrap();
        assert_eq!(server.stats.logoffs.load(Ordering::SeqCst), 1);
        assert_eq!(server.stats.sessions.load(Ordering::SeqCst), 2);

        session.shutdown().await;
        assert_eq!(server.stats.logoffs.load(Ordering::SeqCst), 2);
        assert_eq!(session.auth_state(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_failed_logoff_keeps_session() {
        let server = FakeServer::start(ServerOptions {
            logoff_status: NtStatus::AccessDenied,
            ..ServerOptions::default()
        })
        .await;
        let mut session = session_for(server.port());

        session.authenticate_local("alice", "S3cret!").await.unwrap();
        let err = session.logout().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Protocol);
        assert_eq!(session.auth_state(), AuthState::Authenticated);
        assert_eq!(session.list_shares().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_expired_session_on_logoff_is_dropped() {
        let server = FakeServer::start(ServerOptions {
            logoff_status: NtStatus::NetworkSessionExpired,
            ..ServerOptions::default()
        })
        .await;
        let mut session = session_for(server.port());

        session.authenticate_local("alice", "S3cret!").await.unwrap();
        let err = session.logout().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Protocol);
        assert_eq!(session.auth_state(), AuthState::LoggedOut);
    }

    #[tokio::test]
    async fn test_signing_required_server_refuses_tree_connect() {
        let server = FakeServer::start(ServerOptions {
            require_signing: true,
            ..ServerOptions::default()
        })
        .await;
        let mut session = session_for(server.port());

        session.authenticate_local("alice", "S3cret!").await.unwrap();
        let err = session.list_shares().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Protocol);
        assert_eq!(session.auth_state(), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn test_server_info_probe() {
        let server = FakeServer::start(ServerOptions::default()).await;
        let session = session_for(server.port());

        let info = session.server_info().await.unwrap();
        assert_eq!(info.dialect.to_string(), "SMB 2.1");
        assert!(!info.signing_required);
        assert_eq!(info.target_name, "FAKESRV");
        assert_eq!(info.netbios_domain_name.as_deref(), Some("WORKGROUP"));
        assert_eq!(info.dns_computer_name.as_deref(), Some("fakesrv.test"));
        assert_eq!(info.os_version.map(|v| v.build), Some(9600));
        assert!(info.system_time.is_some());

        assert_eq!(session.auth_state(), AuthState::Unauthenticated);
        assert_eq!(server.stats.sessions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_connection_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut session = session_for(port);
        let err = session
            .authenticate_local("alice", "S3cret!")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Connection);
        assert_eq!(session.auth_state(), AuthState::Unauthenticated);

        let err = session.server_info().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Connection);
    }

    #[tokio::test]
    async fn test_shell_session_over_loopback() {
        let server = FakeServer::start(ServerOptions::default()).await;
        let input: &[u8] = b"status\nauth local alice S3cret!\nshares\nlogout\nshares\nexit\n";

        let mut shell = Shell::new(session_for(server.port()), None, input, Vec::new());
        shell.run(std::future::pending()).await.unwrap();
        let output = String::from_utf8(shell.into_output()).unwrap();

        assert!(output.contains("State:\t\tunauthenticated"));
        assert!(output.contains("Authentication performed successfully"));
        assert!(output.contains(
            "List of shares on SMB server 127.0.0.1:\n\t- IPC$\n\t- public\n\t- backup\n"
        ));
        assert!(output.contains("Logged out of the SMB session"));
        assert!(output.contains("Error listing shares: usage error: unauthenticated"));
        assert_eq!(server.stats.logoffs.load(Ordering::SeqCst), 1);
    }
}
