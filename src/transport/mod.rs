//! Transport layer for SMB protocol
//!
//! A transport carries whole SMB2 messages; framing lives below this
//! interface so the client only ever sees message payloads.

use crate::error::Result;
use async_trait::async_trait;
use std::net::SocketAddr;

pub mod tcp;

pub use tcp::{TcpProvider, TcpTransport};

/// A connected, message-oriented byte stream to an SMB server
#[async_trait]
pub trait SmbTransport: Send + Sync {
    /// Send one SMB2 message
    async fn send_message(&mut self, payload: &[u8]) -> Result<()>;

    /// Receive the next SMB2 message
    async fn receive_message(&mut self) -> Result<Vec<u8>>;

    /// Check if the transport is connected
    fn is_connected(&self) -> bool;

    /// Close the connection
    async fn close(&mut self) -> Result<()>;

    /// Get the remote address
    fn remote_addr(&self) -> Result<SocketAddr>;
}

/// Opens transports to `host:port`
#[async_trait]
pub trait TransportProvider: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn SmbTransport>>;
}
