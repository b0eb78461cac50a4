//! TCP transport implementation for SMB

use super::{SmbTransport, TransportProvider};
use crate::error::{Error, Result};
use crate::netbios::{NetBiosHeader, NetBiosMessage};
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Default timeout for connecting and for each message exchange
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// TCP transport for SMB protocol
pub struct TcpTransport {
    stream: Option<TcpStream>,
    read_buffer: BytesMut,
    remote_addr: Option<SocketAddr>,
    io_timeout: Duration,
}

impl TcpTransport {
    /// Create a TCP transport from an existing stream
    pub fn from_stream(stream: TcpStream) -> Self {
        let remote_addr = stream.peer_addr().ok();

        Self {
            stream: Some(stream),
            read_buffer: BytesMut::with_capacity(65536),
            remote_addr,
            io_timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    async fn receive_frame(&mut self) -> Result<NetBiosMessage> {
        while self.read_buffer.len() < NetBiosHeader::SIZE {
            self.read_more().await?;
        }

        let header = NetBiosHeader::parse(&self.read_buffer)?;
        let total_size = NetBiosHeader::SIZE + header.length as usize;

        while self.read_buffer.len() < total_size {
            self.read_more().await?;
        }

        let message_bytes = self.read_buffer.split_to(total_size);
        NetBiosMessage::parse(&message_bytes)
    }

    /// Read more data from the stream into the buffer
    async fn read_more(&mut self) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(Error::ConnectionClosed)?;
        let mut temp_buf = vec![0u8; 8192];
        let n = stream.read(&mut temp_buf).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        self.read_buffer.put_slice(&temp_buf[..n]);
        Ok(n)
    }
}

#[async_trait]
impl SmbTransport for TcpTransport {
    async fn send_message(&mut self, payload: &[u8]) -> Result<()> {
        let msg = NetBiosMessage::session_message(payload.to_vec())?;
        let stream = self.stream.as_mut().ok_or(Error::ConnectionClosed)?;
        trace!("Sending {} byte message", payload.len());

        timeout(self.io_timeout, async {
            stream.write_all(&msg.to_bytes()).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| Error::Timeout)??;
        Ok(())
    }

    async fn receive_message(&mut self) -> Result<Vec<u8>> {
        let io_timeout = self.io_timeout;
        loop {
            let frame = timeout(io_timeout, self.receive_frame())
                .await
                .map_err(|_| Error::Timeout)??;
            if frame.is_keepalive() {
                trace!("Skipping keepalive frame");
                continue;
            }
            trace!("Received {} byte message", frame.payload.len());
            return Ok(frame.payload);
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        self.read_buffer.clear();
        Ok(())
    }

    fn remote_addr(&self) -> Result<SocketAddr> {
        self.remote_addr.ok_or(Error::ConnectionClosed)
    }
}

/// Opens [`TcpTransport`]s with a connect timeout
#[derive(Debug, Clone)]
pub struct TcpProvider {
    timeout: Duration,
}

impl TcpProvider {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpProvider {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

#[async_trait]
impl TransportProvider for TcpProvider {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn SmbTransport>> {
        debug!("Connecting to {}:{}", host, port);
        let stream = timeout(self.timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|e| Error::ConnectionError(format!("{}:{}: {}", host, port, e)))?;
        stream.set_nodelay(true)?;

        let transport = TcpTransport::from_stream(stream).with_timeout(self.timeout);
        debug!("Connected to {:?}", transport.remote_addr().ok());
        Ok(Box::new(transport))
    }
}
