//! HTTP proxy outbound
//!
//! Chains through a downstream HTTP proxy. The client's own CONNECT request
//! is replayed verbatim, so the downstream proxy sees exactly what the
//! client sent, and its reply is passed back to the client once. Every
//! handshake failure is logged and the relay still starts.

use super::{OutboundProxy, ProxyType, CONNECT_TIMEOUT};
use crate::common::net::join_host_port;
use crate::inbound::ParsedRequest;
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Largest handshake reply passed back to the client
const HANDSHAKE_BUF_SIZE: usize = 5 * 1024;

/// Downstream HTTP proxy
pub struct HttpProxy {
    name: String,
    server: String,
    port: u16,
    handshake_timeout: Duration,
}

impl HttpProxy {
    pub fn new(server: String, port: u16) -> Self {
        HttpProxy {
            name: join_host_port(&server, port),
            server,
            port,
            handshake_timeout: CONNECT_TIMEOUT,
        }
    }

    /// How long to wait for the downstream proxy's CONNECT reply
    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

#[async_trait]
impl OutboundProxy for HttpProxy {
    fn name(&self) -> &str {
        &self.name
    }

    fn proxy_type(&self) -> ProxyType {
        ProxyType::Http
    }

    async fn dial_tcp(&self, request: &ParsedRequest) -> Result<TcpStream> {
        debug!(
            "[{}] connecting for {} via downstream proxy",
            self.name,
            request.target_addr()
        );
        let stream = super::connect(&self.name).await?;
        debug!("[{}] connected to downstream proxy", self.name);
        Ok(stream)
    }

    /// Replay the CONNECT request and forward a single reply chunk.
    ///
    /// Plain HTTP requests need no handshake.
    async fn handshake(
        &self,
        upstream: &mut TcpStream,
        client: &mut TcpStream,
        request: &ParsedRequest,
    ) -> Result<()> {
        if !request.is_connect {
            return Ok(());
        }

        match upstream.write_all(&request.raw_header_bytes).await {
            Ok(()) => debug!(
                "[{}] replayed {} CONNECT bytes",
                self.name,
                request.raw_header_bytes.len()
            ),
            Err(e) => warn!("[{}] replaying CONNECT failed: {}", self.name, e),
        }

        let mut reply = vec![0u8; HANDSHAKE_BUF_SIZE];
        let read = match timeout(self.handshake_timeout, upstream.read(&mut reply)).await {
            Ok(read) => read,
            Err(_) => {
                warn!(
                    "[{}] no handshake reply within {:?}",
                    self.name, self.handshake_timeout
                );
                return Ok(());
            }
        };
        match read {
            Ok(0) => debug!("[{}] downstream proxy closed during handshake", self.name),
            Ok(n) => {
                debug!("[{}] forwarding {} handshake bytes", self.name, n);
                if let Err(e) = client.write_all(&reply[..n]).await {
                    warn!("[{}] forwarding handshake reply failed: {}", self.name, e);
                }
            }
            Err(e) => warn!("[{}] handshake read error: {}", self.name, e),
        }

        Ok(())
    }
}
