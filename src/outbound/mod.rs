//! Outbound adapters (upstream connectors)
//!
//! - `Direct`: dial the requested destination
//! - `HttpProxy`: dial a downstream HTTP proxy and replay the client's
//!   CONNECT request to it

mod direct;
mod http;

pub use direct::Direct;
pub use http::HttpProxy;

use crate::config::Config;
use crate::inbound::ParsedRequest;
use crate::{Error, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Connection timeout
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Proxy type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyType {
    Direct,
    Http,
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyType::Direct => write!(f, "Direct"),
            ProxyType::Http => write!(f, "HTTP"),
        }
    }
}

/// Trait for upstream connectors
#[async_trait]
pub trait OutboundProxy: Send + Sync {
    /// Get proxy name
    fn name(&self) -> &str;

    /// Get proxy type
    fn proxy_type(&self) -> ProxyType;

    /// Open the upstream connection for a classified request
    async fn dial_tcp(&self, request: &ParsedRequest) -> Result<TcpStream>;

    /// Exchange whatever the upstream needs before relaying starts.
    ///
    /// Called once right after `dial_tcp`, with the client connection so a
    /// handshake reply can be passed back to it.
    async fn handshake(
        &self,
        _upstream: &mut TcpStream,
        _client: &mut TcpStream,
        _request: &ParsedRequest,
    ) -> Result<()> {
        Ok(())
    }
}

/// Dial `addr` with the standard connect timeout and no retry
pub(crate) async fn connect(addr: &str) -> Result<TcpStream> {
    let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::timeout(format!("Connecting to {} timed out", addr)))?
        .map_err(|e| Error::connection(format!("Failed to connect to {}: {}", addr, e)))?;
    crate::common::net::configure_tcp_stream(&stream);
    Ok(stream)
}

/// Pick the upstream connector for a configuration
pub fn from_config(config: &Config) -> Arc<dyn OutboundProxy> {
    match config.downstream_proxy() {
        Some((host, port)) => Arc::new(
            HttpProxy::new(host.to_string(), port)
                .with_handshake_timeout(config.idle_timeout()),
        ),
        None => Arc::new(Direct::new()),
    }
}
