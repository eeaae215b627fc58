//! Tunnel core - runs one proxy session per accepted client
//!
//! A session classifies the request, checks the destination against the
//! allowlist, connects upstream (directly or through the downstream proxy)
//! and relays until both directions are done. Nothing is ever reported to
//! the client on failure; the connection is simply closed.

mod idle;
mod relay;

pub use idle::IdleSupervisor;
pub use relay::{
    copy_idle_raced, copy_until_closed, copy_with_deadline, CopyOutcome, Relay, RelayOutcome,
};

use crate::common::net::{configure_tcp_stream, strip_port};
use crate::config::Config;
use crate::inbound::{write_established, RequestReader};
use crate::outbound::{self, OutboundProxy};
use crate::rule::DomainAllowlist;
use crate::statistic::{ActiveTasks, ThroughputStats};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Default deadline / idle window
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Relay timeout strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    /// Per-chunk read deadline on both directions
    #[default]
    Deadline,
    /// Upstream reads raced against an idle timer that closes the session
    Idle,
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayMode::Deadline => write!(f, "deadline"),
            RelayMode::Idle => write!(f, "idle"),
        }
    }
}

impl TryFrom<&str> for RelayMode {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "deadline" => Ok(RelayMode::Deadline),
            "idle" | "tunnel" => Ok(RelayMode::Idle),
            _ => Err(Error::config(format!("Unknown relay mode: {}", s))),
        }
    }
}

/// Session orchestrator shared by every accepted connection
pub struct Tunnel {
    allowlist: DomainAllowlist,
    outbound: Arc<dyn OutboundProxy>,
    reader: RequestReader,
    relay: Relay,
    plain_http: bool,
    tasks: Arc<ActiveTasks>,
}

impl Tunnel {
    pub fn new(
        allowlist: DomainAllowlist,
        outbound: Arc<dyn OutboundProxy>,
        stats: Arc<ThroughputStats>,
        tasks: Arc<ActiveTasks>,
    ) -> Self {
        Tunnel {
            allowlist,
            outbound,
            reader: RequestReader::new(),
            relay: Relay::new(RelayMode::Deadline, DEFAULT_IDLE_TIMEOUT, stats, tasks.clone()),
            plain_http: true,
            tasks,
        }
    }

    /// Build a tunnel from configuration
    pub fn from_config(
        config: &Config,
        stats: Arc<ThroughputStats>,
        tasks: Arc<ActiveTasks>,
    ) -> Self {
        let reader = RequestReader::new()
            .with_max_header_size(config.max_header_size)
            .with_strip_www_prefix(config.strip_www_prefix);

        Tunnel::new(
            DomainAllowlist::new(config.allowed_domains.iter().cloned()),
            outbound::from_config(config),
            stats,
            tasks,
        )
        .with_relay(config.relay_mode, config.idle_timeout())
        .with_plain_http(config.plain_http)
        .with_request_reader(reader)
    }

    pub fn with_relay(mut self, mode: RelayMode, timeout: Duration) -> Self {
        self.relay = Relay::new(mode, timeout, self.relay.stats(), self.tasks.clone());
        self
    }

    /// Accept or refuse non-CONNECT requests
    pub fn with_plain_http(mut self, enabled: bool) -> Self {
        self.plain_http = enabled;
        self
    }

    pub fn with_request_reader(mut self, reader: RequestReader) -> Self {
        self.reader = reader;
        self
    }

    pub fn allowlist(&self) -> &DomainAllowlist {
        &self.allowlist
    }

    pub fn outbound(&self) -> &Arc<dyn OutboundProxy> {
        &self.outbound
    }

    pub fn relay_mode(&self) -> RelayMode {
        self.relay.mode()
    }

    /// Run one client session to completion
    pub async fn handle_session(&self, client: TcpStream, peer_addr: SocketAddr) {
        let _guard = self.tasks.track();
        match self.process_session(client, peer_addr).await {
            Ok(()) => {}
            Err(Error::Blocked(domain)) => warn!("This domain {} is blocked", domain),
            Err(e) if e.is_disconnect() => debug!("session from {} ended: {}", peer_addr, e),
            Err(e) => warn!("session from {} failed: {}", peer_addr, e),
        }
    }

    async fn process_session(&self, mut client: TcpStream, peer_addr: SocketAddr) -> Result<()> {
        configure_tcp_stream(&client);

        let wait = self.relay.timeout();
        let request = tokio::time::timeout(wait, self.reader.read(&mut client))
            .await
            .map_err(|_| Error::timeout(format!("no request head within {:?}", wait)))??;
        debug!(
            "{} request from {} for {}",
            if request.is_connect { "CONNECT" } else { "HTTP" },
            peer_addr,
            request.target_addr()
        );

        if !request.is_connect && !self.plain_http {
            return Err(Error::protocol("Plain HTTP requests are disabled"));
        }

        let domain = strip_port(&request.target_host);
        if !self.allowlist.allows(domain) {
            return Err(Error::blocked(domain));
        }

        if request.is_connect {
            write_established(&mut client).await?;
        }

        let mut upstream = self.outbound.dial_tcp(&request).await?;
        info!(
            "{} -> {} via {}",
            peer_addr,
            request.target_addr(),
            self.outbound.name()
        );

        self.outbound
            .handshake(&mut upstream, &mut client, &request)
            .await?;

        if !request.is_connect {
            upstream
                .write_all(&request.raw_header_bytes)
                .await
                .map_err(|e| Error::connection(format!("Forwarding request bytes failed: {}", e)))?;
        }

        let outcome = self.relay.run(client, upstream).await;
        debug!(
            "session {} -> {} closed (sent: {}, received: {})",
            peer_addr,
            request.target_addr(),
            outcome.uploaded,
            outcome.downloaded
        );
        Ok(())
    }
}
