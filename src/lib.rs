//! tunproxy - transparent HTTP / CONNECT forward proxy
//!
//! Accepts clients on a single TCP port, checks every destination against an
//! exact-match domain allowlist and relays bytes either straight to the
//! destination or through a downstream HTTP proxy. Aggregate upload and
//! download throughput is reported periodically.
//!
//! # Architecture
//!
//! ```text
//!                     +----------------+
//!                     |  inbound/      |
//!                     | (listener,     |
//!                     |  request read) |
//!                     +-------+--------+
//!                             |
//!        +--------------------+--------------------+
//!        |                    |                    |
//! +------v------+     +-------v-------+    +------v------+
//! |   config/   |     |   statistic/  |    |   tunnel/   |
//! +-------------+     +-------^-------+    | (session,   |
//!                             |            |  relay)     |
//!                             |            +------+------+
//!                             |                   |
//!                             +---------+---------+----------+
//!                                       |                    |
//!                               +-------v-------+    +------v------+
//!                               |   outbound/   |    |    rule/    |
//!                               | (direct, http)|    | (allowlist) |
//!                               +---------------+    +-------------+
//! ```

pub mod common;
pub mod config;
pub mod inbound;
pub mod outbound;
pub mod rule;
pub mod statistic;
pub mod tunnel;

pub use common::error::{Error, Result};
pub use config::Config;

use inbound::{HttpListener, InboundListener};
use statistic::{ActiveTasks, ThroughputStats};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Proxy instance wiring the listener, tunnel and statistics together
pub struct TunProxy {
    config: Config,
    listener: Arc<HttpListener>,
    stats: Arc<ThroughputStats>,
    tasks: Arc<ActiveTasks>,
}

impl TunProxy {
    /// Validate the configuration and bind the listening port
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        info!("Initializing tunproxy v{}", VERSION);

        let stats = Arc::new(ThroughputStats::new());
        let tasks = Arc::new(ActiveTasks::new());

        let tunnel = Arc::new(tunnel::Tunnel::from_config(
            &config,
            stats.clone(),
            tasks.clone(),
        ));
        info!(
            "Loaded {} allowed domains, outbound {}",
            tunnel.allowlist().len(),
            tunnel.outbound().name()
        );

        let listener = HttpListener::bind(("0.0.0.0", config.port), tunnel)
            .await
            .map_err(|e| Error::config(format!("Cannot listen on port {}: {}", config.port, e)))?;

        Ok(TunProxy {
            config,
            listener: Arc::new(listener),
            stats,
            tasks,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> &Arc<ThroughputStats> {
        &self.stats
    }

    pub fn tasks(&self) -> &Arc<ActiveTasks> {
        &self.tasks
    }

    /// Serve until Ctrl-C or until the listener fails
    pub async fn run(&self) -> Result<()> {
        let reporter = self
            .stats
            .start_reporter(self.tasks.clone(), self.config.report_interval());

        let listener = self.listener.clone();
        let mut accept_loop = tokio::spawn(async move { listener.start().await });

        let result = tokio::select! {
            res = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                self.listener.stop().await?;
                res.map_err(Error::from)
            }
            res = &mut accept_loop => match res {
                Ok(inner) => inner,
                Err(e) => Err(Error::internal(format!("Listener task failed: {}", e))),
            },
        };

        if !accept_loop.is_finished() {
            if let Err(e) = accept_loop.await {
                warn!("Listener task failed: {}", e);
            }
        }
        reporter.abort();
        self.stats.report();

        info!("tunproxy stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        assert!(TunProxy::new(Config::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_new_binds_port() {
        let probe = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let config = Config {
            port,
            ..Config::default()
        };
        let proxy = TunProxy::new(config).await.unwrap();
        assert_eq!(proxy.local_addr().unwrap().port(), port);
        assert_eq!(proxy.tasks().count(), 0);
    }
}
