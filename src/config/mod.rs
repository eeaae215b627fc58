//! Configuration module
//!
//! Settings come from a JSON file (`conf.json` by default, YAML when the
//! file ends in `.yaml`/`.yml`) and are then overridden by command-line
//! flags. `validate` runs after the overrides, since a required value such
//! as the port may come from either place.

use crate::inbound::DEFAULT_MAX_HEADER_SIZE;
use crate::tunnel::RelayMode;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Default configuration file
pub const DEFAULT_CONFIG_PATH: &str = "conf.json";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Listen port on 0.0.0.0
    #[serde(alias = "Port")]
    pub port: u16,

    /// Downstream proxy host
    #[serde(rename = "proxyip", alias = "Proxyip", alias = "proxy-ip")]
    pub proxy_ip: Option<String>,

    /// Downstream proxy port
    #[serde(rename = "proxyport", alias = "Proxyport", alias = "proxy-port")]
    pub proxy_port: Option<u16>,

    /// Never chain through the downstream proxy
    #[serde(rename = "noproxy", alias = "Noproxy", alias = "no-proxy")]
    pub no_proxy: bool,

    /// Exact-match destination allowlist
    #[serde(
        rename = "alloweddomains",
        alias = "Alloweddomains",
        alias = "allowed-domains"
    )]
    pub allowed_domains: Vec<String>,

    /// Relay timeout strategy
    #[serde(rename = "relay-mode")]
    pub relay_mode: RelayMode,

    /// Deadline / idle window in seconds
    #[serde(rename = "idle-timeout")]
    pub idle_timeout: u64,

    /// Throughput report period in seconds
    #[serde(rename = "report-interval")]
    pub report_interval: u64,

    /// Accept plain (non-CONNECT) HTTP requests
    #[serde(rename = "plain-http")]
    pub plain_http: bool,

    /// Drop a leading `www.` from plain-HTTP Host values
    #[serde(rename = "strip-www-prefix")]
    pub strip_www_prefix: bool,

    /// Cap on request bytes read while looking for the end of headers
    #[serde(rename = "max-header-size")]
    pub max_header_size: usize,

    /// Log level
    #[serde(rename = "log-level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 0,
            proxy_ip: None,
            proxy_port: None,
            no_proxy: false,
            allowed_domains: Vec::new(),
            relay_mode: RelayMode::default(),
            idle_timeout: 10,
            report_interval: 5,
            plain_http: true,
            strip_www_prefix: false,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = if is_yaml(path) {
            Self::from_yaml(&content)?
        } else {
            Self::from_json(&content)?
        };
        debug!("conf read from {}", path.display());
        Ok(config)
    }

    /// Load configuration from file, falling back to defaults when it does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        match Self::load(path.as_ref()) {
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                debug!("no config file at {}, using defaults", path.as_ref().display());
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::config("missing listen port"));
        }

        if !self.no_proxy {
            match (self.proxy_host(), self.proxy_port.filter(|p| *p != 0)) {
                (Some(_), None) => {
                    return Err(Error::config(
                        "downstream proxy ip given without a proxy port (or pass --no-proxy)",
                    ))
                }
                (None, Some(_)) => {
                    return Err(Error::config(
                        "downstream proxy port given without a proxy ip (or pass --no-proxy)",
                    ))
                }
                _ => {}
            }
        }

        if self.idle_timeout == 0 {
            return Err(Error::config("idle-timeout must be greater than zero"));
        }
        if self.report_interval == 0 {
            return Err(Error::config("report-interval must be greater than zero"));
        }

        Ok(())
    }

    fn proxy_host(&self) -> Option<&str> {
        self.proxy_ip.as_deref().filter(|ip| !ip.is_empty())
    }

    /// Downstream proxy to chain through, when chaining is enabled
    pub fn downstream_proxy(&self) -> Option<(&str, u16)> {
        if self.no_proxy {
            return None;
        }
        match (self.proxy_host(), self.proxy_port) {
            (Some(host), Some(port)) if port != 0 => Some((host, port)),
            _ => None,
        }
    }

    pub fn chaining_enabled(&self) -> bool {
        self.downstream_proxy().is_some()
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval)
    }

    /// Log the effective settings at startup
    pub fn log_summary(&self) {
        info!("port: {}", self.port);
        info!("no-proxy: {}", self.no_proxy);
        match self.downstream_proxy() {
            Some((host, port)) => {
                info!("downstream proxy-ip: {}", host);
                info!("downstream proxy-port: {}", port);
            }
            None => info!("no downstream proxy, dialing targets directly"),
        }
        info!("allowed domains: {:?}", self.allowed_domains);
        info!(
            "relay mode: {} (timeout {}s), plain http: {}",
            self.relay_mode, self.idle_timeout, self.plain_http
        );
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}
