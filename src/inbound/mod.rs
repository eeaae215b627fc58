//! Inbound side: listener and request classification

mod http;
mod request;
mod scanner;

pub use http::HttpListener;
pub use request::{
    write_established, ParsedRequest, RequestReader, CONNECT_ESTABLISHED, CONNECT_METHOD,
    DEFAULT_MAX_HEADER_SIZE,
};
pub use scanner::HeaderScanner;

use crate::Result;
use async_trait::async_trait;

/// Trait for inbound listeners
#[async_trait]
pub trait InboundListener: Send + Sync {
    /// Get listener name
    fn name(&self) -> &str;

    /// Accept connections until stopped or accepting fails
    async fn start(&self) -> Result<()>;

    /// Stop the listener
    async fn stop(&self) -> Result<()>;

    /// Check if listener is running
    fn is_running(&self) -> bool;
}
