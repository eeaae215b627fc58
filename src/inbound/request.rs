//! Request classification
//!
//! Reads the head of a client stream without any HTTP library, decides
//! whether it is a `CONNECT` tunnel request or a plain HTTP request, and
//! extracts the destination. Every byte read is kept so it can be replayed
//! to a downstream proxy or forwarded to the target.

use super::scanner::HeaderScanner;
use crate::common::net::{join_host_port, split_host_port};
use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Method token that marks a tunnel request
pub const CONNECT_METHOD: &[u8; 7] = b"CONNECT";

/// Reply sent to a client whose CONNECT was accepted.
///
/// The terminator is `\n\r\n\r`, not `\r\n\r\n`. Existing clients expect
/// exactly these bytes.
pub const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\n\r\n\r";

/// Default cap on bytes read while looking for the end of headers
pub const DEFAULT_MAX_HEADER_SIZE: usize = 64 * 1024;

const READ_CHUNK_SIZE: usize = 1024;
const DEFAULT_HTTP_PORT: u16 = 80;
const DEFAULT_CONNECT_PORT: u16 = 443;

/// Result of classifying one client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    /// Request started with `CONNECT`
    pub is_connect: bool,
    /// Destination host, without port
    pub target_host: String,
    /// Destination port
    pub target_port: u16,
    /// Every byte read from the client, in order
    pub raw_header_bytes: Bytes,
    /// Offset just past `\r\n\r\n`, if the boundary was seen
    pub header_len: Option<usize>,
}

impl ParsedRequest {
    /// `host:port` to dial
    pub fn target_addr(&self) -> String {
        join_host_port(&self.target_host, self.target_port)
    }

    /// Bytes read past the header boundary
    pub fn early_data(&self) -> &[u8] {
        match self.header_len {
            Some(end) => &self.raw_header_bytes[end..],
            None => &[],
        }
    }
}

/// Reads and classifies the head of a client stream
#[derive(Debug, Clone)]
pub struct RequestReader {
    max_header_size: usize,
    strip_www_prefix: bool,
}

impl Default for RequestReader {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestReader {
    pub fn new() -> Self {
        RequestReader {
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            strip_www_prefix: false,
        }
    }

    pub fn with_max_header_size(mut self, max: usize) -> Self {
        self.max_header_size = max.max(CONNECT_METHOD.len());
        self
    }

    /// Drop a leading `www.` from plain-HTTP `Host` values
    pub fn with_strip_www_prefix(mut self, strip: bool) -> Self {
        self.strip_www_prefix = strip;
        self
    }

    /// Read until the end of headers and classify the request.
    ///
    /// Scanning stops at the header boundary, end of stream, a read error or
    /// the header size cap. Read errors are logged and whatever was read so
    /// far is classified.
    pub async fn read<S: AsyncRead + Unpin>(&self, stream: &mut S) -> Result<ParsedRequest> {
        let mut raw = BytesMut::with_capacity(READ_CHUNK_SIZE);
        let mut scanner = HeaderScanner::new();
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        while raw.len() < self.max_header_size {
            let want = chunk.len().min(self.max_header_size - raw.len());
            let n = match stream.read(&mut chunk[..want]).await {
                Ok(0) => {
                    debug!("client closed after {} request bytes", raw.len());
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!("request read error after {} bytes: {}", raw.len(), e);
                    break;
                }
            };

            raw.extend_from_slice(&chunk[..n]);
            if scanner.feed(&chunk[..n]).is_some() {
                break;
            }
        }

        if raw.is_empty() {
            return Err(Error::protocol("Empty request"));
        }
        if !scanner.is_complete() && raw.len() >= self.max_header_size {
            warn!("no end of headers within {} bytes", self.max_header_size);
        }

        self.classify(raw.freeze(), scanner.boundary())
    }

    /// Classify already-read request bytes
    pub fn classify(&self, raw: Bytes, header_len: Option<usize>) -> Result<ParsedRequest> {
        let is_connect = raw.starts_with(CONNECT_METHOD);
        let head = String::from_utf8_lossy(&raw[..header_len.unwrap_or(raw.len())]);

        let (target_host, target_port) = if is_connect {
            parse_connect_target(&head)?
        } else {
            self.parse_http_target(&head)?
        };

        Ok(ParsedRequest {
            is_connect,
            target_host,
            target_port,
            raw_header_bytes: raw,
            header_len,
        })
    }

    fn parse_http_target(&self, head: &str) -> Result<(String, u16)> {
        let mut lines = head.split('\n').map(|l| l.trim_end_matches('\r'));
        let request_line = lines.next().unwrap_or_default();

        let host_header = lines.take_while(|l| !l.is_empty()).find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("host")
                .then(|| value.trim())
        });

        let authority = match host_header {
            Some(value) => value,
            // absolute-form target: GET http://host[:port]/path HTTP/1.1
            None => request_line
                .split_whitespace()
                .nth(1)
                .and_then(|uri| uri.strip_prefix("http://"))
                .map(|rest| rest.split('/').next().unwrap_or_default())
                .unwrap_or_default(),
        };

        let authority = if self.strip_www_prefix {
            authority.strip_prefix("www.").unwrap_or(authority)
        } else {
            authority
        };

        parse_authority(authority, DEFAULT_HTTP_PORT)
    }
}

fn parse_connect_target(head: &str) -> Result<(String, u16)> {
    let first_line = head.split('\n').next().unwrap_or_default();
    let authority = first_line.split_whitespace().nth(1).unwrap_or_default();
    parse_authority(authority, DEFAULT_CONNECT_PORT)
}

fn parse_authority(authority: &str, default_port: u16) -> Result<(String, u16)> {
    let (host, port) = split_host_port(authority);
    let port = match port {
        Some(p) => p
            .parse()
            .map_err(|_| Error::parse(format!("Invalid port in {}", authority)))?,
        None => default_port,
    };
    Ok((host.to_string(), port))
}

/// Tell a CONNECT client that the tunnel is open
pub async fn write_established<W: AsyncWrite + Unpin>(stream: &mut W) -> Result<()> {
    stream.write_all(CONNECT_ESTABLISHED).await?;
    stream.flush().await?;
    Ok(())
}
