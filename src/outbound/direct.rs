//! Direct outbound (no downstream proxy)

use super::{OutboundProxy, ProxyType};
use crate::inbound::ParsedRequest;
use crate::Result;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

/// Direct connection to the requested destination
pub struct Direct {
    name: String,
}

impl Direct {
    pub fn new() -> Self {
        Direct {
            name: "DIRECT".to_string(),
        }
    }
}

impl Default for Direct {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboundProxy for Direct {
    fn name(&self) -> &str {
        &self.name
    }

    fn proxy_type(&self) -> ProxyType {
        ProxyType::Direct
    }

    async fn dial_tcp(&self, request: &ParsedRequest) -> Result<TcpStream> {
        let addr = request.target_addr();
        debug!("Direct connecting to {}", addr);
        let stream = super::connect(&addr).await?;
        debug!("Direct connected to {}", addr);
        Ok(stream)
    }

    async fn handshake(
        &self,
        upstream: &mut TcpStream,
        _client: &mut TcpStream,
        request: &ParsedRequest,
    ) -> Result<()> {
        // tunnel bytes the client sent right behind its CONNECT headers
        let early = request.early_data();
        if request.is_connect && !early.is_empty() {
            debug!("forwarding {} early tunnel bytes", early.len());
            upstream.write_all(early).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbound::RequestReader;
    use bytes::Bytes;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_dial_refused_target() {
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let raw = format!("CONNECT 127.0.0.1:{} HTTP/1.1\r\n\r\n", port);
        let request = RequestReader::new()
            .classify(Bytes::from(raw), None)
            .unwrap();

        let direct = Direct::default();
        assert_eq!(direct.proxy_type(), ProxyType::Direct);
        let err = direct.dial_tcp(&request).await.unwrap_err();
        assert!(matches!(err, crate::Error::Connection(_)));
    }

    #[tokio::test]
    async fn test_dial_and_forward_early_data() {
        let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = target.local_addr().unwrap().port();

        let raw = format!("CONNECT 127.0.0.1:{} HTTP/1.1\r\n\r\nhello", port);
        let header_len = raw.len() - 5;
        let request = RequestReader::new()
            .classify(Bytes::from(raw), Some(header_len))
            .unwrap();

        // stand-in for the client side of the session
        let side = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let side_addr = side.local_addr().unwrap();
        let _peer = TcpStream::connect(side_addr).await.unwrap();
        let (mut client, _) = side.accept().await.unwrap();

        let direct = Direct::new();
        let mut upstream = direct.dial_tcp(&request).await.unwrap();
        direct
            .handshake(&mut upstream, &mut client, &request)
            .await
            .unwrap();

        let (mut accepted, _) = target.accept().await.unwrap();
        let mut buf = [0u8; 5];
        accepted.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }
}
