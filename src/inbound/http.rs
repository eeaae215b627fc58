//! Proxy listener

use super::InboundListener;
use crate::tunnel::Tunnel;
use crate::Result;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Accepts clients and hands each one to the tunnel on its own task
pub struct HttpListener {
    listener: TcpListener,
    tunnel: Arc<Tunnel>,
    running: AtomicBool,
    shutdown: CancellationToken,
}

impl HttpListener {
    /// Bind the listening socket
    pub async fn bind<A: ToSocketAddrs>(addr: A, tunnel: Arc<Tunnel>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(HttpListener {
            listener,
            tunnel,
            running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

#[async_trait]
impl InboundListener for HttpListener {
    fn name(&self) -> &str {
        "HTTP"
    }

    /// An accept error ends the loop and is returned; there is no retry.
    async fn start(&self) -> Result<()> {
        info!("Proxy listening on {}", self.local_addr()?);
        self.running.store(true, Ordering::SeqCst);

        let result = loop {
            let accepted = tokio::select! {
                res = self.listener.accept() => res,
                _ = self.shutdown.cancelled() => break Ok(()),
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    debug!("new connection accepted from {}", peer_addr);
                    let tunnel = self.tunnel.clone();
                    tokio::spawn(async move {
                        tunnel.handle_session(stream, peer_addr).await;
                    });
                }
                Err(e) => {
                    error!("error tcp accept: {}", e);
                    break Err(e.into());
                }
            }
        };

        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn stop(&self) -> Result<()> {
        self.shutdown.cancel();
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
