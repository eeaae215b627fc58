//! Bidirectional relay between a client and its upstream
//!
//! Each session runs two copy tasks, one per direction. Bytes keep their
//! order within a direction; the two directions are independent. Every
//! chunk moved is added to the shared [`ThroughputStats`] together with the
//! time spent reading and writing it.
//!
//! Two timeout strategies are available:
//! - `Deadline`: every read on either side must complete within the window,
//!   renewed for each chunk. An expired read ends that direction only.
//! - `Idle`: upstream reads are raced against an [`IdleSupervisor`]; when it
//!   fires, both directions are torn down.

use super::idle::IdleSupervisor;
use super::RelayMode;
use crate::statistic::{ActiveTasks, Direction, ThroughputStats};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const RELAY_BUF_SIZE: usize = 16 * 1024;

/// Bytes copied by one direction, and how that direction ended.
///
/// The count is kept even when the copy ends in an error, so a deadline or
/// idle expiry still reports the traffic moved before it.
pub type CopyOutcome = (u64, Result<()>);

/// Copy with a fresh read deadline for every chunk.
///
/// Ends with `Ok` once `src` reaches end of stream, after half-closing
/// `dst`. A read that misses its deadline ends the copy with a timeout error.
pub async fn copy_with_deadline<R, W>(
    src: &mut R,
    dst: &mut W,
    direction: Direction,
    deadline: Duration,
    stats: &ThroughputStats,
) -> CopyOutcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUF_SIZE];
    let mut total = 0u64;

    loop {
        let started = Instant::now();
        let n = match timeout(deadline, src.read(&mut buf)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return (total, Err(e.into())),
            Err(_) => {
                let err = Error::timeout(format!("{} read deadline of {:?}", direction, deadline));
                return (total, Err(err));
            }
        };
        if n == 0 {
            let _ = dst.shutdown().await;
            return (total, Ok(()));
        }

        if let Err(e) = dst.write_all(&buf[..n]).await {
            return (total, Err(e.into()));
        }
        stats.add(direction, n as u64, started.elapsed());
        total += n as u64;
    }
}

/// Copy upstream reads through the idle supervisor.
///
/// Only non-empty reads are forwarded; end of stream half-closes `dst`.
pub async fn copy_idle_raced<R, W>(
    src: &mut R,
    dst: &mut W,
    supervisor: &IdleSupervisor,
    stats: &ThroughputStats,
) -> CopyOutcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUF_SIZE];
    let mut total = 0u64;

    loop {
        let started = Instant::now();
        let n = match supervisor.read(src, &mut buf).await {
            Ok(n) => n,
            Err(e) => return (total, Err(e)),
        };
        if n == 0 {
            let _ = dst.shutdown().await;
            return (total, Ok(()));
        }

        if let Err(e) = dst.write_all(&buf[..n]).await {
            return (total, Err(e.into()));
        }
        stats.add_download(n as u64, started.elapsed());
        total += n as u64;
    }
}

/// Copy with no timeout until end of stream or until `closed` is cancelled
pub async fn copy_until_closed<R, W>(
    src: &mut R,
    dst: &mut W,
    direction: Direction,
    closed: &CancellationToken,
    stats: &ThroughputStats,
) -> CopyOutcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUF_SIZE];
    let mut total = 0u64;

    loop {
        let started = Instant::now();
        let n = tokio::select! {
            res = src.read(&mut buf) => match res {
                Ok(n) => n,
                Err(e) => return (total, Err(e.into())),
            },
            _ = closed.cancelled() => return (total, Ok(())),
        };
        if n == 0 {
            let _ = dst.shutdown().await;
            return (total, Ok(()));
        }

        if let Err(e) = dst.write_all(&buf[..n]).await {
            return (total, Err(e.into()));
        }
        stats.add(direction, n as u64, started.elapsed());
        total += n as u64;
    }
}

/// Bytes moved by one relay run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayOutcome {
    pub uploaded: u64,
    pub downloaded: u64,
}

/// Relay engine configuration, shared by all sessions
#[derive(Clone)]
pub struct Relay {
    mode: RelayMode,
    timeout: Duration,
    stats: Arc<ThroughputStats>,
    tasks: Arc<ActiveTasks>,
}

impl Relay {
    pub fn new(
        mode: RelayMode,
        timeout: Duration,
        stats: Arc<ThroughputStats>,
        tasks: Arc<ActiveTasks>,
    ) -> Self {
        Relay {
            mode,
            timeout,
            stats,
            tasks,
        }
    }

    pub fn mode(&self) -> RelayMode {
        self.mode
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn stats(&self) -> Arc<ThroughputStats> {
        self.stats.clone()
    }

    /// Relay until both directions have finished.
    ///
    /// The upstream-to-client task is the one the session waits on first. In
    /// idle mode its end tears down the client-to-upstream task as well; in
    /// deadline mode that task runs on until its own end of stream, error or
    /// deadline.
    pub async fn run(&self, client: TcpStream, upstream: TcpStream) -> RelayOutcome {
        let (mut client_read, mut client_write) = client.into_split();
        let (mut upstream_read, mut upstream_write) = upstream.into_split();
        let closed = CancellationToken::new();

        let upload = {
            let guard = self.tasks.track();
            let stats = self.stats.clone();
            let closed = closed.clone();
            let mode = self.mode;
            let deadline = self.timeout;
            tokio::spawn(async move {
                let _guard = guard;
                let result = match mode {
                    RelayMode::Deadline => {
                        copy_with_deadline(
                            &mut client_read,
                            &mut upstream_write,
                            Direction::Upload,
                            deadline,
                            &stats,
                        )
                        .await
                    }
                    RelayMode::Idle => {
                        copy_until_closed(
                            &mut client_read,
                            &mut upstream_write,
                            Direction::Upload,
                            &closed,
                            &stats,
                        )
                        .await
                    }
                };
                finish(Direction::Upload, result)
            })
        };

        let download = {
            let guard = self.tasks.track();
            let stats = self.stats.clone();
            let supervisor = IdleSupervisor::new(self.timeout, closed.clone(), stats.clone());
            let mode = self.mode;
            let deadline = self.timeout;
            tokio::spawn(async move {
                let _guard = guard;
                let result = match mode {
                    RelayMode::Deadline => {
                        copy_with_deadline(
                            &mut upstream_read,
                            &mut client_write,
                            Direction::Download,
                            deadline,
                            &stats,
                        )
                        .await
                    }
                    RelayMode::Idle => {
                        copy_idle_raced(&mut upstream_read, &mut client_write, &supervisor, &stats)
                            .await
                    }
                };
                finish(Direction::Download, result)
            })
        };

        let downloaded = download.await.unwrap_or_else(|e| {
            debug!("download task failed: {}", e);
            0
        });
        if self.mode == RelayMode::Idle {
            closed.cancel();
        }
        let uploaded = upload.await.unwrap_or_else(|e| {
            debug!("upload task failed: {}", e);
            0
        });

        RelayOutcome {
            uploaded,
            downloaded,
        }
    }
}

fn finish(direction: Direction, (bytes, result): CopyOutcome) -> u64 {
    match result {
        Ok(()) => debug!("{} finished after {} bytes", direction, bytes),
        Err(e) => debug!("{} ended after {} bytes: {}", direction, bytes, e),
    }
    bytes
}
