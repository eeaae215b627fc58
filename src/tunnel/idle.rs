//! Idle-timeout supervision for upstream reads

use crate::statistic::ThroughputStats;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Races every upstream read against a fresh idle timer.
///
/// When the timer wins, the whole session is closed through `closed`, a
/// throughput report is logged, and the read fails with a timeout. The
/// token may be cancelled any number of times, from any task.
pub struct IdleSupervisor {
    timeout: Duration,
    closed: CancellationToken,
    stats: Arc<ThroughputStats>,
}

impl IdleSupervisor {
    pub fn new(timeout: Duration, closed: CancellationToken, stats: Arc<ThroughputStats>) -> Self {
        IdleSupervisor {
            timeout,
            closed,
            stats,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Session close signal shared with the other relay direction
    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }

    /// Read into `buf` unless the idle timer fires first
    pub async fn read<R: AsyncRead + Unpin>(&self, src: &mut R, buf: &mut [u8]) -> Result<usize> {
        tokio::select! {
            res = src.read(buf) => Ok(res?),
            _ = tokio::time::sleep(self.timeout) => {
                warn!("no upstream data for {:?}, forcing session closed", self.timeout);
                self.closed.cancel();
                self.stats.report();
                Err(Error::timeout(format!("idle for {:?}", self.timeout)))
            }
            _ = self.closed.cancelled() => Err(Error::connection("session closed")),
        }
    }
}
