//! Throughput statistics
//!
//! Provides process-wide counters for:
//! - Upload bytes and time spent uploading
//! - Download bytes and time spent downloading
//! - Running session and relay tasks
//!
//! Counters only ever grow. They are updated with single atomic adds from
//! every relay task and read without a lock by the periodic reporter, so a
//! report may mix values from slightly different instants.

mod tracker;

pub use tracker::{ActiveTasks, TaskGuard};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Relay direction, seen from the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to upstream
    Upload,
    /// Upstream to client
    Download,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

/// Cumulative transfer counters shared by all sessions
#[derive(Debug, Default)]
pub struct ThroughputStats {
    upload_bytes: AtomicU64,
    /// Nanoseconds
    upload_duration: AtomicU64,
    download_bytes: AtomicU64,
    /// Nanoseconds
    download_duration: AtomicU64,
}

impl ThroughputStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add upload bytes and the time it took to move them
    pub fn add_upload(&self, bytes: u64, elapsed: Duration) {
        self.upload_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.upload_duration
            .fetch_add(duration_nanos(elapsed), Ordering::Relaxed);
    }

    /// Add download bytes and the time it took to move them
    pub fn add_download(&self, bytes: u64, elapsed: Duration) {
        self.download_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.download_duration
            .fetch_add(duration_nanos(elapsed), Ordering::Relaxed);
    }

    pub fn add(&self, direction: Direction, bytes: u64, elapsed: Duration) {
        match direction {
            Direction::Upload => self.add_upload(bytes, elapsed),
            Direction::Download => self.add_download(bytes, elapsed),
        }
    }

    /// Read all four counters
    pub fn snapshot(&self) -> ThroughputSnapshot {
        ThroughputSnapshot {
            upload_bytes: self.upload_bytes.load(Ordering::Relaxed),
            upload_duration: Duration::from_nanos(self.upload_duration.load(Ordering::Relaxed)),
            download_bytes: self.download_bytes.load(Ordering::Relaxed),
            download_duration: Duration::from_nanos(
                self.download_duration.load(Ordering::Relaxed),
            ),
        }
    }

    /// Log cumulative throughput for both directions
    pub fn report(&self) {
        let snapshot = self.snapshot();
        match snapshot.upload_rate() {
            Some(rate) => info!(
                "upload speed n: {}, d: {:.3}s, {} bytes/sec",
                snapshot.upload_bytes,
                snapshot.upload_duration.as_secs_f64(),
                rate as u64
            ),
            None => info!("upload speed: no transfers yet"),
        }
        match snapshot.download_rate() {
            Some(rate) => info!(
                "download speed n: {}, d: {:.3}s, {} bytes/sec",
                snapshot.download_bytes,
                snapshot.download_duration.as_secs_f64(),
                rate as u64
            ),
            None => info!("download speed: no transfers yet"),
        }
    }

    /// Start the periodic reporter
    pub fn start_reporter(
        self: &Arc<Self>,
        tasks: Arc<ActiveTasks>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                info!("Number of running tasks: {}", tasks.count());
                this.report();
            }
        })
    }
}

fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Point-in-time view of [`ThroughputStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThroughputSnapshot {
    pub upload_bytes: u64,
    pub upload_duration: Duration,
    pub download_bytes: u64,
    pub download_duration: Duration,
}

impl ThroughputSnapshot {
    /// Upload bytes per second, `None` until some time has been recorded
    pub fn upload_rate(&self) -> Option<f64> {
        rate(self.upload_bytes, self.upload_duration)
    }

    /// Download bytes per second, `None` until some time has been recorded
    pub fn download_rate(&self) -> Option<f64> {
        rate(self.download_bytes, self.download_duration)
    }
}

fn rate(bytes: u64, duration: Duration) -> Option<f64> {
    let secs = duration.as_secs_f64();
    (secs > 0.0).then(|| bytes as f64 / secs)
}
