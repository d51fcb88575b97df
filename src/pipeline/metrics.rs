//! Progress monitoring and metrics collection.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Metrics for a points or tiles run.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Tiles settled, successfully or not. Only ever increases.
    pub tiles_completed: AtomicU64,

    /// Tiles written
    pub tiles_succeeded: AtomicU64,

    /// Tiles whose read, encode or write failed
    pub tiles_failed: AtomicU64,

    /// Encoded bytes written to the store
    pub bytes_written: AtomicU64,

    /// Windows read by the point stream
    pub windows_read: AtomicU64,

    /// Point records written
    pub points_written: AtomicU64,

    /// Start time
    start_time: Option<Instant>,

    // Per-stage timing (in microseconds for precision)
    /// Time spent reading tile windows (microseconds)
    pub read_us: AtomicU64,

    /// Time spent encoding tiles (microseconds)
    pub encode_us: AtomicU64,

    /// Time spent writing tiles (microseconds)
    pub write_us: AtomicU64,
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    /// Record a written tile.
    pub fn add_tile_succeeded(&self, bytes: u64) {
        self.tiles_succeeded.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
        self.tiles_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed tile.
    pub fn add_tile_failed(&self) {
        self.tiles_failed.fetch_add(1, Ordering::Relaxed);
        self.tiles_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a window consumed by the point stream.
    pub fn add_window_read(&self) {
        self.windows_read.fetch_add(1, Ordering::Relaxed);
    }

    /// Record written points.
    pub fn add_points_written(&self, count: u64) {
        self.points_written.fetch_add(count, Ordering::Relaxed);
    }

    /// Record time spent reading a tile window.
    pub fn add_read_time(&self, duration: Duration) {
        self.read_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record time spent encoding a tile.
    pub fn add_encode_time(&self, duration: Duration) {
        self.encode_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record time spent writing a tile.
    pub fn add_write_time(&self, duration: Duration) {
        self.write_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    fn per_second(&self, count: u64) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            count as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get tiles per second.
    pub fn tiles_per_second(&self) -> f64 {
        self.per_second(self.tiles_completed.load(Ordering::Relaxed))
    }

    /// Get points per second.
    pub fn points_per_second(&self) -> f64 {
        self.per_second(self.points_written.load(Ordering::Relaxed))
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tiles_completed: self.tiles_completed.load(Ordering::Relaxed),
            tiles_succeeded: self.tiles_succeeded.load(Ordering::Relaxed),
            tiles_failed: self.tiles_failed.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            windows_read: self.windows_read.load(Ordering::Relaxed),
            points_written: self.points_written.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            tiles_per_second: self.tiles_per_second(),
            points_per_second: self.points_per_second(),
            read_secs: self.read_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            encode_secs: self.encode_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            write_secs: self.write_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub tiles_completed: u64,
    pub tiles_succeeded: u64,
    pub tiles_failed: u64,
    pub bytes_written: u64,
    pub windows_read: u64,
    pub points_written: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub tiles_per_second: f64,
    pub points_per_second: f64,
    /// Total time spent reading tile windows (seconds, summed across workers)
    pub read_secs: f64,
    /// Total time spent encoding (seconds, summed across workers)
    pub encode_secs: f64,
    /// Total time spent writing (seconds, summed across workers)
    pub write_secs: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.points_written > 0 || self.windows_read > 0 {
            return write!(
                f,
                "Windows: {} | Points: {} @ {:.0}/s | Elapsed: {:.1}s",
                self.windows_read,
                self.points_written,
                self.points_per_second,
                self.elapsed.as_secs_f64(),
            );
        }

        let total_stage_time = self.read_secs + self.encode_secs + self.write_secs;
        let (read_pct, encode_pct, write_pct) = if total_stage_time > 0.0 {
            (
                self.read_secs / total_stage_time * 100.0,
                self.encode_secs / total_stage_time * 100.0,
                self.write_secs / total_stage_time * 100.0,
            )
        } else {
            (0.0, 0.0, 0.0)
        };

        write!(
            f,
            "Tiles: {} done, {} ok, {} failed | Written: {:.2} MB | \
             Rate: {:.1} tiles/s | Elapsed: {:.1}s | \
             Time: read {:.0}% | encode {:.0}% | write {:.0}%",
            self.tiles_completed,
            self.tiles_succeeded,
            self.tiles_failed,
            self.bytes_written as f64 / (1024.0 * 1024.0),
            self.tiles_per_second,
            self.elapsed.as_secs_f64(),
            read_pct,
            encode_pct,
            write_pct,
        )
    }
}

/// Which counter drives the progress percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressUnit {
    Tiles,
    Windows,
}

/// Periodic metrics reporter.
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    interval_secs: u64,
    total: u64,
    unit: ProgressUnit,
}

impl MetricsReporter {
    /// Create a new metrics reporter.
    pub fn new(metrics: Arc<Metrics>, interval_secs: u64, total: u64, unit: ProgressUnit) -> Self {
        Self {
            metrics,
            interval_secs: interval_secs.max(1),
            total,
            unit,
        }
    }

    /// Percentage of the run that has settled.
    pub fn progress(&self, snapshot: &MetricsSnapshot) -> f64 {
        let done = match self.unit {
            ProgressUnit::Tiles => snapshot.tiles_completed,
            ProgressUnit::Windows => snapshot.windows_read,
        };
        if self.total > 0 {
            done as f64 / self.total as f64 * 100.0
        } else {
            0.0
        }
    }

    /// Start the periodic reporter.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.metrics.snapshot();
                    tracing::info!("[{:.1}%] {}", self.progress(&snapshot), snapshot);
                }
                _ = shutdown.recv() => {
                    let snapshot = self.metrics.snapshot();
                    tracing::info!("Final: {}", snapshot);
                    break;
                }
            }
        }
    }
}

/// Print a final summary of a run to stderr.
pub fn print_summary(metrics: &Metrics) {
    let snapshot = metrics.snapshot();

    eprintln!("\n=== Summary ===");
    eprintln!("Total time: {:.1}s", snapshot.elapsed.as_secs_f64());
    if snapshot.windows_read > 0 {
        eprintln!("Windows read: {}", snapshot.windows_read);
        eprintln!("Points written: {}", snapshot.points_written);
        eprintln!("Rate: {:.0} points/s", snapshot.points_per_second);
    } else {
        eprintln!("Tiles completed: {}", snapshot.tiles_completed);
        eprintln!("Tiles succeeded: {}", snapshot.tiles_succeeded);
        eprintln!("Tiles failed: {}", snapshot.tiles_failed);
        eprintln!(
            "Data written: {:.2} MB",
            snapshot.bytes_written as f64 / (1024.0 * 1024.0)
        );
        eprintln!("Rate: {:.1} tiles/s", snapshot.tiles_per_second);

        let total_stage = snapshot.read_secs + snapshot.encode_secs + snapshot.write_secs;
        if total_stage > 0.0 {
            eprintln!("\n--- Stage Time Breakdown ---");
            eprintln!("Read:    {:>7.1}s ({:>5.1}%)", snapshot.read_secs, snapshot.read_secs / total_stage * 100.0);
            eprintln!("Encode:  {:>7.1}s ({:>5.1}%)", snapshot.encode_secs, snapshot.encode_secs / total_stage * 100.0);
            eprintln!("Write:   {:>7.1}s ({:>5.1}%)", snapshot.write_secs, snapshot.write_secs / total_stage * 100.0);
        }
    }
    eprintln!("===============\n");
}
