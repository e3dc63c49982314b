//! Per-item progress and throughput sampling.

use std::time::Instant;

/// Tracks cumulative bytes moved for one item against its declared
/// size, producing (percentage, MB/s) samples at chunk boundaries.
pub struct ThroughputTracker {
    started: Instant,
    total_size: u64,
    bytes_moved: u64,
}

impl ThroughputTracker {
    pub fn new(total_size: u64) -> Self {
        Self {
            started: Instant::now(),
            total_size,
            bytes_moved: 0,
        }
    }

    /// Record another chunk and return the updated sample.
    pub fn record(&mut self, chunk_bytes: u64) -> ProgressSample {
        self.bytes_moved += chunk_bytes;
        self.sample()
    }

    pub fn bytes_moved(&self) -> u64 {
        self.bytes_moved
    }

    pub fn sample(&self) -> ProgressSample {
        let percentage = if self.total_size == 0 {
            100.0
        } else {
            self.bytes_moved as f64 / self.total_size as f64 * 100.0
        };
        let secs = self.started.elapsed().as_secs_f64();
        let mb_per_sec = if secs > 0.0 {
            self.bytes_moved as f64 / (1024.0 * 1024.0) / secs
        } else {
            0.0
        };
        ProgressSample {
            percentage,
            mb_per_sec,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    /// 0..=100 for this item.
    pub percentage: f64,
    /// Instantaneous rate, 1 MB = 1048576 bytes.
    pub mb_per_sec: f64,
}
