//! Capture counters.
//!
//! Each capture handle owns one [`CaptureStats`]. Counters are atomic so a
//! reporting thread can read them through an `Arc` while the owner captures.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increments the counter by 1.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds a value to the counter.
    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    /// Gets the current value of the counter.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-handle capture statistics.
#[derive(Debug, Default)]
pub struct CaptureStats {
    /// Successful reads.
    pub reads: Counter,
    /// Bytes returned by successful reads.
    pub rx_bytes: Counter,
    /// Packets produced by demultiplexing.
    pub rx_packets: Counter,
    /// Reads retried after a signal interruption.
    pub rx_interrupted: Counter,
    /// Reads retried after returning no data.
    pub rx_empty: Counter,
    /// Reads that failed.
    pub rx_errors: Counter,
    /// Buffers that failed to demultiplex.
    pub parse_errors: Counter,
    /// Successful writes.
    pub writes: Counter,
    /// Bytes written.
    pub tx_bytes: Counter,
    /// Writes retried after a signal interruption.
    pub tx_interrupted: Counter,
    /// Writes that failed.
    pub tx_errors: Counter,
}

impl CaptureStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful read.
    pub fn record_read(&self, bytes: usize) {
        self.reads.inc();
        self.rx_bytes.add(bytes as u64);
    }

    /// Records a successful write.
    pub fn record_write(&self, bytes: usize) {
        self.writes.inc();
        self.tx_bytes.add(bytes as u64);
    }

    /// Exports all counters as key-value pairs.
    pub fn export(&self) -> Vec<(String, u64)> {
        vec![
            ("reads".into(), self.reads.get()),
            ("rx_bytes".into(), self.rx_bytes.get()),
            ("rx_packets".into(), self.rx_packets.get()),
            ("rx_interrupted".into(), self.rx_interrupted.get()),
            ("rx_empty".into(), self.rx_empty.get()),
            ("rx_errors".into(), self.rx_errors.get()),
            ("parse_errors".into(), self.parse_errors.get()),
            ("writes".into(), self.writes.get()),
            ("tx_bytes".into(), self.tx_bytes.get()),
            ("tx_interrupted".into(), self.tx_interrupted.get()),
            ("tx_errors".into(), self.tx_errors.get()),
        ]
    }
}
