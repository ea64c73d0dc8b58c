//! Metrics definitions for the sync service.
//!
//! This module defines all metrics used throughout the indexer.
//! Metrics are collected using the `metrics` crate and can be exported
//! to Prometheus via `metrics-exporter-prometheus`.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Instant;

/// Initialize all metric descriptions.
/// Call this once at startup before any metrics are recorded.
pub fn init_metrics() {
    describe_counter!(
        "decode_errors_total",
        "Total number of registry logs that could not be decoded"
    );
    describe_counter!(
        "chunks_committed_total",
        "Total number of block chunks committed"
    );
    describe_counter!(
        "registry_events_indexed_total",
        "Total number of registry events stored"
    );
    describe_histogram!(
        "chunk_processing_duration_seconds",
        "Time taken to fetch, project and persist a chunk in seconds"
    );
    describe_counter!(
        "chunk_retries_total",
        "Total number of chunk retries, by reason"
    );
    describe_counter!(
        "projection_errors_total",
        "Total number of events skipped by the projector"
    );
    describe_counter!(
        "resolver_reverts_total",
        "Total number of resolver lookups that reverted"
    );
    describe_gauge!(
        "watermark_block",
        "Highest block whose registry events are committed"
    );
}

/// Record a log that could not be decoded.
///
/// # Arguments
/// * `kind` - The event type, or "unknown" when the signature did not match
/// * `source` - Where decoding failed ("log" or "call")
pub fn record_decode_error(kind: &str, source: &str) {
    counter!("decode_errors_total", "kind" => kind.to_string(), "source" => source.to_string())
        .increment(1);
}

/// Record a committed chunk and the number of events it newly stored.
pub fn record_chunk_committed(inserted: u64) {
    counter!("chunks_committed_total").increment(1);
    counter!("registry_events_indexed_total").increment(inserted);
}

/// Record chunk processing duration.
pub fn record_chunk_processing_duration(duration_secs: f64) {
    histogram!("chunk_processing_duration_seconds").record(duration_secs);
}

/// Record a chunk retry.
///
/// # Arguments
/// * `reason` - "split" when the range is halved, "backoff" at the single-block floor
pub fn record_chunk_retry(reason: &str) {
    counter!("chunk_retries_total", "reason" => reason.to_string()).increment(1);
}

/// Record an event skipped because of a projection error.
pub fn record_projection_error(event: &str) {
    counter!("projection_errors_total", "event" => event.to_string()).increment(1);
}

pub fn record_resolver_revert() {
    counter!("resolver_reverts_total").increment(1);
}

/// Publish the committed watermark.
pub fn set_watermark(block: u64) {
    gauge!("watermark_block").set(block as f64);
}

/// A timer that records chunk duration when dropped.
pub struct ChunkTimer {
    start: Instant,
}

impl ChunkTimer {
    /// Start a new chunk timer.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for ChunkTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ChunkTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_chunk_processing_duration(duration);
    }
}
