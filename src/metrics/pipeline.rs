//! Pipeline Phase Metrics
//!
//! Counters and histograms for the fetch, store, reconcile and queue stages.

use metrics::{describe_counter, describe_histogram};

pub const FETCH_REQUESTS: &str = "workshop_fetch_requests_total";
pub const CACHE_HITS: &str = "workshop_cache_hits_total";
pub const NEGATIVE_CACHE_HITS: &str = "workshop_negative_cache_hits_total";
pub const FETCH_NOT_FOUND: &str = "workshop_fetch_not_found_total";
pub const FETCH_TRANSIENT_ERRORS: &str = "workshop_fetch_transient_errors_total";
pub const ARTIFACTS_STORED: &str = "workshop_artifacts_stored_total";
pub const RECONCILE_TIMEOUTS: &str = "workshop_reconcile_timeouts_total";
pub const RECORDS_LINKED: &str = "workshop_records_linked_total";
pub const MESSAGES_POISONED: &str = "workshop_messages_poisoned_total";
pub const FETCH_DURATION: &str = "workshop_fetch_duration_seconds";
pub const ARTIFACT_BYTES: &str = "workshop_artifact_bytes";

/// Metrics collection for the ingestion pipeline
pub struct PipelineMetrics;

impl PipelineMetrics {
    pub fn describe() {
        describe_counter!(FETCH_REQUESTS, "Fetch requests handled");
        describe_counter!(CACHE_HITS, "Requests served from an already cached artifact");
        describe_counter!(NEGATIVE_CACHE_HITS, "Requests short-circuited by a negative marker");
        describe_counter!(FETCH_NOT_FOUND, "Fetches that found no upstream item");
        describe_counter!(FETCH_TRANSIENT_ERRORS, "Fetches that failed transiently");
        describe_counter!(ARTIFACTS_STORED, "Artifacts written to the content store");
        describe_counter!(RECONCILE_TIMEOUTS, "Reconciliations that gave up waiting for records");
        describe_counter!(RECORDS_LINKED, "Records updated with a resolved content URL");
        describe_counter!(MESSAGES_POISONED, "Fetch requests moved to the poison queue");
        describe_histogram!(FETCH_DURATION, "Duration of upstream fetches in seconds");
        describe_histogram!(ARTIFACT_BYTES, "Size of stored artifacts in bytes");
    }

    pub fn record_request() {
        metrics::counter!(FETCH_REQUESTS).increment(1);
    }

    pub fn record_cache_hit() {
        metrics::counter!(CACHE_HITS).increment(1);
    }

    pub fn record_negative_cache_hit() {
        metrics::counter!(NEGATIVE_CACHE_HITS).increment(1);
    }

    pub fn record_not_found() {
        metrics::counter!(FETCH_NOT_FOUND).increment(1);
    }

    pub fn record_transient_error() {
        metrics::counter!(FETCH_TRANSIENT_ERRORS).increment(1);
    }

    pub fn record_fetch_duration(duration_secs: f64) {
        metrics::histogram!(FETCH_DURATION).record(duration_secs);
    }

    pub fn record_artifact_stored(bytes: usize) {
        metrics::counter!(ARTIFACTS_STORED).increment(1);
        metrics::histogram!(ARTIFACT_BYTES).record(bytes as f64);
    }

    pub fn record_reconcile_timeout() {
        metrics::counter!(RECONCILE_TIMEOUTS).increment(1);
    }

    pub fn record_records_linked(count: usize) {
        metrics::counter!(RECORDS_LINKED).increment(count as u64);
    }

    pub fn record_poisoned() {
        metrics::counter!(MESSAGES_POISONED).increment(1);
    }
}
