//! Cache metrics.
//!
//! Counters are emitted through the `metrics` facade; the binary decides
//! whether a recorder is installed.

use metrics::{counter, gauge};

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_ERRORS_TOTAL: &str = "cache_errors_total";
    pub const CACHE_INVALIDATIONS_TOTAL: &str = "cache_invalidations_total";
    pub const CACHE_ENTRIES: &str = "cache_entries";
}

/// Record a cache hit on `tier` ("L1" or "L2").
pub fn record_cache_hit(tier: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier).increment(1);
}

/// Record a cache miss.
pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// Record a swallowed cache error for operation `op`.
pub fn record_cache_error(op: &'static str) {
    counter!(names::CACHE_ERRORS_TOTAL, "op" => op).increment(1);
}

/// Record an invalidation; `kind` is "key" or "pattern".
pub fn record_invalidation(kind: &'static str) {
    counter!(names::CACHE_INVALIDATIONS_TOTAL, "kind" => kind).increment(1);
}

/// Set the number of fast-tier entries.
pub fn set_cache_entries(tier: &'static str, count: usize) {
    gauge!(names::CACHE_ENTRIES, "tier" => tier).set(count as f64);
}
