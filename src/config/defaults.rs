//! System-wide default constants.
//!
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Remote Gateway
// ============================================================================

/// Base address of the package/route service when none is configured.
pub const GATEWAY_BASE_URL: &str = "http://localhost:8000";

/// HTTP request timeout for gateway calls (seconds).
pub const GATEWAY_HTTP_TIMEOUT_SECS: u64 = 30;

/// Longest server error detail kept on a record (characters).
pub const GATEWAY_ERROR_DETAIL_MAX_CHARS: usize = 200;

// ============================================================================
// Drain Scheduler
// ============================================================================

/// How often the scheduler drains the pending queue (seconds).
pub const DRAIN_INTERVAL_SECS: u64 = 60;

/// Ceiling on the backoff delay after transient failures (seconds).
pub const DRAIN_MAX_BACKOFF_SECS: u64 = 300;

/// Random jitter added to each scheduled drain (seconds).
pub const DRAIN_JITTER_SECS: u64 = 5;

/// Maximum backoff multiplier exponent for drain retries.
///
/// `2^6 = 64× base interval`, further capped by `max_backoff_secs`.
pub const DRAIN_MAX_BACKOFF_EXPONENT: u32 = 6;

// ============================================================================
// Capture
// ============================================================================

/// Recognition confidence below which a capture is flagged for review.
///
/// Matches the ingest service's own verification threshold.
pub const CONFIDENCE_THRESHOLD: f64 = 0.7;

// ============================================================================
// Storage
// ============================================================================

/// Data directory for the durable store and the process lock.
pub const DATA_DIR: &str = "./data";

/// Capacity of the route event broadcast channel.
pub const ROUTE_EVENT_CHANNEL_CAPACITY: usize = 64;
