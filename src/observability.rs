//! Metric names. The crate only emits through the `metrics` facade; whoever embeds
//! it installs a recorder.

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: facade requests. Labels: operation, status.
pub const REQUESTS_TOTAL: &str = "roomlock_requests_total";

/// Histogram: facade request latency in seconds, retries included. Labels: operation.
pub const REQUEST_DURATION_SECONDS: &str = "roomlock_request_duration_seconds";

/// Counter: retries of transient storage failures. Labels: operation.
pub const RETRIES_TOTAL: &str = "roomlock_retries_total";

// ── Booking outcomes ────────────────────────────────────────────

pub const BOOKINGS_CREATED_TOTAL: &str = "roomlock_bookings_created_total";

pub const BOOKINGS_CANCELLED_TOTAL: &str = "roomlock_bookings_cancelled_total";

/// Counter: creates rejected because the room was already booked.
pub const BOOKING_CONFLICTS_TOTAL: &str = "roomlock_booking_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: room or catalog lock waits that hit `lock_timeout`.
pub const LOCK_TIMEOUTS_TOTAL: &str = "roomlock_lock_timeouts_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomlock_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomlock_wal_flush_batch_size";

/// Counter: background compactions. Labels: status.
pub const COMPACTIONS_TOTAL: &str = "roomlock_compactions_total";

/// Status label for a finished request.
pub fn status_label(result: &Result<impl Sized, EngineError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.code(),
    }
}
