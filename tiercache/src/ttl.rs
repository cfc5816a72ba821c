//! TTL normalization shared by every store adapter.
//!
//! A zero TTL means "no expiry" everywhere: `set_with_ttl(k, v, Duration::ZERO)`
//! behaves exactly like `set(k, v)`.

use std::time::{Duration, Instant};

/// Normalize a caller-supplied TTL into an optional expiry horizon
pub fn expiry(ttl: Duration) -> Option<Duration> {
    if ttl.is_zero() { None } else { Some(ttl) }
}

/// Absolute deadline for a TTL starting now
pub fn deadline(ttl: Duration) -> Option<Instant> {
    expiry(ttl).map(|ttl| Instant::now() + ttl)
}

/// Remaining time before `deadline`, saturating at zero
pub fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|at| at.saturating_duration_since(Instant::now()))
}

/// Whole seconds for wire protocols that only speak seconds, rounded up so a
/// sub-second TTL never becomes "no expiry"
pub fn as_wire_secs(ttl: Duration) -> Option<u64> {
    expiry(ttl).map(|ttl| {
        let secs = ttl.as_secs();
        if ttl.subsec_nanos() > 0 { secs + 1 } else { secs }
    })
}
