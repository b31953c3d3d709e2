//! # Runtime Constants
//!
//! Fixed limits and defaults shared by stashes, tickets and the filter layer.
//! Settings may override the defaults per registry or per bucket; the hard
//! limits are compiled in.

use std::time::{SystemTime, UNIX_EPOCH};

/// Number of most-recently-modified entities a `PartialStash` loads at boot.
pub const DEFAULT_PARTIAL_LIMIT: usize = 50_000;

/// Lifetime of a cached filter result, in seconds.
pub const DEFAULT_FILTER_CACHE_TTL_SECS: u64 = 60;

/// Maximum number of cached filter results per bucket; the least recently
/// used entry is dropped beyond it.
pub const DEFAULT_FILTER_CACHE_CAPACITY: usize = 256;

/// Quiet period over which folder watcher events are coalesced, in milliseconds.
pub const DEFAULT_WATCH_INTERVAL_MILLIS: u64 = 200;

// =============================================================================
// TICKET LAYOUT
// =============================================================================

/// Ticket = seconds * TICKET_SECONDS_MULTIPLIER + counter * 10 + node number.
pub const TICKET_SECONDS_MULTIPLIER: u64 = 1_000_000;

/// The per-second counter wraps back to zero once it exceeds this value.
pub const TICKET_COUNTER_WRAP: u64 = 99_500;

/// Each new `TimeBasedTickets` instance starts its counter this far apart.
pub const TICKET_INSTANCE_SPACING: u64 = 1_000;

/// Node numbers occupy the last decimal digit of a ticket.
pub const MAX_NODE_NUMBER: u64 = 9;

// =============================================================================
// CLOCK
// =============================================================================

/// Milliseconds since the Unix epoch; zero if the clock is before 1970.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
