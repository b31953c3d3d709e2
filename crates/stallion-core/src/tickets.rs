//! # Tickets
//!
//! Id generation for new entities. A ticket must be unique across every
//! bucket of a registry and, for the time-based scheme, across nodes that
//! share a backing store (the node number occupies the last decimal digit).

use crate::primitives::{
    MAX_NODE_NUMBER, TICKET_COUNTER_WRAP, TICKET_INSTANCE_SPACING, TICKET_SECONDS_MULTIPLIER,
    now_millis,
};
use crate::types::{DataError, ModelId};
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of ids for entities saved without one.
pub trait Tickets: Send + Sync + Debug {
    fn next_id(&self) -> Result<ModelId, DataError>;
}

// =============================================================================
// TIME-BASED TICKETS
// =============================================================================

static INSTANCES_CREATED: AtomicU64 = AtomicU64::new(0);

/// `seconds since app creation * 1_000_000 + counter * 10 + node number`.
#[derive(Debug)]
pub struct TimeBasedTickets {
    counter: AtomicU64,
    app_created_millis: u64,
    node_number: u64,
}

impl TimeBasedTickets {
    /// Create a generator. `node_number` must fit in a single decimal digit.
    pub fn new(app_created_millis: u64, node_number: u64) -> Result<Self, DataError> {
        if node_number > MAX_NODE_NUMBER {
            return Err(DataError::Config(format!(
                "node number must be between 0 and {}, got {}",
                MAX_NODE_NUMBER, node_number
            )));
        }
        let instance = INSTANCES_CREATED.fetch_add(1, Ordering::SeqCst);
        let start = instance.saturating_mul(TICKET_INSTANCE_SPACING) % TICKET_COUNTER_WRAP;
        Ok(Self {
            counter: AtomicU64::new(start),
            app_created_millis,
            node_number,
        })
    }

    fn next_counter(&self) -> u64 {
        let mut current = self.counter.load(Ordering::SeqCst);
        loop {
            let next = if current >= TICKET_COUNTER_WRAP {
                0
            } else {
                current + 1
            };
            match self
                .counter
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }
}

impl Tickets for TimeBasedTickets {
    fn next_id(&self) -> Result<ModelId, DataError> {
        let seconds = now_millis().saturating_sub(self.app_created_millis) / 1_000;
        let counter = self.next_counter();
        let ticket = seconds
            .saturating_mul(TICKET_SECONDS_MULTIPLIER)
            .saturating_add(counter * 10)
            .saturating_add(self.node_number);
        Ok(ModelId(ticket))
    }
}

// =============================================================================
// SEQUENCE TICKETS
// =============================================================================

/// Monotonic counter. Deterministic, used by tests and single-process tools.
#[derive(Debug)]
pub struct SequenceTickets {
    next: AtomicU64,
}

impl SequenceTickets {
    /// The first id handed out is `start`.
    #[must_use]
    pub fn starting_at(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }
}

impl Default for SequenceTickets {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl Tickets for SequenceTickets {
    fn next_id(&self) -> Result<ModelId, DataError> {
        Ok(ModelId(self.next.fetch_add(1, Ordering::SeqCst)))
    }
}
