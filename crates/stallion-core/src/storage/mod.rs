//! # Storage Backends
//!
//! Database-backed persisters. One [`RedbStore`] file is shared by every
//! redb bucket of a registry.

mod redb_persister;

pub use redb_persister::{RedbPersister, RedbStore, RedbTickets};
