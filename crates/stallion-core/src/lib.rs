//! # stallion-core
//!
//! The data access layer of Stallion - THE LOGIC.
//!
//! Every bucket is served by a triple:
//! - a `Persister` that owns the storage medium (JSON or TOML files, redb, memory)
//! - a `Stash` that mirrors the bucket in memory and keeps its key indexes
//! - a `ModelController` that runs lifecycle hooks and exposes reads and writes
//!
//! The `DataAccessRegistry` wires triples together and hands out typed
//! controllers.
//!
//! ## Architectural Constraints
//!
//! - Exactly one in-memory original per `(bucket, id)`; callers only ever
//!   receive detached clones
//! - Persister I/O never runs under a stash index lock
//! - Has NO async, NO network dependencies (pure Rust)
//! - Deterministic ordering: `BTreeMap`/`BTreeSet` everywhere

// =============================================================================
// MODULES
// =============================================================================

pub mod controller;
pub mod filtering;
pub mod model;
pub mod persister;
pub mod primitives;
pub mod registry;
pub mod settings;
pub mod stash;
pub mod storage;
pub mod tickets;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use model::{KeyField, MappedModel, Model, ModelMeta, changed_values, clone_into};
pub use types::{DataError, FieldValue, ModelId};

// =============================================================================
// RE-EXPORTS: Data Access
// =============================================================================

pub use controller::{
    ModelController, ModelHooks, NoHooks, ReadOnlyWrapper, StandardModelController,
};
pub use filtering::{
    FilterCache, FilterChain, FilterOperation, FilterOperator, Pager, SortDirection,
};
pub use persister::{
    FileFormat, FilePersister, JsonFilePersister, MemoryPersister, Persister, PersisterContext,
    TomlFilePersister,
};
pub use registry::{BucketStatus, DataAccessRegistry, Registration};
pub use settings::{BucketConfig, PersisterKind, Settings, TicketSource};
pub use stash::{LocalMemoryStash, NoStash, PartialStash, Shared, Stash, StashContext, StashKind};
pub use storage::{RedbPersister, RedbStore, RedbTickets};
pub use tickets::{SequenceTickets, Tickets, TimeBasedTickets};
