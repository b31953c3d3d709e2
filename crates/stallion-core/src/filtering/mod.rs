//! # Filtering
//!
//! Predicate-based selection over a snapshot of entities:
//! - `FilterChain`: builder plus terminal operations (`all`, `first`, `count`, `pager`)
//! - `FilterCache`: per-bucket TTL cache of terminal results
//! - `Pager`: one page of results with navigation data

mod cache;
mod chain;
mod operator;
mod pager;

pub use cache::FilterCache;
pub use chain::{FilterChain, FilterOperation};
pub use operator::{FilterOperator, SortDirection};
pub use pager::Pager;
