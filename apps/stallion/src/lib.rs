//! # Stallion
//!
//! Command-line front end over `stallion-core`. Buckets declared in the
//! configuration file are registered as schema-less `MappedModel` buckets.

pub mod cli;
