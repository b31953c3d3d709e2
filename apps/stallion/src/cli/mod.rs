//! # Stallion CLI Module
//!
//! This module implements the CLI interface for Stallion.
//!
//! ## Available Commands
//!
//! - `init` - Write a default configuration file
//! - `buckets` - List configured buckets
//! - `status` - Show per-bucket status
//! - `get` - Read an entity by id
//! - `find` - Read an entity by unique key
//! - `list` - Filter, sort and page a bucket
//! - `put` - Create or update an entity from a JSON object
//! - `delete` - Soft-delete (or hard-delete) an entity
//! - `reset` - Reload buckets from storage

mod commands;

use clap::{Parser, Subcommand};
use stallion_core::DataError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Stallion - data access CLI
///
/// Inspects and edits the buckets declared in a Stallion configuration file.
#[derive(Parser, Debug)]
#[command(name = "stallion")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the TOML configuration file
    #[arg(short = 'c', long, global = true, default_value = "stallion.toml")]
    pub config: PathBuf,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// List configured buckets
    Buckets,

    /// Show per-bucket status
    Status,

    /// Read an entity by id
    Get {
        bucket: String,
        id: u64,

        /// Include soft-deleted entities
        #[arg(long)]
        with_deleted: bool,
    },

    /// Read an entity by unique key
    Find {
        bucket: String,
        key: String,
        value: String,
    },

    /// Filter, sort and page a bucket
    List {
        bucket: String,

        /// Filter expression, e.g. `views>=10`, `title~hello`, `tag:in:a,b`
        #[arg(short, long)]
        filter: Vec<String>,

        /// Free-text search over the given fields (`--search-in`)
        #[arg(short, long)]
        search: Option<String>,

        /// Fields searched by `--search`
        #[arg(long, value_delimiter = ',')]
        search_in: Vec<String>,

        /// Sort expression, e.g. `title` or `views:desc`
        #[arg(long)]
        sort: Vec<String>,

        /// Page number, starting at 1
        #[arg(short, long, default_value = "1")]
        page: usize,

        /// Items per page
        #[arg(long, default_value = "20")]
        per_page: usize,

        /// Include soft-deleted entities
        #[arg(long)]
        with_deleted: bool,
    },

    /// Create or update an entity from a JSON object
    Put {
        bucket: String,

        /// JSON object; an `id` member updates that entity
        json: String,
    },

    /// Delete an entity
    Delete {
        bucket: String,
        id: u64,

        /// Remove from storage instead of setting the deleted flag
        #[arg(long)]
        hard: bool,
    },

    /// Reload one bucket, or every bucket, from storage
    Reset { bucket: Option<String> },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), DataError> {
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Init { force }) => cmd_init(&cli.config, force),
        Some(Commands::Buckets) => cmd_buckets(&cli.config, json_mode),
        Some(Commands::Status) | None => cmd_status(&cli.config, json_mode),
        Some(Commands::Get {
            bucket,
            id,
            with_deleted,
        }) => cmd_get(&cli.config, json_mode, &bucket, id, with_deleted),
        Some(Commands::Find { bucket, key, value }) => {
            cmd_find(&cli.config, json_mode, &bucket, &key, &value)
        }
        Some(Commands::List {
            bucket,
            filter,
            search,
            search_in,
            sort,
            page,
            per_page,
            with_deleted,
        }) => cmd_list(
            &cli.config,
            json_mode,
            &ListArgs {
                bucket,
                filters: filter,
                search,
                search_in,
                sorts: sort,
                page,
                per_page,
                with_deleted,
            },
        ),
        Some(Commands::Put { bucket, json }) => cmd_put(&cli.config, json_mode, &bucket, &json),
        Some(Commands::Delete { bucket, id, hard }) => {
            cmd_delete(&cli.config, json_mode, &bucket, id, hard)
        }
        Some(Commands::Reset { bucket }) => cmd_reset(&cli.config, json_mode, bucket.as_deref()),
    }
}
