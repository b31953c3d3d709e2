//! # Stallion - Data Access CLI
//!
//! The main binary for inspecting and editing Stallion buckets.
//!
//! ## Usage
//!
//! ```bash
//! # Write a default configuration
//! stallion init
//!
//! # Inspect and edit buckets
//! stallion status
//! stallion put articles '{"title": "Hello", "slug": "hello"}'
//! stallion list articles -f 'views>=10' --sort views:desc
//! ```

use clap::Parser;
use stallion::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    // STALLION_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("STALLION_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("stallion={0},stallion_core={0}", default_level).into()
    });

    // Logs go to stderr so `--json-mode` output stays parseable.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Stallion startup banner.
fn print_banner() {
    println!(
        r#"
  ███████╗████████╗ █████╗ ██╗     ██╗     ██╗ ██████╗ ███╗   ██╗
  ██╔════╝╚══██╔══╝██╔══██╗██║     ██║     ██║██╔═══██╗████╗  ██║
  ███████╗   ██║   ███████║██║     ██║     ██║██║   ██║██╔██╗ ██║
  ╚════██║   ██║   ██╔══██║██║     ██║     ██║██║   ██║██║╚██╗██║
  ███████║   ██║   ██║  ██║███████╗███████╗██║╚██████╔╝██║ ╚████║
  ╚══════╝   ╚═╝   ╚═╝  ╚═╝╚══════╝╚══════╝╚═╝ ╚═════╝ ╚═╝  ╚═══╝

  Data Access Layer v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
