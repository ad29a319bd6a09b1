//! weft CLI tool.
//!
//! Usage:
//! ```bash
//! weft build [OPTIONS] [-- CARGO_ARGS]
//! weft match [OPTIONS]
//! weft list-rules
//! weft init
//! ```
//!
//! Cargo also runs the binary as its `RUSTC_WRAPPER`, as `weft <rustc> <args..>`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config_resolver;

use commands::wrapper;

/// Compile-time instrumentation weaver for Rust crates
#[derive(Parser)]
#[command(name = "weft")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the current project with instrumentation
    Build {
        #[command(flatten)]
        rules: RuleArgs,

        /// Arguments passed to `cargo build`
        #[arg(last = true)]
        cargo_args: Vec<String>,
    },

    /// Run the probe build and print the matched rules
    Match {
        #[command(flatten)]
        rules: RuleArgs,

        /// Arguments passed to the probe `cargo check`
        #[arg(last = true)]
        cargo_args: Vec<String>,
    },

    /// List the rules in the catalog
    ListRules {
        #[command(flatten)]
        rules: RuleArgs,
    },

    /// Initialize configuration file
    Init {
        /// Overwrite existing config
        #[arg(long)]
        force: bool,
    },
}

/// Options selecting the rule catalog.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct RuleArgs {
    /// Additional rule files or directories (comma-separated)
    #[arg(long, value_delimiter = ',')]
    rules: Vec<PathBuf>,

    /// Bundled rule files to drop (comma-separated), or `all`
    #[arg(long)]
    disable: Option<String>,
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if wrapper::is_wrapper_invocation(&args) {
        let code = wrapper::main(&args);
        std::process::exit(code);
    }

    let cli = Cli::parse();
    let filter = EnvFilter::try_from_env(wrapper::LOG_ENV).unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let project = std::env::current_dir()?;
    let source = config_resolver::resolve(&project, cli.config.as_deref());

    match cli.command {
        Commands::Build { rules, cargo_args } => {
            commands::build::run(&project, &source, &rules, &cargo_args)
        }
        Commands::Match { rules, cargo_args } => {
            commands::matching::run(&project, &source, &rules, &cargo_args)
        }
        Commands::ListRules { rules } => commands::list_rules::run(&source, &rules),
        Commands::Init { force } => commands::init::run(force),
    }
}
