//! Subcommand implementations.

pub mod build;
pub mod init;
pub mod list_rules;
pub mod matching;
pub mod wrapper;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use weft_core::{absolutize, Catalog, Config, Disable};

use crate::config_resolver::workspace_root;
use crate::RuleArgs;
use wrapper::{Phase, KEEP_DEBUG_ENV, PHASE_ENV, WORK_DIR_ENV};

/// Loads the catalog from the configuration and command line.
pub fn load_catalog(config: &Config, args: &RuleArgs) -> Result<Catalog> {
    let mut builder = Catalog::builder().config(config);
    for file in &args.rules {
        builder = builder.file(file);
    }
    if let Some(disable) = &args.disable {
        builder = builder.disable(Disable::parse(disable));
    }
    builder.build().context("Failed to load rule catalog")
}

/// Absolute work directory; relative paths start at the workspace root.
#[must_use]
pub fn work_dir(project: &Path, config: &Config) -> PathBuf {
    absolutize(&config.weave.work_dir, &workspace_root(project))
}

/// A cargo command whose rustc invocations run through this binary.
pub fn cargo(
    project: &Path,
    subcommand: &str,
    phase: Phase,
    work_dir: &Path,
    config: &Config,
) -> Result<Command> {
    let exe = std::env::current_exe().context("Failed to locate the weft binary")?;
    let program = std::env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
    let mut command = Command::new(program);
    command
        .arg(subcommand)
        .current_dir(project)
        .env("RUSTC_WRAPPER", exe)
        .env(PHASE_ENV, phase.as_str())
        .env(WORK_DIR_ENV, work_dir)
        .env(KEEP_DEBUG_ENV, if config.weave.keep_debug { "1" } else { "0" });
    Ok(command)
}
