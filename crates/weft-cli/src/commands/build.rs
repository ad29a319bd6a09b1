//! Build command implementation.

use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::{debug, info};
use weft_core::content_digest;

use super::matching::probe_and_match;
use super::wrapper::{Phase, LOG_FILE};
use crate::config_resolver::ConfigSource;
use crate::RuleArgs;

/// Runs the build command.
pub fn run(
    project: &Path,
    source: &ConfigSource,
    rules: &RuleArgs,
    cargo_args: &[String],
) -> Result<()> {
    let config = source.load()?;
    let work_dir = super::work_dir(project, &config);
    std::fs::create_dir_all(&work_dir)
        .with_context(|| format!("Failed to create {}", work_dir.display()))?;

    let sets = probe_and_match(project, &config, &work_dir, rules, cargo_args)?;
    if sets.is_empty() {
        info!("No rules matched, building without instrumentation");
    }

    let existing = std::env::var("RUSTFLAGS").ok();
    let flags = rustflags(existing.as_deref(), &content_digest(&sets));
    let mut command = super::cargo(project, "build", Phase::Instrument, &work_dir, &config)?;
    command.env("RUSTFLAGS", &flags).args(cargo_args);
    debug!("Build: {command:?} with RUSTFLAGS={flags}");

    let status = command.status().context("Failed to run cargo build")?;
    if !status.success() {
        bail!(
            "Instrumented build failed ({status}). Woven sources are under {}, log at {}",
            work_dir.join("debug").display(),
            work_dir.join(LOG_FILE).display()
        );
    }
    info!("Instrumented build finished");
    Ok(())
}

/// Appends the weft cfg flags to an existing `RUSTFLAGS` value.
///
/// The digest of the matched rules changes the flags whenever the rules do,
/// which makes cargo recompile every crate through the weaver.
fn rustflags(existing: Option<&str>, digest: &str) -> String {
    let weft = format!("--cfg weft_instrumented --cfg weft_rules=\"{digest}\"");
    match existing.map(str::trim) {
        Some(flags) if !flags.is_empty() => format!("{flags} {weft}"),
        _ => weft,
    }
}
