//! Probe build and rule matching.

use anyhow::{bail, Context, Result};
use semver::Version;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info, warn};
use weft_core::{
    absolutize, store_rule_sets, toolchain_version_from_output, CompileRecord, Config,
    DependencySet, RuleMatcher, RuleSet, VendorManifest,
};

use super::wrapper::{Phase, RECORDS_DIR};
use crate::config_resolver::{workspace_root, ConfigSource};
use crate::RuleArgs;

/// Target directory of the probe build inside the work directory.
pub const PROBE_DIR: &str = "probe";

/// Runs the match command.
pub fn run(
    project: &Path,
    source: &ConfigSource,
    rules: &RuleArgs,
    cargo_args: &[String],
) -> Result<()> {
    let config = source.load()?;
    let work_dir = super::work_dir(project, &config);
    let sets = probe_and_match(project, &config, &work_dir, rules, cargo_args)?;
    println!("{}", serde_json::to_string_pretty(&sets)?);
    Ok(())
}

/// Records every rustc invocation of a `cargo check`, then matches the
/// catalog against the records and persists the result.
pub fn probe_and_match(
    project: &Path,
    config: &Config,
    work_dir: &Path,
    rules: &RuleArgs,
    cargo_args: &[String],
) -> Result<Vec<RuleSet>> {
    let catalog = super::load_catalog(config, rules)?;
    info!("Loaded {} rule(s)", catalog.len());

    let records_dir = work_dir.join(RECORDS_DIR);
    let probe_dir = work_dir.join(PROBE_DIR);
    for dir in [&records_dir, &probe_dir] {
        if dir.exists() {
            std::fs::remove_dir_all(dir)
                .with_context(|| format!("Failed to clear {}", dir.display()))?;
        }
    }

    let mut command = super::cargo(project, "check", Phase::Record, work_dir, config)?;
    command.arg("--target-dir").arg(&probe_dir).args(cargo_args);
    debug!("Probe: {command:?}");
    let status = command.status().context("Failed to run the probe build")?;
    if !status.success() {
        bail!("Probe build failed ({status})");
    }

    let records = CompileRecord::load_all(&records_dir)
        .with_context(|| format!("Failed to read {}", records_dir.display()))?;
    info!("Recorded {} crate(s)", records.len());

    let mut builder = RuleMatcher::builder(&catalog)
        .dependencies(DependencySet::from_records(&records))
        .toolchain(toolchain_version());
    let root = workspace_root(project);
    let vendor_dir = absolutize(&config.weave.vendor_dir, &root);
    let manifest = config
        .weave
        .vendor_manifest
        .as_ref()
        .map(|m| absolutize(m, &root));
    if let Some(vendor) = VendorManifest::load(&vendor_dir, manifest.as_deref()) {
        builder = builder.vendor(vendor_dir, vendor);
    }

    let sets = builder
        .build()
        .match_all(&records)
        .context("Failed to match rules")?;
    let path = store_rule_sets(work_dir, &sets).context("Failed to store matched rules")?;
    info!("Matched {} package(s), wrote {}", sets.len(), path.display());
    Ok(sets)
}

/// Version of the rustc cargo would use.
fn toolchain_version() -> Option<Version> {
    let rustc = std::env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    match Command::new(&rustc).arg("-V").output() {
        Ok(output) => toolchain_version_from_output(&String::from_utf8_lossy(&output.stdout)),
        Err(err) => {
            warn!("Could not query {rustc} for its version: {err}");
            None
        }
    }
}
