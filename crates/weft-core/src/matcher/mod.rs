//! Rule matching over a recorded build.
//!
//! Matching runs in two stages per compile invocation:
//!
//! 1. Dependency gating: rules targeting the crate being compiled whose
//!    prerequisite crates, crate version and toolchain version all fit.
//! 2. Structural matching: the crate's files are parsed and each surviving
//!    rule is kept only if its target exists (see [`structural`]).
//!
//! Every invocation is matched on its own scoped thread; the catalog and the
//! dependency set are shared read-only.

mod structural;

use miette::Diagnostic;
use semver::Version;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::mpsc;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::invocation::CompileRecord;
use crate::modules::ModuleError;
use crate::rule::Rule;
use crate::ruleset::RuleSet;
use crate::vendor::{is_vendored, VendorManifest};
use crate::version::{version_from_path, version_matches};

pub use structural::match_structure;

/// Normalizes a crate or package name the way rustc does (`-` → `_`).
#[must_use]
pub fn normalize_crate_name(name: &str) -> String {
    name.trim().replace('-', "_")
}

/// Errors that abort matching.
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum MatcherError {
    /// A crate's module tree cannot be read.
    #[error("failed to read the sources of `{crate_name}`: {source}")]
    #[diagnostic(code(weft::matcher::modules))]
    Modules {
        /// Crate being matched.
        crate_name: String,
        /// Underlying error.
        source: ModuleError,
    },

    /// A worker thread panicked.
    #[error("matcher worker for `{crate_name}` panicked")]
    #[diagnostic(code(weft::matcher::worker))]
    WorkerPanicked {
        /// Crate being matched.
        crate_name: String,
    },
}

/// Every crate compiled in the build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySet {
    names: BTreeSet<String>,
}

impl DependencySet {
    /// Collects crate and package names from compile records.
    #[must_use]
    pub fn from_records(records: &[CompileRecord]) -> Self {
        let mut set = Self::default();
        for record in records {
            set.insert(&record.crate_name);
            if let Some(package) = &record.package_name {
                set.insert(package);
            }
        }
        set
    }

    /// Adds a name.
    pub fn insert(&mut self, name: &str) {
        self.names.insert(normalize_crate_name(name));
    }

    /// Returns `true` if `name` was compiled.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&normalize_crate_name(name))
    }

    /// Number of distinct names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Builder for a [`RuleMatcher`].
pub struct RuleMatcherBuilder<'a> {
    catalog: &'a Catalog,
    dependencies: DependencySet,
    toolchain: Option<Version>,
    vendor: Option<(PathBuf, VendorManifest)>,
}

impl<'a> RuleMatcherBuilder<'a> {
    /// Sets the project dependency set.
    #[must_use]
    pub fn dependencies(mut self, dependencies: DependencySet) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Sets the rustc version rules are gated on.
    #[must_use]
    pub fn toolchain(mut self, version: Option<Version>) -> Self {
        self.toolchain = version;
        self
    }

    /// Sets the vendor directory and its manifest.
    #[must_use]
    pub fn vendor(mut self, dir: impl Into<PathBuf>, manifest: VendorManifest) -> Self {
        self.vendor = Some((dir.into(), manifest));
        self
    }

    /// Builds the matcher.
    #[must_use]
    pub fn build(self) -> RuleMatcher<'a> {
        RuleMatcher {
            catalog: self.catalog,
            dependencies: self.dependencies,
            toolchain: self.toolchain,
            vendor: self.vendor,
        }
    }
}

/// Matches the catalog against recorded compile invocations.
pub struct RuleMatcher<'a> {
    catalog: &'a Catalog,
    dependencies: DependencySet,
    toolchain: Option<Version>,
    vendor: Option<(PathBuf, VendorManifest)>,
}

impl<'a> RuleMatcher<'a> {
    /// Creates a new builder for configuring a matcher.
    #[must_use]
    pub fn builder(catalog: &'a Catalog) -> RuleMatcherBuilder<'a> {
        RuleMatcherBuilder {
            catalog,
            dependencies: DependencySet::default(),
            toolchain: None,
            vendor: None,
        }
    }

    /// Resolved version of the crate a record compiles.
    ///
    /// Vendor manifest first (for vendored crates), then the version cargo
    /// reported, then the version encoded in the source path.
    #[must_use]
    pub fn crate_version(&self, record: &CompileRecord) -> Option<String> {
        if let Some((dir, manifest)) = &self.vendor {
            if is_vendored(&record.root_source, dir) {
                let name = record.package_name.as_deref().unwrap_or(&record.crate_name);
                if let Some(v) = manifest
                    .version_of(name)
                    .or_else(|| manifest.version_of(&record.crate_name))
                {
                    return Some(v.to_string());
                }
            }
        }
        record
            .package_version
            .clone()
            .or_else(|| version_from_path(&record.root_source).map(|v| v.to_string()))
    }

    /// Rules that pass dependency, crate-version and toolchain gating for a
    /// record, in catalog order.
    ///
    /// Malformed version ranges skip the rule with a warning.
    #[must_use]
    pub fn candidates(&self, record: &CompileRecord) -> Vec<&'a Rule> {
        let version = self.crate_version(record);
        let toolchain = self.toolchain.as_ref().map(ToString::to_string);

        self.catalog
            .for_import_path(&record.crate_name)
            .filter(|rule| {
                if let Rule::Func(func) = rule {
                    if let Some(missing) = func
                        .dependencies
                        .iter()
                        .find(|d| !self.dependencies.contains(d))
                    {
                        debug!("Rule {rule} needs `{missing}`, which is not in the build");
                        return false;
                    }
                }
                let base = rule.base();
                let gates = [
                    (&base.version, version.as_deref()),
                    (&base.toolchain_version, toolchain.as_deref()),
                ];
                gates
                    .into_iter()
                    .all(|(range, probe)| match version_matches(range, probe) {
                        Ok(matched) => matched,
                        Err(e) => {
                            warn!("Skipping rule {rule}: {e}");
                            false
                        }
                    })
            })
            .collect()
    }

    /// Matches one compile invocation.
    ///
    /// Returns `None` when nothing matched.
    ///
    /// # Errors
    ///
    /// Returns an error if the crate's sources cannot be read.
    pub fn match_record(&self, record: &CompileRecord) -> Result<Option<RuleSet>, MatcherError> {
        if record.crate_name.starts_with("build_script_") {
            return Ok(None);
        }
        let candidates = self.candidates(record);
        if candidates.is_empty() {
            return Ok(None);
        }
        debug!(
            "{} candidate rules for `{}`",
            candidates.len(),
            record.crate_name
        );
        match_structure(record, &candidates)
    }

    /// Matches every invocation, one worker per invocation.
    ///
    /// Results are ordered like `records`.
    ///
    /// # Errors
    ///
    /// Returns the first worker error.
    pub fn match_all(&self, records: &[CompileRecord]) -> Result<Vec<RuleSet>, MatcherError> {
        let (tx, rx) = mpsc::channel();

        let results = std::thread::scope(|scope| {
            let handles: Vec<_> = records
                .iter()
                .enumerate()
                .map(|(index, record)| {
                    let tx = tx.clone();
                    scope.spawn(move || {
                        // The receiver outlives every worker.
                        let _ = tx.send((index, self.match_record(record)));
                    })
                })
                .collect();
            drop(tx);

            let mut results: Vec<(usize, Result<Option<RuleSet>, MatcherError>)> =
                rx.iter().collect();
            for (handle, record) in handles.into_iter().zip(records) {
                if handle.join().is_err() {
                    results.push((
                        usize::MAX,
                        Err(MatcherError::WorkerPanicked {
                            crate_name: record.crate_name.clone(),
                        }),
                    ));
                }
            }
            results
        });

        let mut ordered = results;
        ordered.sort_by_key(|(index, _)| *index);
        let mut sets = Vec::new();
        for (_, result) in ordered {
            if let Some(set) = result? {
                sets.push(set);
            }
        }
        info!(
            "Matched rules in {} of {} compile invocations",
            sets.len(),
            records.len()
        );
        Ok(sets)
    }
}
