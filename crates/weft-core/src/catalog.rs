//! The rule catalog: every rule loaded for one build.
//!
//! Bundled rule files are compiled into the binary; user rule files are read
//! from disk. Any malformed file fails the whole load. Once built, the catalog
//! is never mutated and is shared by reference with the matcher.

use miette::Diagnostic;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::Config;
use crate::matcher::normalize_crate_name;
use crate::rule::{Rule, RuleError};

/// Bundled rule file that is always loaded.
pub const BASE_RULES: &str = "base.json";

/// Rule files compiled into the binary.
const BUNDLED: &[(&str, &str)] = &[(BASE_RULES, include_str!("../rules/base.json"))];

/// Errors loading the catalog. All of them abort the build.
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum CatalogLoadError {
    /// A rule file cannot be read.
    #[error("failed to read rule file {path}: {source}")]
    #[diagnostic(code(weft::catalog::io))]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// A rule file is not a JSON array of rules.
    #[error("failed to parse rule file {source_name}: {source}")]
    #[diagnostic(
        code(weft::catalog::parse),
        help("rule files are JSON arrays; each rule needs `function`, `structType` or `fileName`")
    )]
    Parse {
        /// File the rules came from.
        source_name: String,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// A rule violates an invariant.
    #[error("invalid rule #{index} in {source_name}: {source}")]
    #[diagnostic(code(weft::catalog::invalid))]
    Invalid {
        /// File the rule came from.
        source_name: String,
        /// Position of the rule in the file.
        index: usize,
        /// The violated invariant.
        source: RuleError,
    },
}

/// Which bundled rule files to drop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Disable {
    /// Keep every bundled file.
    #[default]
    Nothing,
    /// Keep only [`BASE_RULES`].
    All,
    /// Drop the named files.
    Files(Vec<String>),
}

impl Disable {
    /// Parses `all` or a comma-separated list of file names.
    #[must_use]
    pub fn parse(spec: &str) -> Self {
        let names: Vec<String> = spec
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if names.iter().any(|n| n == "all") {
            Self::All
        } else if names.is_empty() {
            Self::Nothing
        } else {
            Self::Files(names)
        }
    }

    fn keeps(&self, file_name: &str) -> bool {
        match self {
            Self::Nothing => true,
            Self::All => file_name == BASE_RULES,
            Self::Files(names) => !names.iter().any(|n| n == file_name),
        }
    }
}

/// Builder for a [`Catalog`].
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    files: Vec<PathBuf>,
    rules: Vec<Rule>,
    disable: Disable,
    disabled_files: Vec<String>,
    skip_bundled: bool,
}

impl CatalogBuilder {
    /// Creates a new builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies the `[catalog]` and `[rules]` sections of a configuration.
    #[must_use]
    pub fn config(mut self, config: &Config) -> Self {
        self.files.extend(config.catalog.files.iter().cloned());
        if !config.catalog.disable.is_empty() {
            self.disable = Disable::parse(&config.catalog.disable.join(","));
        }
        self.disabled_files.extend(
            config
                .rules
                .keys()
                .filter(|name| !config.is_rule_file_enabled(name))
                .cloned(),
        );
        self
    }

    /// Adds a user rule file or a directory of rule files.
    #[must_use]
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(path.into());
        self
    }

    /// Adds an already constructed rule.
    #[must_use]
    pub fn rule(mut self, rule: impl Into<Rule>) -> Self {
        self.rules.push(rule.into());
        self
    }

    /// Sets which bundled files are dropped.
    #[must_use]
    pub fn disable(mut self, disable: Disable) -> Self {
        self.disable = disable;
        self
    }

    /// Loads no bundled rules at all.
    #[must_use]
    pub fn without_bundled(mut self) -> Self {
        self.skip_bundled = true;
        self
    }

    /// Loads and validates every rule.
    ///
    /// # Errors
    ///
    /// Returns the first file that fails to read, parse or validate.
    pub fn build(self) -> Result<Catalog, CatalogLoadError> {
        let mut rules = Vec::new();

        if !self.skip_bundled {
            for (name, content) in BUNDLED {
                if !self.disable.keeps(name) || self.disabled_files.iter().any(|d| d == *name) {
                    debug!("Bundled rule file {name} disabled");
                    continue;
                }
                rules.extend(parse_rules(name, content, None)?);
            }
        }

        for entry in &self.files {
            for path in rule_files(entry)? {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if self.disabled_files.contains(&name) {
                    debug!("Rule file {} disabled", path.display());
                    continue;
                }
                let content =
                    std::fs::read_to_string(&path).map_err(|source| CatalogLoadError::Io {
                        path: path.clone(),
                        source,
                    })?;
                rules.extend(parse_rules(
                    &path.display().to_string(),
                    &content,
                    path.parent(),
                )?);
            }
        }

        for (index, rule) in self.rules.iter().enumerate() {
            rule.validate().map_err(|source| CatalogLoadError::Invalid {
                source_name: "<builder>".to_string(),
                index,
                source,
            })?;
        }
        rules.extend(self.rules);

        let catalog = Catalog::new(rules);
        info!("Loaded {} instrumentation rules", catalog.len());
        Ok(catalog)
    }
}

/// Expands a user entry into rule files: the file itself, or every `*.json`
/// below a directory in name order.
fn rule_files(entry: &Path) -> Result<Vec<PathBuf>, CatalogLoadError> {
    if !entry.is_dir() {
        return Ok(vec![entry.to_path_buf()]);
    }
    let mut files = Vec::new();
    for item in WalkDir::new(entry).sort_by_file_name() {
        let item = item.map_err(|e| CatalogLoadError::Io {
            path: entry.to_path_buf(),
            source: e.into(),
        })?;
        if item.file_type().is_file() && item.path().extension().is_some_and(|x| x == "json") {
            files.push(item.into_path());
        }
    }
    Ok(files)
}

/// Parses and validates one rule file.
///
/// Relative hook paths are resolved against `base_dir`.
///
/// # Errors
///
/// Returns [`CatalogLoadError::Parse`] or [`CatalogLoadError::Invalid`].
pub fn parse_rules(
    source_name: &str,
    content: &str,
    base_dir: Option<&Path>,
) -> Result<Vec<Rule>, CatalogLoadError> {
    let mut rules: Vec<Rule> =
        serde_json::from_str(content).map_err(|source| CatalogLoadError::Parse {
            source_name: source_name.to_string(),
            source,
        })?;

    for (index, rule) in rules.iter_mut().enumerate() {
        rule.validate().map_err(|source| CatalogLoadError::Invalid {
            source_name: source_name.to_string(),
            index,
            source,
        })?;
        if let Some(dir) = base_dir {
            let base = rule.base_mut();
            if !base.path.is_empty() && Path::new(&base.path).is_relative() {
                base.path = dir.join(&base.path).to_string_lossy().into_owned();
            }
        }
    }
    Ok(rules)
}

/// Immutable set of loaded rules, grouped by target crate.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    rules: Vec<Rule>,
    by_import_path: BTreeMap<String, Vec<usize>>,
}

impl Catalog {
    /// Creates a new builder for configuring a catalog.
    #[must_use]
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::new()
    }

    fn new(rules: Vec<Rule>) -> Self {
        let mut by_import_path: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (index, rule) in rules.iter().enumerate() {
            by_import_path
                .entry(normalize_crate_name(rule.import_path()))
                .or_default()
                .push(index);
        }
        Self {
            rules,
            by_import_path,
        }
    }

    /// All rules in load order.
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Rules targeting `crate_name`, in load order.
    pub fn for_import_path<'a>(&'a self, crate_name: &str) -> impl Iterator<Item = &'a Rule> + 'a {
        self.by_import_path
            .get(&normalize_crate_name(crate_name))
            .into_iter()
            .flatten()
            .map(|&i| &self.rules[i])
    }

    /// Target crates with at least one rule.
    pub fn import_paths(&self) -> impl Iterator<Item = &str> {
        self.by_import_path.keys().map(String::as_str)
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if no rule is loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
