//! Matched rules for one package, persisted between matching and weaving.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::rule::{FileRule, FuncRule, Rule, StructRule};

/// File name of the persisted rule sets inside the work directory.
pub const MATCHED_RULES_FILE: &str = "matched_rules.json";

/// Rules matched against one crate, grouped by the file they apply to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
    /// Cargo package name (falls back to the crate name).
    pub package_name: String,
    /// Crate name the rules target.
    pub import_path: String,
    /// Crate root source file.
    pub root_source: PathBuf,
    /// File rules.
    #[serde(default)]
    pub file_rules: Vec<FileRule>,
    /// Function rules per source file.
    #[serde(default)]
    pub func_rules: BTreeMap<PathBuf, Vec<FuncRule>>,
    /// Struct rules per source file.
    #[serde(default)]
    pub struct_rules: BTreeMap<PathBuf, Vec<StructRule>>,
}

impl RuleSet {
    /// Creates an empty rule set.
    #[must_use]
    pub fn new(
        package_name: impl Into<String>,
        import_path: impl Into<String>,
        root_source: impl Into<PathBuf>,
    ) -> Self {
        Self {
            package_name: package_name.into(),
            import_path: import_path.into(),
            root_source: root_source.into(),
            ..Self::default()
        }
    }

    /// Returns `true` if at least one rule matched.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.file_rules.is_empty() || !self.func_rules.is_empty() || !self.struct_rules.is_empty()
    }

    /// Adds a rule matched in `file`. File rules ignore the file.
    pub fn add(&mut self, file: &Path, rule: Rule) {
        match rule {
            Rule::Func(r) => self.add_func_rule(file, r),
            Rule::Struct(r) => self.add_struct_rule(file, r),
            Rule::File(r) => self.add_file_rule(r),
        }
    }

    /// Adds a function rule matched in `file`.
    pub fn add_func_rule(&mut self, file: &Path, rule: FuncRule) {
        self.func_rules
            .entry(file.to_path_buf())
            .or_default()
            .push(rule);
    }

    /// Adds a struct rule matched in `file`.
    pub fn add_struct_rule(&mut self, file: &Path, rule: StructRule) {
        self.struct_rules
            .entry(file.to_path_buf())
            .or_default()
            .push(rule);
    }

    /// Adds a file rule.
    pub fn add_file_rule(&mut self, rule: FileRule) {
        self.file_rules.push(rule);
    }

    /// Total number of rules.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.file_rules.len()
            + self.func_rules.values().map(Vec::len).sum::<usize>()
            + self.struct_rules.values().map(Vec::len).sum::<usize>()
    }

    /// Files that have function or struct rules, in path order.
    #[must_use]
    pub fn files(&self) -> Vec<&Path> {
        let mut files: Vec<&Path> = self
            .func_rules
            .keys()
            .chain(self.struct_rules.keys())
            .map(PathBuf::as_path)
            .collect();
        files.sort();
        files.dedup();
        files
    }

    /// Returns `true` if this set was matched for the given crate instance.
    #[must_use]
    pub fn targets(&self, crate_name: &str, root_source: &Path) -> bool {
        self.import_path == crate_name && same_file(&self.root_source, root_source)
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    a == b
        || matches!(
            (std::fs::canonicalize(a), std::fs::canonicalize(b)),
            (Ok(x), Ok(y)) if x == y
        )
}

/// Errors persisting rule sets.
#[derive(Debug, thiserror::Error)]
pub enum RuleSetError {
    /// IO error.
    #[error("failed to access {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// JSON error.
    #[error("malformed rule sets in {path}: {source}")]
    Json {
        /// Path involved.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
}

/// Writes rule sets to `<work_dir>/matched_rules.json`.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn store_rule_sets(work_dir: &Path, sets: &[RuleSet]) -> Result<PathBuf, RuleSetError> {
    let path = work_dir.join(MATCHED_RULES_FILE);
    let json = serde_json::to_string_pretty(sets).map_err(|source| RuleSetError::Json {
        path: path.clone(),
        source,
    })?;
    std::fs::create_dir_all(work_dir)
        .and_then(|()| std::fs::write(&path, json))
        .map_err(|source| RuleSetError::Io {
            path: path.clone(),
            source,
        })?;
    Ok(path)
}

/// Reads the rule sets stored in `work_dir`.
///
/// A missing file means nothing matched.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_rule_sets(work_dir: &Path) -> Result<Vec<RuleSet>, RuleSetError> {
    let path = work_dir.join(MATCHED_RULES_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path).map_err(|source| RuleSetError::Io {
        path: path.clone(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| RuleSetError::Json { path, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RuleSet {
        let file = Path::new("/work/demo/src/lib.rs");
        let mut set = RuleSet::new("demo", "demo", file);
        set.add(file, FuncRule::new("demo", "add").with_on_enter("before").into());
        set.add(
            file,
            StructRule::new("demo", "Conn", "span", "Option<u64>").into(),
        );
        set.add(file, FileRule::new("demo", "hooks.rs", "pub fn f() {}").into());
        set
    }

    #[test]
    fn test_round_trip_keeps_rule_kinds() {
        let set = sample();
        let json = serde_json::to_string(&set).unwrap();
        let back: RuleSet = serde_json::from_str(&json).unwrap();

        assert_eq!(back, set);
        let file = Path::new("/work/demo/src/lib.rs");
        assert_eq!(back.func_rules[file][0].function, "add");
        assert_eq!(back.struct_rules[file][0].struct_type, "Conn");
        assert_eq!(back.file_rules[0].file_name, "hooks.rs");
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["packageName"], "demo");
        assert_eq!(json["funcRules"]["/work/demo/src/lib.rs"][0]["onEnter"], "before");
        assert_eq!(json["structRules"]["/work/demo/src/lib.rs"][0]["fieldName"], "span");
        assert_eq!(json["fileRules"][0]["fileName"], "hooks.rs");
    }

    #[test]
    fn test_validity_and_counts() {
        assert!(!RuleSet::new("demo", "demo", "/x/lib.rs").is_valid());
        let set = sample();
        assert!(set.is_valid());
        assert_eq!(set.rule_count(), 3);
        assert_eq!(set.files(), [Path::new("/work/demo/src/lib.rs")]);
    }

    #[test]
    fn test_store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_rule_sets(dir.path()).unwrap().is_empty());

        store_rule_sets(dir.path(), &[sample()]).unwrap();
        let loaded = load_rule_sets(dir.path()).unwrap();
        assert_eq!(loaded, vec![sample()]);
        assert!(loaded[0].targets("demo", Path::new("/work/demo/src/lib.rs")));
        assert!(!loaded[0].targets("other", Path::new("/work/demo/src/lib.rs")));
    }
}
