//! Structural matching: does the rule's target exist in the crate's sources?

use syn::Fields;
use tracing::{debug, warn};

use super::MatcherError;
use crate::invocation::CompileRecord;
use crate::modules::ModuleTree;
use crate::rule::{FuncPattern, Rule};
use crate::ruleset::RuleSet;
use crate::targets::{find_struct, has_function};

enum Pending<'r> {
    Func(&'r Rule, FuncPattern),
    Struct(&'r Rule, &'r str),
}

impl Pending<'_> {
    fn hits(&self, ast: &syn::File) -> bool {
        match self {
            Self::Func(_, pattern) => has_function(ast, pattern),
            Self::Struct(_, name) => find_struct(ast, name).is_some_and(|target| {
                if !matches!(target.item.fields, Fields::Named(_)) {
                    debug!("Struct `{name}` has no named fields; it will be rejected at weave time");
                }
                true
            }),
        }
    }

    fn rule(&self) -> &Rule {
        match self {
            Self::Func(rule, _) | Self::Struct(rule, _) => rule,
        }
    }
}

/// Matches candidate rules against the sources of the crate a record compiles.
///
/// Files are visited root first, parents before children. File rules always
/// match. A function or struct rule is bound to the first file that contains
/// its target and is not considered again for this crate. Each file is parsed
/// once no matter how many rules are checked against it.
///
/// # Errors
///
/// Returns an error if the crate root cannot be read or parsed.
pub fn match_structure(
    record: &CompileRecord,
    candidates: &[&Rule],
) -> Result<Option<RuleSet>, MatcherError> {
    let tree = ModuleTree::discover(&record.root_source).map_err(|source| {
        MatcherError::Modules {
            crate_name: record.crate_name.clone(),
            source,
        }
    })?;

    let package = record
        .package_name
        .clone()
        .unwrap_or_else(|| record.crate_name.clone());
    let mut set = RuleSet::new(package, &record.crate_name, &record.root_source);

    let mut pending = Vec::new();
    for &rule in candidates {
        match rule {
            Rule::File(file_rule) => set.add_file_rule(file_rule.clone()),
            Rule::Func(func) => match func.pattern() {
                Ok(pattern) => pending.push(Pending::Func(rule, pattern)),
                Err(e) => warn!("Skipping rule {rule}: {e}"),
            },
            Rule::Struct(s) => pending.push(Pending::Struct(rule, &s.struct_type)),
        }
    }

    for (index, file) in tree.files().iter().enumerate() {
        if pending.is_empty() {
            break;
        }
        let Some(ast) = tree.ast(index) else {
            continue;
        };
        pending.retain(|candidate| {
            if !candidate.hits(ast) {
                return true;
            }
            debug!("Rule {} matched in {}", candidate.rule(), file.path.display());
            set.add(&file.path, candidate.rule().clone());
            false
        });
    }

    for candidate in &pending {
        debug!(
            "Rule {} found no target in `{}`",
            candidate.rule(),
            record.crate_name
        );
    }

    Ok(set.is_valid().then_some(set))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{FileRule, FuncRule, StructRule};
    use std::path::{Path, PathBuf};

    fn record(root: &Path) -> CompileRecord {
        CompileRecord {
            crate_name: "demo".to_string(),
            package_name: None,
            package_version: None,
            manifest_dir: None,
            root_source: root.to_path_buf(),
            args: Vec::new(),
            cwd: PathBuf::from("/"),
        }
    }

    fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_rule_binds_to_first_file_only() {
        let dir = tempfile::tempdir().unwrap();
        let lib = write(dir.path(), "src/lib.rs", "mod a;\nmod b;\n");
        let a = write(dir.path(), "src/a.rs", "pub fn handle() {}\n");
        write(dir.path(), "src/b.rs", "pub fn handle() {}\n");

        let rule: Rule = FuncRule::new("demo", "handle").with_on_enter("h").into();
        let set = match_structure(&record(&lib), &[&rule]).unwrap().unwrap();

        assert_eq!(set.files(), [a.as_path()]);
        assert_eq!(set.rule_count(), 1);
    }

    #[test]
    fn test_receiver_pattern_limits_match() {
        let dir = tempfile::tempdir().unwrap();
        let lib = write(
            dir.path(),
            "src/lib.rs",
            "pub struct Client;\nimpl Client { pub fn send(&self) {} }\npub fn send() {}\n",
        );
        let method: Rule = FuncRule::new("demo", "send")
            .with_receiver("Client")
            .with_on_enter("h")
            .into();
        let missing: Rule = FuncRule::new("demo", "send")
            .with_receiver("Server")
            .with_on_enter("h")
            .into();

        assert!(match_structure(&record(&lib), &[&method]).unwrap().is_some());
        assert!(match_structure(&record(&lib), &[&missing]).unwrap().is_none());
    }

    #[test]
    fn test_struct_and_file_rules() {
        let dir = tempfile::tempdir().unwrap();
        let lib = write(dir.path(), "src/lib.rs", "pub struct Conn { id: u32 }\n");
        let field: Rule = StructRule::new("demo", "Conn", "span", "u64").into();
        let absent: Rule = StructRule::new("demo", "Pool", "span", "u64").into();
        let file: Rule = FileRule::new("demo", "extra.rs", "pub fn f() {}").into();

        let set = match_structure(&record(&lib), &[&field, &absent, &file])
            .unwrap()
            .unwrap();
        assert_eq!(set.struct_rules[lib.as_path()].len(), 1);
        assert_eq!(set.file_rules.len(), 1);
        assert_eq!(set.rule_count(), 2);
    }

    #[test]
    fn test_unparsable_child_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let lib = write(dir.path(), "src/lib.rs", "mod broken;\nmod ok;\n");
        write(dir.path(), "src/broken.rs", "pub fn handle( {\n");
        let ok = write(dir.path(), "src/ok.rs", "pub fn handle() {}\n");

        let rule: Rule = FuncRule::new("demo", "handle").with_on_exit("h").into();
        let set = match_structure(&record(&lib), &[&rule]).unwrap().unwrap();
        assert_eq!(set.files(), [ok.as_path()]);
    }
}
