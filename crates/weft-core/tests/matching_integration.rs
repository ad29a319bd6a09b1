//! Integration test: rule file → catalog → matcher → persisted rule sets.
//!
//! Uses the fixture crate under `tests/fixtures/matching/app` and the rule file
//! next to it.

use std::path::{Path, PathBuf};
use weft_core::{
    load_rule_sets, store_rule_sets, Catalog, CompileRecord, DependencySet, Rule, RuleMatcher,
};

fn fixture_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/matching")
}

fn record(crate_name: &str, root_source: &Path, version: &str) -> CompileRecord {
    CompileRecord {
        crate_name: crate_name.to_string(),
        package_name: Some(crate_name.to_string()),
        package_version: Some(version.to_string()),
        manifest_dir: root_source.parent().and_then(Path::parent).map(Path::to_path_buf),
        root_source: root_source.to_path_buf(),
        args: vec![
            "--crate-name".to_string(),
            crate_name.to_string(),
            root_source.display().to_string(),
        ],
        cwd: fixture_root(),
    }
}

fn catalog() -> Catalog {
    Catalog::builder()
        .file(fixture_root().join("rules.json"))
        .build()
        .expect("fixture rules should load")
}

fn hooks_named(rules: &[weft_core::FuncRule]) -> Vec<&str> {
    rules.iter().map(|r| r.on_enter.as_str()).collect()
}

#[test]
fn matches_fixture_crate() {
    let root = fixture_root();
    let app = record("app", &root.join("app/src/lib.rs"), "1.4.0");
    let records = vec![app.clone()];

    let catalog = catalog();
    assert_eq!(catalog.for_import_path("app").count(), 6);

    let matcher = RuleMatcher::builder(&catalog)
        .dependencies(DependencySet::from_records(&records))
        .build();
    let sets = matcher.match_all(&records).expect("matching should succeed");
    assert_eq!(sets.len(), 1);
    let set = &sets[0];

    // `send` needs rustls and `start` needs app >= 2.0.0; neither applies.
    let lib = root.join("app/src/lib.rs");
    assert!(!set.func_rules.contains_key(&lib));

    let net = root.join("app/src/net/mod.rs");
    assert_eq!(hooks_named(&set.func_rules[&net]), ["dial_enter"]);
    assert_eq!(set.struct_rules[&net][0].field_name, "trace_id");

    // One rule matching two functions in the same file is recorded once.
    let server = root.join("app/src/server.rs");
    assert_eq!(hooks_named(&set.func_rules[&server]), ["handler_enter"]);

    assert_eq!(set.file_rules.len(), 1);
    assert_eq!(set.rule_count(), 4);

    // Relative hook paths resolve against the rule file.
    assert_eq!(
        Path::new(&set.func_rules[&net][0].base.path),
        root.join("hooks")
    );
}

#[test]
fn dependency_and_version_gates_open() {
    let root = fixture_root();
    let app = record("app", &root.join("app/src/lib.rs"), "2.1.0");
    let mut deps = DependencySet::from_records(std::slice::from_ref(&app));
    deps.insert("rustls");

    let catalog = catalog();
    let matcher = RuleMatcher::builder(&catalog).dependencies(deps).build();
    let set = matcher
        .match_record(&app)
        .expect("matching should succeed")
        .expect("rules should match");

    let lib = root.join("app/src/lib.rs");
    assert_eq!(hooks_named(&set.func_rules[&lib]), ["tls_enter", "start_enter"]);
}

#[test]
fn build_scripts_and_unrelated_crates_never_match() {
    let root = fixture_root();
    let catalog = catalog();
    let matcher = RuleMatcher::builder(&catalog).build();

    let build_script = record("build_script_build", &root.join("app/src/lib.rs"), "1.0.0");
    assert!(matcher.match_record(&build_script).unwrap().is_none());

    let unrelated = record("serde", &root.join("app/src/lib.rs"), "1.0.0");
    assert!(matcher.match_record(&unrelated).unwrap().is_none());
}

#[test]
fn rule_sets_survive_the_work_dir() {
    let root = fixture_root();
    let records = vec![record("app", &root.join("app/src/lib.rs"), "1.0.0")];
    let catalog = catalog();
    let matcher = RuleMatcher::builder(&catalog)
        .dependencies(DependencySet::from_records(&records))
        .build();
    let sets = matcher.match_all(&records).unwrap();

    let work = tempfile::tempdir().unwrap();
    store_rule_sets(work.path(), &sets).unwrap();
    let loaded = load_rule_sets(work.path()).unwrap();

    assert_eq!(loaded, sets);
    assert!(loaded[0].targets("app", &root.join("app/src/lib.rs")));

    let rules: Vec<Rule> = loaded[0].file_rules.iter().cloned().map(Rule::from).collect();
    assert_eq!(rules[0].kind(), "file");
}
