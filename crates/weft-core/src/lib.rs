//! # weft-core
//!
//! Rule model, rule catalog and matchers for the weft instrumentation weaver.
//!
//! This crate decides *what* gets woven. It includes:
//!
//! - [`Rule`] and its kinds ([`FuncRule`], [`StructRule`], [`FileRule`])
//! - [`Catalog`] for loading bundled and user rule files
//! - [`CompileRecord`] for the rustc invocations seen during a probe build
//! - [`RuleMatcher`] for selecting the rules that apply to each crate
//! - [`RuleSet`] for handing matched rules to the weaver
//!
//! ## Example
//!
//! ```ignore
//! use weft_core::{Catalog, CompileRecord, DependencySet, RuleMatcher};
//!
//! let catalog = Catalog::builder().file("rules/http.json").build()?;
//! let records = CompileRecord::load_all(&work_dir.join("records"))?;
//!
//! let matcher = RuleMatcher::builder(&catalog)
//!     .dependencies(DependencySet::from_records(&records))
//!     .build();
//! let sets = matcher.match_all(&records)?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod config;
mod invocation;
mod matcher;
mod rule;
mod ruleset;
mod vendor;
mod version;

/// Crate module tree discovery.
pub mod modules;
/// Locating functions and structs inside parsed files.
pub mod targets;
/// Utility modules for syntax handling.
pub mod utils;

pub use catalog::{parse_rules, Catalog, CatalogBuilder, CatalogLoadError, Disable, BASE_RULES};
pub use config::{CatalogConfig, Config, ConfigError, RuleFileConfig, WeaveConfig};
pub use invocation::{absolutize, CompileInvocation, CompileRecord};
pub use matcher::{
    match_structure, normalize_crate_name, DependencySet, MatcherError, RuleMatcher,
    RuleMatcherBuilder,
};
pub use rule::{
    content_digest, is_ident, parse_raw_snippet, FileRule, FuncPattern, FuncRule, Rule, RuleBase,
    RuleError, StructRule,
};
pub use ruleset::{load_rule_sets, store_rule_sets, RuleSet, RuleSetError, MATCHED_RULES_FILE};
pub use vendor::{default_vendor_dir, is_vendored, VendorManifest, VendorModule, MANIFEST_FILE};
pub use version::{
    parse_version, toolchain_version_from_output, version_from_path, version_matches, MatchError,
    VersionRange,
};
