//! Applying one package's matched rules.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use weft_core::modules::ModuleTree;
use weft_core::RuleSet;

use crate::compile::CompileCommand;
use crate::error::WeaveError;
use crate::file_rule::file_rule_source;
use crate::func::FuncWeaver;
use crate::hook::HookSources;
use crate::link::{link, GeneratedModule};
use crate::runtime::{render_runtime, RUNTIME_MODULE};
use crate::session::WeaveSession;
use crate::source::{EditBuffer, SourceMap};
use crate::structs::{extend_struct, fix_literals, FieldFixup};

/// What weaving one package did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeaveReport {
    /// Function bodies woven, counting one per rule application.
    pub functions: usize,
    /// Fields added.
    pub fields: usize,
    /// Struct literals and patterns fixed up.
    pub fixups: usize,
    /// Modules added by file rules.
    pub files: usize,
    /// The crate root rustc compiles instead of the original, if any rule
    /// applied.
    pub root: Option<PathBuf>,
}

/// Weaves one persisted [`RuleSet`] into a package.
///
/// Nothing is substituted into the compile command unless every rule
/// applies; on error the command still compiles the original sources.
#[derive(Debug)]
pub struct RuleProcessor<'r> {
    rule_set: &'r RuleSet,
    session: WeaveSession,
    hook_sources: HashMap<PathBuf, HookSources>,
}

impl<'r> RuleProcessor<'r> {
    /// Prepares to weave `rule_set` within `session`.
    #[must_use]
    pub fn new(rule_set: &'r RuleSet, session: WeaveSession) -> Self {
        Self {
            rule_set,
            session,
            hook_sources: HashMap::new(),
        }
    }

    /// Weaves the package and substitutes its root in `command`.
    ///
    /// # Errors
    ///
    /// Returns the first [`WeaveError`]; `command` is left untouched then.
    pub fn run(mut self, command: &mut CompileCommand) -> Result<WeaveReport, WeaveError> {
        self.session.prepare()?;
        let tree = ModuleTree::discover(self.session.root_source())?;
        let rule_set = self.rule_set;
        let mut report = WeaveReport::default();
        let mut generated = Vec::new();

        for rule in &rule_set.file_rules {
            let source = file_rule_source(rule)?;
            let path = self.session.write_generated(&rule.file_name, &source)?;
            generated.push(GeneratedModule {
                name: rule.module_name().to_string(),
                path,
            });
            report.files += 1;
        }

        let mut hooks = BTreeSet::new();
        let mut fixups = Vec::new();
        for file in rule_set.files() {
            let woven = self.weave_file(file, &mut hooks, &mut fixups, &mut report)?;
            self.session.write(file, &woven)?;
        }

        if !fixups.is_empty() {
            report.fixups = self.fix_struct_literals(&tree, &fixups)?;
        }

        if report.functions > 0 {
            let path = self
                .session
                .write_generated(&format!("{RUNTIME_MODULE}.rs"), &render_runtime(&hooks))?;
            generated.push(GeneratedModule {
                name: RUNTIME_MODULE.to_string(),
                path,
            });
        }

        if self.session.relocations().is_empty() && generated.is_empty() {
            debug!("No rules applied to {}", self.session.crate_name());
            return Ok(report);
        }

        let root = link(&tree, &mut self.session, &generated)?;
        command.substitute(self.session.root_source(), &root)?;
        command.remap_path_prefix(&self.session.mirror_dir(), self.session.root_dir());
        info!(
            "Wove {} ({} functions, {} fields, {} files)",
            self.session.crate_name(),
            report.functions,
            report.fields,
            report.files
        );
        report.root = Some(root);
        Ok(report)
    }

    /// Applies the function rules, then the struct rules, of one file.
    fn weave_file(
        &mut self,
        file: &Path,
        hooks: &mut BTreeSet<String>,
        fixups: &mut Vec<FieldFixup>,
        report: &mut WeaveReport,
    ) -> Result<String, WeaveError> {
        let rule_set = self.rule_set;
        let text = self.session.read(file)?;
        let ast = syn::parse_file(&text).map_err(|e| WeaveError::parse(file, &e))?;
        let map = SourceMap::new(&text);
        let mut edits = EditBuffer::new();

        let func_rules = rule_set
            .func_rules
            .get(file)
            .map_or(&[][..], Vec::as_slice);
        let mut weaver = FuncWeaver::new(&map, self.session.package_name());
        for rule in func_rules {
            let sources = self.hook_sources(rule.base.hook_path())?;
            report.functions += weaver.apply(&ast, rule, sources, file)?;
        }
        hooks.extend(weaver.hooks().iter().cloned());
        weaver.finish(&mut edits);

        let struct_rules = rule_set
            .struct_rules
            .get(file)
            .map_or(&[][..], Vec::as_slice);
        for rule in struct_rules {
            extend_struct(&ast, &map, rule, &mut edits, file)?;
            fixups.push(FieldFixup::from(rule));
            report.fields += 1;
        }

        debug!(
            "Wove {} function and {} struct rule(s) into {}",
            func_rules.len(),
            struct_rules.len(),
            file.display()
        );
        edits.apply(&text).map_err(|e| WeaveError::conflict(file, &e))
    }

    fn hook_sources(&mut self, path: Option<&Path>) -> Result<&HookSources, WeaveError> {
        let key = path.map_or_else(PathBuf::new, Path::to_path_buf);
        if !self.hook_sources.contains_key(&key) {
            let sources = match path {
                Some(p) => HookSources::load(p)?,
                None => HookSources::default(),
            };
            if path.is_some() && sources.is_empty() {
                warn!("No hook sources found under {}", key.display());
            }
            self.hook_sources.insert(key.clone(), sources);
        }
        Ok(&self.hook_sources[&key])
    }

    /// Fixes literals and patterns of extended structs in every module file.
    fn fix_struct_literals(
        &mut self,
        tree: &ModuleTree,
        fixups: &[FieldFixup],
    ) -> Result<usize, WeaveError> {
        let mut total = 0;
        for (index, module) in tree.files().iter().enumerate() {
            if tree.ast(index).is_none() {
                continue;
            }
            let text = self.session.read(&module.path)?;
            let ast = syn::parse_file(&text).map_err(|e| WeaveError::parse(&module.path, &e))?;
            let map = SourceMap::new(&text);
            let mut edits = EditBuffer::new();
            let count = fix_literals(&ast, &map, fixups, &mut edits);
            if count > 0 {
                let fixed = edits
                    .apply(&text)
                    .map_err(|e| WeaveError::conflict(&module.path, &e))?;
                self.session.write(&module.path, &fixed)?;
                total += count;
            }
        }
        Ok(total)
    }
}
