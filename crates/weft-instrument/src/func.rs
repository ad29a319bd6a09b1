//! Weaving function rules into one source file.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use syn::spanned::Spanned;
use syn::AttrStyle;
use tracing::debug;
use weft_core::targets::{find_functions, Container, FnTarget};
use weft_core::FuncRule;

use crate::capability::{
    param_positions, return_positions, return_type_text, Binding, ParamPosition,
};
use crate::error::WeaveError;
use crate::hook::{check_hooks, DeclaredPositions, HookSources};
use crate::jump::{raw_layer, HookLayer, InjectionChain, InsertionCursor};
use crate::source::{single_line, EditBuffer, SourceMap};
use crate::trampoline::{TrampolineBuilder, TrampolineNames};

/// Injection state of one function body.
#[derive(Debug)]
struct FnWeave {
    chain: InjectionChain,
    cursor: InsertionCursor,
    open_at: usize,
    close_at: usize,
    params_prepared: bool,
}

/// Applies function rules to one parsed file and collects the resulting edits.
#[derive(Debug)]
pub struct FuncWeaver<'m, 's> {
    map: &'m SourceMap<'s>,
    package_name: String,
    functions: BTreeMap<usize, FnWeave>,
    globals: Vec<(Container, String)>,
    names: HashSet<String>,
    hooks: BTreeSet<String>,
    param_edits: EditBuffer,
}

impl<'m, 's> FuncWeaver<'m, 's> {
    /// Starts weaving a file whose text is indexed by `map`.
    #[must_use]
    pub fn new(map: &'m SourceMap<'s>, package_name: impl Into<String>) -> Self {
        Self {
            map,
            package_name: package_name.into(),
            functions: BTreeMap::new(),
            globals: Vec::new(),
            names: HashSet::new(),
            hooks: BTreeSet::new(),
            param_edits: EditBuffer::new(),
        }
    }

    /// Applies `rule` to every function it selects in `ast`.
    ///
    /// Returns the number of functions woven.
    ///
    /// # Errors
    ///
    /// Returns [`WeaveError::TargetVanished`] if the rule selects nothing, and
    /// [`WeaveError::StructuralMismatch`] if its hooks or raw snippets do not
    /// fit the target.
    pub fn apply(
        &mut self,
        ast: &syn::File,
        rule: &FuncRule,
        hooks: &HookSources,
        file: &Path,
    ) -> Result<usize, WeaveError> {
        let pattern = rule
            .pattern()
            .map_err(|e| WeaveError::mismatch(file, e.to_string()))?;
        let targets = find_functions(ast, &pattern);
        if targets.is_empty() {
            return Err(WeaveError::TargetVanished {
                rule: weft_core::Rule::from(rule.clone()).to_string(),
                file: file.to_path_buf(),
            });
        }
        for target in &targets {
            self.apply_to(target, rule, hooks, file)?;
        }
        Ok(targets.len())
    }

    fn apply_to(
        &mut self,
        target: &FnTarget<'_>,
        rule: &FuncRule,
        hooks: &HookSources,
        file: &Path,
    ) -> Result<(), WeaveError> {
        let params = param_positions(target.sig, &target.generics);
        let returns = return_positions(target.sig, &target.generics);
        check_hooks(rule, hooks, &DeclaredPositions::new(&params, &returns), file)?;

        let open_at = self.body_start(target);
        let close_at = self
            .map
            .offset(target.block.brace_token.span.close().start());
        let mut weave = self.functions.remove(&open_at).unwrap_or_else(|| {
            let chain = InjectionChain::new();
            FnWeave {
                cursor: chain.innermost(),
                chain,
                open_at,
                close_at,
                params_prepared: false,
            }
        });
        let handle = weave.chain.len();

        let layer = if rule.use_raw {
            raw_layer(&rule.on_enter, &rule.on_exit, handle)
                .map_err(|e| WeaveError::mismatch(file, format!("raw snippet: {e}")))?
        } else {
            if !weave.params_prepared {
                self.prepare_params(&params, &mut weave.chain);
                weave.params_prepared = true;
            }
            let names = self.unique_names(TrampolineNames::new(rule, &target.receiver, &target.name));
            let code = TrampolineBuilder::new(rule, &params, &returns, return_type_text(target.sig))
                .func_name(target.name.as_str())
                .package_name(self.package_name.as_str())
                .render(&names);
            self.globals.push((target.container, code));
            for hook in [&rule.on_enter, &rule.on_exit] {
                if !hook.is_empty() {
                    self.hooks.insert(hook.clone());
                }
            }
            HookLayer {
                names: &names,
                params: &params,
                returns: &returns,
                return_type: return_type_text(target.sig),
                on_enter: rule.has_on_enter(),
                on_exit: rule.has_on_exit(),
                is_async: target.sig.asyncness.is_some(),
            }
            .render(handle)
        };

        weave.cursor = weave.chain.insert(weave.cursor, layer);
        debug!(
            "Wove {} into `{}` ({} layers)",
            weft_core::Rule::from(rule.clone()),
            target.name,
            weave.chain.len()
        );
        self.functions.insert(open_at, weave);
        Ok(())
    }

    /// Offset right after the body's opening brace and its inner attributes.
    fn body_start(&self, target: &FnTarget<'_>) -> usize {
        let brace = self
            .map
            .offset(target.block.brace_token.span.open().end());
        target
            .attrs
            .iter()
            .filter(|a| matches!(a.style, AttrStyle::Inner(_)))
            .map(|a| self.map.offset(a.bracket_token.span.close().end()))
            .fold(brace, usize::max)
    }

    /// Makes captured parameters mutable, rebinding non-identifier patterns.
    fn prepare_params(&mut self, params: &[ParamPosition<'_>], chain: &mut InjectionChain) {
        for param in params.iter().filter(|p| p.capable) {
            let Some(pat) = param.pat else { continue };
            match &param.binding {
                Binding::Ident { mutable: true, .. } => {}
                Binding::Ident { .. } => {
                    self.param_edits
                        .insert(self.map.offset(pat.span().start()), "mut ");
                }
                Binding::Pattern => {
                    let start = self.map.offset(pat.span().start());
                    let end = self.map.offset(pat.span().end());
                    let original = self.map.text().get(start..end).unwrap_or("_").to_string();
                    self.param_edits
                        .replace(start, end, format!("mut {}", param.access()));
                    chain.add_prologue(format!("let {} = {};", single_line(&original), param.access()));
                }
            }
        }
    }

    fn unique_names(&mut self, names: TrampolineNames) -> TrampolineNames {
        let mut ordinal = 0;
        loop {
            let candidate = names.clone().with_ordinal(ordinal);
            if self.names.insert(candidate.context.clone()) {
                return candidate;
            }
            ordinal = if ordinal == 0 { 2 } else { ordinal + 1 };
        }
    }

    /// Hook names referenced by the generated trampolines.
    #[must_use]
    pub fn hooks(&self) -> &BTreeSet<String> {
        &self.hooks
    }

    /// Returns `true` if nothing was woven.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Renders every injection chain and generated item into `edits`.
    ///
    /// Items for module-level targets are appended after the last line;
    /// items for targets inside inline modules are spliced onto the line of
    /// the module's closing brace.
    pub fn finish(self, edits: &mut EditBuffer) {
        for weave in self.functions.values() {
            let (open, close) = weave.chain.render();
            if !open.is_empty() {
                edits.insert(weave.open_at, format!(" {open}"));
            }
            if !close.is_empty() {
                edits.insert(weave.close_at, format!(" {close} "));
            }
        }
        edits.extend(self.param_edits);

        let mut appended = String::new();
        for (container, code) in &self.globals {
            match container {
                Container::File => {
                    appended.push('\n');
                    appended.push_str(code);
                }
                Container::InlineMod { close } => {
                    edits.insert(self.map.offset(*close), format!(" {} ", single_line(code)));
                }
            }
        }
        if !appended.is_empty() {
            edits.insert(self.map.text().len(), appended);
        }
    }
}
