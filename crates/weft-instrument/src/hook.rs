//! Hook source checks.
//!
//! When a rule's `path` points at hook sources, the hooks it names are
//! looked up there before anything is woven, so a rule written against
//! another version of the target fails at build time instead of misbehaving
//! at run time.

use glob::glob;
use quote::ToTokens;
use std::path::{Path, PathBuf};
use syn::visit::{self, Visit};
use syn::visit_mut::{self, VisitMut};
use syn::{parse_quote, Expr, ExprLit, ExprMethodCall, FnArg, Item, ItemFn, Lit, Type, TypeReference};
use tracing::{debug, warn};
use weft_core::FuncRule;

use crate::capability::{ParamPosition, ReturnPosition};
use crate::error::WeaveError;

const RETURN_ACCESSORS: &[&str] = &["return_val", "return_val_as", "set_return_val"];

/// Parsed hook sources below one rule path.
#[derive(Debug, Default)]
pub struct HookSources {
    files: Vec<(PathBuf, syn::File)>,
}

impl HookSources {
    /// Loads `path` itself when it is a file, or every `*.rs` below it.
    ///
    /// Files that fail to parse are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read.
    pub fn load(path: &Path) -> Result<Self, WeaveError> {
        let candidates: Vec<PathBuf> = if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            let pattern = format!("{}/**/*.rs", path.display());
            match glob(&pattern) {
                Ok(paths) => paths.filter_map(Result::ok).collect(),
                Err(e) => {
                    warn!("Invalid hook source pattern {pattern}: {e}");
                    Vec::new()
                }
            }
        };

        let mut files = Vec::new();
        for file in candidates {
            let content =
                std::fs::read_to_string(&file).map_err(|e| WeaveError::io(&file, e))?;
            match syn::parse_file(&content) {
                Ok(ast) => files.push((file, ast)),
                Err(e) => debug!("Skipping hook source {}: {e}", file.display()),
            }
        }
        Ok(Self { files })
    }

    /// Number of parsed files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns `true` if nothing was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Finds a free function named `name`.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&ItemFn> {
        self.files
            .iter()
            .find_map(|(_, ast)| find_fn(&ast.items, name))
    }
}

fn find_fn<'a>(items: &'a [Item], name: &str) -> Option<&'a ItemFn> {
    items.iter().find_map(|item| match item {
        Item::Fn(f) if f.sig.ident == name => Some(f),
        Item::Mod(m) => m.content.as_ref().and_then(|(_, nested)| find_fn(nested, name)),
        _ => None,
    })
}

/// What the hooks of a rule receive from the function it was matched to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclaredPositions {
    /// Number of return positions.
    pub returns: usize,
    /// Types the enter hook takes after the call context.
    pub enter_args: Vec<String>,
    /// Types the exit hook takes after the call context.
    pub exit_args: Vec<String>,
}

impl DeclaredPositions {
    /// Hook arguments for a function with these positions.
    #[must_use]
    pub fn new(params: &[ParamPosition<'_>], returns: &[ReturnPosition<'_>]) -> Self {
        let enter_args = params
            .iter()
            .filter(|p| p.capable)
            .filter_map(|p| p.ty)
            .map(|ty| shape(&parse_quote!(&mut #ty)))
            .collect();
        let exit_args = returns
            .iter()
            .filter(|r| r.capable)
            .map(|r| {
                let ty = r.ty;
                shape(&parse_quote!(Option<&mut #ty>))
            })
            .collect();
        Self {
            returns: returns.len(),
            enter_args,
            exit_args,
        }
    }
}

/// Type text with lifetimes dropped and every path cut to its last segment,
/// so `std::vec::Vec<u8>` and `Vec<u8>` compare equal.
#[must_use]
pub fn shape(ty: &Type) -> String {
    struct Shape;
    impl VisitMut for Shape {
        fn visit_type_reference_mut(&mut self, node: &mut TypeReference) {
            node.lifetime = None;
            visit_mut::visit_type_reference_mut(self, node);
        }

        fn visit_path_mut(&mut self, node: &mut syn::Path) {
            if let Some(last) = node.segments.pop() {
                node.segments = std::iter::once(last.into_value()).collect();
            }
            node.leading_colon = None;
            visit_mut::visit_path_mut(self, node);
        }
    }
    let mut ty = ty.clone();
    Shape.visit_type_mut(&mut ty);
    ty.to_token_stream().to_string()
}

/// Checks the hooks of `rule` against the sources under its `path`.
///
/// Does nothing for raw rules or rules without a `path`.
///
/// # Errors
///
/// Returns [`WeaveError::StructuralMismatch`] if a hook is missing, does not
/// take the call context first, or takes a different number of arguments
/// than the target passes. For rules naming one function the argument types
/// must match too, and a hook may not access a return position the target
/// does not declare.
pub fn check_hooks(
    rule: &FuncRule,
    sources: &HookSources,
    declared: &DeclaredPositions,
    file: &Path,
) -> Result<(), WeaveError> {
    if rule.use_raw || rule.base.hook_path().is_none() {
        return Ok(());
    }
    let hooks = [
        (&rule.on_enter, &declared.enter_args),
        (&rule.on_exit, &declared.exit_args),
    ];
    for (hook, expected) in hooks {
        if hook.is_empty() {
            continue;
        }
        let Some(func) = sources.find(hook) else {
            return Err(WeaveError::mismatch(
                file,
                format!("hook `{hook}` not found under {}", rule.base.path),
            ));
        };
        let mismatch = |message: String| Err(WeaveError::mismatch(file, message));

        let mut inputs = func.sig.inputs.iter().map(|arg| match arg {
            FnArg::Typed(pt) => Some(shape(&pt.ty)),
            FnArg::Receiver(_) => None,
        });
        if inputs.next().flatten() != Some(shape(&parse_quote!(&mut dyn CallContext))) {
            return mismatch(format!(
                "hook `{hook}` must take `&mut dyn CallContext` as its first parameter"
            ));
        }
        let actual: Vec<Option<String>> = inputs.collect();
        if actual.len() != expected.len() {
            return mismatch(format!(
                "hook `{hook}` takes {} argument(s) after the call context but `{}` passes {}",
                actual.len(),
                rule.function,
                expected.len()
            ));
        }
        if !rule.is_exact() {
            continue;
        }
        for (position, (actual, expected)) in actual.iter().zip(expected).enumerate() {
            if actual.as_ref() != Some(expected) {
                return mismatch(format!(
                    "argument {} of hook `{hook}` is `{}` but `{}` passes `{expected}`",
                    position + 1,
                    actual.as_deref().unwrap_or("self"),
                    rule.function
                ));
            }
        }

        let mut accesses = AccessCollector::default();
        accesses.visit_block(&func.block);
        for (method, index) in accesses.found {
            if index >= declared.returns {
                return mismatch(format!(
                    "hook `{hook}` calls `{method}({index})` but `{}` has {} return positions",
                    rule.function, declared.returns
                ));
            }
        }
    }
    Ok(())
}

#[derive(Default)]
struct AccessCollector {
    found: Vec<(String, usize)>,
}

impl<'ast> Visit<'ast> for AccessCollector {
    fn visit_expr_method_call(&mut self, node: &'ast ExprMethodCall) {
        let method = node.method.to_string();
        if RETURN_ACCESSORS.contains(&method.as_str()) {
            if let Some(Expr::Lit(ExprLit {
                lit: Lit::Int(int), ..
            })) = node.args.first()
            {
                if let Ok(index) = int.base10_parse::<usize>() {
                    self.found.push((method, index));
                }
            }
        }
        visit::visit_expr_method_call(self, node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{param_positions, return_positions};

    const HOOKS: &str = r#"
use demo::__weft_rt::CallContext;

pub fn before_add(call: &mut dyn CallContext, a: &mut i32, b: &mut i32) {
    call.set_return_val(0, Box::new(*a + *b));
}

pub fn after_add(call: &mut dyn demo::__weft_rt::CallContext, sum: Option<&'static mut i32>) {}

pub fn bad_index(call: &mut dyn CallContext, a: &mut i32, b: &mut i32) {
    let _ = call.return_val_as::<i32>(2);
}

pub fn ctx_only(call: &mut dyn CallContext) {}

pub fn no_ctx(a: &mut i32, b: &mut i32) {}

pub fn wrong_type(call: &mut dyn CallContext, a: &mut i64, b: &mut i32) {}
"#;

    fn sources() -> (tempfile::TempDir, HookSources) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/hooks.rs"), HOOKS).unwrap();
        std::fs::write(dir.path().join("broken.rs"), "fn (").unwrap();
        let sources = HookSources::load(dir.path()).unwrap();
        (dir, sources)
    }

    fn rule(dir: &Path, function: &str, hook: &str) -> FuncRule {
        let mut rule = FuncRule::new("demo", function).with_on_enter(hook);
        rule.base.path = dir.display().to_string();
        rule
    }

    fn add() -> DeclaredPositions {
        let sig: syn::Signature = syn::parse_str("fn add(a: i32, b: std::primitive::i32) -> i32").unwrap();
        DeclaredPositions::new(&param_positions(&sig, &[]), &return_positions(&sig, &[]))
    }

    fn check(rule: &FuncRule, sources: &HookSources) -> Result<(), WeaveError> {
        check_hooks(rule, sources, &add(), Path::new("lib.rs"))
    }

    #[test]
    fn test_loads_nested_sources() {
        let (_dir, sources) = sources();
        assert_eq!(sources.len(), 1);
        assert!(sources.find("before_add").is_some());
        assert!(sources.find("missing").is_none());
    }

    #[test]
    fn test_declared_positions_skip_uncaptured() {
        let sig: syn::Signature =
            syn::parse_str("fn f(&self, n: u8, s: &str) -> (Vec<u8>, &str)").unwrap();
        let declared =
            DeclaredPositions::new(&param_positions(&sig, &[]), &return_positions(&sig, &[]));
        assert_eq!(declared.returns, 2);
        assert_eq!(declared.enter_args, ["& mut u8"]);
        assert_eq!(declared.exit_args, ["Option < & mut Vec < u8 > >"]);
    }

    #[test]
    fn test_shape_ignores_paths_and_lifetimes() {
        let a: Type = syn::parse_str("&'a mut ::std::vec::Vec<std::string::String>").unwrap();
        let b: Type = syn::parse_str("&mut Vec<String>").unwrap();
        assert_eq!(shape(&a), shape(&b));
    }

    #[test]
    fn test_typed_hooks_pass() {
        let (dir, sources) = sources();
        assert!(check(&rule(dir.path(), "add", "before_add"), &sources).is_ok());

        let mut exit = FuncRule::new("demo", "add").with_on_exit("after_add");
        exit.base.path = dir.path().display().to_string();
        assert!(check(&exit, &sources).is_ok());
    }

    #[test]
    fn test_signature_mismatches() {
        let (dir, sources) = sources();
        for hook in ["missing", "ctx_only", "no_ctx", "wrong_type"] {
            let rule = rule(dir.path(), "add", hook);
            assert!(
                matches!(check(&rule, &sources), Err(WeaveError::StructuralMismatch { .. })),
                "{hook}"
            );
        }
    }

    #[test]
    fn test_types_checked_only_for_exact_rules() {
        let (dir, sources) = sources();
        assert!(check(&rule(dir.path(), "add|sub", "wrong_type"), &sources).is_ok());
        assert!(check(&rule(dir.path(), "add|sub", "ctx_only"), &sources).is_err());
    }

    #[test]
    fn test_index_check_only_for_exact_rules() {
        let (dir, sources) = sources();
        let exact = rule(dir.path(), "add", "bad_index");
        assert!(check(&exact, &sources).is_err());

        let pattern = rule(dir.path(), "add|sub", "bad_index");
        assert!(check(&pattern, &sources).is_ok());
    }

    #[test]
    fn test_rules_without_path_are_not_checked() {
        let rule = FuncRule::new("demo", "add").with_on_enter("anything");
        assert!(check(&rule, &HookSources::default()).is_ok());
    }
}
