//! Injection chains: the code spliced into one function body.
//!
//! Every rule applied to a function contributes a [`Layer`]: text opened right
//! after the body's opening brace and text closed right before its closing
//! brace. Layers nest; applying a rule returns an [`InsertionCursor`] that
//! places the next rule inside it, so the first rule applied is outermost.

use weft_core::parse_raw_snippet;

use crate::capability::{ParamPosition, ReturnPosition};
use crate::trampoline::TrampolineNames;

/// Code one rule wraps around a function body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layer {
    /// Spliced before the body.
    pub open: String,
    /// Spliced after the body.
    pub close: String,
}

/// Where the next layer of a chain nests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertionCursor {
    depth: usize,
}

/// All layers applied to one function.
#[derive(Debug, Default)]
pub struct InjectionChain {
    layers: Vec<Layer>,
    prologue: Vec<String>,
}

impl InjectionChain {
    /// An empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cursor at the innermost position.
    #[must_use]
    pub fn innermost(&self) -> InsertionCursor {
        InsertionCursor {
            depth: self.layers.len(),
        }
    }

    /// Nests `layer` at `cursor` and returns the cursor inside it.
    pub fn insert(&mut self, cursor: InsertionCursor, layer: Layer) -> InsertionCursor {
        let depth = cursor.depth.min(self.layers.len());
        self.layers.insert(depth, layer);
        InsertionCursor { depth: depth + 1 }
    }

    /// Adds a statement that runs inside every layer, before the body.
    pub fn add_prologue(&mut self, stmt: String) {
        if !self.prologue.contains(&stmt) {
            self.prologue.push(stmt);
        }
    }

    /// Number of layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Returns `true` if no layer was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Renders the text opened before and closed after the body.
    #[must_use]
    pub fn render(&self) -> (String, String) {
        let open = self
            .layers
            .iter()
            .map(|l| l.open.as_str())
            .chain(self.prologue.iter().map(String::as_str))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let close = self
            .layers
            .iter()
            .rev()
            .map(|l| l.close.as_str())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        (open, close)
    }
}

/// Inputs for a hook layer.
///
/// With an exit hook and every return position captured, the body runs in a
/// closure (or an `async` block) so the exit trampoline sees the values it
/// returns. Otherwise the body stays in place. Either way an
/// `ExitGuard` holds the call context, so the exit trampoline also runs when
/// the body unwinds or the future is dropped, then without return values.
#[derive(Debug)]
pub struct HookLayer<'r, 'a> {
    /// Names of the trampolines to call.
    pub names: &'r TrampolineNames,
    /// Parameter positions of the target.
    pub params: &'r [ParamPosition<'a>],
    /// Return positions of the target.
    pub returns: &'r [ReturnPosition<'a>],
    /// Declared return type.
    pub return_type: String,
    /// The rule has an enter hook.
    pub on_enter: bool,
    /// The rule has an exit hook.
    pub on_exit: bool,
    /// The target is an `async fn`.
    pub is_async: bool,
}

impl HookLayer<'_, '_> {
    /// Renders the layer. `handle` keeps local names unique per chain.
    #[must_use]
    pub fn render(&self, handle: usize) -> Layer {
        let ctx = format!("__weft_ctx_{handle}");
        let skip = format!("__weft_skip_{handle}");
        let ret = format!("__weft_ret_{handle}");
        let guard = format!("__weft_guard_{handle}");
        let enter = &self.names.enter;
        let exit = &self.names.exit;

        let args = self
            .params
            .iter()
            .filter(|p| p.capable)
            .map(|p| format!("&mut {}", p.access()))
            .collect::<Vec<_>>()
            .join(", ");
        let captured: Vec<&ReturnPosition<'_>> = self.returns.iter().filter(|r| r.capable).collect();
        let ret_args: String = captured
            .iter()
            .map(|r| format!(", ::core::option::Option::Some(&mut {})", r.access(&ret)))
            .collect();
        let no_returns = ", ::core::option::Option::None".repeat(captured.len());
        let wraps = captured.len() == self.returns.len();

        let mut open = if self.on_enter && wraps {
            format!(
                "let (mut {ctx}, {skip}) = {enter}({args}); if {skip} {{ if let ::core::option::Option::Some(mut {ret}) = {ctx}.take_returns() {{ {exit}({ctx}{ret_args}); return {ret}; }} }}"
            )
        } else if self.on_exit {
            format!("let ({ctx}, _) = {enter}({args});")
        } else {
            format!("let _ = {enter}({args});")
        };

        if !self.on_exit {
            return Layer {
                open,
                close: String::new(),
            };
        }

        open.push_str(&format!(
            " let {guard} = crate::__weft_rt::ExitGuard::new({ctx}, |ctx| {exit}(ctx{no_returns}));"
        ));
        if !wraps {
            return Layer {
                open,
                close: String::new(),
            };
        }

        let r = &self.return_type;
        let binding = if captured.is_empty() {
            ret.clone()
        } else {
            format!("mut {ret}")
        };
        let close_tail = format!(
            "if let ::core::option::Option::Some({ctx}) = {guard}.disarm() {{ {exit}({ctx}{ret_args}); }} {ret}"
        );
        let close = if self.is_async {
            open.push_str(&format!(
                " let {binding} = crate::__weft_rt::expect_output::<{r}, _>(async move {{"
            ));
            format!("}}).await; {close_tail}")
        } else {
            open.push_str(&format!(" let {binding} = (move || -> {r} {{"));
            format!("}})(); {close_tail}")
        };
        Layer { open, close }
    }
}

/// Renders a raw layer: the enter snippet runs in place, the exit snippet runs
/// from a drop guard when the body finishes.
///
/// # Errors
///
/// Returns an error if a snippet is not a statement list.
pub fn raw_layer(on_enter: &str, on_exit: &str, handle: usize) -> syn::Result<Layer> {
    let mut open = Vec::new();
    if !on_enter.trim().is_empty() {
        open.push(statements(on_enter)?);
    }
    if !on_exit.trim().is_empty() {
        open.push(format!(
            "let __weft_defer_{handle} = crate::__weft_rt::Defer::new(|| {{ {} }});",
            statements(on_exit)?
        ));
    }
    Ok(Layer {
        open: open.join(" "),
        close: String::new(),
    })
}

fn statements(snippet: &str) -> syn::Result<String> {
    let stmts = parse_raw_snippet(snippet)?;
    Ok(stmts
        .iter()
        .map(|s| quote::ToTokens::to_token_stream(s).to_string())
        .collect::<Vec<_>>()
        .join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{param_positions, return_positions};
    use weft_core::FuncRule;

    fn names() -> TrampolineNames {
        TrampolineNames {
            context: "Ctx".to_string(),
            enter: "enter".to_string(),
            exit: "exit".to_string(),
        }
    }

    fn layer(sig: &str, on_enter: bool, on_exit: bool) -> Layer {
        let sig: syn::Signature = syn::parse_str(sig).unwrap();
        let params = param_positions(&sig, &[]);
        let returns = return_positions(&sig, &[]);
        let names = names();
        HookLayer {
            names: &names,
            params: &params,
            returns: &returns,
            return_type: crate::capability::return_type_text(&sig),
            on_enter,
            on_exit,
            is_async: sig.asyncness.is_some(),
        }
        .render(0)
    }

    #[test]
    fn test_enter_and_exit_layer() {
        let layer = layer("fn add(a: i32, b: i32) -> i32", true, true);
        insta::assert_snapshot!(layer.open, @"let (mut __weft_ctx_0, __weft_skip_0) = enter(&mut a, &mut b); if __weft_skip_0 { if let ::core::option::Option::Some(mut __weft_ret_0) = __weft_ctx_0.take_returns() { exit(__weft_ctx_0, ::core::option::Option::Some(&mut __weft_ret_0)); return __weft_ret_0; } } let __weft_guard_0 = crate::__weft_rt::ExitGuard::new(__weft_ctx_0, |ctx| exit(ctx, ::core::option::Option::None)); let mut __weft_ret_0 = (move || -> i32 {");
        insta::assert_snapshot!(layer.close, @"})(); if let ::core::option::Option::Some(__weft_ctx_0) = __weft_guard_0.disarm() { exit(__weft_ctx_0, ::core::option::Option::Some(&mut __weft_ret_0)); } __weft_ret_0");
    }

    #[test]
    fn test_enter_only_layer_does_not_wrap() {
        let layer = layer("fn name(&self) -> &str", true, false);
        assert_eq!(layer.open, "let _ = enter();");
        assert!(layer.close.is_empty());
    }

    #[test]
    fn test_borrowed_return_keeps_body_in_place() {
        let layer = layer("fn first_mut(&mut self, at: usize) -> &mut i32", true, true);
        insta::assert_snapshot!(layer.open, @"let (__weft_ctx_0, _) = enter(&mut at); let __weft_guard_0 = crate::__weft_rt::ExitGuard::new(__weft_ctx_0, |ctx| exit(ctx));");
        assert!(layer.close.is_empty());
    }

    #[test]
    fn test_partly_captured_tuple_passes_no_returns() {
        let layer = layer("fn split(&self) -> (usize, &str)", false, true);
        assert!(layer.open.ends_with(
            "ExitGuard::new(__weft_ctx_0, |ctx| exit(ctx, ::core::option::Option::None));"
        ));
        assert!(layer.close.is_empty());
    }

    #[test]
    fn test_unit_layer_wraps_without_returns() {
        let layer = layer("fn tick(&mut self)", false, true);
        assert!(layer.open.ends_with("|ctx| exit(ctx)); let __weft_ret_0 = (move || -> () {"));
        assert_eq!(
            layer.close,
            "})(); if let ::core::option::Option::Some(__weft_ctx_0) = __weft_guard_0.disarm() { exit(__weft_ctx_0); } __weft_ret_0"
        );
    }

    #[test]
    fn test_async_tuple_layer() {
        let layer = layer("async fn pair(x: u8) -> (u8, u8)", false, true);
        insta::assert_snapshot!(layer.open, @"let (__weft_ctx_0, _) = enter(&mut x); let __weft_guard_0 = crate::__weft_rt::ExitGuard::new(__weft_ctx_0, |ctx| exit(ctx, ::core::option::Option::None, ::core::option::Option::None)); let mut __weft_ret_0 = crate::__weft_rt::expect_output::<(u8 , u8), _>(async move {");
        insta::assert_snapshot!(layer.close, @"}).await; if let ::core::option::Option::Some(__weft_ctx_0) = __weft_guard_0.disarm() { exit(__weft_ctx_0, ::core::option::Option::Some(&mut __weft_ret_0.0), ::core::option::Option::Some(&mut __weft_ret_0.1)); } __weft_ret_0");
    }

    #[test]
    fn test_chain_nests_first_applied_outermost() {
        let mut chain = InjectionChain::new();
        let first = chain.insert(
            chain.innermost(),
            Layer {
                open: "a{".to_string(),
                close: "}a".to_string(),
            },
        );
        chain.insert(
            first,
            Layer {
                open: "b{".to_string(),
                close: "}b".to_string(),
            },
        );
        chain.add_prologue("let (x, y) = __weft_arg1;".to_string());
        chain.add_prologue("let (x, y) = __weft_arg1;".to_string());

        let (open, close) = chain.render();
        assert_eq!(open, "a{ b{ let (x, y) = __weft_arg1;");
        assert_eq!(close, "}b }a");
    }

    #[test]
    fn test_raw_layer() {
        let rule = FuncRule::new("demo", "run")
            .raw()
            .with_on_enter("println!(\"enter\"); // note")
            .with_on_exit("println!(\"exit\");");
        let layer = raw_layer(&rule.on_enter, &rule.on_exit, 1).unwrap();
        assert!(layer.open.starts_with("println ! (\"enter\") ;"));
        assert!(layer.open.contains("let __weft_defer_1 = crate::__weft_rt::Defer::new(|| { println ! (\"exit\") ; });"));
        assert!(!layer.open.contains("note"));
        assert!(raw_layer("let x = ;", "", 0).is_err());
    }
}
