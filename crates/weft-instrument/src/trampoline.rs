//! Enter and exit trampolines plus the typed call context they share.
//!
//! Generated from `templates/trampoline.rs.tmpl`. Each (rule, function) pair
//! gets its own context type so every captured position keeps its static type.

use weft_core::{content_digest, FuncRule};

use crate::capability::{is_boxed_any, ParamPosition, ReturnPosition};

const TEMPLATE: &str = include_str!("../templates/trampoline.rs.tmpl");

/// Names of the items generated for one (rule, function) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrampolineNames {
    /// Call context struct.
    pub context: String,
    /// Enter trampoline.
    pub enter: String,
    /// Exit trampoline.
    pub exit: String,
}

impl TrampolineNames {
    /// Names derived from the rule's content digest.
    ///
    /// Identical rule content yields identical names.
    #[must_use]
    pub fn new(rule: &FuncRule, receiver: &str, function: &str) -> Self {
        let digest = content_digest(rule);
        let stem = if receiver.is_empty() {
            format!("{}_{digest}", sanitize(function))
        } else {
            format!("{}_{}_{digest}", sanitize(receiver), sanitize(function))
        };
        Self {
            context: format!("WeftCallContext_{stem}"),
            enter: format!("weft_on_enter_{stem}"),
            exit: format!("weft_on_exit_{stem}"),
        }
    }

    /// Disambiguates names that are already taken in the same file.
    #[must_use]
    pub fn with_ordinal(self, ordinal: usize) -> Self {
        if ordinal == 0 {
            return self;
        }
        Self {
            context: format!("{}_{ordinal}", self.context),
            enter: format!("{}_{ordinal}", self.enter),
            exit: format!("{}_{ordinal}", self.exit),
        }
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Renders the trampolines of one (rule, function) pair.
#[derive(Debug)]
pub struct TrampolineBuilder<'r, 'a> {
    rule: &'r FuncRule,
    params: &'r [ParamPosition<'a>],
    returns: &'r [ReturnPosition<'a>],
    return_type: String,
    func_name: String,
    package_name: String,
}

impl<'r, 'a> TrampolineBuilder<'r, 'a> {
    /// Starts a builder for `rule` applied to a function with these positions.
    #[must_use]
    pub fn new(
        rule: &'r FuncRule,
        params: &'r [ParamPosition<'a>],
        returns: &'r [ReturnPosition<'a>],
        return_type: impl Into<String>,
    ) -> Self {
        Self {
            rule,
            params,
            returns,
            return_type: return_type.into(),
            func_name: String::new(),
            package_name: String::new(),
        }
    }

    /// Sets the function name reported to hooks.
    #[must_use]
    pub fn func_name(mut self, name: impl Into<String>) -> Self {
        self.func_name = name.into();
        self
    }

    /// Sets the package name reported to hooks.
    #[must_use]
    pub fn package_name(mut self, name: impl Into<String>) -> Self {
        self.package_name = name.into();
        self
    }

    /// Returns `true` if a hook can supply every return value, which makes
    /// skipping the body possible.
    #[must_use]
    pub fn can_skip(&self) -> bool {
        self.returns.iter().all(|r| r.capable)
    }

    /// Renders the context type and both trampolines.
    #[must_use]
    pub fn render(&self, names: &TrampolineNames) -> String {
        let params: Vec<&ParamPosition<'a>> = self.params.iter().filter(|p| p.capable).collect();
        let returns: Vec<&ReturnPosition<'a>> = self.returns.iter().filter(|r| r.capable).collect();

        let mut fields = String::new();
        let mut init = String::new();
        let mut reset = String::new();
        let mut write_back = String::new();
        for r in &returns {
            let slot = format!("r{}", r.index);
            let ty = type_text(Some(r.ty));
            fields.push_str(&format!("    {slot}: ::core::option::Option<{ty}>,\n"));
            init.push_str(&format!("{slot}: ::core::option::Option::None, "));
            reset.push_str(&format!("call.{slot} = ::core::option::Option::None; "));
            write_back.push_str(&format!(
                "if let (::core::option::Option::Some(value), ::core::option::Option::Some(target)) = (call.{slot}.take(), {slot}) {{ *target = value; }} "
            ));
        }
        let return_arms: Vec<Arms> = returns
            .iter()
            .map(|r| Arms::new(&format!("r{}", r.index), r.index, r.ty))
            .collect();

        let enter_args: Vec<(String, String)> = params
            .iter()
            .map(|p| (format!("p{}", p.index), format!("&mut {}", type_text(p.ty))))
            .collect();
        let exit_args: Vec<(String, String)> = returns
            .iter()
            .map(|r| {
                let ty = type_text(Some(r.ty));
                (format!("r{}", r.index), format!("::core::option::Option<&mut {ty}>"))
            })
            .collect();
        let enter_call: Vec<String> = enter_args.iter().map(|(name, _)| name.clone()).collect();
        let exit_call: Vec<String> = exit_args
            .iter()
            .map(|(name, _)| format!("{name}.as_deref_mut()"))
            .collect();

        TEMPLATE
            .replace("__RETURN_FIELDS__", &fields)
            .replace("__RETURN_INIT__", &init)
            .replace("__TAKE_RETURNS__", &self.take_returns())
            .replace("__RETURN_ARMS__", &join_arms(&return_arms, |a| &a.get))
            .replace("__SET_RETURN_ARMS__", &join_arms(&return_arms, |a| &a.set))
            .replace("__PARAM_COUNT__", &self.params.len().to_string())
            .replace("__RETURN_COUNT__", &self.returns.len().to_string())
            .replace("__FUNC_NAME__", &format!("{:?}", self.func_name))
            .replace("__PACKAGE_NAME__", &format!("{:?}", self.package_name))
            .replace("__ENTER_PARAMS__", &typed_params(&enter_args))
            .replace("__ENTER_HOOK__", &hook_call(&self.rule.on_enter, &enter_args, &enter_call))
            .replace("__EXIT_PARAMS__", &typed_params(&exit_args))
            .replace(
                "__EXIT_HOOK__",
                &format!("{reset}{}", hook_call(&self.rule.on_exit, &exit_args, &exit_call)),
            )
            .replace("__EXIT_WRITE_BACK__", write_back.trim_end())
            .replace("__ENTER__", &names.enter)
            .replace("__EXIT__", &names.exit)
            .replace("__CTX__", &names.context)
    }

    fn take_returns(&self) -> String {
        if !self.can_skip() {
            return String::new();
        }
        let r = &self.return_type;
        let body = match self.returns {
            [] => "::core::option::Option::Some(())".to_string(),
            [only] if !only.in_tuple => format!("self.r{}.take()", only.index),
            all => {
                let supplied: Vec<String> = all
                    .iter()
                    .map(|p| format!("self.r{}.is_some()", p.index))
                    .collect();
                let taken: Vec<String> = all
                    .iter()
                    .map(|p| format!("self.r{}.take()?,", p.index))
                    .collect();
                format!(
                    "if !({}) {{ return ::core::option::Option::None; }} ::core::option::Option::Some(({}))",
                    supplied.join(" && "),
                    taken.join(" ")
                )
            }
        };
        format!("    fn take_returns(&mut self) -> ::core::option::Option<{r}> {{ {body} }}\n")
    }
}

struct Arms {
    get: String,
    set: String,
}

impl Arms {
    fn new(slot: &str, index: usize, ty: &syn::Type) -> Self {
        if is_boxed_any(ty) {
            return Self {
                get: format!("{index} => self.{slot}.as_ref().map(|v| &**v as &dyn ::core::any::Any),"),
                set: format!("{index} => {{ self.{slot} = ::core::option::Option::Some(value); true }}"),
            };
        }
        let ty = type_text(Some(ty));
        Self {
            get: format!("{index} => self.{slot}.as_ref().map(|v| v as &dyn ::core::any::Any),"),
            set: format!(
                "{index} => match value.downcast::<{ty}>() {{ ::core::result::Result::Ok(v) => {{ self.{slot} = ::core::option::Option::Some(*v); true }} ::core::result::Result::Err(_) => false }},"
            ),
        }
    }
}

fn join_arms(arms: &[Arms], pick: impl Fn(&Arms) -> &String) -> String {
    arms.iter().map(|a| format!("{} ", pick(a))).collect()
}

fn type_text(ty: Option<&syn::Type>) -> String {
    ty.map(|t| quote::ToTokens::to_token_stream(t).to_string())
        .unwrap_or_default()
}

fn typed_params(args: &[(String, String)]) -> String {
    args.iter()
        .map(|(name, ty)| format!("mut {name}: {ty}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The boxed `Fn` type a hook with these arguments is registered as.
fn hook_type(args: &[(String, String)]) -> String {
    let args: String = args.iter().map(|(_, ty)| format!(", {ty}")).collect();
    format!(
        "::std::boxed::Box<dyn ::core::ops::Fn(&mut dyn crate::__weft_rt::CallContext{args}) + ::core::marker::Send + ::core::marker::Sync>"
    )
}

fn hook_call(hook: &str, args: &[(String, String)], call_args: &[String]) -> String {
    if hook.is_empty() {
        return String::new();
    }
    let call_args: String = call_args.iter().map(|a| format!(", {a}")).collect();
    format!(
        "if let ::core::option::Option::Some(hook) = crate::__weft_rt::hooks::{hook}.get::<{}>() {{ crate::__weft_rt::invoke(|| hook(&mut call{call_args})); }}",
        hook_type(args)
    )
}
