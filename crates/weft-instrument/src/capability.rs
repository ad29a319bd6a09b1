//! Which parameter and return positions a call context can capture.
//!
//! A captured value is passed to hooks as a typed argument and can be
//! supplied back as `dyn Any`. Its type is named in items declared at module
//! scope, so it has to be `'static` and nameable outside the function.

use quote::ToTokens;
use syn::visit::{self, Visit};
use syn::{FnArg, Pat, ReturnType, Signature, Type};

/// How a captured parameter is reached inside the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// `name` or `mut name`.
    Ident {
        /// Binding name.
        name: String,
        /// Already declared `mut`.
        mutable: bool,
    },
    /// Any other pattern; it is rebound through `__weft_arg<index>`.
    Pattern,
}

/// One parameter position.
#[derive(Debug, Clone)]
pub struct ParamPosition<'a> {
    /// Position, counting the receiver first.
    pub index: usize,
    /// Declared type; `None` for receivers.
    pub ty: Option<&'a Type>,
    /// Pattern, for typed parameters.
    pub pat: Option<&'a Pat>,
    /// How the value is reached.
    pub binding: Binding,
    /// Whether the position is captured.
    pub capable: bool,
}

impl ParamPosition<'_> {
    /// Expression naming the parameter inside the body.
    #[must_use]
    pub fn access(&self) -> String {
        match &self.binding {
            Binding::Ident { name, .. } => name.clone(),
            Binding::Pattern => format!("__weft_arg{}", self.index),
        }
    }
}

/// One return position.
#[derive(Debug, Clone)]
pub struct ReturnPosition<'a> {
    /// Position in the return tuple, or 0.
    pub index: usize,
    /// Declared type.
    pub ty: &'a Type,
    /// Whether the position is captured.
    pub capable: bool,
    /// Whether the function returns a tuple.
    pub in_tuple: bool,
}

impl ReturnPosition<'_> {
    /// Expression naming the position in a variable holding the whole return.
    #[must_use]
    pub fn access(&self, var: &str) -> String {
        if self.in_tuple {
            format!("{var}.{}", self.index)
        } else {
            var.to_string()
        }
    }
}

/// Returns `true` if values of `ty` can be captured.
///
/// `generics` lists the generic parameters in scope of the function.
#[must_use]
pub fn is_capable(ty: &Type, generics: &[String]) -> bool {
    let mut check = CapabilityCheck {
        generics,
        capable: true,
    };
    check.visit_type(ty);
    check.capable
}

struct CapabilityCheck<'g> {
    generics: &'g [String],
    capable: bool,
}

impl<'ast> Visit<'ast> for CapabilityCheck<'_> {
    fn visit_type(&mut self, node: &'ast Type) {
        match node {
            Type::Reference(_)
            | Type::ImplTrait(_)
            | Type::Never(_)
            | Type::Macro(_)
            | Type::Infer(_)
            | Type::Verbatim(_) => self.capable = false,
            Type::Path(tp) if tp.qself.is_some() => self.capable = false,
            _ => visit::visit_type(self, node),
        }
    }

    fn visit_path(&mut self, node: &'ast syn::Path) {
        if let Some(first) = node.segments.first() {
            let name = first.ident.to_string();
            if name == "Self" || self.generics.contains(&name) {
                self.capable = false;
                return;
            }
        }
        visit::visit_path(self, node);
    }

    fn visit_lifetime(&mut self, node: &'ast syn::Lifetime) {
        if node.ident != "static" {
            self.capable = false;
        }
    }
}

/// Returns `true` for `Box<dyn Any>`, which accessors pass through unchanged.
#[must_use]
pub fn is_boxed_any(ty: &Type) -> bool {
    let Type::Path(tp) = ty else { return false };
    let Some(last) = tp.path.segments.last() else {
        return false;
    };
    if last.ident != "Box" {
        return false;
    }
    let syn::PathArguments::AngleBracketed(args) = &last.arguments else {
        return false;
    };
    let mut args = args.args.iter();
    let (Some(syn::GenericArgument::Type(Type::TraitObject(obj))), None) = (args.next(), args.next())
    else {
        return false;
    };
    obj.bounds.len() == 1
        && obj.bounds.iter().all(|b| match b {
            syn::TypeParamBound::Trait(t) => t.path.segments.last().is_some_and(|s| s.ident == "Any"),
            _ => false,
        })
}

/// Parameter positions of a signature.
#[must_use]
pub fn param_positions<'a>(sig: &'a Signature, generics: &[String]) -> Vec<ParamPosition<'a>> {
    sig.inputs
        .iter()
        .enumerate()
        .map(|(index, arg)| match arg {
            FnArg::Receiver(_) => ParamPosition {
                index,
                ty: None,
                pat: None,
                binding: Binding::Ident {
                    name: "self".to_string(),
                    mutable: false,
                },
                capable: false,
            },
            FnArg::Typed(pt) => {
                let binding = match &*pt.pat {
                    Pat::Ident(pi) if pi.by_ref.is_none() && pi.subpat.is_none() => {
                        Binding::Ident {
                            name: pi.ident.to_string(),
                            mutable: pi.mutability.is_some(),
                        }
                    }
                    _ => Binding::Pattern,
                };
                let by_ref = matches!(&*pt.pat, Pat::Ident(pi) if pi.by_ref.is_some());
                ParamPosition {
                    index,
                    ty: Some(&*pt.ty),
                    pat: Some(&*pt.pat),
                    binding,
                    capable: !by_ref && is_capable(&pt.ty, generics),
                }
            }
        })
        .collect()
}

/// Return positions of a signature: one per tuple element, none for `()`.
#[must_use]
pub fn return_positions<'a>(sig: &'a Signature, generics: &[String]) -> Vec<ReturnPosition<'a>> {
    let ReturnType::Type(_, ty) = &sig.output else {
        return Vec::new();
    };
    match &**ty {
        Type::Tuple(tuple) => tuple
            .elems
            .iter()
            .enumerate()
            .map(|(index, ty)| ReturnPosition {
                index,
                ty,
                capable: is_capable(ty, generics),
                in_tuple: true,
            })
            .collect(),
        ty => vec![ReturnPosition {
            index: 0,
            ty,
            capable: is_capable(ty, generics),
            in_tuple: false,
        }],
    }
}

/// Declared return type as text; `()` when omitted.
#[must_use]
pub fn return_type_text(sig: &Signature) -> String {
    match &sig.output {
        ReturnType::Default => "()".to_string(),
        ReturnType::Type(_, ty) => ty.to_token_stream().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(src: &str) -> Type {
        syn::parse_str(src).unwrap()
    }

    #[test]
    fn test_capable_types() {
        let generics = vec!["T".to_string()];
        for src in ["i32", "String", "Vec<u8>", "Option<Box<dyn Fn()>>", "(u8, String)", "&'static str"] {
            let expected = src != "&'static str";
            assert_eq!(is_capable(&ty(src), &generics), expected, "{src}");
        }
        for src in ["&str", "Vec<T>", "Self", "impl Fn()", "<T as Iterator>::Item", "Cow<'a, str>", "T::Output"] {
            assert!(!is_capable(&ty(src), &generics), "{src}");
        }
    }

    #[test]
    fn test_boxed_any() {
        assert!(is_boxed_any(&ty("Box<dyn Any>")));
        assert!(is_boxed_any(&ty("::std::boxed::Box<dyn ::core::any::Any>")));
        assert!(!is_boxed_any(&ty("Box<dyn Any + Send>")));
        assert!(!is_boxed_any(&ty("Box<u8>")));
    }

    #[test]
    fn test_positions() {
        let sig: Signature =
            syn::parse_str("fn f(&self, a: u32, (x, y): (u8, u8), b: &str, ref c: u8) -> (u8, &str)").unwrap();
        let params = param_positions(&sig, &[]);
        let capable: Vec<usize> = params.iter().filter(|p| p.capable).map(|p| p.index).collect();
        assert_eq!(capable, [1, 2]);
        assert_eq!(params[1].access(), "a");
        assert_eq!(params[2].access(), "__weft_arg2");

        let returns = return_positions(&sig, &[]);
        assert_eq!(returns.len(), 2);
        assert!(returns[0].capable);
        assert!(!returns[1].capable);
        assert_eq!(returns[1].access("r"), "r.1");
    }

    #[test]
    fn test_unit_returns_have_no_positions() {
        let sig: Signature = syn::parse_str("fn f()").unwrap();
        assert!(return_positions(&sig, &[]).is_empty());
        assert_eq!(return_type_text(&sig), "()");
        let sig: Signature = syn::parse_str("fn f() -> ()").unwrap();
        assert!(return_positions(&sig, &[]).is_empty());
    }
}
