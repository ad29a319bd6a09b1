//! Locating rule targets inside a parsed source file.

use proc_macro2::LineColumn;
use quote::ToTokens;
use syn::{Attribute, Block, GenericParam, Generics, ImplItem, Item, ItemStruct, Signature, TraitItem, Type};

use crate::rule::FuncPattern;
use crate::utils::paths::last_segment_ident;

/// Where generated items for a target are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// Module level of the file; items go at the end of the file.
    File,
    /// Inside an inline `mod x { .. }`; items go before its closing brace.
    InlineMod {
        /// Position of the closing brace.
        close: LineColumn,
    },
}

/// A function body a rule can be woven into.
#[derive(Debug, Clone)]
pub struct FnTarget<'a> {
    /// Function name.
    pub name: String,
    /// Receiver type name; empty for free functions.
    pub receiver: String,
    /// Signature.
    pub sig: &'a Signature,
    /// Body.
    pub block: &'a Block,
    /// Attributes, including inner attributes of the body.
    pub attrs: &'a [Attribute],
    /// Generic parameter names visible in the signature.
    pub generics: Vec<String>,
    /// Where generated items go.
    pub container: Container,
}

/// Finds every function selected by `pattern`.
///
/// Candidates are functions with bodies at module level, in impl blocks, as
/// trait default methods, and the same inside inline modules. `const fn`s are
/// skipped.
#[must_use]
pub fn find_functions<'a>(file: &'a syn::File, pattern: &FuncPattern) -> Vec<FnTarget<'a>> {
    let mut out = Vec::new();
    walk_items(&file.items, Container::File, &mut |candidate| {
        if pattern.matches(&candidate.name, &candidate.receiver) {
            out.push(candidate);
        }
    });
    out
}

/// Returns `true` if any function in the file is selected by `pattern`.
#[must_use]
pub fn has_function(file: &syn::File, pattern: &FuncPattern) -> bool {
    !find_functions(file, pattern).is_empty()
}

fn walk_items<'a>(items: &'a [Item], container: Container, visit: &mut dyn FnMut(FnTarget<'a>)) {
    for item in items {
        match item {
            Item::Fn(f) => {
                if f.sig.constness.is_none() {
                    visit(FnTarget {
                        name: f.sig.ident.to_string(),
                        receiver: String::new(),
                        sig: &f.sig,
                        block: &f.block,
                        attrs: &f.attrs,
                        generics: generic_names([&f.sig.generics]),
                        container,
                    });
                }
            }
            Item::Impl(imp) => {
                let receiver = receiver_name(&imp.self_ty);
                for impl_item in &imp.items {
                    let ImplItem::Fn(f) = impl_item else { continue };
                    if f.sig.constness.is_some() {
                        continue;
                    }
                    visit(FnTarget {
                        name: f.sig.ident.to_string(),
                        receiver: receiver.clone(),
                        sig: &f.sig,
                        block: &f.block,
                        attrs: &f.attrs,
                        generics: generic_names([&imp.generics, &f.sig.generics]),
                        container,
                    });
                }
            }
            Item::Trait(tr) => {
                for trait_item in &tr.items {
                    let TraitItem::Fn(f) = trait_item else { continue };
                    let Some(block) = &f.default else { continue };
                    if f.sig.constness.is_some() {
                        continue;
                    }
                    visit(FnTarget {
                        name: f.sig.ident.to_string(),
                        receiver: tr.ident.to_string(),
                        sig: &f.sig,
                        block,
                        attrs: &f.attrs,
                        generics: generic_names([&tr.generics, &f.sig.generics]),
                        container,
                    });
                }
            }
            Item::Mod(m) => {
                if let Some((brace, nested)) = &m.content {
                    let inner = Container::InlineMod {
                        close: brace.span.close().start(),
                    };
                    walk_items(nested, inner, visit);
                }
            }
            _ => {}
        }
    }
}

fn generic_names<'g>(scopes: impl IntoIterator<Item = &'g Generics>) -> Vec<String> {
    scopes
        .into_iter()
        .flat_map(|g| g.params.iter())
        .filter_map(|param| match param {
            GenericParam::Type(t) => Some(t.ident.to_string()),
            GenericParam::Const(c) => Some(c.ident.to_string()),
            GenericParam::Lifetime(_) => None,
        })
        .collect()
}

/// Name used to match an impl's self type against a receiver pattern.
///
/// Path types use their last segment without generics (`Client` for
/// `http::Client<T>`); references use their referent; anything else uses its
/// tokens with spaces removed.
#[must_use]
pub fn receiver_name(ty: &Type) -> String {
    match ty {
        Type::Path(tp) if tp.qself.is_none() => {
            last_segment_ident(&tp.path).unwrap_or_default()
        }
        Type::Reference(r) => receiver_name(&r.elem),
        Type::Paren(p) => receiver_name(&p.elem),
        Type::Group(g) => receiver_name(&g.elem),
        other => other.to_token_stream().to_string().replace(' ', ""),
    }
}

/// A struct declaration a rule can extend.
#[derive(Debug, Clone, Copy)]
pub struct StructTarget<'a> {
    /// The declaration.
    pub item: &'a ItemStruct,
    /// Where the declaration lives.
    pub container: Container,
}

/// Finds the struct named `name`, searching inline modules too.
#[must_use]
pub fn find_struct<'a>(file: &'a syn::File, name: &str) -> Option<StructTarget<'a>> {
    find_struct_in(&file.items, name, Container::File)
}

fn find_struct_in<'a>(items: &'a [Item], name: &str, container: Container) -> Option<StructTarget<'a>> {
    items.iter().find_map(|item| match item {
        Item::Struct(s) if s.ident == name => Some(StructTarget { item: s, container }),
        Item::Mod(m) => m.content.as_ref().and_then(|(brace, nested)| {
            let inner = Container::InlineMod {
                close: brace.span.close().start(),
            };
            find_struct_in(nested, name, inner)
        }),
        _ => None,
    })
}
