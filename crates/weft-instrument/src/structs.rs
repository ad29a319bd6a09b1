//! Struct rules: new fields and the crate-wide fixups they require.
//!
//! A new field breaks every struct literal and every exhaustive struct
//! pattern of that type. Literals without `..base` get the field set to
//! `Default::default()`; patterns without `..` get a rest pattern.

use std::path::Path;
use syn::punctuated::Punctuated;
use syn::visit::{self, Visit};
use syn::{Expr, ExprStruct, Fields, ItemImpl, Member, PatStruct, Token};
use weft_core::targets::{find_struct, receiver_name};
use weft_core::utils::last_segment_ident;
use weft_core::StructRule;

use crate::error::WeaveError;
use crate::source::{EditBuffer, SourceMap};

/// Appends the rule's field to its struct in `ast`.
///
/// # Errors
///
/// Returns [`WeaveError::TargetVanished`] if the struct is gone and
/// [`WeaveError::StructuralMismatch`] if it has no named fields or already has
/// a field of that name.
pub fn extend_struct(
    ast: &syn::File,
    map: &SourceMap<'_>,
    rule: &StructRule,
    edits: &mut EditBuffer,
    file: &Path,
) -> Result<(), WeaveError> {
    let Some(target) = find_struct(ast, &rule.struct_type) else {
        return Err(WeaveError::TargetVanished {
            rule: weft_core::Rule::from(rule.clone()).to_string(),
            file: file.to_path_buf(),
        });
    };
    let Fields::Named(named) = &target.item.fields else {
        return Err(WeaveError::mismatch(
            file,
            format!(
                "`{}` is a tuple or unit struct; only structs with named fields can be extended",
                rule.struct_type
            ),
        ));
    };
    if named
        .named
        .iter()
        .any(|f| f.ident.as_ref().is_some_and(|i| i == rule.field_name.as_str()))
    {
        return Err(WeaveError::mismatch(
            file,
            format!(
                "`{}` already has a field `{}`",
                rule.struct_type, rule.field_name
            ),
        ));
    }

    let field = format!("pub {}: {}", rule.field_name, rule.field_type);
    let text = if named.named.is_empty() || named.named.trailing_punct() {
        format!(" {field}, ")
    } else {
        format!(", {field} ")
    };
    edits.insert(map.offset(named.brace_token.span.close().start()), text);
    Ok(())
}

/// A field added to a struct type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFixup {
    /// Struct name.
    pub struct_type: String,
    /// Added field.
    pub field_name: String,
}

impl From<&StructRule> for FieldFixup {
    fn from(rule: &StructRule) -> Self {
        Self {
            struct_type: rule.struct_type.clone(),
            field_name: rule.field_name.clone(),
        }
    }
}

/// Queues fixups for every literal and pattern of the extended types in `ast`.
///
/// Types are matched by name. Returns the number of fixups queued.
pub fn fix_literals(
    ast: &syn::File,
    map: &SourceMap<'_>,
    fixups: &[FieldFixup],
    edits: &mut EditBuffer,
) -> usize {
    let mut visitor = LiteralFixer {
        map,
        fixups,
        edits,
        self_types: Vec::new(),
        count: 0,
    };
    visitor.visit_file(ast);
    visitor.count
}

struct LiteralFixer<'v, 's> {
    map: &'v SourceMap<'s>,
    fixups: &'v [FieldFixup],
    edits: &'v mut EditBuffer,
    self_types: Vec<String>,
    count: usize,
}

impl<'v> LiteralFixer<'v, '_> {
    fn type_name(&self, path: &syn::Path) -> Option<String> {
        let name = last_segment_ident(path)?;
        if name == "Self" && path.segments.len() == 1 {
            return self.self_types.last().cloned();
        }
        Some(name)
    }

    fn fields_for(&self, path: &syn::Path) -> Vec<&'v FieldFixup> {
        let Some(name) = self.type_name(path) else {
            return Vec::new();
        };
        self.fixups
            .iter()
            .filter(|f| f.struct_type == name)
            .collect()
    }
}

impl<'ast> Visit<'ast> for LiteralFixer<'_, '_> {
    fn visit_item_impl(&mut self, node: &'ast ItemImpl) {
        self.self_types.push(receiver_name(&node.self_ty));
        visit::visit_item_impl(self, node);
        self.self_types.pop();
    }

    fn visit_expr_struct(&mut self, node: &'ast ExprStruct) {
        if node.rest.is_none() && node.dot2_token.is_none() {
            let mut trailing = node.fields.is_empty() || node.fields.trailing_punct();
            let at = self.map.offset(node.brace_token.span.close().start());
            for fixup in self.fields_for(&node.path) {
                let present = node.fields.iter().any(|f| {
                    matches!(&f.member, Member::Named(i) if i == fixup.field_name.as_str())
                });
                if present {
                    continue;
                }
                let init = format!("{}: ::core::default::Default::default()", fixup.field_name);
                let text = if trailing {
                    format!(" {init}, ")
                } else {
                    format!(", {init} ")
                };
                self.edits.insert(at, text);
                self.count += 1;
                trailing = true;
            }
        }
        visit::visit_expr_struct(self, node);
    }

    fn visit_pat_struct(&mut self, node: &'ast PatStruct) {
        if node.rest.is_none() && !self.fields_for(&node.path).is_empty() {
            let at = self.map.offset(node.brace_token.span.close().start());
            let text = if node.fields.is_empty() || node.fields.trailing_punct() {
                " .. "
            } else {
                ", .. "
            };
            self.edits.insert(at, text);
            self.count += 1;
        }
        visit::visit_pat_struct(self, node);
    }

    fn visit_macro(&mut self, node: &'ast syn::Macro) {
        // Literals passed to macros such as `vec!` or `println!`.
        if let Ok(args) = node.parse_body_with(Punctuated::<Expr, Token![,]>::parse_terminated) {
            for expr in &args {
                self.visit_expr(expr);
            }
        }
        visit::visit_macro(self, node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extend(source: &str, rule: &StructRule) -> Result<String, WeaveError> {
        let ast = syn::parse_file(source).unwrap();
        let map = SourceMap::new(source);
        let mut edits = EditBuffer::new();
        extend_struct(&ast, &map, rule, &mut edits, Path::new("lib.rs"))?;
        Ok(edits.apply(source).unwrap())
    }

    fn fix(source: &str, fixups: &[FieldFixup]) -> (String, usize) {
        let ast = syn::parse_file(source).unwrap();
        let map = SourceMap::new(source);
        let mut edits = EditBuffer::new();
        let count = fix_literals(&ast, &map, fixups, &mut edits);
        (edits.apply(source).unwrap(), count)
    }

    fn span_fixup() -> FieldFixup {
        FieldFixup {
            struct_type: "Conn".to_string(),
            field_name: "span".to_string(),
        }
    }

    #[test]
    fn test_extend_named_struct() {
        let rule = StructRule::new("demo", "Conn", "span", "Option<u64>");
        assert_eq!(
            extend("pub struct Conn {\n    id: u32,\n}\n", &rule).unwrap(),
            "pub struct Conn {\n    id: u32,\n pub span: Option<u64>, }\n"
        );
        assert_eq!(
            extend("struct Conn { id: u32 }", &rule).unwrap(),
            "struct Conn { id: u32 , pub span: Option<u64> }"
        );
        assert_eq!(
            extend("struct Conn {}", &rule).unwrap(),
            "struct Conn { pub span: Option<u64>, }"
        );
    }

    #[test]
    fn test_extend_rejects_other_shapes() {
        let rule = StructRule::new("demo", "Conn", "span", "u64");
        for source in ["struct Conn(u32);", "struct Conn;", "struct Conn { span: u64 }"] {
            assert!(matches!(
                extend(source, &rule),
                Err(WeaveError::StructuralMismatch { .. })
            ));
        }
        assert!(matches!(
            extend("struct Other;", &rule),
            Err(WeaveError::TargetVanished { .. })
        ));
    }

    #[test]
    fn test_fix_literals_and_patterns() {
        let source = r#"
impl Conn {
    fn new() -> Self { Self { id: 0 } }
}
fn make(base: Conn) -> Vec<Conn> {
    let Conn { id } = base;
    let copy = Conn { id, ..base };
    vec![Conn { id: 1, }, copy]
}
fn other() -> Pool { Pool { id: 1 } }
"#;
        let (fixed, count) = fix(source, &[span_fixup()]);
        assert_eq!(count, 3);
        assert!(fixed.contains("Self { id: 0 , span: ::core::default::Default::default() }"));
        assert!(fixed.contains("let Conn { id , .. } = base;"));
        assert!(fixed.contains("Conn { id, ..base }"));
        assert!(fixed.contains("Conn { id: 1,  span: ::core::default::Default::default(), }"));
        assert!(fixed.contains("Pool { id: 1 }"));
    }

    #[test]
    fn test_fix_keeps_line_count() {
        let source = "fn f() -> Conn {\n    Conn {\n        id: 1,\n    }\n}\n";
        let (fixed, _) = fix(source, &[span_fixup()]);
        assert_eq!(fixed.lines().count(), source.lines().count());
        syn::parse_file(&fixed).unwrap();
    }
}
