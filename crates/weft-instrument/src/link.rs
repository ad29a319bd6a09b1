//! Linking woven files back into the crate.
//!
//! A woven file lives in the output directory, so rustc would no longer find
//! its `mod` children or relative `include!` files. Every file on the path
//! from a woven file to the crate root is relocated as well, and every
//! relocated file points at its children and included files by absolute path.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use syn::visit::{self, Visit};
use syn::LitStr;
use tracing::{debug, warn};
use weft_core::modules::{collect_mod_decls, resolve_mod_decl, ModuleTree};

use crate::error::WeaveError;
use crate::runtime::RUNTIME_MODULE;
use crate::session::WeaveSession;
use crate::source::{EditBuffer, SourceMap};

const INCLUDE_MACROS: &[&str] = &["include", "include_str", "include_bytes"];

/// A module generated by the weaver and declared at the crate root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedModule {
    /// Module name.
    pub name: String,
    /// Generated file.
    pub path: PathBuf,
}

impl GeneratedModule {
    fn declaration(&self) -> String {
        let attrs = if self.name == RUNTIME_MODULE {
            "#[doc(hidden)]"
        } else {
            "#[allow(missing_docs)]"
        };
        format!(
            "{attrs} #[path = {}] pub mod {};",
            path_literal(&self.path),
            self.name
        )
    }
}

/// Indices of the files that must be relocated.
///
/// Starts from the files already woven (plus the root when modules are
/// generated), adds their ancestors, then adds children that rustc would
/// resolve differently once loaded through `#[path]`: a file loaded that way
/// looks for its own children next to itself, so a non-`mod.rs` file with
/// out-of-line children has to be rewritten too.
#[must_use]
pub fn relocation_closure(
    tree: &ModuleTree,
    woven: &BTreeSet<usize>,
    include_root: bool,
) -> BTreeSet<usize> {
    let mut closure = BTreeSet::new();
    if include_root || !woven.is_empty() {
        closure.insert(0);
    }
    for &index in woven {
        closure.insert(index);
        closure.extend(tree.ancestors(index));
    }

    loop {
        let added: Vec<usize> = tree
            .files()
            .iter()
            .enumerate()
            .filter(|(index, file)| {
                !closure.contains(index)
                    && !file.is_mod_rs
                    && file.parent.is_some_and(|p| closure.contains(&p))
                    && tree
                        .ast(*index)
                        .is_some_and(|ast| !collect_mod_decls(ast).is_empty())
            })
            .map(|(index, _)| index)
            .collect();
        if added.is_empty() {
            return closure;
        }
        closure.extend(added);
    }
}

/// Relocates the closure of the woven files, points every relocated file at
/// its children and includes, and declares the generated modules at the root.
///
/// Returns the path of the woven crate root.
///
/// # Errors
///
/// Returns an error if a relocated file cannot be read, parsed or written.
pub fn link(
    tree: &ModuleTree,
    session: &mut WeaveSession,
    generated: &[GeneratedModule],
) -> Result<PathBuf, WeaveError> {
    let woven: BTreeSet<usize> = tree
        .files()
        .iter()
        .enumerate()
        .filter(|(_, f)| session.is_relocated(&f.path))
        .map(|(i, _)| i)
        .collect();
    let closure = relocation_closure(tree, &woven, !generated.is_empty());

    // Children first so parents see every relocation.
    for &index in closure.iter().rev() {
        let file = &tree.files()[index];
        let text = session.read(&file.path)?;
        let ast = syn::parse_file(&text).map_err(|e| WeaveError::parse(&file.path, &e))?;
        let map = SourceMap::new(&text);
        let mut edits = EditBuffer::new();

        for decl in collect_mod_decls(&ast) {
            let Some(child) = resolve_mod_decl(&file.path, file.is_mod_rs, &decl) else {
                continue;
            };
            if !child.is_file() {
                debug!("Leaving unresolved `mod {}` in {}", decl.name, file.path.display());
                continue;
            }
            let attr = format!("#[path = {}] ", path_literal(&session.current_path(&child)));
            match decl.path_attr_span {
                Some((start, end)) => {
                    edits.replace(map.offset(start), map.offset(end), attr.trim_end());
                }
                None => edits.insert(map.offset(decl.item_start), attr),
            }
        }

        let base = file.path.parent().unwrap_or_else(|| Path::new(""));
        let mut includes = IncludeCollector::default();
        includes.visit_file(&ast);
        for lit in includes.found {
            let target = Path::new(&lit.value()).to_path_buf();
            if target.is_absolute() {
                continue;
            }
            let start = map.offset(lit.span().start());
            let end = map.offset(lit.span().end());
            edits.replace(start, end, path_literal(&base.join(target)));
        }

        let mut woven = edits
            .apply(&text)
            .map_err(|e| WeaveError::conflict(&file.path, &e))?;
        if index == 0 {
            woven.push_str(&root_declarations(session, &file.path, generated));
        }
        session.write(&file.path, &woven)?;
    }

    if closure.is_empty() {
        warn!("Nothing to link for {}", session.crate_name());
    }
    Ok(session.current_path(&tree.root().path))
}

/// Items appended to the woven crate root.
///
/// Each relocated original is pulled in with `include_bytes!` so cargo's
/// dep-info still lists it and edits to it trigger a rebuild.
fn root_declarations(
    session: &WeaveSession,
    root: &Path,
    generated: &[GeneratedModule],
) -> String {
    let mut out = String::from("\n");
    for module in generated {
        out.push_str(&module.declaration());
        out.push('\n');
    }
    let mut originals: BTreeSet<PathBuf> = session.relocations().keys().cloned().collect();
    originals.insert(crate::session::canonical(root));
    for original in &originals {
        out.push_str(&format!(
            "const _: &[u8] = include_bytes!({});\n",
            path_literal(original)
        ));
    }
    out
}

/// A string literal holding `path`.
fn path_literal(path: &Path) -> String {
    proc_macro2::Literal::string(&path.to_string_lossy()).to_string()
}

#[derive(Default)]
struct IncludeCollector {
    found: Vec<LitStr>,
}

impl<'ast> Visit<'ast> for IncludeCollector {
    fn visit_macro(&mut self, node: &'ast syn::Macro) {
        let is_include = node
            .path
            .segments
            .last()
            .is_some_and(|s| INCLUDE_MACROS.iter().any(|m| s.ident == m));
        if is_include {
            if let Ok(lit) = node.parse_body::<LitStr>() {
                self.found.push(lit);
            }
        }
        visit::visit_macro(self, node);
    }
}
