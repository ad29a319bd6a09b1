//! Crate module tree discovery.
//!
//! Starting at the crate root, follows every out-of-line `mod name;`
//! declaration to the file rustc would load for it: `name.rs`,
//! `name/mod.rs`, or the target of a `#[path]` attribute.

use proc_macro2::LineColumn;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use syn::spanned::Spanned;
use syn::{Attribute, Expr, ExprLit, Item, ItemMod, Lit, Meta, Visibility};
use tracing::{debug, warn};

/// Errors discovering a crate's module tree.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// The crate root cannot be read.
    #[error("failed to read crate root {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The crate root does not parse.
    #[error("failed to parse crate root {path}: {message}")]
    Parse {
        /// Path that failed to parse.
        path: PathBuf,
        /// Parser message.
        message: String,
    },
}

/// An out-of-line `mod name;` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModDecl {
    /// Module name.
    pub name: String,
    /// Value of a `#[path = ".."]` attribute.
    pub path_attr: Option<String>,
    /// Directory components contributed by enclosing inline modules.
    pub inline_dirs: Vec<String>,
    /// Where the item starts (its visibility or `mod` keyword).
    pub item_start: LineColumn,
    /// Span of the existing `#[path]` attribute, if any.
    pub path_attr_span: Option<(LineColumn, LineColumn)>,
}

/// Collects the out-of-line module declarations of a file, inline modules
/// included.
#[must_use]
pub fn collect_mod_decls(file: &syn::File) -> Vec<ModDecl> {
    let mut out = Vec::new();
    collect(&file.items, &mut Vec::new(), &mut out);
    out
}

fn collect(items: &[Item], inline_dirs: &mut Vec<String>, out: &mut Vec<ModDecl>) {
    for item in items {
        let Item::Mod(module) = item else { continue };
        let path_attr = path_attr(&module.attrs);
        match &module.content {
            Some((_, nested)) => {
                let dir = path_attr.map_or_else(|| module.ident.to_string(), |(p, _)| p);
                inline_dirs.push(dir);
                collect(nested, inline_dirs, out);
                inline_dirs.pop();
            }
            None => out.push(ModDecl {
                name: module.ident.to_string(),
                path_attr: path_attr.as_ref().map(|(p, _)| p.clone()),
                inline_dirs: inline_dirs.clone(),
                item_start: item_start(module),
                path_attr_span: path_attr.map(|(_, span)| span),
            }),
        }
    }
}

fn path_attr(attrs: &[Attribute]) -> Option<(String, (LineColumn, LineColumn))> {
    attrs.iter().find_map(|attr| {
        let Meta::NameValue(nv) = &attr.meta else {
            return None;
        };
        if !nv.path.is_ident("path") {
            return None;
        }
        let Expr::Lit(ExprLit {
            lit: Lit::Str(s), ..
        }) = &nv.value
        else {
            return None;
        };
        let span = (
            attr.pound_token.spans[0].start(),
            attr.bracket_token.span.close().end(),
        );
        Some((s.value(), span))
    })
}

fn item_start(module: &ItemMod) -> LineColumn {
    match &module.vis {
        Visibility::Public(token) => token.span.start(),
        Visibility::Restricted(restricted) => restricted.pub_token.span.start(),
        Visibility::Inherited => module
            .unsafety
            .map_or_else(|| module.mod_token.span.start(), |u| u.span().start()),
    }
}

/// Resolves the file a declaration loads.
///
/// `is_mod_rs` is `true` for the crate root, `mod.rs` files and files
/// loaded through `#[path]`: their children live next to them rather than in
/// a directory named after them.
#[must_use]
pub fn resolve_mod_decl(file: &Path, is_mod_rs: bool, decl: &ModDecl) -> Option<PathBuf> {
    let parent = file.parent()?;
    let mut dir = if is_mod_rs {
        parent.to_path_buf()
    } else {
        parent.join(file.file_stem()?)
    };

    if let Some(path) = &decl.path_attr {
        if decl.inline_dirs.is_empty() {
            return Some(parent.join(path));
        }
        dir.extend(&decl.inline_dirs);
        return Some(dir.join(path));
    }

    dir.extend(&decl.inline_dirs);
    let flat = dir.join(format!("{}.rs", decl.name));
    if flat.is_file() {
        return Some(flat);
    }
    let nested = dir.join(&decl.name).join("mod.rs");
    nested.is_file().then_some(nested)
}

/// One source file of a crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleFile {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// Module path from the crate root, e.g. `["net", "tcp"]`.
    pub module_path: Vec<String>,
    /// Children resolve next to this file rather than below it.
    pub is_mod_rs: bool,
    /// Index of the file declaring this module.
    pub parent: Option<usize>,
}

/// Every source file of a crate reachable from its root.
#[derive(Debug)]
pub struct ModuleTree {
    files: Vec<ModuleFile>,
    asts: Vec<Option<syn::File>>,
}

impl ModuleTree {
    /// Walks the module tree starting at `root`.
    ///
    /// Declarations whose file does not exist (typically behind a disabled
    /// `cfg`) are skipped. Files other than the root that fail to parse are
    /// kept without children.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be read or parsed.
    pub fn discover(root: &Path) -> Result<Self, ModuleError> {
        let content = std::fs::read_to_string(root).map_err(|source| ModuleError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        let ast = syn::parse_file(&content).map_err(|e| ModuleError::Parse {
            path: root.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut tree = Self {
            files: vec![ModuleFile {
                path: root.to_path_buf(),
                module_path: Vec::new(),
                is_mod_rs: true,
                parent: None,
            }],
            asts: vec![Some(ast)],
        };
        let mut seen: HashSet<PathBuf> = HashSet::from([canonical(root)]);
        let mut next = 0;

        while next < tree.files.len() {
            let decls = tree.asts[next]
                .as_ref()
                .map(collect_mod_decls)
                .unwrap_or_default();
            let current = tree.files[next].clone();

            for decl in decls {
                let Some(child) = resolve_mod_decl(&current.path, current.is_mod_rs, &decl) else {
                    debug!(
                        "No file for `mod {}` in {}",
                        decl.name,
                        current.path.display()
                    );
                    continue;
                };
                if !child.is_file() || !seen.insert(canonical(&child)) {
                    continue;
                }
                let mut module_path = current.module_path.clone();
                module_path.extend(decl.inline_dirs.iter().cloned());
                module_path.push(decl.name.clone());

                let is_mod_rs =
                    decl.path_attr.is_some() || child.file_name().is_some_and(|n| n == "mod.rs");
                let ast = match std::fs::read_to_string(&child)
                    .map_err(|e| e.to_string())
                    .and_then(|s| syn::parse_file(&s).map_err(|e| e.to_string()))
                {
                    Ok(ast) => Some(ast),
                    Err(message) => {
                        warn!("Skipping module {}: {message}", child.display());
                        None
                    }
                };
                tree.files.push(ModuleFile {
                    path: child,
                    module_path,
                    is_mod_rs,
                    parent: Some(next),
                });
                tree.asts.push(ast);
            }
            next += 1;
        }

        Ok(tree)
    }

    /// The crate root.
    #[must_use]
    pub fn root(&self) -> &ModuleFile {
        &self.files[0]
    }

    /// All files, root first, parents before children.
    #[must_use]
    pub fn files(&self) -> &[ModuleFile] {
        &self.files
    }

    /// Parsed syntax tree of the file at `index`, if it parsed.
    #[must_use]
    pub fn ast(&self, index: usize) -> Option<&syn::File> {
        self.asts.get(index).and_then(Option::as_ref)
    }

    /// Index of a file by path.
    #[must_use]
    pub fn position(&self, path: &Path) -> Option<usize> {
        let wanted = canonical(path);
        self.files.iter().position(|f| canonical(&f.path) == wanted)
    }

    /// Indices of the files declaring `index`, nearest first, root last.
    #[must_use]
    pub fn ancestors(&self, index: usize) -> Vec<usize> {
        let mut chain = Vec::new();
        let mut cursor = self.files.get(index).and_then(|f| f.parent);
        while let Some(i) = cursor {
            chain.push(i);
            cursor = self.files[i].parent;
        }
        chain
    }
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
