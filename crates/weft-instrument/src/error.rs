//! Weaving errors.

use miette::Diagnostic;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use weft_core::modules::ModuleError;

use crate::source::EditConflict;

/// Errors that fail the weaving of one package.
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum WeaveError {
    /// The source does not have the shape a rule needs.
    #[error("{file}: {message}")]
    #[diagnostic(
        code(weft::weave::structural_mismatch),
        help("the rule and the source of this crate version disagree; check the rule's version range")
    )]
    StructuralMismatch {
        /// File being woven.
        file: PathBuf,
        /// What did not fit.
        message: String,
    },

    /// A matched target is no longer in the file.
    #[error("rule {rule} no longer finds its target in {file}")]
    #[diagnostic(
        code(weft::weave::target_vanished),
        help("the sources changed after matching; run the build again")
    )]
    TargetVanished {
        /// Rule that matched during the probe build.
        rule: String,
        /// File it matched in.
        file: PathBuf,
    },

    /// A source file does not parse.
    #[error("failed to parse {file}: {message}")]
    #[diagnostic(code(weft::weave::parse))]
    Parse {
        /// File that failed to parse.
        file: PathBuf,
        /// Parser message.
        message: String,
    },

    /// The crate root is not among the compiler arguments.
    #[error("{path} is not among the rustc arguments")]
    #[diagnostic(code(weft::weave::relocation))]
    Relocation {
        /// Path that was expected.
        path: PathBuf,
    },

    /// The module tree cannot be read.
    #[error(transparent)]
    #[diagnostic(code(weft::weave::modules))]
    Modules(#[from] ModuleError),

    /// IO error.
    #[error("failed to access {path}: {source}")]
    #[diagnostic(code(weft::weave::io))]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// rustc rejected the woven sources.
    #[error("rustc exited with {status}; woven sources are kept in {debug_dir}")]
    #[diagnostic(code(weft::weave::compile))]
    Compile {
        /// Exit status of rustc.
        status: ExitStatus,
        /// Where the woven sources can be inspected.
        debug_dir: PathBuf,
    },
}

impl WeaveError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn mismatch(file: &Path, message: impl Into<String>) -> Self {
        Self::StructuralMismatch {
            file: file.to_path_buf(),
            message: message.into(),
        }
    }

    pub(crate) fn conflict(file: &Path, conflict: &EditConflict) -> Self {
        Self::mismatch(file, format!("rules produced conflicting edits: {conflict}"))
    }

    pub(crate) fn parse(file: &Path, error: &syn::Error) -> Self {
        let start = error.span().start();
        Self::Parse {
            file: file.to_path_buf(),
            message: format!("{}:{}: {error}", start.line, start.column + 1),
        }
    }
}
