//! The rustc command line of one package, rewritten to use woven sources.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};
use weft_core::absolutize;

use crate::error::WeaveError;

/// A rustc invocation owned by the weaver.
#[derive(Debug, Clone)]
pub struct CompileCommand {
    program: String,
    args: Vec<String>,
    cwd: PathBuf,
    substituted: BTreeMap<PathBuf, PathBuf>,
}

impl CompileCommand {
    /// Wraps `program args..` run from `cwd`.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: cwd.into(),
            substituted: BTreeMap::new(),
        }
    }

    /// Replaces the source argument `original` with `replacement`.
    ///
    /// Substituting the same original again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`WeaveError::Relocation`] if `original` is not an argument.
    pub fn substitute(&mut self, original: &Path, replacement: &Path) -> Result<(), WeaveError> {
        let wanted = crate::session::canonical(original);
        if self.substituted.contains_key(&wanted) {
            return Ok(());
        }
        let position = self.args.iter().position(|arg| {
            Path::new(arg).extension().is_some_and(|e| e == "rs")
                && crate::session::canonical(&absolutize(Path::new(arg), &self.cwd)) == wanted
        });
        let Some(index) = position else {
            return Err(WeaveError::Relocation { path: wanted });
        };
        debug!("Substituting {} with {}", self.args[index], replacement.display());
        self.args[index] = replacement.display().to_string();
        self.substituted.insert(wanted, replacement.to_path_buf());
        Ok(())
    }

    /// Removes every argument that turns warnings into errors.
    ///
    /// Returns the number of assertions removed.
    pub fn strip_deny_warnings(&mut self) -> usize {
        let mut kept = Vec::with_capacity(self.args.len());
        let mut removed = 0;
        let mut iter = std::mem::take(&mut self.args).into_iter().peekable();
        while let Some(arg) = iter.next() {
            let joined = matches!(
                arg.as_str(),
                "-Dwarnings" | "-Fwarnings" | "--deny=warnings" | "--forbid=warnings"
            );
            let split = matches!(arg.as_str(), "-D" | "-F" | "--deny" | "--forbid")
                && iter.peek().is_some_and(|next| next == "warnings");
            if joined {
                removed += 1;
            } else if split {
                iter.next();
                removed += 1;
            } else {
                kept.push(arg);
            }
        }
        self.args = kept;
        removed
    }

    /// Maps diagnostics and debug info under `from` back to `to`.
    pub fn remap_path_prefix(&mut self, from: &Path, to: &Path) {
        self.args
            .push(format!("--remap-path-prefix={}={}", from.display(), to.display()));
    }

    /// Arguments, without the program.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Original paths and the files replacing them.
    #[must_use]
    pub fn substitutions(&self) -> &BTreeMap<PathBuf, PathBuf> {
        &self.substituted
    }

    /// Runs the compiler with inherited stdio.
    ///
    /// # Errors
    ///
    /// Returns [`WeaveError::Compile`] naming `debug_dir` if the compiler
    /// fails, or an IO error if it cannot be started.
    pub fn run(&self, debug_dir: &Path) -> Result<(), WeaveError> {
        if !self.substituted.is_empty() {
            info!(
                "Compiling with {} woven file(s): {} {}",
                self.substituted.len(),
                self.program,
                self.args.join(" ")
            );
        }
        let status = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.cwd)
            .status()
            .map_err(|e| WeaveError::io(Path::new(&self.program), e))?;
        if status.success() {
            Ok(())
        } else {
            Err(WeaveError::Compile {
                status,
                debug_dir: debug_dir.to_path_buf(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_substitute_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "").unwrap();
        let mut command = CompileCommand::new(
            "rustc",
            args(&["--crate-name", "demo", "src/lib.rs", "--edition=2021"]),
            dir.path(),
        );

        let woven = dir.path().join("woven/lib.rs");
        command
            .substitute(&dir.path().join("src/lib.rs"), &woven)
            .unwrap();
        command
            .substitute(&dir.path().join("src/lib.rs"), &woven)
            .unwrap();

        assert_eq!(command.args()[2], woven.display().to_string());
        assert_eq!(command.substitutions().len(), 1);
    }

    #[test]
    fn test_substitute_missing_source() {
        let mut command = CompileCommand::new("rustc", args(&["src/lib.rs"]), "/work");
        assert!(matches!(
            command.substitute(Path::new("/elsewhere/main.rs"), Path::new("/woven/main.rs")),
            Err(WeaveError::Relocation { .. })
        ));
    }

    #[test]
    fn test_strip_deny_warnings() {
        let mut command = CompileCommand::new(
            "rustc",
            args(&[
                "-D",
                "warnings",
                "-Dwarnings",
                "--deny=warnings",
                "-D",
                "unused",
                "--forbid",
                "warnings",
                "-W",
                "warnings",
                "src/lib.rs",
            ]),
            "/work",
        );
        assert_eq!(command.strip_deny_warnings(), 4);
        assert_eq!(command.args(), ["-D", "unused", "-W", "warnings", "src/lib.rs"]);
    }

    #[test]
    fn test_remap_path_prefix() {
        let mut command = CompileCommand::new("rustc", Vec::new(), "/work");
        command.remap_path_prefix(Path::new("/out/src"), Path::new("/crate/src"));
        assert_eq!(command.args(), ["--remap-path-prefix=/out/src=/crate/src"]);
    }
}
