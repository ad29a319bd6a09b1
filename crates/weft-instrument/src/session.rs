//! Per-package weave state: output locations and the relocation map.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use weft_core::{content_digest, CompileInvocation};

use crate::error::WeaveError;
use crate::source::strip_bom;

/// Directory under the output dir that mirrors the crate's source directory.
const SOURCE_DIR: &str = "src";
/// Directory for module files living outside the crate's source directory.
const EXTERNAL_DIR: &str = "__weft_external";
/// Directory for generated modules.
const GENERATED_DIR: &str = "__weft_gen";

/// Where the woven copy of one package lives, and which files were moved.
///
/// Original sources are never written. A woven file is written to the output
/// directory and recorded in the relocation map; later reads of the original
/// path see the woven copy.
#[derive(Debug)]
pub struct WeaveSession {
    crate_name: String,
    package_name: String,
    root_source: PathBuf,
    root_dir: PathBuf,
    out_dir: PathBuf,
    debug_dir: PathBuf,
    keep_debug: bool,
    relocations: BTreeMap<PathBuf, PathBuf>,
}

impl WeaveSession {
    /// Starts a session for one compile invocation.
    ///
    /// Output goes to `<work>/woven/<crate>-<metadata>`; invocations without
    /// `-C metadata` use a digest of the root path instead.
    #[must_use]
    pub fn new(work_dir: &Path, invocation: &CompileInvocation, package_name: &str) -> Self {
        let instance = invocation
            .metadata
            .clone()
            .unwrap_or_else(|| content_digest(&invocation.root_source));
        let root_source = canonical(&invocation.root_source);
        let root_dir = root_source
            .parent()
            .map_or_else(PathBuf::new, Path::to_path_buf);
        Self {
            crate_name: invocation.crate_name.clone(),
            package_name: package_name.to_string(),
            root_source,
            root_dir,
            out_dir: work_dir
                .join("woven")
                .join(format!("{}-{instance}", invocation.crate_name)),
            debug_dir: work_dir.join("debug").join(&invocation.crate_name),
            keep_debug: true,
            relocations: BTreeMap::new(),
        }
    }

    /// Sets whether woven sources are mirrored into the debug directory.
    #[must_use]
    pub fn keep_debug(mut self, keep: bool) -> Self {
        self.keep_debug = keep;
        self
    }

    /// Removes output left by an earlier weave of the same crate instance.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing directory cannot be removed.
    pub fn prepare(&self) -> Result<(), WeaveError> {
        for dir in [&self.out_dir, &self.debug_dir] {
            if dir.exists() {
                std::fs::remove_dir_all(dir).map_err(|e| WeaveError::io(dir, e))?;
            }
        }
        Ok(())
    }

    /// Crate name.
    #[must_use]
    pub fn crate_name(&self) -> &str {
        &self.crate_name
    }

    /// Package name reported to hooks.
    #[must_use]
    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    /// Original crate root.
    #[must_use]
    pub fn root_source(&self) -> &Path {
        &self.root_source
    }

    /// Directory of the original crate root.
    #[must_use]
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Where woven sources are written.
    #[must_use]
    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Mirror of the crate's source directory inside the output directory.
    #[must_use]
    pub fn mirror_dir(&self) -> PathBuf {
        self.out_dir.join(SOURCE_DIR)
    }

    /// Where woven sources are kept for inspection.
    #[must_use]
    pub fn debug_dir(&self) -> &Path {
        &self.debug_dir
    }

    /// Original paths and the woven copies replacing them.
    #[must_use]
    pub fn relocations(&self) -> &BTreeMap<PathBuf, PathBuf> {
        &self.relocations
    }

    /// Returns `true` if `original` has a woven copy.
    #[must_use]
    pub fn is_relocated(&self, original: &Path) -> bool {
        self.relocations.contains_key(&canonical(original))
    }

    /// The file rustc should read for `original`.
    #[must_use]
    pub fn current_path(&self, original: &Path) -> PathBuf {
        let key = canonical(original);
        self.relocations.get(&key).cloned().unwrap_or(key)
    }

    /// Reads the current text of `original`, woven copy first.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn read(&self, original: &Path) -> Result<String, WeaveError> {
        let path = self.current_path(original);
        let text = std::fs::read_to_string(&path).map_err(|e| WeaveError::io(&path, e))?;
        Ok(strip_bom(&text).to_string())
    }

    /// Writes the woven text of `original` and records the relocation.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write(&mut self, original: &Path, text: &str) -> Result<PathBuf, WeaveError> {
        let key = canonical(original);
        let target = self.woven_path(&key);
        self.write_file(&target, text)?;
        if self.relocations.insert(key.clone(), target.clone()).is_none() {
            debug!("Relocated {} -> {}", key.display(), target.display());
        }
        Ok(target)
    }

    /// Writes a generated module and returns its path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_generated(&self, file_name: &str, text: &str) -> Result<PathBuf, WeaveError> {
        let target = self.out_dir.join(GENERATED_DIR).join(file_name);
        self.write_file(&target, text)?;
        Ok(target)
    }

    fn woven_path(&self, original: &Path) -> PathBuf {
        match original.strip_prefix(&self.root_dir) {
            Ok(relative) => self.mirror_dir().join(relative),
            Err(_) => {
                let name = original
                    .file_name()
                    .map_or_else(|| "module.rs".into(), |n| n.to_string_lossy().into_owned());
                self.out_dir
                    .join(EXTERNAL_DIR)
                    .join(content_digest(original))
                    .join(name)
            }
        }
    }

    fn write_file(&self, target: &Path, text: &str) -> Result<(), WeaveError> {
        write_all(target, text)?;
        if self.keep_debug {
            if let Ok(relative) = target.strip_prefix(&self.out_dir) {
                write_all(&self.debug_dir.join(relative), text)?;
            }
        }
        Ok(())
    }
}

fn write_all(path: &Path, text: &str) -> Result<(), WeaveError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| WeaveError::io(parent, e))?;
    }
    std::fs::write(path, text).map_err(|e| WeaveError::io(path, e))
}

pub(crate) fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(root: &Path, metadata: Option<&str>) -> CompileInvocation {
        CompileInvocation {
            crate_name: "demo".to_string(),
            root_source: root.to_path_buf(),
            edition: Some("2021".to_string()),
            crate_types: vec!["lib".to_string()],
            metadata: metadata.map(String::from),
        }
    }

    fn crate_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/net")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "mod net;\n").unwrap();
        std::fs::write(dir.path().join("src/net/mod.rs"), "\u{feff}pub fn f() {}\n").unwrap();
        std::fs::write(dir.path().join("shared.rs"), "pub fn g() {}\n").unwrap();
        dir
    }

    #[test]
    fn test_output_dirs() {
        let dir = crate_dir();
        let work = dir.path().join("target/weft");
        let root = dir.path().join("src/lib.rs");

        let session = WeaveSession::new(&work, &invocation(&root, Some("abc123")), "demo");
        assert_eq!(session.out_dir(), work.join("woven/demo-abc123"));
        assert_eq!(session.debug_dir(), work.join("debug/demo"));

        let anonymous = WeaveSession::new(&work, &invocation(&root, None), "demo");
        assert!(anonymous
            .out_dir()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("demo-"));
    }

    #[test]
    fn test_write_relocates_and_mirrors() {
        let dir = crate_dir();
        let work = dir.path().join("target/weft");
        let root = dir.path().join("src/lib.rs");
        let module = dir.path().join("src/net/mod.rs");
        let mut session = WeaveSession::new(&work, &invocation(&root, Some("m")), "demo");

        assert_eq!(session.read(&module).unwrap(), "pub fn f() {}\n");
        let woven = session.write(&module, "pub fn f() { woven(); }\n").unwrap();

        assert_eq!(woven, session.mirror_dir().join("net/mod.rs"));
        assert!(session.is_relocated(&module));
        assert_eq!(session.read(&module).unwrap(), "pub fn f() { woven(); }\n");
        assert!(session.debug_dir().join("src/net/mod.rs").is_file());
        assert_eq!(
            std::fs::read_to_string(&module).unwrap(),
            "\u{feff}pub fn f() {}\n"
        );
    }

    #[test]
    fn test_external_files_and_generated_modules() {
        let dir = crate_dir();
        let work = dir.path().join("target/weft");
        let root = dir.path().join("src/lib.rs");
        let mut session =
            WeaveSession::new(&work, &invocation(&root, Some("m")), "demo").keep_debug(false);

        let external = session.write(&dir.path().join("shared.rs"), "").unwrap();
        assert!(external.starts_with(session.out_dir().join(EXTERNAL_DIR)));
        assert!(external.ends_with("shared.rs"));

        let generated = session.write_generated("weft_hooks.rs", "").unwrap();
        assert_eq!(generated, session.out_dir().join("__weft_gen/weft_hooks.rs"));
        assert!(!session.debug_dir().exists());
    }

    #[test]
    fn test_prepare_clears_stale_output() {
        let dir = crate_dir();
        let work = dir.path().join("target/weft");
        let root = dir.path().join("src/lib.rs");
        let session = WeaveSession::new(&work, &invocation(&root, Some("m")), "demo");
        let stale = session.write_generated("stale.rs", "").unwrap();

        session.prepare().unwrap();
        assert!(!stale.exists());
    }
}
