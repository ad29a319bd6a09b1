//! Compiler invocations and their persisted records.
//!
//! Cargo runs `rustc` once per crate. The probe build records every such
//! invocation so the matcher can see the whole dependency graph before the
//! instrumented build starts.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::rule::content_digest;

/// rustc options that take their value as the next argument.
const VALUE_FLAGS: &[&str] = &[
    "--cap-lints",
    "--cfg",
    "--check-cfg",
    "--codegen",
    "--color",
    "--crate-name",
    "--crate-type",
    "--diagnostic-width",
    "--edition",
    "--emit",
    "--error-format",
    "--explain",
    "--extern",
    "--json",
    "--out-dir",
    "--print",
    "--remap-path-prefix",
    "--sysroot",
    "--target",
    "-A",
    "-C",
    "-D",
    "-F",
    "-L",
    "-W",
    "-Z",
    "-l",
    "-o",
];

/// The parts of a rustc command line the weaver cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileInvocation {
    /// `--crate-name`.
    pub crate_name: String,
    /// Crate root source file, absolute.
    pub root_source: PathBuf,
    /// `--edition`, if given.
    pub edition: Option<String>,
    /// `--crate-type` values.
    pub crate_types: Vec<String>,
    /// `-C metadata=..`, unique per crate instance in a cargo build.
    pub metadata: Option<String>,
}

impl CompileInvocation {
    /// Parses rustc arguments (without the program name).
    ///
    /// Returns `None` for invocations that do not compile a crate from a
    /// source file: version queries, `--print` probes, stdin input.
    #[must_use]
    pub fn parse(args: &[String], cwd: &Path) -> Option<Self> {
        let mut crate_name = None;
        let mut root_source = None;
        let mut edition = None;
        let mut crate_types = Vec::new();
        let mut metadata = None;

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
                _ => (arg.as_str(), None),
            };
            if flag == "--print" {
                return None;
            }
            if let Some(value) = short_flag_value(flag, "-C") {
                if let Some(m) = value.strip_prefix("metadata=") {
                    metadata = Some(m.to_string());
                }
                continue;
            }
            if VALUE_FLAGS.contains(&flag) {
                let value = match inline {
                    Some(v) => v,
                    None => iter.next()?.clone(),
                };
                match flag {
                    "--crate-name" => crate_name = Some(value),
                    "--edition" => edition = Some(value),
                    "--crate-type" => crate_types.extend(value.split(',').map(String::from)),
                    "-C" | "--codegen" => {
                        if let Some(m) = value.strip_prefix("metadata=") {
                            metadata = Some(m.to_string());
                        }
                    }
                    _ => {}
                }
                continue;
            }
            if !arg.starts_with('-')
                && root_source.is_none()
                && Path::new(arg).extension().is_some_and(|e| e == "rs")
            {
                root_source = Some(absolutize(Path::new(arg), cwd));
            }
        }

        Some(Self {
            crate_name: crate_name?,
            root_source: root_source?,
            edition,
            crate_types,
            metadata,
        })
    }

    /// Returns `true` for cargo build scripts, which are never instrumented.
    #[must_use]
    pub fn is_build_script(&self) -> bool {
        self.crate_name.starts_with("build_script_")
    }
}

/// `-Cfoo=bar` spelled without a space.
fn short_flag_value<'a>(arg: &'a str, flag: &str) -> Option<&'a str> {
    arg.strip_prefix(flag).filter(|rest| !rest.is_empty())
}

/// Joins a relative path onto `cwd`.
#[must_use]
pub fn absolutize(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

/// One recorded rustc invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileRecord {
    /// `--crate-name`.
    pub crate_name: String,
    /// Cargo package name (`CARGO_PKG_NAME`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    /// Cargo package version (`CARGO_PKG_VERSION`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_version: Option<String>,
    /// Package manifest directory (`CARGO_MANIFEST_DIR`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_dir: Option<PathBuf>,
    /// Crate root source file, absolute.
    pub root_source: PathBuf,
    /// rustc arguments without the program name.
    pub args: Vec<String>,
    /// Working directory of the invocation.
    pub cwd: PathBuf,
}

impl CompileRecord {
    /// Builds a record from rustc arguments and the cargo environment.
    ///
    /// Returns `None` if the arguments do not compile a crate.
    #[must_use]
    pub fn capture(args: &[String], cwd: &Path) -> Option<Self> {
        let invocation = CompileInvocation::parse(args, cwd)?;
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        Some(Self {
            crate_name: invocation.crate_name,
            package_name: env("CARGO_PKG_NAME"),
            package_version: env("CARGO_PKG_VERSION"),
            manifest_dir: env("CARGO_MANIFEST_DIR").map(PathBuf::from),
            root_source: invocation.root_source,
            args: args.to_vec(),
            cwd: cwd.to_path_buf(),
        })
    }

    /// Re-parses the recorded arguments.
    #[must_use]
    pub fn invocation(&self) -> Option<CompileInvocation> {
        CompileInvocation::parse(&self.args, &self.cwd)
    }

    /// File name under the records directory, unique per crate instance.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}-{}.json", self.crate_name, content_digest(&self.args))
    }

    /// Writes the record into `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn store(&self, dir: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    /// Loads every record in `dir`, sorted by file name.
    ///
    /// Unreadable entries are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if `dir` cannot be listed.
    pub fn load_all(dir: &Path) -> std::io::Result<Vec<Self>> {
        if !dir.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no compile records in {}", dir.display()),
            ));
        }
        let mut records = Vec::new();
        for entry in WalkDir::new(dir)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().is_some_and(|x| x == "json"))
        {
            let parsed = std::fs::read_to_string(entry.path())
                .ok()
                .and_then(|s| serde_json::from_str::<Self>(&s).ok());
            match parsed {
                Some(record) => records.push(record),
                None => debug!("Skipping unreadable record {}", entry.path().display()),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_parse_cargo_invocation() {
        let argv = args(
            "--crate-name demo --edition=2021 src/lib.rs --error-format=json \
             --crate-type lib --emit=dep-info,metadata,link -C embed-bitcode=no \
             -C metadata=0f3c2a --out-dir /t/debug/deps -L dependency=/t/debug/deps",
        );
        let inv = CompileInvocation::parse(&argv, Path::new("/work/demo")).unwrap();
        assert_eq!(inv.crate_name, "demo");
        assert_eq!(inv.root_source, PathBuf::from("/work/demo/src/lib.rs"));
        assert_eq!(inv.edition.as_deref(), Some("2021"));
        assert_eq!(inv.crate_types, ["lib"]);
        assert_eq!(inv.metadata.as_deref(), Some("0f3c2a"));
    }

    #[test]
    fn test_compact_codegen_flag() {
        let argv = args("--crate-name demo /abs/src/main.rs -Cmetadata=abc");
        let inv = CompileInvocation::parse(&argv, Path::new("/cwd")).unwrap();
        assert_eq!(inv.metadata.as_deref(), Some("abc"));
        assert_eq!(inv.root_source, PathBuf::from("/abs/src/main.rs"));
    }

    #[test]
    fn test_non_compile_invocations() {
        let cwd = Path::new("/cwd");
        assert!(CompileInvocation::parse(&args("-vV"), cwd).is_none());
        assert!(CompileInvocation::parse(
            &args("- --crate-name ___ --print=file-names --crate-type bin"),
            cwd
        )
        .is_none());
    }

    #[test]
    fn test_build_script_detection() {
        let argv = args("--crate-name build_script_build build.rs");
        let inv = CompileInvocation::parse(&argv, Path::new("/cwd")).unwrap();
        assert!(inv.is_build_script());
    }

    #[test]
    fn test_record_store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let record = CompileRecord {
            crate_name: "demo".to_string(),
            package_name: Some("demo".to_string()),
            package_version: Some("0.1.0".to_string()),
            manifest_dir: None,
            root_source: PathBuf::from("/work/demo/src/lib.rs"),
            args: args("--crate-name demo src/lib.rs"),
            cwd: PathBuf::from("/work/demo"),
        };
        record.store(dir.path()).unwrap();
        let loaded = CompileRecord::load_all(dir.path()).unwrap();
        assert_eq!(loaded, vec![record]);
    }
}
