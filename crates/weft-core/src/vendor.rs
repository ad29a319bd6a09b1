//! Vendor manifest: resolved versions of vendored crates.
//!
//! The manifest is line oriented:
//!
//! ```text
//! # serde 1.0.197
//! serde
//! # tokio-util 0.7.10 => ../forks/tokio-util 0.7.11
//! tokio_util
//! ## annotations are ignored
//! ```
//!
//! A `# <name> <version>` header opens a module scope; following lines list the
//! crates (library targets) built from it. A header with `=>` is a
//! replacement and the replacement's version wins. Everything else is ignored.
//!
//! When no manifest file exists, one is derived from `vendor/*/Cargo.toml`.

use semver::Version;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::version::parse_version;

/// Default manifest file name inside the vendor directory.
pub const MANIFEST_FILE: &str = "modules.txt";

/// One vendored module and the crates it provides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorModule {
    /// Module (package) name from the header.
    pub name: String,
    /// Resolved version.
    pub version: Version,
    /// Crate names listed under the header.
    pub packages: Vec<String>,
    /// Replacement path, when the header carried `=>`.
    pub replacement: Option<String>,
}

/// Parsed vendor manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VendorManifest {
    modules: Vec<VendorModule>,
}

impl VendorManifest {
    /// Parses manifest text.
    ///
    /// Headers whose version does not parse are dropped with their packages.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        let mut modules: Vec<VendorModule> = Vec::new();
        let mut current: Option<usize> = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("##") {
                continue;
            }
            if let Some(header) = line.strip_prefix('#') {
                current = parse_header(header).map(|module| {
                    modules.push(module);
                    modules.len() - 1
                });
                continue;
            }
            let mut fields = line.split_whitespace();
            if let (Some(package), None, Some(index)) = (fields.next(), fields.next(), current) {
                modules[index].packages.push(package.replace('-', "_"));
            }
        }

        Self { modules }
    }

    /// Reads a manifest file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        Ok(Self::parse(&std::fs::read_to_string(path)?))
    }

    /// Builds a manifest from `<vendor_dir>/*/Cargo.toml`.
    #[must_use]
    pub fn from_vendor_dir(vendor_dir: &Path) -> Self {
        let mut modules = Vec::new();
        for entry in WalkDir::new(vendor_dir)
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_name() == "Cargo.toml")
        {
            match module_from_cargo_toml(entry.path()) {
                Some(module) => modules.push(module),
                None => debug!("Skipping unreadable manifest {}", entry.path().display()),
            }
        }
        Self { modules }
    }

    /// Loads the manifest for a vendor directory: the manifest file when it
    /// exists, otherwise the crate manifests inside the directory.
    #[must_use]
    pub fn load(vendor_dir: &Path, manifest: Option<&Path>) -> Option<Self> {
        let manifest = manifest.map_or_else(|| vendor_dir.join(MANIFEST_FILE), Path::to_path_buf);
        if let Ok(parsed) = Self::from_file(&manifest) {
            debug!("Loaded vendor manifest {}", manifest.display());
            return Some(parsed);
        }
        if vendor_dir.is_dir() {
            return Some(Self::from_vendor_dir(vendor_dir));
        }
        None
    }

    /// Resolved version of a module or one of its crates.
    #[must_use]
    pub fn version_of(&self, name: &str) -> Option<&Version> {
        let normalized = name.replace('-', "_");
        self.modules
            .iter()
            .find(|m| {
                m.name.replace('-', "_") == normalized || m.packages.iter().any(|p| *p == normalized)
            })
            .map(|m| &m.version)
    }

    /// All modules in manifest order.
    #[must_use]
    pub fn modules(&self) -> &[VendorModule] {
        &self.modules
    }

    /// Renders the manifest in its line format.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for module in &self.modules {
            match &module.replacement {
                Some(to) => out.push_str(&format!(
                    "# {} => {} {}\n",
                    module.name, to, module.version
                )),
                None => out.push_str(&format!("# {} {}\n", module.name, module.version)),
            }
            for package in &module.packages {
                out.push_str(package);
                out.push('\n');
            }
        }
        out
    }
}

fn parse_header(header: &str) -> Option<VendorModule> {
    let fields: Vec<&str> = header.split_whitespace().collect();
    let (name, version, replacement) = match fields.iter().position(|f| *f == "=>") {
        // `# name [version] => path [version]`
        Some(arrow) => {
            let name = fields.first()?;
            let target = fields.get(arrow + 1)?;
            let version = fields
                .get(arrow + 2)
                .or_else(|| fields.get(1).filter(|_| arrow == 2))?;
            (*name, *version, Some((*target).to_string()))
        }
        None => match fields.as_slice() {
            [name, version] => (*name, *version, None),
            _ => return None,
        },
    };
    let version = parse_version(version).ok()?;
    Some(VendorModule {
        name: name.to_string(),
        version,
        packages: Vec::new(),
        replacement,
    })
}

fn module_from_cargo_toml(path: &Path) -> Option<VendorModule> {
    let table: toml::Table = std::fs::read_to_string(path).ok()?.parse().ok()?;
    let package = table.get("package")?.as_table()?;
    let name = package.get("name")?.as_str()?;
    let version = parse_version(package.get("version")?.as_str()?).ok()?;
    let lib_name = table
        .get("lib")
        .and_then(|lib| lib.get("name"))
        .and_then(toml::Value::as_str)
        .map_or_else(|| name.replace('-', "_"), ToString::to_string);
    Some(VendorModule {
        name: name.to_string(),
        version,
        packages: vec![lib_name],
        replacement: None,
    })
}

/// Returns `true` if `source` lies inside `vendor_dir`.
#[must_use]
pub fn is_vendored(source: &Path, vendor_dir: &Path) -> bool {
    let canonical = |p: &Path| std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
    canonical(source).starts_with(canonical(vendor_dir))
}

/// Vendor directory of a workspace: `<root>/vendor`.
#[must_use]
pub fn default_vendor_dir(workspace_root: &Path) -> PathBuf {
    workspace_root.join("vendor")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = "\
# serde 1.0.197
## explicit
serde
# tokio-util 0.7.10 => ../forks/tokio-util 0.7.11
tokio_util
# broken
orphan
# regex 1.10
regex
some stray words here
";

    #[test]
    fn test_parse_modules_and_packages() {
        let manifest = VendorManifest::parse(MANIFEST);
        let names: Vec<&str> = manifest.modules().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["serde", "tokio-util", "regex"]);
        assert_eq!(manifest.modules()[0].packages, ["serde"]);
    }

    #[test]
    fn test_lookup_by_module_and_package() {
        let manifest = VendorManifest::parse(MANIFEST);
        assert_eq!(manifest.version_of("serde"), Some(&Version::new(1, 0, 197)));
        assert_eq!(manifest.version_of("regex"), Some(&Version::new(1, 10, 0)));
        assert_eq!(manifest.version_of("orphan"), None);
    }

    #[test]
    fn test_replacement_version_wins() {
        let manifest = VendorManifest::parse(MANIFEST);
        let module = &manifest.modules()[1];
        assert_eq!(module.version, Version::new(0, 7, 11));
        assert_eq!(module.replacement.as_deref(), Some("../forks/tokio-util"));
        assert_eq!(
            manifest.version_of("tokio_util"),
            Some(&Version::new(0, 7, 11))
        );
    }

    #[test]
    fn test_from_vendor_dir() {
        let dir = tempfile::tempdir().unwrap();
        let krate = dir.path().join("serde_json");
        std::fs::create_dir_all(&krate).unwrap();
        std::fs::write(
            krate.join("Cargo.toml"),
            "[package]\nname = \"serde_json\"\nversion = \"1.0.117\"\n",
        )
        .unwrap();

        let manifest = VendorManifest::from_vendor_dir(dir.path());
        assert_eq!(
            manifest.version_of("serde_json"),
            Some(&Version::new(1, 0, 117))
        );
        assert_eq!(
            VendorManifest::parse(&manifest.render()).version_of("serde_json"),
            Some(&Version::new(1, 0, 117))
        );
    }
}
