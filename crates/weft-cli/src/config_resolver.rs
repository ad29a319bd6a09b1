//! Locating `weft.toml` and the cargo workspace it belongs to.
//!
//! `weft build` may run from any member of a workspace. The configuration is
//! looked up in this order:
//!
//! 1. `--config` flag (explicit path)
//! 2. `weft.toml` or `.weft.toml` in the current directory or any parent, up
//!    to the workspace root
//! 3. `~/.weft/config.toml` (global fallback)
//! 4. No config found → defaults

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use weft_core::Config;

/// Where the configuration was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicitly specified via `--config` flag.
    Explicit(PathBuf),
    /// Found in a package or workspace directory.
    Project(PathBuf),
    /// Loaded from the global config directory (`~/.weft/`).
    Global(PathBuf),
    /// No config found; defaults will be used.
    Default,
}

impl ConfigSource {
    /// Returns the resolved path, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Explicit(p) | Self::Project(p) | Self::Global(p) => Some(p),
            Self::Default => None,
        }
    }

    /// Loads the configuration, or the defaults when none was found.
    ///
    /// # Errors
    ///
    /// Returns an error if the resolved file cannot be read or parsed.
    pub fn load(&self) -> Result<Config> {
        match self {
            Self::Default => Ok(Config::default()),
            Self::Global(path) => {
                tracing::info!("Using global config: {}", path.display());
                read(path)
            }
            Self::Explicit(path) | Self::Project(path) => read(path),
        }
    }
}

fn read(path: &Path) -> Result<Config> {
    Config::from_file(path).with_context(|| format!("Failed to load config: {}", path.display()))
}

const CONFIG_NAMES: &[&str] = &["weft.toml", ".weft.toml"];
const GLOBAL_CONFIG_NAME: &str = "config.toml";

/// Resolves the configuration for a build started in `start`.
#[must_use]
pub fn resolve(start: &Path, explicit: Option<&Path>) -> ConfigSource {
    resolve_inner(start, explicit, global_config_dir())
}

fn resolve_inner(start: &Path, explicit: Option<&Path>, global_dir: Option<PathBuf>) -> ConfigSource {
    if let Some(p) = explicit {
        return ConfigSource::Explicit(p.to_path_buf());
    }

    for dir in start.ancestors() {
        if let Some(found) = CONFIG_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
        {
            tracing::debug!("Found project config: {}", found.display());
            return ConfigSource::Project(found);
        }
        if has_workspace_section(&dir.join("Cargo.toml")) {
            break;
        }
    }

    global_dir
        .map(|dir| dir.join(GLOBAL_CONFIG_NAME))
        .filter(|candidate| candidate.is_file())
        .map_or(ConfigSource::Default, |found| {
            tracing::debug!("Found global config: {}", found.display());
            ConfigSource::Global(found)
        })
}

/// Directory cargo places `target/` in for a build started in `start`.
///
/// This is the nearest ancestor declaring `[workspace]`, else the nearest
/// package directory, else `start` itself.
#[must_use]
pub fn workspace_root(start: &Path) -> PathBuf {
    let mut package = None;
    for dir in start.ancestors() {
        let manifest = dir.join("Cargo.toml");
        if has_workspace_section(&manifest) {
            return dir.to_path_buf();
        }
        if package.is_none() && manifest.is_file() {
            package = Some(dir.to_path_buf());
        }
    }
    package.unwrap_or_else(|| start.to_path_buf())
}

/// Parses the manifest rather than searching its text, so a `[workspace]`
/// inside a comment or string does not count.
fn has_workspace_section(cargo_toml: &Path) -> bool {
    let Ok(content) = std::fs::read_to_string(cargo_toml) else {
        return false;
    };
    content
        .parse::<toml::Table>()
        .is_ok_and(|table| table.contains_key("workspace"))
}

/// Returns the global config directory path.
///
/// Resolution: `$WEFT_CONFIG_DIR` > `~/.weft/`
#[must_use]
pub fn global_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("WEFT_CONFIG_DIR") {
        return Some(PathBuf::from(dir));
    }
    home::home_dir().map(|h| h.join(".weft"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// `ws/` declares a workspace with member `ws/app/`.
    fn workspace() -> (TempDir, PathBuf, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let ws = tmp.path().join("ws");
        let app = ws.join("app");
        fs::create_dir_all(app.join("src")).unwrap();
        fs::write(ws.join("Cargo.toml"), "[workspace]\nmembers = [\"app\"]\n").unwrap();
        fs::write(app.join("Cargo.toml"), "[package]\nname = \"app\"\n").unwrap();
        (tmp, ws, app)
    }

    #[test]
    fn explicit_is_trusted_as_is() {
        let (_tmp, ws, app) = workspace();
        fs::write(ws.join("weft.toml"), "").unwrap();

        let result = resolve_inner(&app, Some(Path::new("/nonexistent.toml")), None);
        assert_eq!(result, ConfigSource::Explicit(PathBuf::from("/nonexistent.toml")));
    }

    #[test]
    fn member_config_wins_over_workspace_config() {
        let (_tmp, ws, app) = workspace();
        fs::write(ws.join("weft.toml"), "").unwrap();
        fs::write(app.join(".weft.toml"), "").unwrap();

        let result = resolve_inner(&app.join("src"), None, None);
        assert_eq!(result, ConfigSource::Project(app.join(".weft.toml")));
    }

    #[test]
    fn workspace_config_found_from_member() {
        let (_tmp, ws, app) = workspace();
        fs::write(ws.join("weft.toml"), "").unwrap();
        fs::write(ws.join(".weft.toml"), "").unwrap();

        let result = resolve_inner(&app, None, None);
        assert_eq!(result, ConfigSource::Project(ws.join("weft.toml")));
    }

    #[test]
    fn search_stops_at_workspace_root() {
        let (tmp, _ws, app) = workspace();
        fs::write(tmp.path().join("weft.toml"), "").unwrap();

        let global = TempDir::new().unwrap();
        fs::write(global.path().join("config.toml"), "").unwrap();

        let result = resolve_inner(&app, None, Some(global.path().to_path_buf()));
        assert_eq!(result, ConfigSource::Global(global.path().join("config.toml")));
    }

    #[test]
    fn defaults_without_any_config() {
        let (_tmp, _ws, app) = workspace();
        let global = TempDir::new().unwrap();

        let result = resolve_inner(&app, None, Some(global.path().to_path_buf()));
        assert_eq!(result, ConfigSource::Default);
        assert!(result.path().is_none());
    }

    #[test]
    fn workspace_root_prefers_workspace_over_package() {
        let (tmp, ws, app) = workspace();
        assert_eq!(workspace_root(&app.join("src")), ws);

        let single = tmp.path().join("single");
        fs::create_dir_all(single.join("src")).unwrap();
        fs::write(single.join("Cargo.toml"), "[package]\nname = \"single\"\n").unwrap();
        assert_eq!(workspace_root(&single.join("src")), single);
    }

    #[test]
    fn commented_workspace_table_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let manifest = tmp.path().join("Cargo.toml");
        fs::write(&manifest, "# [workspace]\n[package]\nname = \"x\"\n").unwrap();
        assert!(!has_workspace_section(&manifest));
    }

    #[test]
    fn load_reads_resolved_file() {
        let (_tmp, ws, app) = workspace();
        fs::write(
            ws.join("weft.toml"),
            "[weave]\nwork_dir = \"out/weft\"\nkeep_debug = false\n",
        )
        .unwrap();

        let config = resolve_inner(&app, None, None).load().unwrap();
        assert_eq!(config.weave.work_dir, PathBuf::from("out/weft"));
        assert!(!config.weave.keep_debug);
    }

    #[test]
    fn load_defaults_and_reports_broken_files() {
        let config = ConfigSource::Default.load().unwrap();
        assert!(config.weave.keep_debug);

        let tmp = TempDir::new().unwrap();
        let broken = tmp.path().join("weft.toml");
        fs::write(&broken, "[weave\n").unwrap();
        assert!(ConfigSource::Explicit(broken).load().is_err());
    }
}
