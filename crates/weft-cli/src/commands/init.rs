//! Init command implementation.

use anyhow::{bail, Result};
use std::path::Path;

const DEFAULT_CONFIG: &str = r#"# weft configuration

[weave]
# Records, matched rules, woven sources and logs
work_dir = "target/weft"

# Keep copies of woven sources under <work_dir>/debug
keep_debug = true

# vendor_dir = "vendor"
# vendor_manifest = "vendor/modules.txt"

[catalog]
# Rule files or directories of rule files
files = []

# Bundled rule files to drop, or ["all"]
disable = []

# Rule files can also be toggled by name
# [rules."base.json"]
# enabled = true
"#;

/// Runs the init command.
pub fn run(force: bool) -> Result<()> {
    let config_path = Path::new("weft.toml");

    if config_path.exists() && !force {
        bail!(
            "Configuration file already exists at {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::write(config_path, DEFAULT_CONFIG)?;

    println!("Created weft.toml");
    println!("\nNext steps:");
    println!("  1. Add rule files under [catalog] files");
    println!("  2. Run: weft build");

    Ok(())
}
