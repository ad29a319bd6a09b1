//! List rules command implementation.

use anyhow::Result;

use crate::config_resolver::ConfigSource;
use crate::RuleArgs;

/// Runs the list-rules command.
pub fn run(source: &ConfigSource, rules: &RuleArgs) -> Result<()> {
    let config = source.load()?;
    let catalog = super::load_catalog(&config, rules)?;

    println!("Loaded rules:\n");
    println!("{:<8} {:<18} Target", "Kind", "Digest");
    println!("{}", "-".repeat(80));

    for rule in catalog.rules() {
        println!("{:<8} {:<18} {}", rule.kind(), rule.digest(), rule);
    }

    let crates: Vec<&str> = catalog.import_paths().collect();
    println!(
        "\n{} rule(s) across {} crate(s): {}",
        catalog.len(),
        crates.len(),
        crates.join(", ")
    );
    println!("\nUse --rules to add rule files, --disable to drop bundled ones, e.g.:");
    println!("  weft list-rules --rules rules/my_rules.json --disable all");
    Ok(())
}
