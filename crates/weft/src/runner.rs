//! One-shot weaving of a single rustc invocation.

use std::path::{Path, PathBuf};
use tracing::debug;
use weft_core::{CompileInvocation, RuleSet};
use weft_instrument::{CompileCommand, RuleProcessor, WeaveError, WeaveReport, WeaveSession};

/// A rustc invocation rewritten to compile woven sources.
#[derive(Debug)]
pub struct PreparedCompile {
    /// The rewritten command.
    pub command: CompileCommand,
    /// What was woven. Empty when the invocation was left alone.
    pub report: WeaveReport,
    /// Where the woven sources are kept for inspection.
    pub debug_dir: PathBuf,
}

/// Weaves `rule_set` into the crate compiled by `args` and rewrites the
/// command to compile the woven copy.
///
/// Invocations that do not compile a crate from a source file, or that
/// compile a crate `rule_set` does not target, come back unchanged.
///
/// # Errors
///
/// Returns the [`WeaveError`] that stopped weaving.
pub fn prepare_compile(
    rule_set: &RuleSet,
    work_dir: &Path,
    rustc: &str,
    args: Vec<String>,
    cwd: &Path,
) -> Result<PreparedCompile, WeaveError> {
    let invocation = CompileInvocation::parse(&args, cwd)
        .filter(|inv| rule_set.targets(&inv.crate_name, &inv.root_source));
    let mut command = CompileCommand::new(rustc, args, cwd);
    command.strip_deny_warnings();

    let Some(invocation) = invocation else {
        debug!("Invocation is not targeted by {}", rule_set.package_name);
        return Ok(PreparedCompile {
            command,
            report: WeaveReport::default(),
            debug_dir: work_dir.join("debug"),
        });
    };

    let session = WeaveSession::new(work_dir, &invocation, &rule_set.package_name);
    let debug_dir = session.debug_dir().to_path_buf();
    let report = RuleProcessor::new(rule_set, session).run(&mut command)?;
    Ok(PreparedCompile {
        command,
        report,
        debug_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untargeted_invocation_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let set = RuleSet::new("other", "other", dir.path().join("src/lib.rs"));
        let args = vec![
            "--crate-name".to_string(),
            "demo".to_string(),
            "src/lib.rs".to_string(),
            "-Dwarnings".to_string(),
        ];

        let prepared =
            prepare_compile(&set, &dir.path().join("weft"), "rustc", args, dir.path()).unwrap();
        assert_eq!(prepared.report, WeaveReport::default());
        assert_eq!(prepared.command.args(), ["--crate-name", "demo", "src/lib.rs"]);
    }

    #[test]
    fn version_query_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let set = RuleSet::new("demo", "demo", dir.path().join("src/lib.rs"));

        let prepared = prepare_compile(
            &set,
            &dir.path().join("weft"),
            "rustc",
            vec!["-vV".to_string()],
            dir.path(),
        )
        .unwrap();
        assert!(prepared.report.root.is_none());
        assert_eq!(prepared.command.args(), ["-vV"]);
    }
}
