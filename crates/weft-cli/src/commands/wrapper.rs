//! `RUSTC_WRAPPER` entry point.
//!
//! Cargo runs `weft <rustc> <args..>` for every crate it compiles. The phase
//! chosen by `weft build` decides what happens before the real compiler runs:
//! the probe build records the invocation, the instrumented build weaves the
//! crate's matched rules into a copy of its sources.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use weft_core::{absolutize, load_rule_sets, CompileInvocation, CompileRecord};
use weft_instrument::{CompileCommand, RuleProcessor, WeaveError, WeaveSession};

/// Selects the wrapper phase.
pub const PHASE_ENV: &str = "WEFT_PHASE";
/// Absolute work directory.
pub const WORK_DIR_ENV: &str = "WEFT_WORK_DIR";
/// `0` disables the debug copies of woven sources.
pub const KEEP_DEBUG_ENV: &str = "WEFT_KEEP_DEBUG";
/// Log filter override.
pub const LOG_ENV: &str = "WEFT_LOG";
/// Log file inside the work directory.
pub const LOG_FILE: &str = "weft.log";
/// Compile records inside the work directory.
pub const RECORDS_DIR: &str = "records";

const SUBCOMMANDS: &[&str] = &["build", "match", "list-rules", "init", "help"];
const COMPILER_STEMS: &[&str] = &["rustc", "clippy-driver"];

/// What the wrapper does before running the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Record the invocation.
    Record,
    /// Weave matched rules.
    Instrument,
    /// Run the compiler unchanged.
    Passthrough,
}

impl Phase {
    /// Parses the value of [`PHASE_ENV`].
    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("record") => Self::Record,
            Some("instrument") => Self::Instrument,
            _ => Self::Passthrough,
        }
    }

    /// Value of [`PHASE_ENV`] selecting this phase.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::Instrument => "instrument",
            Self::Passthrough => "passthrough",
        }
    }
}

/// Returns `true` if cargo started this process as its rustc wrapper.
#[must_use]
pub fn is_wrapper_invocation(args: &[String]) -> bool {
    let Some(first) = args.get(1) else {
        return false;
    };
    if first.starts_with('-') || SUBCOMMANDS.contains(&first.as_str()) {
        return false;
    }
    let is_compiler = Path::new(first)
        .file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|stem| COMPILER_STEMS.contains(&stem));
    is_compiler || std::env::var_os(PHASE_ENV).is_some()
}

/// Why a crate is compiled without weaving, if it is.
#[must_use]
pub fn skip_reason(invocation: &CompileInvocation) -> Option<&'static str> {
    if invocation.is_build_script() {
        return Some("build script");
    }
    if invocation.crate_types.iter().any(|t| t == "proc-macro") {
        return Some("proc-macro crate");
    }
    match invocation.edition.as_deref() {
        None | Some("2015") => Some("edition 2015"),
        Some(_) => None,
    }
}

/// Runs the wrapper and returns the process exit code.
pub fn main(args: &[String]) -> i32 {
    let cwd = std::env::current_dir().unwrap_or_default();
    let work_dir = std::env::var_os(WORK_DIR_ENV).map_or_else(
        || cwd.join("target/weft"),
        |dir| absolutize(Path::new(&dir), &cwd),
    );
    init_file_logging(&work_dir);

    let rustc = args[1].clone();
    let rustc_args = args[2..].to_vec();
    let phase = Phase::parse(std::env::var(PHASE_ENV).ok().as_deref());

    let result = match phase {
        Phase::Record => record(&rustc, &rustc_args, &cwd, &work_dir),
        Phase::Instrument => instrument(&rustc, rustc_args, &cwd, &work_dir),
        Phase::Passthrough => passthrough(&rustc, &rustc_args, &cwd),
    };
    match result {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            eprintln!("weft: {err:#}");
            1
        }
    }
}

fn init_file_logging(work_dir: &Path) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    if std::fs::create_dir_all(work_dir).is_err() {
        return;
    }
    let Ok(file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(work_dir.join(LOG_FILE))
    else {
        return;
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init();
}

fn passthrough(rustc: &str, args: &[String], cwd: &Path) -> Result<i32> {
    let status = Command::new(rustc)
        .args(args)
        .current_dir(cwd)
        .status()
        .with_context(|| format!("Failed to run {rustc}"))?;
    Ok(status.code().unwrap_or(1))
}

fn record(rustc: &str, args: &[String], cwd: &Path, work_dir: &Path) -> Result<i32> {
    if let Some(record) = CompileRecord::capture(args, cwd) {
        let path = record
            .store(&work_dir.join(RECORDS_DIR))
            .context("Failed to store compile record")?;
        debug!("Recorded {} in {}", record.crate_name, path.display());
    }
    passthrough(rustc, args, cwd)
}

fn instrument(rustc: &str, args: Vec<String>, cwd: &Path, work_dir: &Path) -> Result<i32> {
    let Some(invocation) = CompileInvocation::parse(&args, cwd) else {
        return passthrough(rustc, &args, cwd);
    };
    if let Some(reason) = skip_reason(&invocation) {
        debug!("Not weaving {} ({reason})", invocation.crate_name);
        return passthrough(rustc, &args, cwd);
    }

    let sets = load_rule_sets(work_dir).context("Failed to load matched rules")?;
    let Some(set) = sets
        .iter()
        .find(|s| s.targets(&invocation.crate_name, &invocation.root_source))
    else {
        return passthrough(rustc, &args, cwd);
    };

    let keep_debug = std::env::var(KEEP_DEBUG_ENV).map_or(true, |v| v != "0");
    let session = WeaveSession::new(work_dir, &invocation, &set.package_name).keep_debug(keep_debug);
    let debug_dir: PathBuf = session.debug_dir().to_path_buf();
    let mut command = CompileCommand::new(rustc, args, cwd);
    let stripped = command.strip_deny_warnings();
    if stripped > 0 {
        debug!("Dropped {stripped} deny-warnings flag(s) for {}", invocation.crate_name);
    }

    match RuleProcessor::new(set, session).run(&mut command) {
        Ok(report) => info!(
            "Weaving {}: {} function(s), {} field(s), {} file(s)",
            invocation.crate_name, report.functions, report.fields, report.files
        ),
        Err(err) => return Ok(report_failure(err)),
    }

    match command.run(&debug_dir) {
        Ok(()) => Ok(0),
        Err(err @ WeaveError::Compile { status, .. }) => {
            let code = status.code().unwrap_or(1);
            warn!("{err}");
            eprintln!("weft: {err}");
            Ok(code)
        }
        Err(err) => Ok(report_failure(err)),
    }
}

fn report_failure(err: WeaveError) -> i32 {
    error!("{err}");
    eprintln!("{:?}", miette::Report::new(err));
    1
}
