//! # weft-instrument
//!
//! The weaver: applies a matched [`weft_core::RuleSet`] to one crate and
//! rewrites its rustc invocation to compile the woven copy.
//!
//! ## What gets woven
//!
//! | Rule | Effect |
//! |------|--------|
//! | function | enter/exit trampolines around the body, or raw statements |
//! | struct | a new field, plus `Default::default()` in every literal |
//! | file | a new module at the crate root |
//!
//! Every change is spliced into existing lines, so the woven crate reports
//! the same line numbers as the original.
//!
//! ## Usage
//!
//! ```ignore
//! use weft_instrument::{CompileCommand, RuleProcessor, WeaveSession};
//!
//! let session = WeaveSession::new(&work_dir, &invocation, "demo");
//! let mut command = CompileCommand::new("rustc", args, cwd);
//! command.strip_deny_warnings();
//! RuleProcessor::new(&rule_set, session).run(&mut command)?;
//! command.run(&debug_dir)?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod capability;
mod compile;
mod error;
mod file_rule;
mod func;
mod hook;
mod jump;
mod link;
mod processor;
mod runtime;
mod session;
mod source;
mod structs;
mod trampoline;

pub use capability::{is_capable, param_positions, return_positions, ParamPosition, ReturnPosition};
pub use compile::CompileCommand;
pub use error::WeaveError;
pub use file_rule::file_rule_source;
pub use func::FuncWeaver;
pub use hook::{check_hooks, DeclaredPositions, HookSources};
pub use jump::{raw_layer, HookLayer, InjectionChain, InsertionCursor, Layer};
pub use link::{link, relocation_closure, GeneratedModule};
pub use processor::{RuleProcessor, WeaveReport};
pub use runtime::{render_runtime, RUNTIME_MODULE};
pub use session::WeaveSession;
pub use source::{single_line, strip_bom, EditBuffer, EditConflict, SourceMap};
pub use structs::{extend_struct, fix_literals, FieldFixup};
pub use trampoline::{TrampolineBuilder, TrampolineNames};
