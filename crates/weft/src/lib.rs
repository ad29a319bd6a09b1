//! # weft
//!
//! Compile-time instrumentation weaver for Rust crates.
//!
//! This is the main facade crate that re-exports the rule model, the matcher
//! and the weaver.
//!
//! ## Quick Start
//!
//! ```bash
//! cargo install weft-cli
//! weft init
//! weft build -- --release
//! ```
//!
//! `weft build` records every crate of the build, matches the rule catalog
//! against them and rebuilds with `weft` as the `RUSTC_WRAPPER`, which weaves
//! the matched rules into copies of the sources on the way to rustc.
//!
//! ## Rules
//!
//! ```json
//! [
//!   { "importPath": "demo", "function": "add", "onEnter": "before_add" }
//! ]
//! ```
//!
//! Hooks are registered from code compiled with `--cfg weft_instrumented`.
//! An enter hook takes the call context and then the captured parameters:
//!
//! ```rust,ignore
//! use demo::__weft_rt::{hooks, CallContext};
//!
//! fn before_add(call: &mut dyn CallContext, a: &mut i32, b: &mut i32) {
//!     tracing::info!(a, b, func = call.func_name(), "add");
//! }
//!
//! #[cfg(weft_instrumented)]
//! hooks::before_add.register(before_add);
//! ```
//!
//! ## Programmatic Usage
//!
//! ```rust,ignore
//! use weft::{prepare_compile, RuleSet};
//!
//! let prepared = prepare_compile(&rule_set, &work_dir, "rustc", args, &cwd)?;
//! prepared.command.run(&prepared.debug_dir)?;
//! ```

#![forbid(unsafe_code)]

// Re-export the rule model, catalog and matcher
pub use weft_core::*;

/// The weaver.
pub mod instrument {
    pub use weft_instrument::*;
}

mod runner;

pub use runner::{prepare_compile, PreparedCompile};
