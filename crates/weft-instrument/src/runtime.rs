//! The `__weft_rt` module emitted into every crate with woven functions.

use std::collections::BTreeSet;

const TEMPLATE: &str = include_str!("../templates/runtime.rs.tmpl");
const HOOK_STATICS: &str = "__WEFT_HOOK_STATICS__";

/// Name of the runtime module at the crate root.
pub const RUNTIME_MODULE: &str = "__weft_rt";

/// Renders the runtime module with one hook slot per name in `hooks`.
#[must_use]
pub fn render_runtime(hooks: &BTreeSet<String>) -> String {
    let statics: String = hooks
        .iter()
        .map(|name| format!("    pub static {name}: super::HookSlot = super::HookSlot::new();\n"))
        .collect();
    TEMPLATE.replace(HOOK_STATICS, &statics)
}
