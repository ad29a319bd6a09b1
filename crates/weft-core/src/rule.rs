//! Instrumentation rule definitions.
//!
//! A rule names a target inside one crate (a function, a struct or a whole
//! file) plus the hook code that should be woven into it. Rules are written as
//! JSON objects; the concrete kind is recovered from the field that only that
//! kind carries (`function`, `structType` or `fileName`).

use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

/// Number of hex characters kept from a rule's content hash.
const DIGEST_LEN: usize = 8;

/// Fields shared by every rule kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleBase {
    /// Location of the hook sources (directory or file).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    /// Crate version range, e.g. `[1.2.0,2.0.0)`. Empty means any version.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// rustc version range, e.g. `[1.75.0,)`. Empty means any toolchain.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub toolchain_version: String,
    /// Name of the crate the rule targets, e.g. `reqwest`.
    #[serde(default)]
    pub import_path: String,
}

impl RuleBase {
    /// Creates a base targeting the given crate.
    #[must_use]
    pub fn new(import_path: impl Into<String>) -> Self {
        Self {
            import_path: import_path.into(),
            ..Self::default()
        }
    }

    /// Returns the hook source location, if one was given.
    #[must_use]
    pub fn hook_path(&self) -> Option<&Path> {
        if self.path.is_empty() {
            None
        } else {
            Some(Path::new(&self.path))
        }
    }
}

/// Rule that wraps matching functions with entry/exit hooks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuncRule {
    /// Shared rule fields.
    #[serde(flatten)]
    pub base: RuleBase,
    /// Function name pattern, matched against the whole name.
    pub function: String,
    /// Receiver type pattern. Empty selects free functions only.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub receiver_type: String,
    /// Hook called before the body (or raw statements when `use_raw` is set).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub on_enter: String,
    /// Hook called after the body (or raw statements when `use_raw` is set).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub on_exit: String,
    /// Inject `on_enter`/`on_exit` as raw statements instead of hook calls.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub use_raw: bool,
    /// Crates that must also be part of the build for this rule to apply.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl FuncRule {
    /// Creates a rule targeting free functions named `function` in `import_path`.
    #[must_use]
    pub fn new(import_path: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            base: RuleBase::new(import_path),
            function: function.into(),
            ..Self::default()
        }
    }

    /// Sets the receiver type pattern.
    #[must_use]
    pub fn with_receiver(mut self, receiver_type: impl Into<String>) -> Self {
        self.receiver_type = receiver_type.into();
        self
    }

    /// Sets the entry hook.
    #[must_use]
    pub fn with_on_enter(mut self, on_enter: impl Into<String>) -> Self {
        self.on_enter = on_enter.into();
        self
    }

    /// Sets the exit hook.
    #[must_use]
    pub fn with_on_exit(mut self, on_exit: impl Into<String>) -> Self {
        self.on_exit = on_exit.into();
        self
    }

    /// Switches the rule to raw statement injection.
    #[must_use]
    pub fn raw(mut self) -> Self {
        self.use_raw = true;
        self
    }

    /// Adds a prerequisite crate.
    #[must_use]
    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    /// Returns `true` if an entry hook (or entry snippet) is set.
    #[must_use]
    pub fn has_on_enter(&self) -> bool {
        !self.on_enter.trim().is_empty()
    }

    /// Returns `true` if an exit hook (or exit snippet) is set.
    #[must_use]
    pub fn has_on_exit(&self) -> bool {
        !self.on_exit.trim().is_empty()
    }

    /// Returns `true` when the function pattern names exactly one function.
    ///
    /// Exact rules get their hook argument types checked against the
    /// target's declared types; pattern rules only get the argument count
    /// checked.
    #[must_use]
    pub fn is_exact(&self) -> bool {
        is_ident(&self.function)
    }

    /// Compiles the name and receiver patterns.
    ///
    /// # Errors
    ///
    /// Returns an error if either pattern is not a valid regular expression.
    pub fn pattern(&self) -> Result<FuncPattern, regex::Error> {
        let function = anchored(&self.function)?;
        let receiver = if self.receiver_type.is_empty() {
            None
        } else {
            Some(anchored(&self.receiver_type)?)
        };
        Ok(FuncPattern { function, receiver })
    }
}

/// Compiled form of a [`FuncRule`]'s name and receiver patterns.
#[derive(Debug, Clone)]
pub struct FuncPattern {
    function: Regex,
    receiver: Option<Regex>,
}

impl FuncPattern {
    /// Returns `true` if a function called `name` on `receiver` is selected.
    ///
    /// Free functions have the receiver `""`.
    #[must_use]
    pub fn matches(&self, name: &str, receiver: &str) -> bool {
        if !self.function.is_match(name) {
            return false;
        }
        match &self.receiver {
            None => receiver.is_empty(),
            Some(re) => re.is_match(receiver),
        }
    }
}

fn anchored(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

/// Rule that appends a field to a struct declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructRule {
    /// Shared rule fields.
    #[serde(flatten)]
    pub base: RuleBase,
    /// Name of the struct to extend.
    pub struct_type: String,
    /// Name of the new field.
    pub field_name: String,
    /// Type of the new field. It must implement `Default`.
    pub field_type: String,
}

impl StructRule {
    /// Creates a struct rule.
    #[must_use]
    pub fn new(
        import_path: impl Into<String>,
        struct_type: impl Into<String>,
        field_name: impl Into<String>,
        field_type: impl Into<String>,
    ) -> Self {
        Self {
            base: RuleBase::new(import_path),
            struct_type: struct_type.into(),
            field_name: field_name.into(),
            field_type: field_type.into(),
        }
    }
}

/// Rule that adds a whole source file to the target crate as a module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRule {
    /// Shared rule fields.
    #[serde(flatten)]
    pub base: RuleBase,
    /// File name of the module, e.g. `weft_hooks.rs`.
    pub file_name: String,
    /// Inline module source. When empty the file is read from `path`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
}

impl FileRule {
    /// Creates a file rule with inline content.
    #[must_use]
    pub fn new(
        import_path: impl Into<String>,
        file_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            base: RuleBase::new(import_path),
            file_name: file_name.into(),
            content: content.into(),
        }
    }

    /// Module name the file is declared under.
    #[must_use]
    pub fn module_name(&self) -> &str {
        Path::new(&self.file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
    }

    /// Where the module source comes from when `content` is empty.
    #[must_use]
    pub fn source_path(&self) -> PathBuf {
        Path::new(&self.base.path).join(&self.file_name)
    }
}

/// Any instrumentation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Rule {
    /// Function rule.
    Func(FuncRule),
    /// Struct rule.
    Struct(StructRule),
    /// File rule.
    File(FileRule),
}

impl<'de> Deserialize<'de> for Rule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(D::Error::custom)
    }
}

impl Rule {
    /// Recovers the concrete rule kind from a JSON object.
    ///
    /// # Errors
    ///
    /// Returns an error if the object carries none of the discriminating
    /// fields or does not fit the selected kind.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let Some(object) = value.as_object() else {
            return Err(serde_json::Error::custom("rule must be a JSON object"));
        };
        if object.contains_key("function") {
            serde_json::from_value(value).map(Self::Func)
        } else if object.contains_key("structType") {
            serde_json::from_value(value).map(Self::Struct)
        } else if object.contains_key("fileName") {
            serde_json::from_value(value).map(Self::File)
        } else {
            Err(serde_json::Error::custom(
                "rule has none of `function`, `structType` or `fileName`",
            ))
        }
    }

    /// Returns the shared fields.
    #[must_use]
    pub fn base(&self) -> &RuleBase {
        match self {
            Self::Func(r) => &r.base,
            Self::Struct(r) => &r.base,
            Self::File(r) => &r.base,
        }
    }

    /// Returns the shared fields mutably.
    pub fn base_mut(&mut self) -> &mut RuleBase {
        match self {
            Self::Func(r) => &mut r.base,
            Self::Struct(r) => &mut r.base,
            Self::File(r) => &mut r.base,
        }
    }

    /// Name of the targeted crate.
    #[must_use]
    pub fn import_path(&self) -> &str {
        &self.base().import_path
    }

    /// Short kind label used in listings and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Func(_) => "func",
            Self::Struct(_) => "struct",
            Self::File(_) => "file",
        }
    }

    /// Content hash of the rule.
    #[must_use]
    pub fn digest(&self) -> String {
        content_digest(self)
    }

    /// Checks the rule's invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.import_path().trim().is_empty() {
            return Err(RuleError::MissingImportPath);
        }
        match self {
            Self::Func(rule) => validate_func(rule),
            Self::Struct(rule) => validate_struct(rule),
            Self::File(rule) => validate_file(rule),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Func(r) if r.receiver_type.is_empty() => {
                write!(f, "{}::{}", r.base.import_path, r.function)
            }
            Self::Func(r) => write!(
                f,
                "{}::<{}>::{}",
                r.base.import_path, r.receiver_type, r.function
            ),
            Self::Struct(r) => write!(
                f,
                "{}::{} + {}: {}",
                r.base.import_path, r.struct_type, r.field_name, r.field_type
            ),
            Self::File(r) => write!(f, "{} + {}", r.base.import_path, r.file_name),
        }
    }
}

impl From<FuncRule> for Rule {
    fn from(rule: FuncRule) -> Self {
        Self::Func(rule)
    }
}

impl From<StructRule> for Rule {
    fn from(rule: StructRule) -> Self {
        Self::Struct(rule)
    }
}

impl From<FileRule> for Rule {
    fn from(rule: FileRule) -> Self {
        Self::File(rule)
    }
}

/// Computes the truncated SHA-256 of a value's JSON form.
///
/// Struct fields serialize in declaration order, so equal rules always hash
/// to the same digest.
#[must_use]
pub fn content_digest<T: Serialize + ?Sized>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(DIGEST_LEN);
    digest
}

/// Invariant violations in a single rule.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RuleError {
    /// `importPath` is empty.
    #[error("`importPath` must name the target crate")]
    MissingImportPath,

    /// A function rule has neither hook.
    #[error("function rule `{function}` sets neither `onEnter` nor `onExit`")]
    MissingHook {
        /// The rule's function pattern.
        function: String,
    },

    /// A hook name is not a Rust identifier.
    #[error("hook name `{name}` is not a valid identifier")]
    InvalidHookName {
        /// The offending name.
        name: String,
    },

    /// A raw snippet does not parse as statements.
    #[error("raw snippet does not parse as Rust statements: {message}")]
    InvalidRawSnippet {
        /// Parser message.
        message: String,
    },

    /// A name pattern is not a valid regular expression.
    #[error("invalid pattern `{pattern}`: {message}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Regex compiler message.
        message: String,
    },

    /// A struct or field name is not a Rust identifier.
    #[error("`{name}` is not a valid identifier")]
    InvalidIdent {
        /// The offending name.
        name: String,
    },

    /// The field type does not parse as a Rust type.
    #[error("field type `{ty}` does not parse as a Rust type")]
    InvalidFieldType {
        /// The offending type.
        ty: String,
    },

    /// A file rule's file name cannot be a module file.
    #[error("file name `{file_name}` must be `<identifier>.rs`")]
    InvalidFileName {
        /// The offending file name.
        file_name: String,
    },
}

fn validate_func(rule: &FuncRule) -> Result<(), RuleError> {
    if !rule.has_on_enter() && !rule.has_on_exit() {
        return Err(RuleError::MissingHook {
            function: rule.function.clone(),
        });
    }
    for pattern in [&rule.function, &rule.receiver_type] {
        anchored(pattern).map_err(|e| RuleError::InvalidPattern {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
    }
    for hook in [&rule.on_enter, &rule.on_exit] {
        if hook.trim().is_empty() {
            continue;
        }
        if rule.use_raw {
            parse_raw_snippet(hook).map_err(|e| RuleError::InvalidRawSnippet {
                message: e.to_string(),
            })?;
        } else if !is_ident(hook) {
            return Err(RuleError::InvalidHookName { name: hook.clone() });
        }
    }
    Ok(())
}

fn validate_struct(rule: &StructRule) -> Result<(), RuleError> {
    for name in [&rule.struct_type, &rule.field_name] {
        if !is_ident(name) {
            return Err(RuleError::InvalidIdent { name: name.clone() });
        }
    }
    if syn::parse_str::<syn::Type>(&rule.field_type).is_err() {
        return Err(RuleError::InvalidFieldType {
            ty: rule.field_type.clone(),
        });
    }
    Ok(())
}

fn validate_file(rule: &FileRule) -> Result<(), RuleError> {
    let is_rs = Path::new(&rule.file_name)
        .extension()
        .is_some_and(|ext| ext == "rs");
    if !is_rs || !is_ident(rule.module_name()) {
        return Err(RuleError::InvalidFileName {
            file_name: rule.file_name.clone(),
        });
    }
    Ok(())
}

/// Parses a raw snippet as the statements of a block.
///
/// # Errors
///
/// Returns the parser error if the snippet is not a statement list.
pub fn parse_raw_snippet(snippet: &str) -> syn::Result<Vec<syn::Stmt>> {
    let block: syn::Block = syn::parse_str(&format!("{{\n{snippet}\n}}"))?;
    Ok(block.stmts)
}

/// Returns `true` if `name` is a non-keyword Rust identifier.
#[must_use]
pub fn is_ident(name: &str) -> bool {
    syn::parse_str::<syn::Ident>(name).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminates_by_field() {
        let func: Rule =
            serde_json::from_str(r#"{"importPath":"demo","function":"add","onEnter":"before"}"#)
                .unwrap();
        assert!(matches!(func, Rule::Func(_)));

        let st: Rule = serde_json::from_str(
            r#"{"importPath":"demo","structType":"Conn","fieldName":"trace","fieldType":"u64"}"#,
        )
        .unwrap();
        assert!(matches!(st, Rule::Struct(_)));

        let file: Rule =
            serde_json::from_str(r#"{"importPath":"demo","fileName":"hooks.rs","content":""}"#)
                .unwrap();
        assert!(matches!(file, Rule::File(_)));
    }

    #[test]
    fn test_rejects_undiscriminated_object() {
        let err = serde_json::from_str::<Rule>(r#"{"importPath":"demo"}"#).unwrap_err();
        assert!(err.to_string().contains("structType"));
    }

    #[test]
    fn test_digest_is_stable_and_content_sensitive() {
        let a = Rule::from(FuncRule::new("demo", "add").with_on_enter("before"));
        let b = Rule::from(FuncRule::new("demo", "add").with_on_enter("before"));
        let c = Rule::from(FuncRule::new("demo", "add").with_on_enter("after"));
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_eq!(a.digest().len(), DIGEST_LEN);
    }

    #[test]
    fn test_func_rule_requires_a_hook() {
        let rule = Rule::from(FuncRule::new("demo", "add"));
        assert_eq!(
            rule.validate(),
            Err(RuleError::MissingHook {
                function: "add".to_string()
            })
        );
    }

    #[test]
    fn test_hook_names_must_be_identifiers() {
        let rule = Rule::from(FuncRule::new("demo", "add").with_on_enter("not an ident"));
        assert!(matches!(
            rule.validate(),
            Err(RuleError::InvalidHookName { .. })
        ));
    }

    #[test]
    fn test_raw_snippet_is_parsed() {
        let ok = Rule::from(
            FuncRule::new("demo", "add")
                .with_on_enter(r#"println!("enter");"#)
                .raw(),
        );
        assert!(ok.validate().is_ok());

        let bad = Rule::from(FuncRule::new("demo", "add").with_on_enter("let = ;").raw());
        assert!(matches!(
            bad.validate(),
            Err(RuleError::InvalidRawSnippet { .. })
        ));
    }

    #[test]
    fn test_pattern_is_anchored() {
        let pattern = FuncRule::new("demo", "get").pattern().unwrap();
        assert!(pattern.matches("get", ""));
        assert!(!pattern.matches("get_all", ""));
        assert!(!pattern.matches("get", "Client"));
    }

    #[test]
    fn test_receiver_pattern() {
        let pattern = FuncRule::new("demo", "send|execute")
            .with_receiver("Client")
            .pattern()
            .unwrap();
        assert!(pattern.matches("send", "Client"));
        assert!(pattern.matches("execute", "Client"));
        assert!(!pattern.matches("send", ""));

        let any_or_none = FuncRule::new("demo", "run")
            .with_receiver("(Runner)?")
            .pattern()
            .unwrap();
        assert!(any_or_none.matches("run", ""));
        assert!(any_or_none.matches("run", "Runner"));
    }

    #[test]
    fn test_exact_rule_detection() {
        assert!(FuncRule::new("demo", "add").is_exact());
        assert!(!FuncRule::new("demo", "add|sub").is_exact());
        assert!(!FuncRule::new("demo", "get_.*").is_exact());
    }

    #[test]
    fn test_struct_rule_validation() {
        let ok = Rule::from(StructRule::new("demo", "Conn", "trace", "Option<u64>"));
        assert!(ok.validate().is_ok());

        let bad = Rule::from(StructRule::new("demo", "Conn", "trace", "Option<"));
        assert!(matches!(
            bad.validate(),
            Err(RuleError::InvalidFieldType { .. })
        ));
    }

    #[test]
    fn test_file_rule_module_name() {
        let rule = FileRule::new("demo", "weft_hooks.rs", "pub fn f() {}");
        assert_eq!(rule.module_name(), "weft_hooks");
        assert!(Rule::from(rule).validate().is_ok());

        let bad = Rule::from(FileRule::new("demo", "hooks.txt", ""));
        assert!(matches!(
            bad.validate(),
            Err(RuleError::InvalidFileName { .. })
        ));
    }
}
