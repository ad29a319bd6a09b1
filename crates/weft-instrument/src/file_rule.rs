//! File rules: whole modules added to the target crate.

use weft_core::FileRule;

use crate::error::WeaveError;

/// Source text of the module a file rule adds.
///
/// Inline `content` wins; otherwise the file is read from `path/fileName`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not parse.
pub fn file_rule_source(rule: &FileRule) -> Result<String, WeaveError> {
    let (text, origin) = if rule.content.is_empty() {
        let path = rule.source_path();
        let text = std::fs::read_to_string(&path).map_err(|e| WeaveError::io(&path, e))?;
        (text, path)
    } else {
        (rule.content.clone(), rule.file_name.clone().into())
    };
    syn::parse_file(&text).map_err(|e| WeaveError::parse(&origin, &e))?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_content() {
        let rule = FileRule::new("demo", "weft_hooks.rs", "pub fn ready() -> bool { true }\n");
        assert_eq!(
            file_rule_source(&rule).unwrap(),
            "pub fn ready() -> bool { true }\n"
        );
    }

    #[test]
    fn test_content_from_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("weft_hooks.rs"), "pub const N: u8 = 1;\n").unwrap();
        let mut rule = FileRule::new("demo", "weft_hooks.rs", "");
        rule.base.path = dir.path().display().to_string();

        assert_eq!(file_rule_source(&rule).unwrap(), "pub const N: u8 = 1;\n");
    }

    #[test]
    fn test_missing_or_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut rule = FileRule::new("demo", "weft_hooks.rs", "");
        rule.base.path = dir.path().display().to_string();
        assert!(matches!(file_rule_source(&rule), Err(WeaveError::Io { .. })));

        let broken = FileRule::new("demo", "weft_hooks.rs", "pub fn (");
        assert!(matches!(file_rule_source(&broken), Err(WeaveError::Parse { .. })));
    }
}
