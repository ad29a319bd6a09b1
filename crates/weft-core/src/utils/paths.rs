//! Path utilities for syntax-tree matching.

use syn::Path;

/// Returns the identifier of a path's last segment, generics dropped.
///
/// `http::Client<T>` yields `Client`.
#[must_use]
pub fn last_segment_ident(path: &Path) -> Option<String> {
    path.segments.last().map(|seg| seg.ident.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_segment_ident_drops_generics() {
        let path: Path = syn::parse_str("http::Client<T>").unwrap();
        assert_eq!(last_segment_ident(&path).as_deref(), Some("Client"));
    }

    #[test]
    fn test_last_segment_ident_of_single_segment() {
        let path: Path = syn::parse_str("Self").unwrap();
        assert_eq!(last_segment_ident(&path).as_deref(), Some("Self"));
    }
}
