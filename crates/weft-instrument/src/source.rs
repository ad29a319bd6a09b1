//! Text splicing by span position.
//!
//! The weaver never re-prints a syntax tree. Every change is an insertion or
//! replacement at a byte offset derived from a `syn` span, so untouched code
//! keeps its formatting, comments and line numbers.

use proc_macro2::LineColumn;

/// Maps span positions of one source text to byte offsets.
#[derive(Debug)]
pub struct SourceMap<'s> {
    text: &'s str,
    line_starts: Vec<usize>,
}

impl<'s> SourceMap<'s> {
    /// Indexes `text`.
    #[must_use]
    pub fn new(text: &'s str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { text, line_starts }
    }

    /// Byte offset of a position. Lines are 1-based, columns count chars.
    ///
    /// Positions past the end of a line clamp to the line end.
    #[must_use]
    pub fn offset(&self, pos: LineColumn) -> usize {
        let Some(&start) = self.line_starts.get(pos.line.saturating_sub(1)) else {
            return self.text.len();
        };
        let line = &self.text[start..];
        let line = line.split('\n').next().unwrap_or_default();
        let within = line
            .char_indices()
            .nth(pos.column)
            .map_or(line.len(), |(i, _)| i);
        start + within
    }

    /// The text.
    #[must_use]
    pub fn text(&self) -> &'s str {
        self.text
    }
}

/// Strips a leading byte order mark, which `syn` does not accept.
#[must_use]
pub fn strip_bom(text: &str) -> &str {
    text.strip_prefix('\u{feff}').unwrap_or(text)
}

/// Two queued edits touch the same bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("edit at byte {start} overlaps an earlier edit ending at byte {end}")]
pub struct EditConflict {
    /// Start of the rejected edit.
    pub start: usize,
    /// End of the edit it collides with.
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Edit {
    start: usize,
    end: usize,
    text: String,
}

/// Pending edits against one source text.
///
/// Edits at the same offset apply in the order they were added.
#[derive(Debug, Default)]
pub struct EditBuffer {
    edits: Vec<Edit>,
}

impl EditBuffer {
    /// An empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `text` at `offset`.
    pub fn insert(&mut self, offset: usize, text: impl Into<String>) {
        self.replace(offset, offset, text);
    }

    /// Replaces `start..end` with `text`.
    pub fn replace(&mut self, start: usize, end: usize, text: impl Into<String>) {
        self.edits.push(Edit {
            start,
            end: end.max(start),
            text: text.into(),
        });
    }

    /// Moves the edits of `other` into this buffer.
    pub fn extend(&mut self, other: EditBuffer) {
        self.edits.extend(other.edits);
    }

    /// Returns `true` if nothing was queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Applies the edits to `source`.
    ///
    /// # Errors
    ///
    /// Returns [`EditConflict`] if an edit starts inside the range replaced
    /// by an earlier one, or reaches past the end of `source`.
    pub fn apply(mut self, source: &str) -> Result<String, EditConflict> {
        self.edits.sort_by_key(|e| e.start);
        let mut out = String::with_capacity(source.len() + 256);
        let mut cursor = 0;
        for edit in self.edits {
            if edit.start < cursor || edit.end > source.len() {
                return Err(EditConflict {
                    start: edit.start,
                    end: cursor.max(source.len().min(edit.end)),
                });
            }
            out.push_str(&source[cursor..edit.start]);
            out.push_str(&edit.text);
            cursor = edit.end;
        }
        out.push_str(&source[cursor..]);
        Ok(out)
    }
}

/// Joins generated code onto a single line so it can be spliced into the
/// middle of a file without moving the lines after it.
#[must_use]
pub fn single_line(code: &str) -> String {
    code.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(line: usize, column: usize) -> LineColumn {
        LineColumn { line, column }
    }

    #[test]
    fn test_offsets_count_chars() {
        let text = "fn a() {}\nlet é = 1;\n";
        let map = SourceMap::new(text);
        assert_eq!(map.offset(pos(1, 0)), 0);
        assert_eq!(map.offset(pos(2, 0)), 10);
        // `é` is two bytes.
        assert_eq!(&text[map.offset(pos(2, 6))..], "= 1;\n");
        assert_eq!(map.offset(pos(9, 0)), text.len());
    }

    #[test]
    fn test_edits_keep_insertion_order() {
        let mut edits = EditBuffer::new();
        edits.insert(3, "b");
        edits.insert(3, "c");
        edits.insert(0, "a");
        edits.replace(4, 6, "XY");
        assert_eq!(edits.apply("012345").unwrap(), "a012bc3XY");
    }

    #[test]
    fn test_overlapping_edit_is_rejected() {
        let mut edits = EditBuffer::new();
        edits.replace(0, 4, "x");
        edits.replace(2, 3, "y");
        assert_eq!(
            edits.apply("abcdef"),
            Err(EditConflict { start: 2, end: 4 })
        );
    }

    #[test]
    fn test_insert_at_end_of_replacement_is_kept() {
        let mut edits = EditBuffer::new();
        edits.replace(0, 2, "x");
        edits.insert(2, "y");
        assert_eq!(edits.apply("abc").unwrap(), "xyc");
    }

    #[test]
    fn test_edit_past_end_is_rejected() {
        let mut edits = EditBuffer::new();
        edits.insert(9, "x");
        assert!(edits.apply("abc").is_err());
    }

    #[test]
    fn test_single_line() {
        assert_eq!(single_line("struct A {\n    x: u8,\n}\n"), "struct A { x: u8, }");
    }

    #[test]
    fn test_strip_bom() {
        assert_eq!(strip_bom("\u{feff}fn a() {}"), "fn a() {}");
        assert_eq!(strip_bom("fn a() {}"), "fn a() {}");
    }
}
