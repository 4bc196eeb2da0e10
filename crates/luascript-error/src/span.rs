//! Source positions attached to AST and IR nodes.
//!
//! Spans are optional everywhere in the IR: synthetic nodes introduced by
//! desugaring usually carry the span of the construct they replace.

use serde::{Deserialize, Serialize};

/// A point in a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    /// Line (1-indexed)
    pub line: u32,
    /// Column (1-indexed)
    pub column: u32,
    /// Byte offset from the beginning of the file
    #[serde(default)]
    pub offset: usize,
}

impl Position {
    pub fn new(line: u32, column: u32, offset: usize) -> Self {
        Self { line, column, offset }
    }
}

/// A half-open region of a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub start: Position,
    pub end: Position,
    /// Index into a [`crate::SourceCache`]
    #[serde(default)]
    pub file_id: u32,
}

impl Span {
    pub fn new(start: Position, end: Position, file_id: u32) -> Self {
        Self { start, end, file_id }
    }

    pub fn point(pos: Position, file_id: u32) -> Self {
        Self {
            start: pos,
            end: pos,
            file_id,
        }
    }

    /// Smallest span covering both `self` and `other`.
    ///
    /// Spans from different files cannot be merged; `self` is returned as-is.
    pub fn merge(self, other: Span) -> Span {
        if self.file_id != other.file_id {
            return self;
        }
        let start = if other.start.offset < self.start.offset {
            other.start
        } else {
            self.start
        };
        let end = if other.end.offset > self.end.offset {
            other.end
        } else {
            self.end
        };
        Span {
            start,
            end,
            file_id: self.file_id,
        }
    }

    pub fn len(&self) -> usize {
        self.end.offset.saturating_sub(self.start.offset)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `line:column` of the start position
    pub fn location(&self) -> String {
        format!("{}:{}", self.start.line, self.start.column)
    }
}

/// Implemented by values that know where they came from.
pub trait Spanned {
    fn span(&self) -> Option<Span>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_merge_covers_both() {
        let a = Span::new(Position::new(1, 1, 0), Position::new(1, 5, 4), 0);
        let b = Span::new(Position::new(1, 10, 9), Position::new(1, 15, 14), 0);

        let merged = a.merge(b);
        assert_eq!(merged.start.offset, 0);
        assert_eq!(merged.end.offset, 14);
        assert_eq!(merged.len(), 14);
    }

    #[test]
    fn test_span_merge_across_files_keeps_self() {
        let a = Span::new(Position::new(1, 1, 0), Position::new(1, 5, 4), 0);
        let b = Span::new(Position::new(2, 1, 10), Position::new(2, 3, 12), 1);
        assert_eq!(a.merge(b), a);
    }

    #[test]
    fn test_span_json_shape() {
        let span = Span::new(Position::new(3, 7, 40), Position::new(3, 9, 42), 2);
        let json = serde_json::to_value(span).unwrap();
        assert_eq!(json["fileId"], 2);
        assert_eq!(json["start"]["line"], 3);

        let back: Span = serde_json::from_value(json).unwrap();
        assert_eq!(back, span);
    }

    #[test]
    fn test_position_offset_defaults() {
        let pos: Position = serde_json::from_str(r#"{"line": 4, "column": 2}"#).unwrap();
        assert_eq!(pos, Position::new(4, 2, 0));
    }
}
