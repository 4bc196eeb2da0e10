//! Compiler diagnostics rendered in the `error[E...]: message` style.

use crate::span::Span;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Error,
    Warning,
    Note,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Error => "error",
            Level::Warning => "warning",
            Level::Note => "note",
        }
    }

    fn color_code(&self) -> &'static str {
        match self {
            Level::Error => "\x1b[1;31m",
            Level::Warning => "\x1b[1;33m",
            Level::Note => "\x1b[1;36m",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A region of source the diagnostic points at.
#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
    pub primary: bool,
}

impl Label {
    pub fn primary(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            primary: true,
        }
    }

    pub fn secondary(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            primary: false,
        }
    }
}

/// Structured error code: a stage letter followed by a number.
///
/// Stages: `I` input, `B` IR builder, `L` lowering, `V` validation,
/// `G` code generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    pub category: char,
    pub number: u16,
}

impl ErrorCode {
    pub const fn new(category: char, number: u16) -> Self {
        Self { category, number }
    }

    // Input
    pub const INVALID_AST: Self = Self::new('I', 1);
    pub const INVALID_IR_JSON: Self = Self::new('I', 2);
    pub const PARSER_FAILED: Self = Self::new('I', 3);

    // Builder
    pub const DANGLING_REFERENCE: Self = Self::new('B', 1);
    pub const SHAPE_MISMATCH: Self = Self::new('B', 2);
    pub const UNFILLED_NODE: Self = Self::new('B', 3);
    pub const INVALID_NODE: Self = Self::new('B', 4);

    // Lowering
    pub const UNHANDLED_SYNTAX: Self = Self::new('L', 1);
    pub const MALFORMED_SYNTAX: Self = Self::new('L', 2);

    // Validation
    pub const SCHEMA_VIOLATION: Self = Self::new('V', 1);
    pub const INVARIANT_VIOLATION: Self = Self::new('V', 2);

    // Code generation
    pub const UNSUPPORTED_NODE: Self = Self::new('G', 1);
    pub const UNKNOWN_TARGET: Self = Self::new('G', 2);
    pub const BACKEND_FAILURE: Self = Self::new('G', 3);
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}{:03}", self.category, self.number)
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub level: Level,
    pub code: Option<ErrorCode>,
    pub message: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    fn with_level(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            code: None,
            message: message.into(),
            labels: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::with_level(Level::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::with_level(Level::Warning, message)
    }

    pub fn note(message: impl Into<String>) -> Self {
        Self::with_level(Level::Note, message)
    }

    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_label(mut self, span: Span, message: impl Into<String>) -> Self {
        self.labels.push(Label::primary(span, message));
        self
    }

    /// Adds a primary label only when a span is known.
    pub fn with_optional_label(self, span: Option<Span>, message: impl Into<String>) -> Self {
        match span {
            Some(span) => self.with_label(span, message),
            None => self,
        }
    }

    pub fn with_secondary_label(mut self, span: Span, message: impl Into<String>) -> Self {
        self.labels.push(Label::secondary(span, message));
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level)?;
        if let Some(code) = self.code {
            write!(f, "[{code}]")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Source files known to the renderer, addressed by `Span::file_id`.
#[derive(Debug, Default)]
pub struct SourceCache {
    files: Vec<SourceFile>,
}

#[derive(Debug)]
pub struct SourceFile {
    pub name: String,
    pub source: String,
    line_starts: Vec<usize>,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        let source = source.into();
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();

        Self {
            name: name.into(),
            source,
            line_starts,
        }
    }

    /// Text of a 1-indexed line without its terminator.
    pub fn line(&self, line: u32) -> Option<&str> {
        let idx = line.checked_sub(1)? as usize;
        let start = *self.line_starts.get(idx)?;
        let end = self
            .line_starts
            .get(idx + 1)
            .map(|&e| e.saturating_sub(1))
            .unwrap_or(self.source.len());
        self.source.get(start..end).map(|l| l.trim_end_matches('\r'))
    }
}

impl SourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, source: impl Into<String>) -> u32 {
        let id = self.files.len() as u32;
        self.files.push(SourceFile::new(name, source));
        id
    }

    pub fn get(&self, id: u32) -> Option<&SourceFile> {
        self.files.get(id as usize)
    }
}

pub struct DiagnosticRenderer<'a> {
    cache: &'a SourceCache,
    use_colors: bool,
}

impl<'a> DiagnosticRenderer<'a> {
    pub fn new(cache: &'a SourceCache) -> Self {
        Self {
            cache,
            use_colors: true,
        }
    }

    pub fn without_colors(mut self) -> Self {
        self.use_colors = false;
        self
    }

    fn paint(&self, code: &'static str) -> &'static str {
        if self.use_colors {
            code
        } else {
            ""
        }
    }

    pub fn render(&self, diagnostic: &Diagnostic) -> String {
        let reset = self.paint("\x1b[0m");
        let bold = self.paint("\x1b[1m");
        let blue = self.paint("\x1b[1;34m");
        let color = self.paint(diagnostic.level.color_code());

        let mut output = format!("{color}{}", diagnostic.level);
        if let Some(code) = diagnostic.code {
            output.push_str(&format!("[{code}]"));
        }
        output.push_str(&format!("{reset}{bold}: {}{reset}\n", diagnostic.message));

        for label in &diagnostic.labels {
            let Some(file) = self.cache.get(label.span.file_id) else {
                continue;
            };
            output.push_str(&format!(
                " {blue}-->{reset} {}:{}\n",
                file.name,
                label.span.location()
            ));

            let Some(text) = file.line(label.span.start.line) else {
                continue;
            };
            let line_no = label.span.start.line.to_string();
            let gutter = " ".repeat(line_no.len());
            let start_col = label.span.start.column.max(1) as usize;
            let width = if label.span.start.line == label.span.end.line {
                label.span.end.column.saturating_sub(label.span.start.column).max(1) as usize
            } else {
                text.len().saturating_sub(start_col - 1).max(1)
            };
            let marker = if label.primary { "^" } else { "-" };
            let marker_color = if label.primary { color } else { blue };

            output.push_str(&format!(" {gutter} {blue}|{reset}\n"));
            output.push_str(&format!(" {blue}{line_no} |{reset} {text}\n"));
            output.push_str(&format!(
                " {gutter} {blue}|{reset} {}{marker_color}{}{reset} {}\n",
                " ".repeat(start_col - 1),
                marker.repeat(width),
                label.message
            ));
        }

        for note in &diagnostic.notes {
            output.push_str(&format!("   = {bold}note{reset}: {note}\n"));
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Position;

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::UNHANDLED_SYNTAX.to_string(), "EL001");
        assert_eq!(ErrorCode::UNSUPPORTED_NODE.to_string(), "EG001");
    }

    #[test]
    fn test_diagnostic_rendering() {
        let mut cache = SourceCache::new();
        let file_id = cache.add("input.js", "label: for (;;) {}\nlet y = 1;");

        let span = Span::new(Position::new(1, 1, 0), Position::new(1, 6, 5), file_id);
        let diagnostic = Diagnostic::error("no lowering rule for LabeledStatement")
            .with_code(ErrorCode::UNHANDLED_SYNTAX)
            .with_label(span, "unsupported here")
            .with_note("rewrite the loop without a label");

        let output = DiagnosticRenderer::new(&cache).without_colors().render(&diagnostic);

        assert!(output.starts_with("error[EL001]: no lowering rule for LabeledStatement"));
        assert!(output.contains("input.js:1:1"));
        assert!(output.contains("^^^^^ unsupported here"));
        assert!(output.contains("note: rewrite the loop"));
    }

    #[test]
    fn test_label_for_unknown_file_is_skipped() {
        let cache = SourceCache::new();
        let span = Span::new(Position::new(1, 1, 0), Position::new(1, 2, 1), 9);
        let diagnostic = Diagnostic::warning("odd").with_label(span, "here");

        let output = DiagnosticRenderer::new(&cache).without_colors().render(&diagnostic);
        assert_eq!(output, "warning: odd\n");
    }
}
