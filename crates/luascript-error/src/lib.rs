//! luascript-error - source spans and diagnostics shared by every stage
//!
//! ```rust
//! use luascript_error::{Diagnostic, DiagnosticRenderer, ErrorCode, SourceCache};
//! use luascript_error::span::{Position, Span};
//!
//! let mut cache = SourceCache::new();
//! let file_id = cache.add("main.js", "with (obj) {}");
//! let span = Span::new(Position::new(1, 1, 0), Position::new(1, 5, 4), file_id);
//!
//! let diagnostic = Diagnostic::error("no lowering rule for WithStatement")
//!     .with_code(ErrorCode::UNHANDLED_SYNTAX)
//!     .with_label(span, "not supported");
//!
//! let text = DiagnosticRenderer::new(&cache).without_colors().render(&diagnostic);
//! assert!(text.contains("main.js:1:1"));
//! ```

pub mod diagnostic;
pub mod span;

pub use diagnostic::{Diagnostic, DiagnosticRenderer, ErrorCode, Label, Level, SourceCache, SourceFile};
pub use span::{Position, Span, Spanned};

/// Diagnostics accumulated over one compilation.
#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.items.push(diagnostic);
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.items.extend(diagnostics);
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|d| d.level == Level::Error)
    }

    pub fn error_count(&self) -> usize {
        self.items.iter().filter(|d| d.level == Level::Error).count()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn render(&self, cache: &SourceCache, colors: bool) -> String {
        let mut renderer = DiagnosticRenderer::new(cache);
        if !colors {
            renderer = renderer.without_colors();
        }
        self.items
            .iter()
            .map(|d| renderer.render(d))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl FromIterator<Diagnostic> for Diagnostics {
    fn from_iter<T: IntoIterator<Item = Diagnostic>>(iter: T) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_count_ignores_warnings() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.push(Diagnostic::warning("getter ignored"));
        diagnostics.push(Diagnostic::error("bad node"));
        diagnostics.push(Diagnostic::error("another"));

        assert!(diagnostics.has_errors());
        assert_eq!(diagnostics.error_count(), 2);
        assert_eq!(diagnostics.len(), 3);
    }
}
