use colored::Colorize;

use crate::frontend::{SourceFile, SourceRange, lexer::Span};

/// Default circuit breaker for error cascades
pub const DEFAULT_MAX_ERRORS: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Note,
    Warning,
    Error,
    /// An invariant of the compiler itself was violated. Never caused by the
    /// shader author.
    InternalError,
}

impl Severity {
    pub fn is_error(self) -> bool {
        matches!(self, Self::Error | Self::InternalError)
    }
}

impl core::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Note => "note",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::InternalError => "internal compiler error",
        })
    }
}

/// The compiler stage a diagnostic originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum DiagnosticSource {
    Lexer,
    Parser,
    Resolver,
    IrBuilder,
    Transform,
    Backend,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub source: DiagnosticSource,
    pub message: String,
    pub span: Span,
    pub notes: Vec<(Span, String)>,
    /// Where in the compiler the diagnostic was raised (`error-backtrace` builds)
    pub origin: Option<&'static str>,
}

impl Diagnostic {
    pub fn new(severity: Severity, source: DiagnosticSource, span: Span, message: impl Into<String>) -> Self {
        Self {
            severity,
            source,
            message: message.into(),
            span,
            notes: Vec::new(),
            origin: None,
        }
    }

    pub fn error(source: DiagnosticSource, span: Span, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, source, span, message)
    }

    pub fn with_note(mut self, span: Span, message: impl Into<String>) -> Self {
        self.notes.push((span, message.into()));
        self
    }

    pub fn with_origin(mut self, origin: Option<&'static str>) -> Self {
        self.origin = origin;
        self
    }

    pub fn range(&self, source: &SourceFile) -> SourceRange {
        source.range(self.span)
    }

    /// Renders the diagnostic with colors, a location and a source excerpt
    pub fn render(&self, source: &SourceFile) -> String {
        let label = match self.severity {
            Severity::Note => "note".cyan().bold(),
            Severity::Warning => "warning".yellow().bold(),
            Severity::Error => "error".red().bold(),
            Severity::InternalError => "internal compiler error".magenta().bold(),
        };

        let mut out = String::new();

        if let Some(origin) = self.origin {
            out.push_str(&format!("{}: {}\n", "backtrace".blue(), origin.white()));
        }

        out.push_str(&format!(
            "{}: {} {}\n",
            label,
            self.message,
            format_position(source, self.span).as_str().white()
        ));
        out.push_str(&highlight_span(source, self.span));

        for (span, note) in &self.notes {
            out.push_str(&format!(
                "{}: {} {}\n",
                "note".cyan().bold(),
                note,
                format_position(source, *span).as_str().white()
            ));
            out.push_str(&highlight_span(source, *span));
        }

        out
    }
}

fn format_position(source: &SourceFile, span: Span) -> String {
    let location = source.location(span.start);

    format!("(at {}:{}:{})", source.origin, location.line, location.column)
}

fn highlight_span(source: &SourceFile, span: Span) -> String {
    let range = source.range(span);

    let Some(line) = source.line(range.start.line) else {
        return String::new();
    };

    let width = if range.end.line == range.start.line {
        range.end.column.saturating_sub(range.start.column).max(1)
    } else {
        line.chars().count().saturating_sub(range.start.column - 1).max(1)
    };

    let gutter = range.start.line.to_string();

    format!(
        "{} {} {}\n{} {} {}{}\n",
        gutter.as_str().blue(),
        "|".blue(),
        line,
        " ".repeat(gutter.len()),
        "|".blue(),
        " ".repeat(range.start.column - 1),
        "^".repeat(width).as_str().red()
    )
}

/// Records the compiler location raising a diagnostic when the
/// `error-backtrace` feature is enabled
#[macro_export]
macro_rules! diagnostic_origin {
    () => {
        if cfg!(feature = "error-backtrace") {
            Some(concat!(module_path!(), " (at ", file!(), ":", line!(), ")"))
        } else {
            None
        }
    };
}

/// Reports an error through anything with an `add` method taking a
/// [`Diagnostic`], tagging it with its origin.
#[macro_export]
macro_rules! report_error {
    ($diagnostics:expr, $source:expr, $span:expr, $($message:tt)+) => {{
        let diagnostic = $crate::diagnostics::Diagnostic::error($source, $span, format!($($message)+))
            .with_origin($crate::diagnostic_origin!());

        $diagnostics.add(diagnostic)
    }};
}

/// An append-only list of diagnostics with an error circuit breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    list: Vec<Diagnostic>,
    error_count: usize,
    max_errors: usize,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ERRORS)
    }
}

impl Diagnostics {
    pub fn new(max_errors: usize) -> Self {
        Self {
            list: Vec::new(),
            error_count: 0,
            max_errors: max_errors.max(1),
        }
    }

    /// Appends a diagnostic. Errors past the limit are dropped.
    pub fn add(&mut self, diagnostic: Diagnostic) {
        if diagnostic.severity.is_error() {
            if self.limit_reached() && diagnostic.severity != Severity::InternalError {
                return;
            }

            self.error_count += 1;
        }

        self.list.push(diagnostic);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        for diagnostic in other.list {
            self.add(diagnostic);
        }
    }

    pub fn add_internal_error(&mut self, source: DiagnosticSource, span: Span, message: impl Into<String>) {
        self.add(Diagnostic::new(Severity::InternalError, source, span, message));
    }

    pub fn add_warning(&mut self, source: DiagnosticSource, span: Span, message: impl Into<String>) {
        self.add(Diagnostic::new(Severity::Warning, source, span, message));
    }

    pub fn contains_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn max_errors(&self) -> usize {
        self.max_errors
    }

    pub fn limit_reached(&self) -> bool {
        self.error_count >= self.max_errors
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.list.iter()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.list
    }

    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.list
    }

    /// A colored multi-line report of every diagnostic
    pub fn render(&self, source: &SourceFile) -> String {
        self.list
            .iter()
            .map(|diagnostic| diagnostic.render(source))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// [`Diagnostics::render`] with all terminal escape codes removed
    pub fn render_plain(&self, source: &SourceFile) -> String {
        strip_ansi_escapes::strip_str(self.render(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_past_the_limit_are_dropped() {
        let mut diagnostics = Diagnostics::new(2);

        for i in 0..4 {
            diagnostics.add(Diagnostic::error(
                DiagnosticSource::Parser,
                Span::new(i, i + 1),
                "unexpected token",
            ));
        }
        diagnostics.add_warning(DiagnosticSource::Resolver, Span::default(), "unused");

        assert_eq!(diagnostics.error_count(), 2);
        assert_eq!(diagnostics.len(), 3);
        assert!(diagnostics.limit_reached());
    }

    #[test]
    fn plain_report_points_at_the_span() {
        let source = SourceFile::from_memory("fn main() {\n  let x = y;\n}\n");
        let mut diagnostics = Diagnostics::default();

        diagnostics.add(Diagnostic::error(
            DiagnosticSource::Resolver,
            Span::new(22, 23),
            "unresolved identifier 'y'",
        ));

        let report = diagnostics.render_plain(&source);

        assert_eq!(
            report,
            "error: unresolved identifier 'y' (at <memory>:2:11)\n2 |   let x = y;\n  |           ^\n"
        );
    }
}
