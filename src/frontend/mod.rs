use std::path::PathBuf;

use self::lexer::Span;

pub mod ast;
pub mod intern;
pub mod lexer;
pub mod parser;

#[derive(Debug)]
pub struct SourceFile {
    pub contents: String,
    pub origin: SourceFileOrigin,
    line_starts: Vec<usize>,
}

/// A 1-based line and column pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRange {
    pub start: Location,
    pub end: Location,
}

impl SourceFile {
    pub fn new(contents: impl Into<String>, origin: SourceFileOrigin) -> Self {
        let contents = contents.into();

        let line_starts = std::iter::once(0)
            .chain(contents.match_indices('\n').map(|(i, _)| i + 1))
            .collect();

        Self {
            contents,
            origin,
            line_starts,
        }
    }

    pub fn from_memory(contents: impl Into<String>) -> Self {
        Self::new(contents, SourceFileOrigin::Memory)
    }

    pub fn value_of_span(&self, span: Span) -> &str {
        let end = span.end.min(self.contents.len());
        let start = span.start.min(end);

        self.contents.get(start..end).unwrap_or_default()
    }

    pub fn location(&self, offset: usize) -> Location {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };

        let line_start = self.line_starts[line];
        let column = self
            .contents
            .get(line_start..offset.min(self.contents.len()))
            .map(|prefix| prefix.chars().count())
            .unwrap_or(0);

        Location {
            line: line + 1,
            column: column + 1,
        }
    }

    pub fn range(&self, span: Span) -> SourceRange {
        SourceRange {
            start: self.location(span.start),
            end: self.location(span.end),
        }
    }

    /// The text of a 1-based line, without its line terminator
    pub fn line(&self, line: usize) -> Option<&str> {
        let start = *self.line_starts.get(line.checked_sub(1)?)?;
        let end = self
            .line_starts
            .get(line)
            .map(|next| next - 1)
            .unwrap_or(self.contents.len());

        self.contents
            .get(start..end)
            .map(|text| text.trim_end_matches('\r'))
    }
}

#[derive(Debug, Clone)]
pub enum SourceFileOrigin {
    Memory,
    File(PathBuf),
}

impl core::fmt::Display for SourceFileOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFileOrigin::Memory => f.write_str("<memory>"),
            SourceFileOrigin::File(path) => f.write_fmt(format_args!("{}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locations_are_one_based() {
        let source = SourceFile::from_memory("fn a() {}\n  let x = 1;\n");

        assert_eq!(source.location(0), Location { line: 1, column: 1 });
        assert_eq!(source.location(12), Location { line: 2, column: 3 });
        assert_eq!(source.line(2), Some("  let x = 1;"));
        assert_eq!(source.line(4), None);
    }
}
