//! Source positions attached to every syntax node and instruction

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 1-based line/column pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    /// Line number, starting at 1
    pub line: u32,
    /// Column number, starting at 1
    pub column: u32,
}

impl Position {
    /// Creates a new position
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Start and end positions of a source range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    /// First character of the range
    pub start: Position,
    /// Position just past the range
    pub end: Position,
}

impl Span {
    /// Creates a span from two positions
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// A span covering a single point
    pub const fn point(line: u32, column: u32) -> Self {
        let p = Position::new(line, column);
        Self { start: p, end: p }
    }

    /// Smallest span covering both `self` and `other`
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// True for the default, position-less span
    pub fn is_empty(&self) -> bool {
        self.start.line == 0
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start.line == self.end.line {
            write!(f, "{}:{}-{}", self.start.line, self.start.column, self.end.column)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Renders the source line of `span` with a caret marker beneath the range.
///
/// Returns `None` when the span points outside `source`.
pub fn highlight(source: &str, span: Span) -> Option<String> {
    let line_no = span.start.line as usize;
    if line_no == 0 {
        return None;
    }
    let line = source.lines().nth(line_no - 1)?;
    let start = span.start.column.saturating_sub(1) as usize;
    let width = if span.end.line == span.start.line && span.end.column > span.start.column {
        (span.end.column - span.start.column) as usize
    } else {
        1
    };
    let gutter = format!("{:>4} | ", line_no);
    let mut out = format!("{}{}\n", gutter, line);
    out.push_str(&" ".repeat(gutter.len() + start));
    out.push_str(&"^".repeat(width));
    Some(out)
}
