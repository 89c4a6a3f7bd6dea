//! Source positions carried by parsed nodes and syntax errors.

use core::ops::Deref;

use miette::SourceSpan;

/// Line and column of a character in the input, both 1-based.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    /// Line number, starting at 1.
    pub line: usize,
    /// Column number, starting at 1. Zero means "before the first character of the line".
    pub col: usize,
}

impl Position {
    /// Create a position from a line and column.
    pub const fn new(line: usize, col: usize) -> Self {
        Self { line, col }
    }
}

impl core::fmt::Display for Position {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "line {}, col {}", self.line, self.col)
    }
}

/// Byte offset and length inside a piece of source text.
///
/// Syntax errors point into the diagnostic snippet (the last characters read), not into the
/// whole document, since the reader never retains the full input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    /// Byte offset from start of source.
    pub offset: usize,
    /// Length in bytes.
    pub len: usize,
}

impl Span {
    /// Create a new span with the given offset and length.
    pub const fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    /// Span covering the last character of `text`, or an empty span for empty text.
    pub fn last_char_of(text: &str) -> Self {
        match text.char_indices().next_back() {
            Some((offset, c)) => Self::new(offset, c.len_utf8()),
            None => Self::default(),
        }
    }
}

impl From<Span> for SourceSpan {
    fn from(span: Span) -> Self {
        SourceSpan::new(span.offset.into(), span.len)
    }
}

/// A value tagged with the position it was parsed at.
#[derive(Debug)]
pub struct Spanned<T> {
    /// The wrapped value.
    pub value: T,
    /// Where the value started in the input.
    pub pos: Position,
}

impl<T> Spanned<T> {
    /// Create a new positioned value.
    pub const fn new(value: T, pos: Position) -> Self {
        Self { value, pos }
    }

    /// Unwrap into the inner value, discarding the position.
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for Spanned<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T: Clone> Clone for Spanned<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            pos: self.pos,
        }
    }
}

impl<T: PartialEq> PartialEq for Spanned<T> {
    fn eq(&self, other: &Self) -> bool {
        // Only compare the value, not the position
        self.value == other.value
    }
}

impl<T: Eq> Eq for Spanned<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_char_span_handles_multibyte() {
        let span = Span::last_char_of("ab\u{e9}");
        assert_eq!(span, Span::new(2, 2));
        assert_eq!(Span::last_char_of(""), Span::default());
    }

    #[test]
    fn spanned_equality_ignores_position() {
        let a = Spanned::new(1, Position::new(1, 1));
        let b = Spanned::new(1, Position::new(9, 9));
        assert_eq!(a, b);
        assert_eq!(*a, 1);
    }
}
