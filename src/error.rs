//! Errors raised while reading, resolving or writing object graphs.
//!
//! Every failure is fatal to the top-level call that raised it: there is no partial-result
//! recovery. The one tolerant path, fields that have no counterpart on the target type, is
//! reported through [`crate::MissingFieldHandler`] instead of an error.

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

use crate::span::{Position, Span};

/// Result alias used throughout the crate.
pub type Result<T, E = JsonIoError> = core::result::Result<T, E>;

/// What went wrong while tokenizing or parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxErrorKind {
    /// A character that cannot start or continue the current construct.
    #[error("unexpected character {found:?}, expected {expected}")]
    UnexpectedChar {
        /// The offending character.
        found: char,
        /// Human readable description of what would have been accepted.
        expected: &'static str,
    },
    /// Input ended in the middle of a value.
    #[error("EOF reached while reading {0}")]
    UnexpectedEof(&'static str),
    /// A backslash escape that JSON does not define.
    #[error("invalid escape sequence: {0}")]
    BadEscape(String),
    /// A token that looks like a number but does not parse as one.
    #[error("invalid number: {0}")]
    BadNumber(String),
    /// A bare word that is not `true`, `false` or `null` (or `NaN`/`Infinity` when allowed).
    #[error("expected token: {0}")]
    BadToken(&'static str),
    /// Nesting went past the configured maximum depth.
    #[error("maximum parsing depth exceeded ({0})")]
    DepthExceeded(usize),
    /// Non-whitespace content after the root value.
    #[error("EOF expected, content found after root value")]
    TrailingContent,
    /// A meta key (`@id`, `@ref`, `@type`, `@keys`, `@items`) carried a value of the wrong shape.
    #[error("invalid value for {key}: {reason}")]
    InvalidMeta {
        /// The canonical meta key.
        key: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
    /// The underlying stream failed.
    #[error("I/O error: {0}")]
    Io(String),
}

/// The single error type of the crate.
#[derive(Debug, Error, Diagnostic)]
pub enum JsonIoError {
    /// Malformed input. Carries the position and the last characters read.
    #[error("{kind} at {pos}")]
    #[diagnostic(code(facet_graph::syntax))]
    Syntax {
        /// What went wrong.
        kind: SyntaxErrorKind,
        /// Where the reader was when it went wrong.
        pos: Position,
        /// The last characters read before the failure.
        #[source_code]
        snippet: String,
        /// Points at the last character of the snippet.
        #[label("here")]
        span: SourceSpan,
    },

    /// `@ref` to an id that no object in the document declares.
    #[error("forward reference @ref: {id}, but no object defined (@id) with that value")]
    #[diagnostic(code(facet_graph::dangling_reference))]
    DanglingReference {
        /// The id that could not be found.
        id: i64,
    },

    /// A scalar could not be coerced into the requested type.
    #[error("cannot convert {from} to {to}: {reason}")]
    #[diagnostic(code(facet_graph::conversion))]
    Conversion {
        /// Description of the source value.
        from: String,
        /// Target type name.
        to: String,
        /// Why the conversion failed.
        reason: String,
    },

    /// A `@type` name (or a field type) does not name a known type.
    #[error("unknown type '{name}'")]
    #[diagnostic(
        code(facet_graph::missing_type),
        help("register the type or a type-name alias with the TypeRegistry")
    )]
    MissingType {
        /// The name as written.
        name: String,
    },

    /// No constructor or factory could produce an instance.
    #[error("unable to instantiate '{type_name}': {reason}")]
    #[diagnostic(
        code(facet_graph::instantiation),
        help("register a ClassFactory for this type")
    )]
    Instantiation {
        /// The type that could not be built.
        type_name: String,
        /// Last failure reported by a constructor, if any.
        reason: String,
    },

    /// A configured resource limit was hit.
    #[error("security limit exceeded: maximum {what} ({limit}) reached")]
    #[diagnostic(code(facet_graph::limit))]
    LimitExceeded {
        /// Which limit.
        what: &'static str,
        /// The configured value.
        limit: usize,
    },

    /// Building a concrete Rust value through facet reflection failed.
    #[error("reflection error: {0}")]
    #[diagnostic(code(facet_graph::reflect))]
    Reflect(String),

    /// The writer could not emit a value.
    #[error("write error: {0}")]
    #[diagnostic(code(facet_graph::write))]
    Write(String),
}

impl JsonIoError {
    /// Build a syntax error at `pos` with the given diagnostic snippet.
    pub fn syntax(kind: SyntaxErrorKind, pos: Position, snippet: String) -> Self {
        let span = Span::last_char_of(&snippet).into();
        Self::Syntax {
            kind,
            pos,
            snippet,
            span,
        }
    }

    /// Build a conversion error.
    pub fn conversion(from: impl Into<String>, to: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Conversion {
            from: from.into(),
            to: to.into(),
            reason: reason.into(),
        }
    }

    /// The syntax error kind, if this is a syntax error.
    pub fn syntax_kind(&self) -> Option<&SyntaxErrorKind> {
        match self {
            Self::Syntax { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

impl From<core::fmt::Error> for JsonIoError {
    fn from(e: core::fmt::Error) -> Self {
        Self::Write(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_error_labels_last_snippet_char() {
        let err = JsonIoError::syntax(
            SyntaxErrorKind::TrailingContent,
            Position::new(3, 7),
            "{\"a\":1} x".to_string(),
        );
        let JsonIoError::Syntax { span, .. } = &err else {
            panic!("expected a syntax error");
        };
        assert_eq!(span.offset(), 8);
        assert_eq!(span.len(), 1);
        assert_eq!(
            err.to_string(),
            "EOF expected, content found after root value at line 3, col 7"
        );
    }
}
