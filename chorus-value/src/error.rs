//! Error types for the textual value parser.

use thiserror::Error;

/// Result type for parsing values from text.
pub type ParseResult<T> = Result<T, ParseError>;

/// Errors raised while parsing a value from text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Input ended in the middle of a value.
    #[error("unexpected end of input")]
    UnexpectedEnd,

    /// A character that cannot start or continue the current form.
    #[error("unexpected character {ch:?} at offset {offset}")]
    Unexpected {
        /// The offending character.
        ch: char,
        /// Byte offset into the input.
        offset: usize,
    },

    /// Input remained after a complete value.
    #[error("trailing input at offset {0}")]
    Trailing(usize),

    /// Containers nested past the parser's limit.
    #[error("nesting deeper than {limit} at offset {offset}")]
    TooDeep {
        /// The nesting limit.
        limit: usize,
        /// Byte offset where the limit was crossed.
        offset: usize,
    },

    /// A malformed literal (number, OID, timestamp, UUID).
    #[error("invalid {kind} literal: {text}")]
    InvalidLiteral {
        /// Literal kind.
        kind: &'static str,
        /// Offending text.
        text: String,
    },
}

impl ParseError {
    /// Create an invalid literal error.
    pub fn invalid(kind: &'static str, text: impl Into<String>) -> Self {
        Self::InvalidLiteral {
            kind,
            text: text.into(),
        }
    }

    /// Check if the input was cut short.
    pub fn is_unexpected_end(&self) -> bool {
        matches!(self, Self::UnexpectedEnd)
    }

    /// Check if the input was nested too deeply.
    pub fn is_too_deep(&self) -> bool {
        matches!(self, Self::TooDeep { .. })
    }
}
