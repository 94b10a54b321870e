//! Error types for MongoDB operations.

use chorus_value::ParseError;
use thiserror::Error;

/// Result type for MongoDB operations.
pub type MongoResult<T> = Result<T, MongoError>;

/// Errors that can occur during MongoDB operations.
#[derive(Error, Debug)]
pub enum MongoError {
    /// Configuration error (bad URI, missing database name, bad TLS paths).
    #[error("configuration error: {0}")]
    Config(String),

    /// A value could not be encoded or a document could not be decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The slot registry or operator table rejected a change.
    #[error("registry error: {0}")]
    Registry(String),

    /// No pooled connection could be acquired.
    #[error("pool error: {0}")]
    Pool(String),

    /// Driver or server failure, with the `uri>collection` it happened on.
    #[error("mongodb error: {message}{}", format_context(.context))]
    Driver {
        /// Driver-reported message.
        message: String,
        /// Operation context.
        context: Option<String>,
    },

    /// A malformed query or command.
    #[error("bad query: {0}")]
    BadQuery(String),

    /// A cursor was used from a thread other than the one that opened it.
    #[error("cursor owned by thread {owner} used from thread {current}")]
    ThreadConflict {
        /// Owning thread.
        owner: String,
        /// Offending thread.
        current: String,
    },

    /// A cursor was used after it was closed.
    #[error("cursor is closed")]
    CursorClosed,

    /// Timeout error.
    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    /// BSON serialization error.
    #[error("bson error: {0}")]
    Bson(#[from] bson::ser::Error),

    /// BSON deserialization error.
    #[error("bson error: {0}")]
    BsonDecode(#[from] bson::de::Error),

    /// A string could not be parsed as a value.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

fn format_context(context: &Option<String>) -> String {
    match context {
        Some(ctx) => format!(" ({})", ctx),
        None => String::new(),
    }
}

impl MongoError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }

    /// Create a registry error.
    pub fn registry(message: impl Into<String>) -> Self {
        Self::Registry(message.into())
    }

    /// Create a pool error.
    pub fn pool(message: impl Into<String>) -> Self {
        Self::Pool(message.into())
    }

    /// Create a driver error without context.
    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver {
            message: message.into(),
            context: None,
        }
    }

    /// Create a bad query error.
    pub fn bad_query(message: impl Into<String>) -> Self {
        Self::BadQuery(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Attach operation context to a driver error. Other errors pass through.
    pub fn with_context(self, ctx: impl Into<String>) -> Self {
        match self {
            Self::Driver {
                message,
                context: None,
            } => Self::Driver {
                message,
                context: Some(ctx.into()),
            },
            other => other,
        }
    }

    /// Check if this is a configuration error. Registry rejections count.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Registry(_))
    }

    /// Check if this is a codec error.
    pub fn is_codec(&self) -> bool {
        matches!(self, Self::Codec(_) | Self::Bson(_) | Self::BsonDecode(_))
    }

    /// Check if this is a registry error.
    pub fn is_registry(&self) -> bool {
        matches!(self, Self::Registry(_))
    }

    /// Check if this is a pool error.
    pub fn is_pool(&self) -> bool {
        matches!(self, Self::Pool(_))
    }

    /// Check if this is a driver error.
    pub fn is_driver(&self) -> bool {
        matches!(self, Self::Driver { .. })
    }

    /// Check if this is a thread-affinity conflict.
    pub fn is_thread_conflict(&self) -> bool {
        matches!(self, Self::ThreadConflict { .. })
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

#[cfg(feature = "mongodb-driver")]
impl From<mongodb::error::Error> for MongoError {
    fn from(err: mongodb::error::Error) -> Self {
        MongoError::driver(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = MongoError::config("missing database name");
        assert!(err.is_config());

        let err = MongoError::codec("integer out of range");
        assert!(err.is_codec());

        let err = MongoError::Timeout(5000);
        assert!(err.is_timeout());

        let err = MongoError::ThreadConflict {
            owner: "ThreadId(1)".into(),
            current: "ThreadId(2)".into(),
        };
        assert!(err.is_thread_conflict());
    }

    #[test]
    fn test_error_display() {
        let err = MongoError::config("test error");
        assert_eq!(err.to_string(), "configuration error: test error");

        let err = MongoError::driver("duplicate key").with_context("mongodb://h/db>users");
        assert_eq!(
            err.to_string(),
            "mongodb error: duplicate key (mongodb://h/db>users)"
        );

        let err = MongoError::driver("no context");
        assert_eq!(err.to_string(), "mongodb error: no context");
    }

    #[test]
    fn test_context_only_wraps_driver_errors() {
        let err = MongoError::codec("bad").with_context("ignored");
        assert_eq!(err.to_string(), "codec error: bad");

        let err = MongoError::driver("x").with_context("first").with_context("second");
        assert_eq!(err.to_string(), "mongodb error: x (first)");
    }
}
