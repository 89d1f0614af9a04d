//! Error types for pgpull
//!
//! Provides granular error classification for two separate decisions:
//! - whether a failed batch attempt should be retried (connection, timeout,
//!   deadlock)
//! - whether a failed materialization should fall through to the next
//!   strategy (type conversion, schema)

use std::fmt;
use thiserror::Error;

/// Result type for pgpull operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection-related errors (retriable)
    Connection,
    /// Query execution errors
    Query,
    /// Type conversion errors (fallback candidate)
    TypeConversion,
    /// Schema/metadata errors (fallback candidate)
    Schema,
    /// Timeout errors (retriable)
    Timeout,
    /// Deadlock detected (retriable)
    Deadlock,
    /// Configuration error
    Configuration,
    /// Query template error
    Template,
    /// I/O errors (template files, spool directory)
    Io,
    /// Unknown/other errors
    Other,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Timeout | Self::Deadlock)
    }

    /// Whether errors in this category should trigger the next
    /// materialization strategy rather than aborting the fetch
    #[inline]
    pub const fn is_fallback(self) -> bool {
        matches!(self, Self::TypeConversion | Self::Schema)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Query => write!(f, "query"),
            Self::TypeConversion => write!(f, "type_conversion"),
            Self::Schema => write!(f, "schema"),
            Self::Timeout => write!(f, "timeout"),
            Self::Deadlock => write!(f, "deadlock"),
            Self::Configuration => write!(f, "configuration"),
            Self::Template => write!(f, "template"),
            Self::Io => write!(f, "io"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// One failed strategy in a materialization fallback chain
#[derive(Debug, Clone)]
pub struct FallbackEntry {
    /// Strategy name (e.g. "typed", "text-inferred")
    pub strategy: &'static str,
    /// Rendered error for that strategy
    pub error: String,
}

/// Record of every strategy tried (and failed) for a single query.
///
/// Attached to [`Error::FallbackExhausted`] when no strategy produced a
/// dataframe; the entries are in attempt order, so the last entry is the
/// final error.
#[derive(Debug, Clone, Default)]
pub struct FallbackReport {
    entries: Vec<FallbackEntry>,
}

impl FallbackReport {
    /// Create an empty report
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed strategy
    pub fn push(&mut self, strategy: &'static str, error: &Error) {
        self.entries.push(FallbackEntry {
            strategy,
            error: error.to_string(),
        });
    }

    /// Strategies tried so far
    pub fn entries(&self) -> &[FallbackEntry] {
        &self.entries
    }

    /// The last (most recent) error message, if any strategy was tried
    pub fn last_error(&self) -> Option<&str> {
        self.entries.last().map(|e| e.error.as_str())
    }

    /// Number of failed strategies
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no strategy has been recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for FallbackReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", entry.strategy, entry.error)?;
        }
        Ok(())
    }
}

/// Main error type for pgpull
#[derive(Error, Debug)]
pub enum Error {
    /// Connection failed
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution failed
    #[error("query error: {message}")]
    Query {
        message: String,
        sql: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Type conversion failed while materializing a result set
    #[error("type conversion error: {message}")]
    TypeConversion { message: String },

    /// Result-set metadata could not be interpreted
    #[error("schema error: {message}")]
    Schema { message: String },

    /// Operation timed out or was cancelled
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// Deadlock detected
    #[error("deadlock detected")]
    Deadlock,

    /// Configuration error (missing env vars, bad TLS settings)
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Query template error (unreadable file, leftover tokens)
    #[error("template error: {message}")]
    Template { message: String },

    /// Every materialization strategy failed
    #[error("all materialization strategies failed: {report}")]
    FallbackExhausted { report: FallbackReport },

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Query,
            Self::TypeConversion { .. } => ErrorCategory::TypeConversion,
            Self::Schema { .. } => ErrorCategory::Schema,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Deadlock => ErrorCategory::Deadlock,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Template { .. } => ErrorCategory::Template,
            Self::Io(_) => ErrorCategory::Io,
            // The chain already exhausted the fallback candidates.
            Self::FallbackExhausted { .. } => ErrorCategory::Query,
            Self::Internal { .. } => ErrorCategory::Other,
        }
    }

    /// Whether this error is retriable on a fresh connection
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Whether this error should trigger the next materialization strategy
    #[inline]
    pub fn is_fallback(&self) -> bool {
        self.category().is_fallback()
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Create a query error carrying the offending SQL
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        }
    }

    /// Create a type conversion error
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion {
            message: message.into(),
        }
    }

    /// Create a schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a template error
    pub fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<tokio_postgres::Error> for Error {
    fn from(err: tokio_postgres::Error) -> Self {
        // SQLSTATE classes: 08 connection, 28 auth, 40P01 deadlock,
        // 42 syntax/access, 53 resources, 57 operator intervention.
        if let Some(state) = err.code() {
            let code = state.code();
            return match code {
                "40P01" => Self::Deadlock,
                "57014" => Self::Timeout {
                    message: err.to_string(),
                },
                c if c.starts_with("08") => Self::Connection {
                    message: err.to_string(),
                    source: Some(Box::new(err)),
                },
                c if c.starts_with("28") => Self::Configuration {
                    message: format!("authentication failed: {err}"),
                },
                // Admin shutdown / crash shutdown / cannot connect now: a
                // fresh connection later may succeed.
                c if c.starts_with("57P") => Self::Connection {
                    message: err.to_string(),
                    source: Some(Box::new(err)),
                },
                c if c.starts_with("53") => Self::Connection {
                    message: err.to_string(),
                    source: Some(Box::new(err)),
                },
                _ => Self::Query {
                    message: err.to_string(),
                    sql: None,
                    source: Some(Box::new(err)),
                },
            };
        }

        if err.is_closed() {
            return Self::Connection {
                message: err.to_string(),
                source: Some(Box::new(err)),
            };
        }

        // Errors without a SQLSTATE are typically client-side: row
        // deserialization failures surface here and must remain fallback
        // candidates.
        let message = err.to_string();
        if message.contains("error deserializing column")
            || message.contains("cannot convert between")
        {
            Self::TypeConversion { message }
        } else if message.contains("timed out") {
            Self::Timeout { message }
        } else {
            Self::Query {
                message,
                sql: None,
                source: Some(Box::new(err)),
            }
        }
    }
}

impl From<polars::error::PolarsError> for Error {
    fn from(err: polars::error::PolarsError) -> Self {
        use polars::error::PolarsError;
        match err {
            PolarsError::SchemaMismatch(msg) | PolarsError::ShapeMismatch(msg) => Self::Schema {
                message: msg.to_string(),
            },
            PolarsError::Duplicate(msg) => Self::Schema {
                message: msg.to_string(),
            },
            PolarsError::IO { error, .. } => Self::Io(std::io::Error::other(error.to_string())),
            other => Self::TypeConversion {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_retriable() {
        assert!(ErrorCategory::Connection.is_retriable());
        assert!(ErrorCategory::Timeout.is_retriable());
        assert!(ErrorCategory::Deadlock.is_retriable());

        assert!(!ErrorCategory::Query.is_retriable());
        assert!(!ErrorCategory::TypeConversion.is_retriable());
        assert!(!ErrorCategory::Configuration.is_retriable());
    }

    #[test]
    fn test_category_fallback() {
        assert!(ErrorCategory::TypeConversion.is_fallback());
        assert!(ErrorCategory::Schema.is_fallback());

        assert!(!ErrorCategory::Connection.is_fallback());
        assert!(!ErrorCategory::Query.is_fallback());
    }

    #[test]
    fn test_fallback_report_display() {
        let mut report = FallbackReport::new();
        report.push("typed", &Error::type_conversion("unsupported type oid 600"));
        report.push("text-raw", &Error::query("boom"));

        assert_eq!(report.len(), 2);
        assert_eq!(report.last_error(), Some("query error: boom"));
        let rendered = report.to_string();
        assert!(rendered.contains("typed:"));
        assert!(rendered.contains("text-raw:"));
    }

    #[test]
    fn test_error_display() {
        let err = Error::connection("connection refused");
        assert!(err.to_string().contains("connection refused"));

        let err = Error::query_with_sql("syntax error", "SELECT * FORM users");
        assert!(err.to_string().contains("syntax error"));
    }
}
