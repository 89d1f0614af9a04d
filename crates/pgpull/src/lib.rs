//! # pgpull
//!
//! Convenience layer for pulling PostgreSQL query results into polars
//! dataframes, built for long-running analytical extractions.
//!
//! ## Features
//!
//! - **Env Configuration**: Credentials from `DB_*` environment variables
//!   with `.env` file support
//! - **TLS by Default**: `sslmode=require` unless explicitly relaxed, with
//!   rustls-backed certificate verification
//! - **Query Templates**: External `.sql` files with `$TOKEN` substitution
//!   and injection-safe literal rendering
//! - **Materialization Fallback**: Binary-typed fetch falling back to
//!   text-protocol inference, then raw strings
//! - **Batch Retry**: Exponential-backoff runner that keeps partial results
//!   and reconnects between rounds
//! - **Diagnostics**: One-call connection/query report with a sampled probe
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pgpull::prelude::*;
//!
//! // Connect from DB_* / PGSSL* environment variables
//! let engine = Engine::from_env().await?;
//!
//! // Load a query template and substitute its tokens
//! let sql = QueryTemplate::from_file("queries/orders.sql")?
//!     .bind_list("$IDS", &[101, 102, 103])
//!     .bind_date_range("2026-01-01", "2026-06-30")
//!     .render()?;
//!
//! // Fetch into a dataframe, falling back across strategies as needed
//! let outcome = fetch(&engine, &sql, &FetchOptions::new()).await?;
//! println!("{}", outcome.frame);
//!
//! // Or run a batch with retry and parquet spooling
//! let batch = QueryBatch::new().add("orders", sql);
//! let mut executor = EngineExecutor::new(engine.options().clone());
//! let outcome = BatchRunner::new()
//!     .with_spool_dir("/tmp/spool")
//!     .run(&mut executor, &batch)
//!     .await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod conn;
pub mod diagnose;
pub mod error;
pub mod fetch;
pub mod frame;
pub mod notify;
pub mod retry;
pub mod runner;
pub mod template;
pub mod tls;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::DbConfig;
    pub use crate::conn::{ConnectOptions, Engine};
    pub use crate::diagnose::{diagnose, Diagnostics};
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::fetch::{fetch, fetch_frame, FetchOptions, FetchOutcome, FetchStrategy};
    pub use crate::notify::Notifier;
    pub use crate::retry::RetryPolicy;
    pub use crate::runner::{BatchOutcome, BatchRunner, EngineExecutor, QueryBatch, QueryExecutor};
    pub use crate::template::{quote_literal, sql_list, QueryTemplate, SqlLiteral};
    pub use crate::tls::{SslMode, TlsSettings};
}

pub use error::{Error, ErrorCategory, Result};

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_exports() {
        let _ = RetryPolicy::default();
        let _ = QueryBatch::new();
        let _ = TlsSettings::new(SslMode::Require);
        let template = QueryTemplate::from_sql("SELECT 1");
        assert_eq!(template.sql(), "SELECT 1");
    }
}
