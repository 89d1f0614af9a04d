//! Query execution with multi-strategy materialization fallback
//!
//! Runs a query and materializes the result as a dataframe, trying each
//! strategy in a fixed order and stopping at the first success:
//!
//! 1. `typed` — binary protocol, strictly typed columns
//! 2. `text-inferred` — text protocol with per-column dtype inference
//! 3. `text-raw` — text protocol, everything a string column
//!
//! Only materialization failures (type conversion, schema) fall through to
//! the next strategy; connection and query errors abort immediately. If
//! every strategy fails the error carries a [`FallbackReport`] with the
//! per-strategy failures.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use polars::prelude::DataFrame;
use tracing::{debug, info, warn};

use crate::conn::Engine;
use crate::error::{Error, FallbackReport, Result};
use crate::frame;
use crate::notify::{format_elapsed, Notifier};
use crate::template::apply_row_limit;

/// A result-materialization strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchStrategy {
    /// Binary protocol, strictly typed columns
    Typed,
    /// Text protocol with dtype inference
    TextInferred,
    /// Text protocol, string columns only
    TextRaw,
}

impl FetchStrategy {
    /// The fallback chain, in attempt order
    pub const CHAIN: [FetchStrategy; 3] = [Self::Typed, Self::TextInferred, Self::TextRaw];

    /// Short name used in logs and reports
    pub const fn name(self) -> &'static str {
        match self {
            Self::Typed => "typed",
            Self::TextInferred => "text-inferred",
            Self::TextRaw => "text-raw",
        }
    }
}

impl std::fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Options controlling a fetch
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Optional row limit applied to the query text before execution
    pub row_limit: Option<u64>,
    /// Ring the terminal bell when the fetch completes
    pub bell: bool,
}

impl FetchOptions {
    /// Default options: no limit, no bell
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a row limit before execution
    pub fn with_row_limit(mut self, limit: u64) -> Self {
        self.row_limit = Some(limit);
        self
    }

    /// Ring the terminal bell on completion
    pub fn with_bell(mut self) -> Self {
        self.bell = true;
        self
    }
}

/// A successful fetch: the dataframe plus how it was obtained
#[derive(Debug)]
pub struct FetchOutcome {
    /// The materialized result set
    pub frame: DataFrame,
    /// The strategy that produced it
    pub strategy: FetchStrategy,
    /// Wall time for the whole fetch, including failed strategies
    pub elapsed: Duration,
}

/// Runs one materialization strategy against some query source.
///
/// The production implementation drives an [`Engine`]; tests substitute
/// scripted results to exercise the sequencing without a server.
#[async_trait]
trait StrategyRunner: Send {
    async fn run(&mut self, sql: &str, strategy: FetchStrategy) -> Result<DataFrame>;
}

struct EngineRunner<'a> {
    engine: &'a Engine,
}

#[async_trait]
impl StrategyRunner for EngineRunner<'_> {
    async fn run(&mut self, sql: &str, strategy: FetchStrategy) -> Result<DataFrame> {
        match strategy {
            FetchStrategy::Typed => {
                // Prepare first so empty result sets keep their column names.
                let statement = self.engine.client().prepare(sql).await?;
                let rows = self.engine.client().query(&statement, &[]).await?;
                frame::from_binary_rows(statement.columns(), &rows)
            }
            FetchStrategy::TextInferred => {
                let messages = self.engine.simple_query(sql).await?;
                let (names, columns) = frame::text_messages_to_columns(&messages)?;
                frame::from_text_columns(names, columns, true)
            }
            FetchStrategy::TextRaw => {
                let messages = self.engine.simple_query(sql).await?;
                let (names, columns) = frame::text_messages_to_columns(&messages)?;
                frame::from_text_columns(names, columns, false)
            }
        }
    }
}

/// Execute a query and materialize the result as a dataframe.
///
/// The first successful strategy wins; later strategies are never tried.
pub async fn fetch(engine: &Engine, sql: &str, options: &FetchOptions) -> Result<FetchOutcome> {
    fetch_with(&mut EngineRunner { engine }, sql, options).await
}

/// Convenience wrapper returning just the dataframe
pub async fn fetch_frame(engine: &Engine, sql: &str) -> Result<DataFrame> {
    Ok(fetch(engine, sql, &FetchOptions::default()).await?.frame)
}

async fn fetch_with(
    runner: &mut dyn StrategyRunner,
    sql: &str,
    options: &FetchOptions,
) -> Result<FetchOutcome> {
    let sql = match options.row_limit {
        Some(limit) => apply_row_limit(sql, limit),
        None => sql.to_string(),
    };

    let start = Instant::now();
    let mut report = FallbackReport::new();
    let mut winner: Option<(DataFrame, FetchStrategy)> = None;

    for strategy in FetchStrategy::CHAIN {
        debug!(%strategy, "attempting materialization");
        match runner.run(&sql, strategy).await {
            Ok(frame) => {
                winner = Some((frame, strategy));
                break;
            }
            Err(err) if err.is_fallback() => {
                warn!(%strategy, error = %err, "materialization failed, trying next strategy");
                report.push(strategy.name(), &err);
            }
            Err(err) => return Err(err),
        }
    }

    let (frame, strategy) = match winner {
        Some(w) => w,
        None => return Err(Error::FallbackExhausted { report }),
    };

    let elapsed = start.elapsed();
    info!(
        %strategy,
        rows = frame.height(),
        columns = frame.width(),
        elapsed = %format_elapsed(elapsed),
        "fetch complete"
    );
    if frame.height() == 0 {
        warn!("query returned an empty result set");
    }
    if options.bell {
        Notifier::default().completed("fetch", elapsed);
    }

    Ok(FetchOutcome {
        frame,
        strategy,
        elapsed,
    })
}
