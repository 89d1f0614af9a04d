//! Batch runner with retry
//!
//! Runs a named batch of queries to completion: each round executes every
//! query that has not yet succeeded, successes are kept permanently, and
//! failed queries are retried on the next round after an exponential-backoff
//! delay. Each round gets a fresh connection, so transient outages and
//! stale sessions do not poison later rounds. Optionally every round's new
//! results are spooled to parquet so a crash mid-run loses nothing already
//! fetched.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use polars::prelude::{DataFrame, ParquetWriter};
use tracing::{error, info, warn};

use crate::conn::{ConnectOptions, Engine};
use crate::error::{Error, Result};
use crate::fetch::{self, FetchOptions};
use crate::notify::{format_elapsed, Notifier};
use crate::retry::RetryPolicy;

/// A named, insertion-ordered set of queries to run as one batch
#[derive(Debug, Clone, Default)]
pub struct QueryBatch {
    entries: Vec<(String, String)>,
}

impl QueryBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a query under a name; re-adding a name replaces its SQL
    pub fn add(mut self, name: impl Into<String>, sql: impl Into<String>) -> Self {
        let name = name.into();
        let sql = sql.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = sql,
            None => self.entries.push((name, sql)),
        }
        self
    }

    /// The queries in insertion order
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    /// Number of queries in the batch
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the batch is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Executes queries for the batch runner.
///
/// The production implementation is [`EngineExecutor`]; tests substitute
/// scripted implementations to exercise the retry loop without a server.
#[async_trait]
pub trait QueryExecutor: Send {
    /// Called once at the start of each round, before any query runs.
    ///
    /// Implementations use this to (re)establish connections; a failure here
    /// fails every pending query for the round.
    async fn begin_attempt(&mut self, attempt: u32) -> Result<()> {
        let _ = attempt;
        Ok(())
    }

    /// Execute one query and materialize its result
    async fn fetch(&mut self, name: &str, sql: &str) -> Result<DataFrame>;
}

/// [`QueryExecutor`] that opens a fresh [`Engine`] per round.
///
/// Reconnecting each round means a dropped connection in round `n` cannot
/// fail round `n + 1`.
pub struct EngineExecutor {
    options: ConnectOptions,
    fetch_options: FetchOptions,
    engine: Option<Engine>,
}

impl EngineExecutor {
    /// Create an executor for the given connection options
    pub fn new(options: ConnectOptions) -> Self {
        Self {
            options,
            fetch_options: FetchOptions::default(),
            engine: None,
        }
    }

    /// Set the fetch options applied to every query
    pub fn with_fetch_options(mut self, fetch_options: FetchOptions) -> Self {
        self.fetch_options = fetch_options;
        self
    }
}

#[async_trait]
impl QueryExecutor for EngineExecutor {
    async fn begin_attempt(&mut self, attempt: u32) -> Result<()> {
        // Drop the previous round's connection before dialing a new one.
        self.engine = None;
        let engine = Engine::connect(self.options.clone()).await?;
        engine.ping().await?;
        if attempt > 1 {
            info!(attempt, "reconnected for retry round");
        }
        self.engine = Some(engine);
        Ok(())
    }

    async fn fetch(&mut self, _name: &str, sql: &str) -> Result<DataFrame> {
        let engine = self
            .engine
            .as_ref()
            .ok_or_else(|| Error::internal("executor used before begin_attempt"))?;
        let outcome = fetch::fetch(engine, sql, &self.fetch_options).await?;
        Ok(outcome.frame)
    }
}

/// Result of a batch run
#[derive(Debug)]
pub struct BatchOutcome {
    /// Successfully materialized frames, keyed by query name
    pub frames: HashMap<String, DataFrame>,
    /// Final error per query that never succeeded
    pub failures: HashMap<String, Error>,
    /// Number of rounds actually run
    pub attempts: u32,
}

impl BatchOutcome {
    /// Whether every query in the batch succeeded
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs a [`QueryBatch`] to completion with retry
#[derive(Debug)]
pub struct BatchRunner {
    policy: RetryPolicy,
    spool: Option<PathBuf>,
    notifier: Notifier,
}

impl Default for BatchRunner {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            spool: None,
            notifier: Notifier::silent(),
        }
    }
}

impl BatchRunner {
    /// Create a runner with the default retry policy
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retry policy
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Spool each round's newly succeeded frames to parquet under the given
    /// directory
    pub fn with_spool_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spool = Some(dir.into());
        self
    }

    /// Set the end-of-run notifier
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Run every query in the batch until it succeeds or attempts run out.
    ///
    /// A query that succeeds is never re-executed in later rounds. The
    /// outcome always carries every frame fetched, even when some queries
    /// exhausted their attempts.
    pub async fn run(
        &self,
        executor: &mut dyn QueryExecutor,
        batch: &QueryBatch,
    ) -> BatchOutcome {
        let start = Instant::now();
        let mut frames: HashMap<String, DataFrame> = HashMap::new();
        let mut failures: HashMap<String, Error> = HashMap::new();
        let mut pending: Vec<(String, String)> = batch.entries().to_vec();
        let mut attempt = 0;

        while !pending.is_empty() && attempt < self.policy.max_attempts {
            attempt += 1;
            let delay = self.policy.delay_for_attempt(attempt);
            if !delay.is_zero() {
                info!(
                    attempt,
                    delay_secs = delay.as_secs(),
                    pending = pending.len(),
                    "waiting before retry round"
                );
                tokio::time::sleep(delay).await;
            }
            info!(
                attempt = %ordinal(attempt),
                pending = pending.len(),
                "starting batch round"
            );

            if let Err(err) = executor.begin_attempt(attempt).await {
                warn!(attempt, error = %err, "round setup failed");
                for (name, _) in &pending {
                    failures.insert(
                        name.clone(),
                        Error::connection(format!("round setup failed: {err}")),
                    );
                }
                continue;
            }

            let mut succeeded: Vec<String> = Vec::new();
            for (name, sql) in &pending {
                match executor.fetch(name, sql).await {
                    Ok(frame) => {
                        info!(query = %name, rows = frame.height(), "query succeeded");
                        failures.remove(name);
                        if let Some(dir) = &self.spool {
                            self.spool_frame(dir, attempt, name, &frame);
                        }
                        frames.insert(name.clone(), frame);
                        succeeded.push(name.clone());
                    }
                    Err(err) => {
                        warn!(query = %name, attempt, error = %err, "query failed");
                        failures.insert(name.clone(), err);
                    }
                }
            }
            pending.retain(|(name, _)| !succeeded.contains(name));
        }

        let elapsed = start.elapsed();
        if failures.is_empty() {
            info!(
                queries = frames.len(),
                attempts = attempt,
                elapsed = %format_elapsed(elapsed),
                "batch complete"
            );
        } else {
            error!(
                succeeded = frames.len(),
                failed = failures.len(),
                attempts = attempt,
                elapsed = %format_elapsed(elapsed),
                "batch finished with failures"
            );
        }
        self.notifier.completed("batch", elapsed);

        BatchOutcome {
            frames,
            failures,
            attempts: attempt,
        }
    }

    /// Write one frame to `<spool>/attempt_<n>/<name>.parquet`.
    ///
    /// Spooling is best-effort; a write failure is logged and the run
    /// continues.
    fn spool_frame(&self, dir: &std::path::Path, attempt: u32, name: &str, frame: &DataFrame) {
        let attempt_dir = dir.join(format!("attempt_{attempt}"));
        let path = attempt_dir.join(format!("{name}.parquet"));
        let result = std::fs::create_dir_all(&attempt_dir)
            .map_err(Error::from)
            .and_then(|()| {
                let file = std::fs::File::create(&path)?;
                let mut frame = frame.clone();
                ParquetWriter::new(file).finish(&mut frame)?;
                Ok(())
            });
        match result {
            Ok(()) => info!(query = %name, path = %path.display(), "spooled frame"),
            Err(err) => warn!(query = %name, error = %err, "failed to spool frame"),
        }
    }
}

/// English ordinal for round numbers in log lines ("1st", "22nd")
fn ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}
