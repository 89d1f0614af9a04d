//! Batch runner integration tests
//!
//! The runner is exercised against scripted executors, so the retry loop,
//! partial-result bookkeeping and spooling are all tested without a server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use polars::prelude::*;
use pgpull::prelude::*;

fn sample_frame(rows: i64) -> DataFrame {
    let ids: Vec<i64> = (0..rows).collect();
    df!("id" => ids).unwrap()
}

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new()
        .with_max_attempts(max_attempts)
        .with_initial_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(2))
}

/// Executor that fails each named query until its scripted round is reached
struct ScriptedExecutor {
    /// Query name -> first round on which it succeeds
    succeed_on: HashMap<String, u32>,
    attempt: u32,
    fetch_counts: HashMap<String, Arc<AtomicU32>>,
}

impl ScriptedExecutor {
    fn new(succeed_on: &[(&str, u32)]) -> Self {
        Self {
            succeed_on: succeed_on
                .iter()
                .map(|(n, a)| (n.to_string(), *a))
                .collect(),
            attempt: 0,
            fetch_counts: HashMap::new(),
        }
    }

    fn count(&self, name: &str) -> u32 {
        self.fetch_counts
            .get(name)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn begin_attempt(&mut self, attempt: u32) -> Result<()> {
        self.attempt = attempt;
        Ok(())
    }

    async fn fetch(&mut self, name: &str, _sql: &str) -> Result<DataFrame> {
        self.fetch_counts
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicU32::new(0)))
            .fetch_add(1, Ordering::SeqCst);
        let succeed_on = *self.succeed_on.get(name).unwrap_or(&u32::MAX);
        if self.attempt >= succeed_on {
            Ok(sample_frame(3))
        } else {
            Err(Error::connection("scripted transient failure"))
        }
    }
}

#[tokio::test]
async fn test_all_queries_succeed_first_round() {
    let batch = QueryBatch::new()
        .add("orders", "SELECT 1")
        .add("users", "SELECT 2");
    let mut executor = ScriptedExecutor::new(&[("orders", 1), ("users", 1)]);

    let outcome = BatchRunner::new()
        .with_policy(fast_policy(5))
        .run(&mut executor, &batch)
        .await;

    assert!(outcome.is_complete());
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.frames.len(), 2);
    assert_eq!(outcome.frames["orders"].height(), 3);
}

#[tokio::test]
async fn test_transient_failure_recovers_and_success_is_not_refetched() {
    let batch = QueryBatch::new()
        .add("stable", "SELECT 1")
        .add("flaky", "SELECT 2");
    // "flaky" fails on rounds 1 and 2, succeeds on round 3.
    let mut executor = ScriptedExecutor::new(&[("stable", 1), ("flaky", 3)]);

    let outcome = BatchRunner::new()
        .with_policy(fast_policy(10))
        .run(&mut executor, &batch)
        .await;

    assert!(outcome.is_complete());
    assert_eq!(outcome.attempts, 3);
    // The query that succeeded in round 1 must never run again.
    assert_eq!(executor.count("stable"), 1);
    assert_eq!(executor.count("flaky"), 3);
}

#[tokio::test]
async fn test_attempts_are_bounded_and_failures_reported() {
    let batch = QueryBatch::new()
        .add("good", "SELECT 1")
        .add("doomed", "SELECT 2");
    let mut executor = ScriptedExecutor::new(&[("good", 1)]);

    let outcome = BatchRunner::new()
        .with_policy(fast_policy(3))
        .run(&mut executor, &batch)
        .await;

    assert!(!outcome.is_complete());
    assert_eq!(outcome.attempts, 3);
    assert_eq!(executor.count("doomed"), 3);
    // Partial results survive even when other queries exhaust their attempts.
    assert!(outcome.frames.contains_key("good"));
    let err = &outcome.failures["doomed"];
    assert_eq!(err.category(), ErrorCategory::Connection);
}

#[tokio::test]
async fn test_spool_writes_parquet_per_round() {
    let spool = tempfile::tempdir().unwrap();
    let batch = QueryBatch::new()
        .add("early", "SELECT 1")
        .add("late", "SELECT 2");
    let mut executor = ScriptedExecutor::new(&[("early", 1), ("late", 2)]);

    let outcome = BatchRunner::new()
        .with_policy(fast_policy(5))
        .with_spool_dir(spool.path())
        .run(&mut executor, &batch)
        .await;

    assert!(outcome.is_complete());
    assert!(spool.path().join("attempt_1/early.parquet").is_file());
    assert!(spool.path().join("attempt_2/late.parquet").is_file());
    // Round 2 only spools what round 2 fetched.
    assert!(!spool.path().join("attempt_2/early.parquet").exists());
}

/// Executor whose round setup fails on the first round only
struct FlakySetupExecutor {
    setup_calls: u32,
}

#[async_trait]
impl QueryExecutor for FlakySetupExecutor {
    async fn begin_attempt(&mut self, _attempt: u32) -> Result<()> {
        self.setup_calls += 1;
        if self.setup_calls == 1 {
            Err(Error::connection("cannot reach server"))
        } else {
            Ok(())
        }
    }

    async fn fetch(&mut self, _name: &str, _sql: &str) -> Result<DataFrame> {
        Ok(sample_frame(1))
    }
}

#[tokio::test]
async fn test_failed_round_setup_retries_whole_round() {
    let batch = QueryBatch::new().add("orders", "SELECT 1");
    let mut executor = FlakySetupExecutor { setup_calls: 0 };

    let outcome = BatchRunner::new()
        .with_policy(fast_policy(5))
        .run(&mut executor, &batch)
        .await;

    assert!(outcome.is_complete());
    assert_eq!(outcome.attempts, 2);
    assert_eq!(executor.setup_calls, 2);
}

#[tokio::test]
async fn test_empty_batch_finishes_immediately() {
    let batch = QueryBatch::new();
    let mut executor = ScriptedExecutor::new(&[]);

    let outcome = BatchRunner::new()
        .with_policy(fast_policy(5))
        .run(&mut executor, &batch)
        .await;

    assert!(outcome.is_complete());
    assert_eq!(outcome.attempts, 0);
    assert!(outcome.frames.is_empty());
}
