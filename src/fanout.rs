//! Concurrent fan-out over a set of keys.
//!
//! Every distinct key gets its own tokio task; there is no concurrency
//! ceiling. All tasks are awaited before the batch resolves, so a failing
//! key never cancels its siblings. The batch either yields one result per
//! distinct key or fails with the first failing key in input order.

use std::collections::{HashMap, HashSet};
use std::future::Future;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::errors::{Result, StorageError};
use crate::metrics;

/// Outcome per distinct input key.
pub type BatchResult<V> = HashMap<String, V>;

/// Run `op` once per distinct key, concurrently.
pub async fn fan_out<I, V, F, Fut>(operation: &'static str, keys: I, op: F) -> Result<BatchResult<V>>
where
    I: IntoIterator<Item = String>,
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<V>> + Send + 'static,
    V: Send + 'static,
{
    let mut seen = HashSet::new();
    let tasks: Vec<(String, JoinHandle<Result<V>>)> = keys
        .into_iter()
        .filter(|key| seen.insert(key.clone()))
        .map(|key| {
            let task = tokio::spawn(op(key.clone()));
            (key, task)
        })
        .collect();

    metrics::record_batch(operation, tasks.len());
    debug!("{}: fanned out {} task(s)", operation, tasks.len());

    let mut results = HashMap::with_capacity(tasks.len());
    let mut first_error: Option<StorageError> = None;

    for (key, task) in tasks {
        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(join_err) => Err(StorageError::backend(
                operation,
                anyhow::anyhow!("task aborted: {}", join_err),
            )),
        };
        match outcome {
            Ok(value) => {
                results.insert(key, value);
            }
            Err(err) if first_error.is_none() => {
                first_error = Some(StorageError::Batch {
                    key,
                    source: Box::new(err),
                });
            }
            Err(err) => debug!("{}: additional failure for {}: {}", operation, key, err),
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(results),
    }
}
