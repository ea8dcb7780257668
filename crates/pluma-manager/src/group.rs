//! Semaphore-gated task group.

use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

/// Runs one task per item with at most `limit` in flight, keeping every result.
#[derive(Debug, Clone, Copy)]
pub struct BoundedGroup {
    limit: usize,
}

/// Outcome of a [`BoundedGroup`] run, in completion order.
#[derive(Debug)]
pub struct GroupResult<O, E> {
    pub completed: Vec<O>,
    pub failures: Vec<E>,
}

impl Default for BoundedGroup {
    fn default() -> Self {
        Self::new(default_limit())
    }
}

/// Half the available CPUs, at least two.
pub fn default_limit() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus / 2).max(2)
}

impl BoundedGroup {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub async fn run<I, O, E, F, Fut>(&self, items: Vec<I>, task: F) -> GroupResult<O, E>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<O, E>>,
    {
        let semaphore = Arc::new(Semaphore::new(self.limit));
        // Sized to the item count so no task ever waits on the collector
        let (tx, mut rx) = mpsc::channel(items.len().max(1));

        let tasks: Vec<_> = items
            .into_iter()
            .map(|item| {
                let sem = Arc::clone(&semaphore);
                let tx = tx.clone();
                let fut = task(item);

                async move {
                    let _permit = sem.acquire().await.ok();
                    let result = fut.await;
                    let _ = tx.send(result).await;
                }
            })
            .collect();

        join_all(tasks).await;
        drop(tx);

        let mut outcome = GroupResult {
            completed: Vec::new(),
            failures: Vec::new(),
        };
        while let Some(result) = rx.recv().await {
            match result {
                Ok(value) => outcome.completed.push(value),
                Err(err) => outcome.failures.push(err),
            }
        }
        outcome
    }
}
