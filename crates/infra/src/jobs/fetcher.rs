//! Bounded-concurrency fan-out.

use std::future::Future;

use futures::stream::{self, StreamExt};

/// Outcome of a fan-out: every item lands in exactly one of the two lists.
#[derive(Debug)]
pub struct BatchOutcome<K, T, E> {
    pub successful: Vec<T>,
    pub failed: Vec<(K, E)>,
}

impl<K, T, E> BatchOutcome<K, T, E> {
    pub fn total(&self) -> usize {
        self.successful.len() + self.failed.len()
    }
}

/// Runs a unit of work per item with at most `limit` units in flight.
///
/// Completion order is not preserved. A failing item never aborts the batch.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyLimitedFetcher {
    limit: usize,
}

impl ConcurrencyLimitedFetcher {
    /// A limit of 0 is treated as 1.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub async fn run<I, K, T, E, F, Fut>(&self, items: I, work: F) -> BatchOutcome<K, T, E>
    where
        I: IntoIterator<Item = K>,
        K: Clone,
        F: Fn(K) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let results: Vec<(K, Result<T, E>)> = stream::iter(items)
            .map(|item| {
                let key = item.clone();
                let fut = work(item);
                async move { (key, fut.await) }
            })
            .buffer_unordered(self.limit)
            .collect()
            .await;

        let mut outcome = BatchOutcome {
            successful: Vec::with_capacity(results.len()),
            failed: Vec::new(),
        };
        for (key, result) in results {
            match result {
                Ok(v) => outcome.successful.push(v),
                Err(e) => outcome.failed.push((key, e)),
            }
        }
        outcome
    }
}
