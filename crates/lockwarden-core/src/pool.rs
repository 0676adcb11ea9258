//! Bounded-concurrency worker pool

use lockwarden_util::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::RunContext;

/// Runs one async call per item with at most `concurrency` in flight.
///
/// Each item is attempted at most once. Cancellation stops new items from
/// starting and aborts the ones in flight.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    concurrency: usize,
}

/// Per-item results of a pool run
#[derive(Debug)]
pub struct PoolOutcome<I, T> {
    /// Finished items in input order
    pub completed: Vec<(I, Result<T>)>,
    /// Started but aborted (or panicked) before finishing
    pub interrupted: Vec<I>,
    pub not_started: Vec<I>,
    pub cancelled: bool,
}

impl<I, T> PoolOutcome<I, T> {
    /// Items that never produced a result
    pub fn unfinished(&self) -> usize {
        self.interrupted.len() + self.not_started.len()
    }
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub async fn run<I, T, F, Fut>(&self, items: Vec<I>, ctx: &RunContext, f: F) -> PoolOutcome<I, T>
    where
        I: Clone + Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let f = Arc::new(f);
        let mut tasks: JoinSet<(usize, Result<T>)> = JoinSet::new();
        let mut results: Vec<Option<Result<T>>> = items.iter().map(|_| None).collect();
        let mut started = vec![false; items.len()];
        let mut cancelled = false;

        for (index, item) in items.iter().cloned().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    cancelled = true;
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            started[index] = true;
            let f = Arc::clone(&f);
            tasks.spawn(async move {
                let _permit = permit;
                (index, f(item).await)
            });
        }

        if cancelled {
            tasks.abort_all();
        }

        loop {
            let joined = tokio::select! {
                biased;
                _ = ctx.cancelled(), if !cancelled => {
                    cancelled = true;
                    tasks.abort_all();
                    continue;
                }
                joined = tasks.join_next() => joined,
            };

            match joined {
                None => break,
                Some(Ok((index, result))) => results[index] = Some(result),
                Some(Err(err)) if err.is_cancelled() => {}
                Some(Err(err)) => warn!(error = %err, "Pool task panicked"),
            }
        }

        let mut outcome = PoolOutcome {
            completed: Vec::new(),
            interrupted: Vec::new(),
            not_started: Vec::new(),
            cancelled,
        };
        for ((item, result), started) in items.into_iter().zip(results).zip(started) {
            match result {
                Some(result) => outcome.completed.push((item, result)),
                None if started => outcome.interrupted.push(item),
                None => outcome.not_started.push(item),
            }
        }

        debug!(
            completed = outcome.completed.len(),
            interrupted = outcome.interrupted.len(),
            not_started = outcome.not_started.len(),
            cancelled,
            "Pool run finished"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockwarden_util::GovernanceError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn results_keep_input_order_and_failures_do_not_stop_the_batch() {
        let pool = WorkerPool::new(3);
        let ctx = RunContext::detached(Duration::from_secs(60));

        let outcome = pool
            .run((0..10u64).collect(), &ctx, |n| async move {
                tokio::time::sleep(Duration::from_millis(10 - n)).await;
                if n == 4 {
                    Err(GovernanceError::remote("item 4 failed"))
                } else {
                    Ok(n * 2)
                }
            })
            .await;

        assert!(!outcome.cancelled);
        assert_eq!(outcome.completed.len(), 10);
        assert_eq!(outcome.unfinished(), 0);
        for (i, (item, result)) in outcome.completed.iter().enumerate() {
            assert_eq!(*item, i as u64);
            match result {
                Ok(v) => assert_eq!(*v, item * 2),
                Err(_) => assert_eq!(*item, 4),
            }
        }
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let ctx = RunContext::detached(Duration::from_secs(60));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (flight, max) = (Arc::clone(&in_flight), Arc::clone(&peak));
        pool.run((0..8).collect::<Vec<u32>>(), &ctx, move |_| {
            let (flight, max) = (Arc::clone(&flight), Arc::clone(&max));
            async move {
                let now = flight.fetch_add(1, Ordering::SeqCst) + 1;
                max.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_and_keeps_partial_results() {
        let pool = WorkerPool::new(1);
        let ctx = RunContext::detached(Duration::from_secs(25));

        // Item i takes 10s; only the first two finish before the 25s deadline
        let outcome = pool
            .run(vec![0u32, 1, 2, 3, 4], &ctx, |n| async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(n)
            })
            .await;

        assert!(outcome.cancelled);
        let done: Vec<u32> = outcome.completed.iter().map(|(i, _)| *i).collect();
        assert_eq!(done, vec![0, 1]);
        assert_eq!(outcome.interrupted, vec![2]);
        assert_eq!(outcome.not_started, vec![3, 4]);
    }

    #[tokio::test]
    async fn empty_input() {
        let pool = WorkerPool::new(4);
        let ctx = RunContext::detached(Duration::from_secs(1));
        let outcome = pool
            .run(Vec::<u8>::new(), &ctx, |n| async move { Ok(n) })
            .await;
        assert!(outcome.completed.is_empty());
        assert!(!outcome.cancelled);
    }
}
