use crate::error::Result;
use futures_util::stream::{self, StreamExt};
use std::future::Future;

/// Runs `op` over `items` with at most `concurrency` in flight, collecting
/// every outcome. Settled-all semantics: per-item failures are returned,
/// never raised, so one bad item cannot abort a phase.
pub async fn settle_all<T, O, F, Fut>(items: Vec<T>, concurrency: usize, op: F) -> Vec<Result<O>>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<O>>,
{
    stream::iter(items.into_iter().map(|item| op(item)))
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
}

/// Splits settled outcomes into successes and failures.
pub fn partition_settled<O>(outcomes: Vec<Result<O>>) -> (Vec<O>, Vec<crate::error::Error>) {
    let mut successes = Vec::new();
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(value) => successes.push(value),
            Err(err) => failures.push(err),
        }
    }
    (successes, failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn settle_all_collects_failures_without_aborting() {
        let outcomes = settle_all(vec![1, 2, 3, 4], 2, |n| async move {
            if n % 2 == 0 {
                Ok(n * 10)
            } else {
                Err(crate::err!("odd item {n}"))
            }
        })
        .await;

        let (successes, failures) = partition_settled(outcomes);
        assert_eq!(successes.len(), 2);
        assert_eq!(failures.len(), 2);
    }

    #[tokio::test]
    async fn concurrency_ceiling_is_respected() {
        let inflight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let outcomes = settle_all(vec![(); 20], 5, |_| async {
            let current = inflight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(current, Ordering::SeqCst);
            tokio::task::yield_now().await;
            inflight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert_eq!(outcomes.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 5);
    }
}
