//! Bounded fan-out with first-error cancellation

use crate::{ClientError, Result};
use futures::{future::BoxFuture, stream, Future, FutureExt, TryStreamExt};
use tokio_util::sync::CancellationToken;

/// One unit of work in a fan-out, labelled for error reporting
pub(crate) struct Job<'a> {
    target: String,
    work: BoxFuture<'a, Result<()>>,
}

impl<'a> Job<'a> {
    pub(crate) fn new(
        target: impl Into<String>,
        work: impl Future<Output = Result<()>> + Send + 'a,
    ) -> Self {
        Self {
            target: target.into(),
            work: work.boxed(),
        }
    }
}

/// Run `jobs` with at most `limit` in flight.
///
/// The first failure cancels a child of `cancel`, drops the remaining jobs and
/// is returned as [`ClientError::PropagationPartialFailure`]. Jobs that already
/// finished are not rolled back.
pub(crate) async fn fan_out(jobs: Vec<Job<'_>>, limit: usize, cancel: &CancellationToken) -> Result<()> {
    let token = cancel.child_token();
    let result = stream::iter(jobs.into_iter().map(Ok::<_, ClientError>))
        .try_for_each_concurrent(limit.max(1), |job| {
            let token = token.clone();
            async move {
                let Job { target, work } = job;
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(ClientError::Cancelled),
                    result = work => result.map_err(|e| ClientError::propagation(target, e)),
                }
            }
        })
        .await;

    if result.is_err() {
        token.cancel();
    }
    result
}

/// Await `fut` unless `cancel` fires first
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ClientError::Cancelled),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_limit_is_respected() {
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let jobs = (0..20)
            .map(|i| {
                let running = &running;
                let peak = &peak;
                Job::new(format!("job {}", i), async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        fan_out(jobs, 3, &CancellationToken::new()).await.unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_first_failure_is_attributed_and_stops_the_rest() {
        let finished = AtomicUsize::new(0);
        let finished = &finished;

        let mut jobs = vec![Job::new("bad", async { Err(ClientError::Transport("boom".into())) })];
        for i in 0..5 {
            jobs.push(Job::new(format!("slow {}", i), async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }

        let err = fan_out(jobs, 2, &CancellationToken::new()).await.unwrap_err();
        match err {
            ClientError::PropagationPartialFailure { target, .. } => assert_eq!(target, "bad"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_parent_cancellation_surfaces_as_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let jobs = vec![Job::new("never", futures::future::pending())];
        let err = fan_out(jobs, 1, &cancel).await.unwrap_err();
        assert!(matches!(err, ClientError::Cancelled));
    }
}
