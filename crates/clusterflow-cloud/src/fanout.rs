//! Fan-out / fan-in of per-VM tasks
//!
//! One tokio task per job, joined as a whole. The first genuine failure
//! cancels the shared token so the remaining jobs stop early, and the error
//! returned to the caller is chosen deterministically: role priority first
//! (see [`Role::ALL`]), then lowest index.

use crate::error::{CloudError, Result};
use crate::provisioner::VerbOutcome;
use crate::state::Role;
use futures_util::FutureExt;
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One unit of concurrent work, identified by its slot
pub struct FanOutJob<F> {
    pub role: Role,
    pub index: usize,
    pub task: F,
}

impl<F> FanOutJob<F> {
    pub fn new(role: Role, index: usize, task: F) -> Self {
        Self { role, index, task }
    }
}

/// Tally of a finished batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub applied: usize,
    pub skipped: usize,
}

/// Run every job concurrently and wait for all of them.
///
/// `token` must be the token the jobs themselves watch. It is cancelled on
/// the first genuine failure and when `deadline` elapses.
pub async fn fan_out<F>(
    jobs: Vec<FanOutJob<F>>,
    token: &CancellationToken,
    deadline: Option<Duration>,
) -> Result<FanOutReport>
where
    F: Future<Output = Result<VerbOutcome>> + Send + 'static,
{
    let mut slots = Vec::with_capacity(jobs.len());
    let mut handles = Vec::with_capacity(jobs.len());
    for job in jobs {
        let (role, index) = (job.role, job.index);
        slots.push((role, index));
        let token = token.clone();
        let task = job.task;
        handles.push(tokio::spawn(async move {
            let res = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(res) => res,
                Err(_) => Err(CloudError::StateError(format!(
                    "task for {}[{}] panicked",
                    role, index
                ))),
            };
            if let Err(e) = &res
                && !e.is_cancellation()
            {
                token.cancel();
            }
            res
        }));
    }
    tracing::debug!("Fanned out {} tasks", slots.len());

    let joined = join_all(handles);
    tokio::pin!(joined);

    let mut timed_out = false;
    let results = match deadline {
        Some(limit) => {
            tokio::select! {
                results = &mut joined => results,
                _ = tokio::time::sleep(limit) => {
                    tracing::warn!("Deadline of {:?} elapsed, cancelling {} tasks", limit, slots.len());
                    timed_out = true;
                    token.cancel();
                    joined.await
                }
            }
        }
        None => joined.await,
    };

    let mut report = FanOutReport::default();
    let mut errors: BTreeMap<(Role, usize), CloudError> = BTreeMap::new();
    for ((role, index), joined) in slots.into_iter().zip(results) {
        match joined {
            Ok(Ok(VerbOutcome::Applied)) => report.applied += 1,
            Ok(Ok(VerbOutcome::Skipped)) => report.skipped += 1,
            Ok(Err(e)) => {
                tracing::debug!(role = %role, index, "Task failed: {}", e);
                errors.insert((role, index), e);
            }
            Err(e) => {
                errors.insert(
                    (role, index),
                    CloudError::StateError(format!("task for {}[{}] did not finish: {}", role, index, e)),
                );
            }
        }
    }

    if let Some(err) = first_error(errors) {
        if timed_out && err.is_cancellation() {
            return Err(CloudError::Timeout(format!(
                "gave up after {:?}: {}",
                deadline.unwrap_or_default(),
                err
            )));
        }
        return Err(err);
    }
    Ok(report)
}

/// Genuine failures outrank the cancellations they cause
fn first_error(errors: BTreeMap<(Role, usize), CloudError>) -> Option<CloudError> {
    let mut cancelled = None;
    for (_, err) in errors {
        if !err.is_cancellation() {
            return Some(err);
        }
        cancelled.get_or_insert(err);
    }
    cancelled
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::BoxFuture;

    type Job = FanOutJob<BoxFuture<'static, Result<VerbOutcome>>>;

    fn ok(role: Role, index: usize) -> Job {
        FanOutJob::new(role, index, async { Ok(VerbOutcome::Applied) }.boxed())
    }

    fn fail(role: Role, index: usize, msg: &'static str) -> Job {
        FanOutJob::new(
            role,
            index,
            async move { Err(CloudError::ApiError(msg.to_string())) }.boxed(),
        )
    }

    /// Sleeps for `delay` unless cancelled first
    fn slow(role: Role, index: usize, delay: Duration, token: &CancellationToken) -> Job {
        let token = token.clone();
        FanOutJob::new(
            role,
            index,
            async move {
                tokio::select! {
                    _ = token.cancelled() => Err(CloudError::Cancelled("sibling failed".to_string())),
                    _ = tokio::time::sleep(delay) => Ok(VerbOutcome::Applied),
                }
            }
            .boxed(),
        )
    }

    #[tokio::test]
    async fn test_all_succeed() {
        let token = CancellationToken::new();
        let jobs = vec![ok(Role::LoadBalancer, 0), ok(Role::WorkerPlane, 0), ok(Role::WorkerPlane, 1)];
        let report = fan_out(jobs, &token, None).await.unwrap();
        assert_eq!(report.applied, 3);
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let token = CancellationToken::new();
        let report = fan_out(Vec::<Job>::new(), &token, None).await.unwrap();
        assert_eq!(report, FanOutReport::default());
    }

    #[tokio::test]
    async fn test_error_priority_by_role_then_index() {
        let token = CancellationToken::new();
        let jobs = vec![
            fail(Role::WorkerPlane, 0, "wp0"),
            fail(Role::ControlPlane, 1, "cp1"),
            fail(Role::DataStore, 2, "db2"),
            fail(Role::DataStore, 1, "db1"),
            ok(Role::LoadBalancer, 0),
        ];
        let err = fan_out(jobs, &token, None).await.unwrap_err();
        assert_eq!(err.to_string(), "API error: db1");
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_genuine_failure_outranks_cancellation() {
        let token = CancellationToken::new();
        let jobs = vec![
            slow(Role::LoadBalancer, 0, Duration::from_secs(60), &token),
            slow(Role::DataStore, 0, Duration::from_secs(60), &token),
            fail(Role::WorkerPlane, 3, "wp3"),
        ];
        let err = fan_out(jobs, &token, None).await.unwrap_err();
        assert_eq!(err.to_string(), "API error: wp3");
    }

    async fn explode() -> Result<VerbOutcome> {
        panic!("adapter bug")
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_task_cancels_siblings() {
        let token = CancellationToken::new();
        let jobs = vec![
            slow(Role::LoadBalancer, 0, Duration::from_secs(60), &token),
            FanOutJob::new(Role::WorkerPlane, 1, explode().boxed()),
        ];

        let started = tokio::time::Instant::now();
        let err = fan_out(jobs, &token, None).await.unwrap_err();
        assert!(token.is_cancelled());
        assert!(matches!(err, CloudError::StateError(_)), "got {}", err);
        assert!(err.to_string().contains("worker-plane[1]"));
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_yields_timeout() {
        let token = CancellationToken::new();
        let jobs = vec![
            slow(Role::ControlPlane, 0, Duration::from_millis(10), &token),
            slow(Role::ControlPlane, 1, Duration::from_secs(3600), &token),
        ];
        let err = fan_out(jobs, &token, Some(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Timeout(_)));
    }
}
