//! Bounded concurrent task runner.
//!
//! Fans a batch of async jobs out over a semaphore-bounded pool, reporting
//! progress in completion order as `[i/N] [OK|FAIL|SKIP] <id>` while the
//! returned reports stay in submission order, one per input with no silent
//! drops. Cancellation is cooperative at dispatch granularity: jobs already
//! running finish naturally, queued jobs are marked skipped. An optional
//! deadline triggers the same path once it expires.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::debug;

/// Pool sizing and deadline for one batch.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Maximum number of jobs in flight at once.
    pub max_workers: usize,
    /// Wall-clock budget for the whole batch; jobs not yet started when it
    /// expires are skipped.
    pub deadline: Option<Duration>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            deadline: None,
        }
    }
}

/// Shared cooperative cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a job was skipped instead of run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Cancelled,
    DeadlineExpired,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Cancelled => write!(f, "cancelled"),
            SkipReason::DeadlineExpired => write!(f, "run deadline expired"),
        }
    }
}

/// Outcome of one job.
#[derive(Debug)]
pub enum JobOutcome<T, E> {
    Done(T),
    Failed(E),
    Skipped(SkipReason),
}

impl<T, E> JobOutcome<T, E> {
    pub fn is_done(&self) -> bool {
        matches!(self, JobOutcome::Done(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, JobOutcome::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, JobOutcome::Skipped(_))
    }
}

/// One report slot per submitted job, in submission order.
#[derive(Debug)]
pub struct JobReport<T, E> {
    pub id: String,
    /// Time spent running the job itself, excluding queue wait. Zero for
    /// skipped jobs.
    pub elapsed: Duration,
    pub outcome: JobOutcome<T, E>,
}

/// Run `job` over every item with at most `config.max_workers` in flight.
///
/// Returns one [`JobReport`] per input item, in input order. Completion
/// order is unconstrained and is what the progress lines show.
pub async fn run_all<I, T, E, F, Fut>(
    items: Vec<I>,
    config: &RunnerConfig,
    cancel: &CancelFlag,
    id_of: impl Fn(&I) -> String,
    job: F,
) -> Vec<JobReport<T, E>>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let total = items.len();
    let semaphore = Arc::new(Semaphore::new(config.max_workers.max(1)));
    let deadline = config.deadline.map(|d| Instant::now() + d);
    let completed = AtomicUsize::new(0);
    let completed = &completed;
    let job = &job;

    debug!(
        tasks = total,
        workers = config.max_workers.max(1),
        "dispatching batch"
    );

    let futures: Vec<_> = items
        .into_iter()
        .map(|item| {
            let id = id_of(&item);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            async move {
                let mut elapsed = Duration::ZERO;
                let outcome = match semaphore.acquire().await {
                    Err(_) => JobOutcome::Skipped(SkipReason::Cancelled),
                    Ok(_permit) => {
                        if cancel.is_triggered() {
                            JobOutcome::Skipped(SkipReason::Cancelled)
                        } else if deadline.is_some_and(|d| Instant::now() >= d) {
                            cancel.trigger();
                            JobOutcome::Skipped(SkipReason::DeadlineExpired)
                        } else {
                            let started = Instant::now();
                            let result = job(item).await;
                            elapsed = started.elapsed();
                            match result {
                                Ok(value) => JobOutcome::Done(value),
                                Err(err) => JobOutcome::Failed(err),
                            }
                        }
                    }
                };
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                match &outcome {
                    JobOutcome::Done(_) => println!("[{}/{}] [OK] {}", done, total, id),
                    JobOutcome::Failed(err) => {
                        println!("[{}/{}] [FAIL] {}: {}", done, total, id, err)
                    }
                    JobOutcome::Skipped(reason) => {
                        println!("[{}/{}] [SKIP] {} ({})", done, total, id, reason)
                    }
                }
                JobReport {
                    id,
                    elapsed,
                    outcome,
                }
            }
        })
        .collect();

    join_all(futures).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_concurrency() {
        let config = RunnerConfig {
            max_workers: 3,
            deadline: None,
        };
        let cancel = CancelFlag::new();
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let reports = run_all(
            (0..10).collect::<Vec<usize>>(),
            &config,
            &cancel,
            |i| format!("job-{}", i),
            |_| async {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, String>(())
            },
        )
        .await;

        assert_eq!(reports.len(), 10);
        assert!(reports.iter().all(|r| r.outcome.is_done()));
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_one_report_per_item_with_failures() {
        let config = RunnerConfig::default();
        let cancel = CancelFlag::new();

        let reports = run_all(
            (1..=5).collect::<Vec<usize>>(),
            &config,
            &cancel,
            |i| format!("task-{}", i),
            |i| async move {
                if i == 3 {
                    Err(format!("engineered failure in task {}", i))
                } else {
                    Ok(i * 10)
                }
            },
        )
        .await;

        assert_eq!(reports.len(), 5);
        // Reports stay in submission order even though completion order may differ
        for (idx, report) in reports.iter().enumerate() {
            assert_eq!(report.id, format!("task-{}", idx + 1));
        }
        assert!(reports[2].outcome.is_failed());
        for idx in [0, 1, 3, 4] {
            assert!(reports[idx].outcome.is_done());
        }
    }

    #[tokio::test]
    async fn test_cancel_skips_queued_jobs() {
        let config = RunnerConfig {
            max_workers: 1,
            deadline: None,
        };
        let cancel = CancelFlag::new();
        let trigger = cancel.clone();

        let reports = run_all(
            (1..=4).collect::<Vec<usize>>(),
            &config,
            &cancel,
            |i| format!("task-{}", i),
            |i| {
                let trigger = trigger.clone();
                async move {
                    if i == 2 {
                        trigger.trigger();
                    }
                    Ok::<_, String>(i)
                }
            },
        )
        .await;

        assert_eq!(reports.len(), 4);
        assert!(reports[0].outcome.is_done());
        assert!(reports[1].outcome.is_done());
        assert!(reports[2].outcome.is_skipped());
        assert!(reports[3].outcome.is_skipped());
    }

    #[tokio::test]
    async fn test_expired_deadline_skips_everything() {
        let config = RunnerConfig {
            max_workers: 2,
            deadline: Some(Duration::ZERO),
        };
        let cancel = CancelFlag::new();

        let reports = run_all(
            (1..=3).collect::<Vec<usize>>(),
            &config,
            &cancel,
            |i| format!("task-{}", i),
            |i| async move { Ok::<_, String>(i) },
        )
        .await;

        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.outcome.is_skipped()));
        assert!(cancel.is_triggered());
    }
}
