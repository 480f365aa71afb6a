//! Lease-based mutual exclusion across stateless instances.
//!
//! The store row is the only correctness mechanism. The in-process set of held
//! job names is a fast local skip and cannot see other instances.

use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tracing::{debug, error, info, instrument, warn};

use govsync_core::InstanceId;

use super::types::{JobLockState, JobReport, JobResult, JobRun};
use crate::error::SyncError;
use crate::store::{JobLockStore, StoreError};

pub struct DistributedJobLock {
    store: Arc<dyn JobLockStore>,
    instance_id: InstanceId,
    held: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for DistributedJobLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedJobLock")
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

impl DistributedJobLock {
    pub fn new(store: Arc<dyn JobLockStore>, instance_id: InstanceId) -> Self {
        Self {
            store,
            instance_id,
            held: Mutex::new(HashSet::new()),
        }
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn held_locally(&self, job_name: &str) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(job_name))
            .unwrap_or(false)
    }

    fn set_held(&self, job_name: &str, held: bool) {
        let mut set = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if held {
            set.insert(job_name.to_string());
        } else {
            set.remove(job_name);
        }
    }

    /// Reclaim an expired lease, then acquire if nobody holds it.
    #[instrument(skip(self), fields(instance_id = %self.instance_id), err)]
    pub async fn try_acquire(&self, job_name: &str, lease: Duration) -> Result<bool, StoreError> {
        if self.held_locally(job_name) {
            debug!(job_name, "lease already held by this instance");
            return Ok(false);
        }
        let acquired = self
            .store
            .try_acquire_lease(job_name, &self.instance_id, Utc::now(), lease)
            .await?;
        if acquired {
            self.set_held(job_name, true);
            info!(job_name, lease_secs = lease.as_secs(), "lease acquired");
        } else {
            debug!(job_name, "lease held elsewhere");
        }
        Ok(acquired)
    }

    /// Record the outcome and give the lease up.
    ///
    /// A release after this instance's lease was reclaimed by another holder
    /// leaves the new holder's row untouched.
    #[instrument(skip(self, error_message), fields(instance_id = %self.instance_id), err)]
    pub async fn release(
        &self,
        job_name: &str,
        result: JobResult,
        items_processed: Option<u64>,
        error_message: Option<String>,
    ) -> Result<(), StoreError> {
        self.set_held(job_name, false);
        let cleared = self
            .store
            .release_lease(
                job_name,
                &self.instance_id,
                result,
                items_processed,
                error_message,
            )
            .await?;
        if cleared {
            info!(job_name, result = %result, items_processed, "lease released");
        } else {
            warn!(job_name, result = %result, "lease was reclaimed by another holder before release");
        }
        Ok(())
    }

    /// Extend a held lease to `now + lease`. Returns `false` if it was lost.
    pub async fn renew(&self, job_name: &str, lease: Duration) -> Result<bool, StoreError> {
        self.store
            .renew_lease(job_name, &self.instance_id, Utc::now(), lease)
            .await
    }

    pub async fn state(&self, job_name: &str) -> Result<Option<JobLockState>, StoreError> {
        self.store.lock_state(job_name).await
    }

    /// Acquire, run `job`, release on every exit path.
    ///
    /// While the job runs the lease is renewed every `lease / 3`. A panic in
    /// the job is recorded as a failed run before it resumes unwinding.
    pub async fn run_exclusive<T, F, Fut>(
        &self,
        job_name: &str,
        lease: Duration,
        job: F,
    ) -> Result<JobRun<T>, SyncError>
    where
        T: JobReport,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        if !self.try_acquire(job_name, lease).await? {
            return Ok(JobRun::AlreadyRunning);
        }

        let work = AssertUnwindSafe(job()).catch_unwind();
        tokio::pin!(work);

        let period = (lease / 3).max(Duration::from_millis(1));
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let outcome = loop {
            tokio::select! {
                outcome = &mut work => break outcome,
                _ = heartbeat.tick() => match self.renew(job_name, lease).await {
                    Ok(true) => debug!(job_name, "lease renewed"),
                    Ok(false) => warn!(job_name, "lease lost while job is running"),
                    Err(e) => warn!(job_name, error = %e, "lease renewal failed"),
                },
            }
        };

        match outcome {
            Ok(Ok(report)) => {
                let items = report.items_processed();
                self.release(job_name, JobResult::Success, Some(items), None)
                    .await?;
                Ok(JobRun::Completed(report))
            }
            Ok(Err(err)) => {
                error!(job_name, error = %err, "job failed");
                if let Err(release_err) = self
                    .release(job_name, JobResult::Failed, None, Some(err.to_string()))
                    .await
                {
                    error!(job_name, error = %release_err, "release after failure failed");
                }
                Err(err)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(job_name, panic = %message, "job panicked");
                if let Err(release_err) = self
                    .release(job_name, JobResult::Failed, None, Some(format!("panic: {message}")))
                    .await
                {
                    error!(job_name, error = %release_err, "release after panic failed");
                }
                std::panic::resume_unwind(panic)
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::EPOCH_SYNC_JOB;
    use crate::store::InMemorySyncStore;

    #[derive(Debug)]
    struct Count(u64);

    impl JobReport for Count {
        fn items_processed(&self) -> u64 {
            self.0
        }
    }

    fn lock_pair() -> (Arc<InMemorySyncStore>, DistributedJobLock, DistributedJobLock) {
        let store = Arc::new(InMemorySyncStore::new());
        let a = DistributedJobLock::new(store.clone(), InstanceId::parse("instance-a").unwrap());
        let b = DistributedJobLock::new(store.clone(), InstanceId::parse("instance-b").unwrap());
        (store, a, b)
    }

    #[tokio::test]
    async fn second_acquire_is_refused_for_every_job_name() {
        let (_, a, b) = lock_pair();
        for job in ["epoch-sync", "delegation-sync", "anything-else"] {
            assert!(a.try_acquire(job, Duration::from_secs(60)).await.unwrap());
            assert!(!a.try_acquire(job, Duration::from_secs(60)).await.unwrap());
            assert!(!b.try_acquire(job, Duration::from_secs(60)).await.unwrap());
        }
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimed_without_release() {
        let (_, a, b) = lock_pair();
        assert!(a.try_acquire(EPOCH_SYNC_JOB, Duration::from_millis(20)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(b.try_acquire(EPOCH_SYNC_JOB, Duration::from_secs(60)).await.unwrap());
        let state = b.state(EPOCH_SYNC_JOB).await.unwrap().unwrap();
        assert_eq!(state.locked_by.as_ref(), Some(b.instance_id()));
        assert_eq!(state.last_result, Some(JobResult::Expired));
    }

    #[tokio::test]
    async fn late_release_does_not_clear_reclaimed_lease() {
        let (_, a, b) = lock_pair();
        a.try_acquire(EPOCH_SYNC_JOB, Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        b.try_acquire(EPOCH_SYNC_JOB, Duration::from_secs(60)).await.unwrap();

        a.release(EPOCH_SYNC_JOB, JobResult::Success, Some(3), None)
            .await
            .unwrap();

        let state = b.state(EPOCH_SYNC_JOB).await.unwrap().unwrap();
        assert!(state.is_held_by(b.instance_id()));
        assert!(!a.try_acquire(EPOCH_SYNC_JOB, Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn run_exclusive_records_success_and_releases() {
        let (_, a, _) = lock_pair();
        let run = a
            .run_exclusive(EPOCH_SYNC_JOB, Duration::from_secs(60), || async { Ok(Count(7)) })
            .await
            .unwrap();
        assert!(matches!(run, JobRun::Completed(Count(7))));

        let state = a.state(EPOCH_SYNC_JOB).await.unwrap().unwrap();
        assert!(!state.is_running);
        assert_eq!(state.last_result, Some(JobResult::Success));
        assert_eq!(state.items_processed, Some(7));
    }

    #[tokio::test]
    async fn run_exclusive_releases_on_error() {
        let (_, a, b) = lock_pair();
        let result = a
            .run_exclusive(EPOCH_SYNC_JOB, Duration::from_secs(60), || async {
                Err::<Count, _>(SyncError::Store(StoreError::Storage("disk full".into())))
            })
            .await;
        assert!(result.is_err());

        let state = a.state(EPOCH_SYNC_JOB).await.unwrap().unwrap();
        assert_eq!(state.last_result, Some(JobResult::Failed));
        assert!(state.error_message.unwrap().contains("disk full"));
        assert!(b.try_acquire(EPOCH_SYNC_JOB, Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn run_exclusive_releases_on_panic() {
        let (_, a, b) = lock_pair();
        let a = Arc::new(a);
        let runner = a.clone();
        let handle = tokio::spawn(async move {
            runner
                .run_exclusive(EPOCH_SYNC_JOB, Duration::from_secs(60), || async {
                    if true {
                        panic!("exploded");
                    }
                    Ok(Count(0))
                })
                .await
        });
        assert!(handle.await.unwrap_err().is_panic());

        let state = a.state(EPOCH_SYNC_JOB).await.unwrap().unwrap();
        assert!(!state.is_running);
        assert!(state.error_message.unwrap().contains("exploded"));
        assert!(b.try_acquire(EPOCH_SYNC_JOB, Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_run_reports_already_running() {
        let (_, a, b) = lock_pair();
        assert!(a.try_acquire(EPOCH_SYNC_JOB, Duration::from_secs(60)).await.unwrap());
        let run = b
            .run_exclusive(EPOCH_SYNC_JOB, Duration::from_secs(60), || async { Ok(Count(1)) })
            .await
            .unwrap();
        assert!(run.is_already_running());
    }

    #[tokio::test]
    async fn heartbeat_keeps_a_long_job_leased() {
        let (_, a, b) = lock_pair();
        let a = Arc::new(a);
        let runner = a.clone();
        let job = tokio::spawn(async move {
            runner
                .run_exclusive(EPOCH_SYNC_JOB, Duration::from_millis(90), || async {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    Ok(Count(1))
                })
                .await
        });

        // Well past the original 90ms lease; renewals every 30ms keep it alive.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!b.try_acquire(EPOCH_SYNC_JOB, Duration::from_secs(60)).await.unwrap());

        assert!(matches!(job.await.unwrap().unwrap(), JobRun::Completed(_)));
        assert!(b.try_acquire(EPOCH_SYNC_JOB, Duration::from_secs(60)).await.unwrap());
    }
}
