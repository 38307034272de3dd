//! Durable FIFO job queue with retry, backoff and dead-lettering
//!
//! Dispatch order and reservations live in memory; every job mutation is
//! mirrored to the metadata store so waiting and delayed jobs survive a
//! restart (previously active jobs reload as waiting).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::storage::MetadataStore;
use crate::types::job::{fail_codes, JobError, JobState, ProcessingJob, QueueCounts};

pub struct ProcessingQueue {
    store: Arc<MetadataStore>,
    config: QueueConfig,
    jobs: DashMap<Uuid, ProcessingJob>,
    /// FIFO of runnable job ids
    ready: Mutex<VecDeque<Uuid>>,
    /// Reserve-time lock: document id -> active job id
    active_documents: DashMap<Uuid, Uuid>,
    notify: Notify,
}

impl ProcessingQueue {
    /// Create the queue and recover unfinished jobs from the store.
    pub fn new(store: Arc<MetadataStore>, config: QueueConfig) -> Result<Self> {
        let queue = Self {
            store,
            config,
            jobs: DashMap::new(),
            ready: Mutex::new(VecDeque::new()),
            active_documents: DashMap::new(),
            notify: Notify::new(),
        };

        let recovered = queue.store.load_unfinished_jobs()?;
        let count = recovered.len();
        for job in recovered {
            let id = job.id;
            let runnable = job.state == JobState::Waiting;
            queue.jobs.insert(id, job);
            if runnable {
                queue.ready.lock().push_back(id);
            }
        }
        if count > 0 {
            tracing::info!(jobs = count, "recovered unfinished queue jobs");
        }

        Ok(queue)
    }

    /// Add a job at the tail of the queue.
    pub fn enqueue(&self, mut job: ProcessingJob) -> Result<Uuid> {
        job.state = JobState::Waiting;
        job.max_attempts = self.config.retry_max_attempts;
        let id = job.id;

        self.store.upsert_job(&job)?;
        self.jobs.insert(id, job);
        self.ready.lock().push_back(id);
        self.notify.notify_waiters();

        tracing::debug!(job_id = %id, "job enqueued");
        Ok(id)
    }

    /// Reserve the next runnable job, honoring FIFO order and the
    /// one-active-job-per-document lock. Records the delivery attempt and
    /// the visibility deadline.
    pub fn reserve(&self) -> Result<Option<ProcessingJob>> {
        let mut ready = self.ready.lock();
        let mut skipped: Vec<Uuid> = Vec::new();
        let mut reserved: Option<ProcessingJob> = None;

        while let Some(id) = ready.pop_front() {
            let Some(mut entry) = self.jobs.get_mut(&id) else {
                continue; // pruned
            };
            if entry.state != JobState::Waiting {
                continue;
            }

            if self.active_documents.contains_key(&entry.document_id) {
                // Another delivery for this document is in flight; keep the
                // job queued without losing its position relative to peers.
                skipped.push(id);
                continue;
            }

            entry.state = JobState::Active;
            entry.attempts_made += 1;
            let timeout = ChronoDuration::from_std(self.config.job_timeout())
                .unwrap_or_else(|_| ChronoDuration::seconds(300));
            entry.reserved_until = Some(Utc::now() + timeout);
            self.active_documents.insert(entry.document_id, id);

            let job = entry.clone();
            drop(entry);
            self.store.upsert_job(&job)?;
            reserved = Some(job);
            break;
        }

        // Preserve relative order of the jobs we stepped over.
        for id in skipped.into_iter().rev() {
            ready.push_front(id);
        }

        Ok(reserved)
    }

    /// Mark a job done and release its document lock.
    pub fn complete(&self, job_id: Uuid) -> Result<()> {
        let Some(mut entry) = self.jobs.get_mut(&job_id) else {
            return Err(Error::Internal(format!("unknown job {}", job_id)));
        };
        entry.state = JobState::Completed;
        entry.reserved_until = None;
        entry.finished_at = Some(Utc::now());
        let job = entry.clone();
        drop(entry);

        self.active_documents.remove(&job.document_id);
        self.store.upsert_job(&job)?;
        self.notify.notify_waiters();
        Ok(())
    }

    /// Record a failed delivery. Permanent errors (flagged by the caller or
    /// recognized by code) dead-letter immediately; transient errors re-run
    /// after exponential backoff until the attempt budget is spent.
    pub fn fail(&self, job_id: Uuid, error: JobError, permanent: bool) -> Result<ProcessingJob> {
        let Some(mut entry) = self.jobs.get_mut(&job_id) else {
            return Err(Error::Internal(format!("unknown job {}", job_id)));
        };

        let is_permanent = permanent || error.is_permanent();
        let exhausted = entry.attempts_made >= entry.max_attempts;

        entry.last_error = Some(error);
        entry.reserved_until = None;

        if is_permanent || exhausted {
            entry.state = JobState::Failed;
            entry.finished_at = Some(Utc::now());
        } else {
            entry.state = JobState::Delayed;
            let backoff = ChronoDuration::from_std(self.config.backoff_for_attempt(entry.attempts_made))
                .unwrap_or_else(|_| ChronoDuration::seconds(5));
            entry.next_run_at = Utc::now() + backoff;
        }

        let job = entry.clone();
        drop(entry);

        self.active_documents.remove(&job.document_id);
        self.store.upsert_job(&job)?;
        self.notify.notify_waiters();
        Ok(job)
    }

    pub fn get_job(&self, job_id: Uuid) -> Option<ProcessingJob> {
        self.jobs.get(&job_id).map(|j| j.clone())
    }

    /// The active job currently holding a document's lock, if any.
    pub fn active_job_for(&self, document_id: Uuid) -> Option<ProcessingJob> {
        let job_id = *self.active_documents.get(&document_id)?;
        self.get_job(job_id)
    }

    pub fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for entry in self.jobs.iter() {
            match entry.state {
                JobState::Waiting => counts.waiting += 1,
                JobState::Active => counts.active += 1,
                JobState::Delayed => counts.delayed += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Snapshot of the most recent jobs, newest first.
    pub fn recent_jobs(&self, limit: usize) -> Vec<ProcessingJob> {
        let mut jobs: Vec<ProcessingJob> = self.jobs.iter().map(|e| e.clone()).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        jobs
    }

    /// Drop every waiting and delayed job (dead-lettered with a drain code).
    pub fn drain(&self) -> Result<usize> {
        let ids: Vec<Uuid> = self
            .jobs
            .iter()
            .filter(|e| matches!(e.state, JobState::Waiting | JobState::Delayed))
            .map(|e| e.id)
            .collect();

        for id in &ids {
            if let Some(mut entry) = self.jobs.get_mut(id) {
                entry.state = JobState::Failed;
                entry.finished_at = Some(Utc::now());
                entry.last_error = Some(JobError::new("DRAINED", "queue drained"));
                let job = entry.clone();
                drop(entry);
                self.store.upsert_job(&job)?;
            }
        }
        self.ready.lock().clear();
        Ok(ids.len())
    }

    /// Periodic maintenance at an injected clock: promote due delayed jobs,
    /// requeue expired reservations, apply the retention policy.
    pub fn tick_at(&self, now: DateTime<Utc>) -> Result<()> {
        let mut runnable: Vec<Uuid> = Vec::new();

        for mut entry in self.jobs.iter_mut() {
            match entry.state {
                JobState::Delayed if entry.next_run_at <= now => {
                    entry.state = JobState::Waiting;
                    runnable.push(entry.id);
                }
                JobState::Active => {
                    let expired = entry.reserved_until.map(|t| t <= now).unwrap_or(false);
                    if expired {
                        // Visibility timeout: the attempt was already
                        // counted at reservation.
                        self.active_documents.remove(&entry.document_id);
                        entry.reserved_until = None;
                        entry.last_error =
                            Some(JobError::new(fail_codes::TIMEOUT, "reservation expired"));
                        if entry.attempts_made >= entry.max_attempts {
                            entry.state = JobState::Failed;
                            entry.finished_at = Some(now);
                            tracing::warn!(job_id = %entry.id, "job dead-lettered after timeout");
                        } else {
                            entry.state = JobState::Waiting;
                            runnable.push(entry.id);
                            tracing::warn!(job_id = %entry.id, "reservation expired; job requeued");
                        }
                    }
                }
                _ => {}
            }
        }

        if !runnable.is_empty() {
            let mut ready = self.ready.lock();
            for id in &runnable {
                ready.push_back(*id);
                if let Some(job) = self.jobs.get(id) {
                    let _ = self.store.upsert_job(&job);
                }
            }
            drop(ready);
            self.notify.notify_waiters();
        }

        // Retention: completed kept 1h or last N, failed kept 24h.
        let completed_cutoff =
            now - ChronoDuration::seconds(self.config.completed_retention_secs as i64);
        let failed_cutoff = now - ChronoDuration::seconds(self.config.failed_retention_secs as i64);
        self.store.prune_jobs(
            completed_cutoff,
            self.config.completed_retention_count,
            failed_cutoff,
        )?;
        self.jobs.retain(|_, job| match job.state {
            JobState::Completed => job
                .finished_at
                .map(|t| t > completed_cutoff)
                .unwrap_or(true),
            JobState::Failed => job.finished_at.map(|t| t > failed_cutoff).unwrap_or(true),
            _ => true,
        });

        Ok(())
    }

    pub fn tick(&self) -> Result<()> {
        self.tick_at(Utc::now())
    }

    /// Release every active reservation back to the queue (worker shutdown).
    pub fn release_active(&self) -> Result<usize> {
        let mut released = 0usize;
        for mut entry in self.jobs.iter_mut() {
            if entry.state == JobState::Active {
                entry.state = JobState::Waiting;
                entry.reserved_until = None;
                self.active_documents.remove(&entry.document_id);
                self.ready.lock().push_back(entry.id);
                let job = entry.clone();
                self.store.upsert_job(&job)?;
                released += 1;
            }
        }
        if released > 0 {
            self.notify.notify_waiters();
        }
        Ok(released)
    }

    /// Wait for queue activity (new jobs, completions, promotions).
    pub async fn wait_for_work(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::types::document::FileFormat;
    use crate::types::profile::ProfileConfig;

    fn queue() -> ProcessingQueue {
        let store = Arc::new(MetadataStore::in_memory().unwrap());
        ProcessingQueue::new(store, QueueConfig::default()).unwrap()
    }

    fn job(document_id: Uuid) -> ProcessingJob {
        ProcessingJob::new(
            document_id,
            "/tmp/file".into(),
            FileFormat::Pdf,
            ProfileConfig::from_app_config(&AppConfig::default()),
            3,
        )
    }

    #[test]
    fn fifo_reserve_and_complete() {
        let q = queue();
        let a = q.enqueue(job(Uuid::new_v4())).unwrap();
        let b = q.enqueue(job(Uuid::new_v4())).unwrap();

        let first = q.reserve().unwrap().unwrap();
        assert_eq!(first.id, a);
        assert_eq!(first.attempts_made, 1);
        assert!(first.reserved_until.is_some());

        let second = q.reserve().unwrap().unwrap();
        assert_eq!(second.id, b);

        q.complete(a).unwrap();
        q.complete(b).unwrap();
        let counts = q.counts();
        assert_eq!(counts.completed, 2);
        assert_eq!(counts.active, 0);
    }

    #[test]
    fn one_active_job_per_document() {
        let q = queue();
        let doc = Uuid::new_v4();
        q.enqueue(job(doc)).unwrap();
        let second_id = q.enqueue(job(doc)).unwrap();
        let other = q.enqueue(job(Uuid::new_v4())).unwrap();

        let first = q.reserve().unwrap().unwrap();
        assert_eq!(first.document_id, doc);

        // The same document is locked; the next reservation skips to the
        // other document's job without reordering the skipped one away.
        let next = q.reserve().unwrap().unwrap();
        assert_eq!(next.id, other);
        assert!(q.reserve().unwrap().is_none());

        q.complete(first.id).unwrap();
        let resumed = q.reserve().unwrap().unwrap();
        assert_eq!(resumed.id, second_id);
    }

    #[test]
    fn transient_failure_backs_off_exponentially() {
        let q = queue();
        let id = q.enqueue(job(Uuid::new_v4())).unwrap();

        // Attempt 1 fails -> delayed by 5s.
        let reserved = q.reserve().unwrap().unwrap();
        let before = Utc::now();
        let failed = q
            .fail(reserved.id, JobError::new("TIMEOUT", "worker timeout"), false)
            .unwrap();
        assert_eq!(failed.state, JobState::Delayed);
        let delay = (failed.next_run_at - before).num_milliseconds();
        assert!((4_500..=5_500).contains(&delay), "delay was {}ms", delay);

        // Not runnable yet.
        q.tick_at(Utc::now()).unwrap();
        assert!(q.reserve().unwrap().is_none());

        // Once due, it runs again; attempt 2 failure backs off 10s.
        q.tick_at(Utc::now() + ChronoDuration::seconds(6)).unwrap();
        let reserved = q.reserve().unwrap().unwrap();
        assert_eq!(reserved.attempts_made, 2);
        let before = Utc::now();
        let failed = q
            .fail(reserved.id, JobError::new("TIMEOUT", "again"), false)
            .unwrap();
        let delay = (failed.next_run_at - before).num_milliseconds();
        assert!((9_500..=10_500).contains(&delay), "delay was {}ms", delay);

        // Attempt 3 failure exhausts the budget.
        q.tick_at(Utc::now() + ChronoDuration::seconds(11)).unwrap();
        let reserved = q.reserve().unwrap().unwrap();
        assert_eq!(reserved.attempts_made, 3);
        let failed = q
            .fail(reserved.id, JobError::new("TIMEOUT", "still"), false)
            .unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(q.get_job(id).unwrap().state, JobState::Failed);
    }

    #[test]
    fn permanent_failure_short_circuits_retries() {
        let q = queue();
        q.enqueue(job(Uuid::new_v4())).unwrap();
        let reserved = q.reserve().unwrap().unwrap();
        let failed = q
            .fail(
                reserved.id,
                JobError::new("PASSWORD_PROTECTED", "cannot open"),
                false,
            )
            .unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.attempts_made, 1);
    }

    #[test]
    fn expired_reservation_requeues() {
        let q = queue();
        q.enqueue(job(Uuid::new_v4())).unwrap();
        let reserved = q.reserve().unwrap().unwrap();

        // Deadline passes; the job comes back as waiting with the attempt
        // already counted.
        q.tick_at(Utc::now() + ChronoDuration::minutes(6)).unwrap();
        let job = q.get_job(reserved.id).unwrap();
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.attempts_made, 1);
        assert_eq!(job.last_error.as_ref().unwrap().code, "TIMEOUT");

        let again = q.reserve().unwrap().unwrap();
        assert_eq!(again.attempts_made, 2);
    }

    #[test]
    fn drain_dead_letters_pending_work() {
        let q = queue();
        q.enqueue(job(Uuid::new_v4())).unwrap();
        q.enqueue(job(Uuid::new_v4())).unwrap();
        assert_eq!(q.drain().unwrap(), 2);
        assert!(q.reserve().unwrap().is_none());
        assert_eq!(q.counts().failed, 2);
    }

    #[test]
    fn release_active_returns_jobs_to_waiting() {
        let q = queue();
        q.enqueue(job(Uuid::new_v4())).unwrap();
        let reserved = q.reserve().unwrap().unwrap();
        assert_eq!(q.release_active().unwrap(), 1);
        let job = q.get_job(reserved.id).unwrap();
        assert_eq!(job.state, JobState::Waiting);
        assert!(q.reserve().unwrap().is_some());
    }
}
