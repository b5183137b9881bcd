//! # Job Store
//!
//! Authoritative, concurrently accessible map from job id to job record.
//! This is the single source of truth for job status and results: HTTP
//! handlers read it, the worker loop writes it, and neither ever blocks
//! on the other for longer than a map operation.
//!
//! ## Thread Safety:
//! The map sits behind `Arc<std::sync::RwLock<…>>` — the same pattern the
//! rest of the application state uses. The lock is only ever held for
//! synchronous map work, never across an `.await`, so a std lock is both
//! safe and cheaper than an async one. All transitions for one id go
//! through the single write lock, which makes them linearizable per id.

use crate::error::{AppError, AppResult};
use crate::jobs::job::{Job, JobFailure, JobState};
use crate::storage::StorageRef;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use uuid::Uuid;

/// A state change applied through [`JobStore::transition`].
///
/// Each variant bundles the target state with the fields that must be set
/// atomically alongside it, so a job can never be observed `Done` without
/// its `result_ref` or `Failed` without its `error`.
#[derive(Debug, Clone)]
pub enum Transition {
    /// Queued -> Running; stamps `started_at`
    Started,
    /// Running -> Done; stores the transcript reference, stamps `finished_at`
    Completed(StorageRef),
    /// Running -> Failed; stores the captured failure, stamps `finished_at`
    Failed(JobFailure),
    /// Queued -> Canceled; stores a cancellation marker, stamps `finished_at`
    Canceled(JobFailure),
}

impl Transition {
    fn target_state(&self) -> JobState {
        match self {
            Transition::Started => JobState::Running,
            Transition::Completed(_) => JobState::Done,
            Transition::Failed(_) => JobState::Failed,
            Transition::Canceled(_) => JobState::Canceled,
        }
    }
}

/// Internal record: the job plus its state observer channel.
struct JobRecord {
    job: Job,
    /// Observer hook so a push notification layer can be added later
    /// without touching the state machine. The store keeps the sender
    /// alive for the life of the record.
    state_tx: watch::Sender<JobState>,
}

/// Shared handle to the job map. Cheap to clone.
#[derive(Clone)]
pub struct JobStore {
    records: Arc<RwLock<HashMap<Uuid, JobRecord>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self { records: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Allocate a fresh id and insert a record in state `Queued`.
    pub fn create(&self, input_ref: StorageRef) -> Job {
        let job = Job::new(input_ref);
        let (state_tx, _) = watch::channel(job.state);
        let mut records = self.records.write().unwrap();
        records.insert(job.id, JobRecord { job: job.clone(), state_tx });
        job
    }

    /// Snapshot of a job record.
    pub fn get(&self, id: Uuid) -> AppResult<Job> {
        let records = self.records.read().unwrap();
        records
            .get(&id)
            .map(|r| r.job.clone())
            .ok_or_else(|| AppError::NotFound(format!("No job with id {}", id)))
    }

    /// Atomically apply a state transition and its associated fields.
    ///
    /// Fails with `IllegalTransition` when the target state is not reachable
    /// from the record's current state, leaving the record untouched. That
    /// failure is a core defect (or a lost race), never a caller mistake.
    pub fn transition(&self, id: Uuid, transition: Transition) -> AppResult<Job> {
        let mut records = self.records.write().unwrap();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("No job with id {}", id)))?;

        let target = transition.target_state();
        if !record.job.state.can_transition_to(target) {
            return Err(AppError::IllegalTransition {
                id,
                from: record.job.state,
                to: target,
            });
        }

        let now = Utc::now();
        match transition {
            Transition::Started => {
                record.job.started_at = Some(now);
            }
            Transition::Completed(result_ref) => {
                record.job.result_ref = Some(result_ref);
                record.job.finished_at = Some(now);
            }
            Transition::Failed(failure) | Transition::Canceled(failure) => {
                record.job.error = Some(failure);
                record.job.finished_at = Some(now);
            }
        }
        record.job.state = target;

        // Observers may all be gone; that's fine.
        let _ = record.state_tx.send(target);

        tracing::debug!(job_id = %id, state = %target, "Job transitioned");
        Ok(record.job.clone())
    }

    /// Record a best-effort cancellation request without a state change.
    /// Used for jobs that are already running: the worker checks the flag
    /// at its cooperative points, but the engine call itself cannot be
    /// interrupted.
    pub fn request_cancel(&self, id: Uuid) -> AppResult<Job> {
        let mut records = self.records.write().unwrap();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("No job with id {}", id)))?;
        record.job.cancel_requested = true;
        Ok(record.job.clone())
    }

    /// Watch a job's state changes. Receivers see the current state
    /// immediately and every subsequent transition.
    pub fn subscribe(&self, id: Uuid) -> AppResult<watch::Receiver<JobState>> {
        let records = self.records.read().unwrap();
        records
            .get(&id)
            .map(|r| r.state_tx.subscribe())
            .ok_or_else(|| AppError::NotFound(format!("No job with id {}", id)))
    }

    /// Remove a record outright. Only used to roll back a submission whose
    /// enqueue was rejected, so no half-created job is left behind.
    pub fn remove(&self, id: Uuid) -> Option<Job> {
        let mut records = self.records.write().unwrap();
        records.remove(&id).map(|r| r.job)
    }

    /// Evict terminal jobs whose `finished_at` is older than `max_age`.
    /// Returns the number of evicted records. Queued and running jobs are
    /// never touched.
    pub fn evict_terminal_older_than(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut records = self.records.write().unwrap();
        let before = records.len();
        records.retain(|_, r| {
            if !r.job.state.is_terminal() {
                return true;
            }
            match r.job.finished_at {
                Some(finished) => finished > cutoff,
                None => true,
            }
        });
        before - records.len()
    }

    /// Number of jobs currently in each state (for health/metrics).
    pub fn counts_by_state(&self) -> HashMap<JobState, usize> {
        let records = self.records.read().unwrap();
        let mut counts = HashMap::new();
        for record in records.values() {
            *counts.entry(record.job.state).or_insert(0) += 1;
        }
        counts
    }

    /// Total number of tracked records.
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_job() -> (JobStore, Job) {
        let store = JobStore::new();
        let job = store.create(StorageRef::from("uploads/a.wav"));
        (store, job)
    }

    #[test]
    fn test_create_and_get() {
        let (store, job) = store_with_job();
        let fetched = store.get(job.id).unwrap();
        assert_eq!(fetched.id, job.id);
        assert_eq!(fetched.state, JobState::Queued);
    }

    #[test]
    fn test_get_unknown_id_is_not_found() {
        let store = JobStore::new();
        assert!(matches!(store.get(Uuid::new_v4()), Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_full_success_lifecycle() {
        let (store, job) = store_with_job();

        let running = store.transition(job.id, Transition::Started).unwrap();
        assert_eq!(running.state, JobState::Running);
        assert!(running.started_at.is_some());

        let done = store
            .transition(job.id, Transition::Completed(StorageRef::from("outputs/a.txt")))
            .unwrap();
        assert_eq!(done.state, JobState::Done);
        assert_eq!(done.result_ref, Some(StorageRef::from("outputs/a.txt")));
        assert!(done.error.is_none());
        assert!(done.finished_at.is_some());
    }

    #[test]
    fn test_failure_sets_error_not_result() {
        let (store, job) = store_with_job();
        store.transition(job.id, Transition::Started).unwrap();
        let failed = store
            .transition(job.id, Transition::Failed(JobFailure::engine("gpu fell off")))
            .unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert!(failed.result_ref.is_none());
        assert_eq!(failed.error.unwrap().kind, "engine_failure");
    }

    #[test]
    fn test_illegal_transition_rejected_and_state_unchanged() {
        let (store, job) = store_with_job();

        // Queued -> Done skips Running
        let err = store
            .transition(job.id, Transition::Completed(StorageRef::from("x")))
            .unwrap_err();
        assert!(matches!(err, AppError::IllegalTransition { .. }));
        assert_eq!(store.get(job.id).unwrap().state, JobState::Queued);

        // Terminal states are final
        store.transition(job.id, Transition::Canceled(JobFailure::canceled())).unwrap();
        let err = store.transition(job.id, Transition::Started).unwrap_err();
        assert!(matches!(err, AppError::IllegalTransition { .. }));
        assert_eq!(store.get(job.id).unwrap().state, JobState::Canceled);
    }

    #[test]
    fn test_request_cancel_sets_flag_only() {
        let (store, job) = store_with_job();
        store.transition(job.id, Transition::Started).unwrap();
        let updated = store.request_cancel(job.id).unwrap();
        assert!(updated.cancel_requested);
        assert_eq!(updated.state, JobState::Running);
    }

    #[tokio::test]
    async fn test_subscribe_observes_transitions() {
        let (store, job) = store_with_job();
        let mut rx = store.subscribe(job.id).unwrap();
        assert_eq!(*rx.borrow(), JobState::Queued);

        store.transition(job.id, Transition::Started).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), JobState::Running);
    }

    #[test]
    fn test_eviction_spares_live_jobs() {
        let (store, queued) = store_with_job();
        let finished = store.create(StorageRef::from("uploads/b.wav"));
        store.transition(finished.id, Transition::Started).unwrap();
        store
            .transition(finished.id, Transition::Completed(StorageRef::from("outputs/b.txt")))
            .unwrap();

        // Nothing is old enough yet
        assert_eq!(store.evict_terminal_older_than(Duration::hours(1)), 0);

        // With a zero retention window, only the terminal job goes
        assert_eq!(store.evict_terminal_older_than(Duration::zero()), 1);
        assert!(store.get(queued.id).is_ok());
        assert!(matches!(store.get(finished.id), Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_counts_by_state() {
        let (store, a) = store_with_job();
        let _b = store.create(StorageRef::from("uploads/b.wav"));
        store.transition(a.id, Transition::Started).unwrap();

        let counts = store.counts_by_state();
        assert_eq!(counts.get(&JobState::Queued), Some(&1));
        assert_eq!(counts.get(&JobState::Running), Some(&1));
    }
}
