//! # Job Lifecycle Controller
//!
//! The public contract of the job core: submit, status, result, cancel.
//! Composes the store and the queue and enforces state-machine legality so
//! that the HTTP layer only ever maps outcomes to transport responses.
//!
//! ## Submission atomicity:
//! `submit` creates the record first and enqueues second. When the queue
//! rejects with `QueueFull`, the freshly created record is removed again —
//! a rejected submission leaves no trace, rather than an orphaned or
//! pre-failed job.

use crate::error::{AppError, AppResult};
use crate::jobs::job::{Job, JobFailure, JobSummary};
use crate::jobs::queue::JobQueue;
use crate::jobs::store::{JobStore, Transition};
use crate::jobs::JobState;
use crate::storage::StorageRef;
use uuid::Uuid;

/// Outcome of a result query.
#[derive(Debug, Clone)]
pub enum ResultOutcome {
    /// Transcription finished; the reference resolves to the transcript
    Ready(StorageRef),
    /// Still queued or running; carries the current state for the caller
    Pending(JobState),
    /// Transcription failed or the job was canceled
    Failed(JobFailure),
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was still queued and is now terminally canceled
    Canceled,
    /// The job already left the queue; the request was recorded and will
    /// be honored only if the worker reaches a cooperative point
    CancelRequested,
}

#[derive(Clone)]
pub struct JobController {
    store: JobStore,
    queue: JobQueue,
}

impl JobController {
    pub fn new(store: JobStore, queue: JobQueue) -> Self {
        Self { store, queue }
    }

    /// Accept a new job for the uploaded media, or reject it under
    /// backpressure. On success the job is queued and will eventually be
    /// picked up by the worker loop.
    pub fn submit(&self, input_ref: StorageRef) -> AppResult<Job> {
        let job = self.store.create(input_ref);
        if let Err(e) = self.queue.enqueue(job.id) {
            // Roll the record back out so the rejected submission leaves
            // nothing behind.
            self.store.remove(job.id);
            tracing::info!(job_id = %job.id, "Submission rejected: {}", e);
            return Err(e);
        }
        tracing::info!(job_id = %job.id, queue_depth = self.queue.depth(), "Job submitted");
        Ok(job)
    }

    /// Read-only snapshot of state and timestamps, no result payload.
    pub fn status(&self, id: Uuid) -> AppResult<JobSummary> {
        self.store.get(id).map(|job| job.summary())
    }

    /// Resolve the job's result: the transcript reference once done, a
    /// pending indicator while queued/running, the captured failure when
    /// failed or canceled. Never both a result and an error.
    pub fn result(&self, id: Uuid) -> AppResult<ResultOutcome> {
        let job = self.store.get(id)?;
        match job.state {
            JobState::Queued | JobState::Running => Ok(ResultOutcome::Pending(job.state)),
            JobState::Done => match job.result_ref {
                Some(result_ref) => Ok(ResultOutcome::Ready(result_ref)),
                // Store invariant: done implies result_ref. Reaching this
                // arm is a defect, not a client-visible condition.
                None => Err(AppError::Internal(format!(
                    "job {} is done but has no result reference",
                    id
                ))),
            },
            JobState::Failed | JobState::Canceled => {
                Ok(ResultOutcome::Failed(job.error.unwrap_or_else(JobFailure::canceled)))
            }
        }
    }

    /// Cancel a job. Guaranteed while the job is still queued; best-effort
    /// once running (the engine call cannot be interrupted); `TooLate`
    /// once terminal — including repeat cancellations, which never mutate
    /// anything.
    pub fn cancel(&self, id: Uuid) -> AppResult<CancelOutcome> {
        let job = self.store.get(id)?;
        if job.state.is_terminal() {
            return Err(AppError::TooLate { id, state: job.state });
        }

        if self.queue.cancel(id) {
            // Removed before the worker ever saw it; the transition is
            // final and guaranteed.
            self.store.transition(id, Transition::Canceled(JobFailure::canceled()))?;
            tracing::info!(job_id = %id, "Job canceled while queued");
            return Ok(CancelOutcome::Canceled);
        }

        // Already dequeued. The worker honors the flag at its cooperative
        // point; past that, the job simply runs to completion.
        self.store.request_cancel(id)?;
        tracing::info!(job_id = %id, "Cancellation requested for job already off the queue");
        Ok(CancelOutcome::CancelRequested)
    }

    /// Queue depth exposed for health reporting.
    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }
}
