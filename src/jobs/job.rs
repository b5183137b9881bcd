//! # Job Data Model
//!
//! Defines the central `Job` record plus its lifecycle state machine.
//! A job tracks one uploaded media file from submission through transcription
//! to a terminal outcome. Records are created by the controller, mutated by
//! the worker loop, and read by status/result queries.

use crate::storage::StorageRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a transcription job.
///
/// ## State machine:
/// ```text
/// Queued -> Running -> Done
///    |         \----> Failed
///    \-> Canceled
/// ```
/// `Done`, `Failed` and `Canceled` are terminal: nothing transitions out
/// of them. A running job cannot be force-canceled because the engine call
/// is opaque; cancellation of a running job is only recorded as a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting in the queue for the worker to pick it up
    Queued,
    /// Currently being transcribed (at most one job at a time)
    Running,
    /// Transcription finished, result available
    Done,
    /// Transcription failed, error captured on the record
    Failed,
    /// Removed from the queue before it started
    Canceled,
}

impl JobState {
    /// Whether a transition from `self` to `next` is legal.
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Running)
                | (JobState::Queued, JobState::Canceled)
                | (JobState::Running, JobState::Done)
                | (JobState::Running, JobState::Failed)
        )
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Canceled)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::Canceled => "canceled",
        };
        write!(f, "{}", s)
    }
}

/// Structured failure reason stored on a job record.
///
/// Captured at the worker boundary when the engine raises, or synthesized
/// for cancellations so `result()` has something meaningful to report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFailure {
    /// Machine-readable failure category ("engine_failure", "storage_failure", "canceled")
    pub kind: String,
    /// Human-readable description of what went wrong
    pub message: String,
}

impl JobFailure {
    pub fn engine(message: impl Into<String>) -> Self {
        Self { kind: "engine_failure".to_string(), message: message.into() }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self { kind: "storage_failure".to_string(), message: message.into() }
    }

    pub fn canceled() -> Self {
        Self {
            kind: "canceled".to_string(),
            message: "Job was canceled before it started".to_string(),
        }
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// One transcription request tracked through its lifecycle.
///
/// ## Field invariants:
/// - `result_ref` is `Some` if and only if `state == Done`
/// - `error` is `Some` if and only if `state` is `Failed` or `Canceled`
/// - `id` is assigned once at submission and never reused
///
/// The job only carries *references* into the storage adapter; the media
/// and transcript bytes themselves never live on the record.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    /// Unique identifier, assigned at submission
    pub id: Uuid,
    /// Current lifecycle state
    pub state: JobState,
    /// Reference to the uploaded media in the storage adapter
    pub input_ref: StorageRef,
    /// Reference to the produced transcript, set only when `Done`
    pub result_ref: Option<StorageRef>,
    /// Failure reason, set only when `Failed` (or `Canceled`)
    pub error: Option<JobFailure>,
    /// When the job was accepted
    pub submitted_at: DateTime<Utc>,
    /// When the worker started transcribing it
    pub started_at: Option<DateTime<Utc>>,
    /// When it reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,
    /// Best-effort cancellation marker for jobs already running
    pub cancel_requested: bool,
}

impl Job {
    /// Create a fresh record in the `Queued` state.
    pub fn new(input_ref: StorageRef) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: JobState::Queued,
            input_ref,
            result_ref: None,
            error: None,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            cancel_requested: false,
        }
    }

    /// Read-only snapshot served by the status endpoint (no result payload).
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            state: self.state,
            submitted_at: self.submitted_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            cancel_requested: self.cancel_requested,
            error: self.error.clone(),
        }
    }
}

/// Status snapshot of a job: state and timestamps, without the transcript.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: Uuid,
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        assert!(JobState::Queued.can_transition_to(JobState::Running));
        assert!(JobState::Queued.can_transition_to(JobState::Canceled));
        assert!(JobState::Running.can_transition_to(JobState::Done));
        assert!(JobState::Running.can_transition_to(JobState::Failed));
    }

    #[test]
    fn test_illegal_transitions() {
        // No short-circuit from queued straight to a result
        assert!(!JobState::Queued.can_transition_to(JobState::Done));
        assert!(!JobState::Queued.can_transition_to(JobState::Failed));
        // Running jobs cannot be canceled through the state machine
        assert!(!JobState::Running.can_transition_to(JobState::Canceled));
        // Terminal states are final
        for terminal in [JobState::Done, JobState::Failed, JobState::Canceled] {
            assert!(terminal.is_terminal());
            for next in [
                JobState::Queued,
                JobState::Running,
                JobState::Done,
                JobState::Failed,
                JobState::Canceled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_new_job_starts_queued() {
        let job = Job::new(StorageRef::from("uploads/test.wav"));
        assert_eq!(job.state, JobState::Queued);
        assert!(job.result_ref.is_none());
        assert!(job.error.is_none());
        assert!(job.started_at.is_none());
        assert!(!job.cancel_requested);
    }

    #[test]
    fn test_job_ids_are_unique() {
        let a = Job::new(StorageRef::from("a"));
        let b = Job::new(StorageRef::from("a"));
        assert_ne!(a.id, b.id);
    }
}
