//! # Worker Loop
//!
//! The single consumer of the job queue and the only caller of the
//! transcription engine. One loop instance exists per GPU; constructing it
//! requires the queue's [`WorkerToken`], so a second loop against the same
//! queue cannot be started by accident.
//!
//! ## Cycle:
//! dequeue → honor any cancellation that raced the dequeue → mark the job
//! running → fetch the media from storage → transcribe → persist the
//! transcript and mark done, or capture the failure and mark failed.
//!
//! Engine failures are recorded on the job, never propagated: one bad job
//! must not block the jobs behind it or take the process down.

use crate::jobs::job::JobFailure;
use crate::jobs::queue::{JobQueue, WorkerToken};
use crate::jobs::store::{JobStore, Transition};
use crate::jobs::JobState;
use crate::storage::Storage;
use crate::transcription::TranscriptionEngine;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub struct Worker {
    store: JobStore,
    queue: JobQueue,
    engine: Arc<dyn TranscriptionEngine>,
    storage: Arc<dyn Storage>,
    // Held for the life of the loop; proves this is the only consumer.
    _token: WorkerToken,
}

impl Worker {
    pub fn new(
        token: WorkerToken,
        store: JobStore,
        queue: JobQueue,
        engine: Arc<dyn TranscriptionEngine>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self { store, queue, engine, storage, _token: token }
    }

    /// Spawn the perpetual loop. The handle completes once the queue is
    /// closed and drained, so shutdown can join it.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Worker loop started");
            while let Some(id) = self.queue.dequeue().await {
                self.process(id).await;
            }
            tracing::info!("Worker loop stopped");
        })
    }

    async fn process(&self, id: Uuid) {
        // The record can be gone by now (rolled-back submit, eviction).
        let job = match self.store.get(id) {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "Dequeued job has no record, skipping");
                return;
            }
        };

        // Cooperative cancellation point: a cancel that raced our dequeue
        // left the job queued with the flag set. This is the last moment
        // it can be honored; the engine call is not interruptible.
        if job.cancel_requested && job.state == JobState::Queued {
            match self.store.transition(id, Transition::Canceled(JobFailure::canceled())) {
                Ok(_) => tracing::info!(job_id = %id, "Canceled job before it started"),
                Err(e) => tracing::error!(job_id = %id, error = %e, "Failed to cancel dequeued job"),
            }
            return;
        }

        if let Err(e) = self.store.transition(id, Transition::Started) {
            // Lost a race (e.g. canceled between our check and here); the
            // job is not ours to run anymore.
            tracing::error!(job_id = %id, error = %e, "Could not mark job running, skipping");
            return;
        }
        tracing::info!(job_id = %id, input = %job.input_ref, "Transcription started");

        let outcome = self.run_job(&job.input_ref).await;

        let transition = match outcome {
            Ok(result_ref) => Transition::Completed(result_ref),
            Err(failure) => {
                tracing::warn!(job_id = %id, error = %failure, "Transcription failed");
                Transition::Failed(failure)
            }
        };
        match self.store.transition(id, transition) {
            Ok(job) => {
                tracing::info!(job_id = %id, state = %job.state, "Transcription finished")
            }
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Failed to record job outcome")
            }
        }
    }

    /// Fetch → transcribe → persist. Every failure mode collapses into a
    /// structured `JobFailure` for the record.
    async fn run_job(
        &self,
        input_ref: &crate::storage::StorageRef,
    ) -> Result<crate::storage::StorageRef, JobFailure> {
        let media = self
            .storage
            .get(input_ref)
            .await
            .map_err(|e| JobFailure::storage(format!("failed to read uploaded media: {}", e)))?;

        let transcript = self
            .engine
            .transcribe(&media)
            .await
            .map_err(|e| JobFailure::engine(e.message))?;

        self.storage
            .put(&transcript, "transcript.txt")
            .await
            .map_err(|e| JobFailure::storage(format!("failed to persist transcript: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testing::{GatedEngine, StubEngine};
    use crate::storage::{MemoryStorage, StorageRef};
    use std::time::Duration;

    struct Harness {
        store: JobStore,
        queue: JobQueue,
        storage: Arc<MemoryStorage>,
        handle: JoinHandle<()>,
    }

    fn start_worker(engine: Arc<dyn TranscriptionEngine>) -> Harness {
        let store = JobStore::new();
        let queue = JobQueue::new(8);
        let storage = Arc::new(MemoryStorage::new());
        let token = queue.take_worker_token().unwrap();
        let worker = Worker::new(
            token,
            store.clone(),
            queue.clone(),
            engine,
            storage.clone(),
        );
        let handle = worker.spawn();
        Harness { store, queue, storage, handle }
    }

    async fn submit(h: &Harness, bytes: &[u8]) -> Uuid {
        let input_ref = h.storage.put(bytes, "in.wav").await.unwrap();
        let job = h.store.create(input_ref);
        h.queue.enqueue(job.id).unwrap();
        job.id
    }

    async fn wait_for_terminal(h: &Harness, id: Uuid) -> crate::jobs::Job {
        let mut rx = h.store.subscribe(id).unwrap();
        loop {
            if rx.borrow().is_terminal() {
                return h.store.get(id).unwrap();
            }
            rx.changed().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_successful_job_reaches_done_with_result() {
        let h = start_worker(Arc::new(StubEngine::ok()));
        let id = submit(&h, b"some audio").await;

        let job = wait_for_terminal(&h, id).await;
        assert_eq!(job.state, JobState::Done);
        let result_ref = job.result_ref.expect("done job must carry a result ref");
        let transcript = h.storage.get(&result_ref).await.unwrap();
        assert_eq!(transcript, StubEngine::TRANSCRIPT);
        assert!(job.error.is_none());

        h.queue.close();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_engine_failure_is_captured_and_loop_survives() {
        let h = start_worker(Arc::new(StubEngine::failing_first(1)));

        let first = submit(&h, b"bad audio").await;
        let failed = wait_for_terminal(&h, first).await;
        assert_eq!(failed.state, JobState::Failed);
        assert!(failed.result_ref.is_none());
        let failure = failed.error.unwrap();
        assert_eq!(failure.kind, "engine_failure");

        // A subsequent job is still processed normally
        let second = submit(&h, b"good audio").await;
        let done = wait_for_terminal(&h, second).await;
        assert_eq!(done.state, JobState::Done);

        h.queue.close();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_at_most_one_job_running() {
        let (engine, release) = GatedEngine::new();
        let engine = Arc::new(engine);
        let h = start_worker(engine.clone());

        let a = submit(&h, b"a").await;
        let b = submit(&h, b"b").await;
        let c = submit(&h, b"c").await;

        // Let all three run to completion, one gate release at a time
        for _ in 0..3 {
            release.add_permits(1);
        }
        for id in [a, b, c] {
            let job = wait_for_terminal(&h, id).await;
            assert_eq!(job.state, JobState::Done);
        }
        assert_eq!(engine.max_running(), 1);

        h.queue.close();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_flag_honored_after_dequeue() {
        let (engine, release) = GatedEngine::new();
        let h = start_worker(Arc::new(engine));

        // First job occupies the worker at the gate
        let blocker = submit(&h, b"block").await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.store.get(blocker).unwrap().state, JobState::Running);

        // Second job: mark cancel_requested while it still sits in the
        // queue, simulating the cancel/dequeue race
        let victim = submit(&h, b"victim").await;
        h.store.request_cancel(victim).unwrap();

        release.add_permits(2);
        let job = wait_for_terminal(&h, victim).await;
        assert_eq!(job.state, JobState::Canceled);
        assert_eq!(job.error.unwrap().kind, "canceled");
        assert!(job.result_ref.is_none());

        h.queue.close();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_input_blob_fails_job() {
        let h = start_worker(Arc::new(StubEngine::ok()));

        // Record points at a blob that was never stored
        let job = h.store.create(StorageRef::from("missing-blob"));
        h.queue.enqueue(job.id).unwrap();

        let finished = wait_for_terminal(&h, job.id).await;
        assert_eq!(finished.state, JobState::Failed);
        assert_eq!(finished.error.unwrap().kind, "storage_failure");

        h.queue.close();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_dequeued_id_without_record_is_skipped() {
        let h = start_worker(Arc::new(StubEngine::ok()));

        let ghost = Uuid::new_v4();
        h.queue.enqueue(ghost).unwrap();
        // The loop must survive the ghost and process real work after it
        let real = submit(&h, b"real").await;
        let job = wait_for_terminal(&h, real).await;
        assert_eq!(job.state, JobState::Done);

        h.queue.close();
        h.handle.await.unwrap();
    }
}
