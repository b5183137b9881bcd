//! # Job Lifecycle Core
//!
//! The subsystem that decouples "accept work" from "do work" from "fetch
//! result" under the single-GPU constraint. Everything else in the server
//! is an adapter around this module.
//!
//! ## Key Components:
//! - **Job model** (`job`): the record, its states, and the state machine
//! - **Job Store** (`store`): authoritative id → record map; source of
//!   truth for status and results
//! - **Single-Worker Queue** (`queue`): bounded FIFO admission onto the
//!   one compute resource, with backpressure
//! - **Worker Loop** (`worker`): the sole queue consumer and sole engine
//!   caller
//! - **Controller** (`controller`): the submit/status/result/cancel
//!   contract the HTTP handlers are written against

pub mod controller;
pub mod job;
pub mod queue;
pub mod store;
pub mod worker;

pub use controller::{CancelOutcome, JobController, ResultOutcome};
pub use job::{Job, JobFailure, JobState, JobSummary};
pub use queue::{JobQueue, WorkerToken};
pub use store::{JobStore, Transition};
pub use worker::Worker;
