//! # Transcription Module
//!
//! The speech-to-text capability consumed by the worker loop. From the job
//! core's point of view the engine is opaque: media bytes go in, transcript
//! bytes come out, after a real but unpredictable latency (minutes for long
//! recordings). The core never learns anything about models or decoding.
//!
//! ## Key Components:
//! - **TranscriptionEngine**: the trait the worker loop calls — the only
//!   call site in the whole process, so the GPU is never oversubscribed
//! - **SubprocessEngine**: production implementation that shells out to the
//!   GPU transcriber command and collects its output file
//!
//! ## Cancellation:
//! The engine contract is non-cancellable by default. Once `transcribe` has
//! been entered the call runs to completion; cancellation requests arriving
//! meanwhile are recorded on the job and have no effect on the engine.

pub mod subprocess;

pub use subprocess::SubprocessEngine;

use async_trait::async_trait;
use std::fmt;

/// Failure raised by the engine, with a descriptive cause.
///
/// Captured at the worker boundary and stored on the job record; never
/// propagated as a process crash.
#[derive(Debug, Clone)]
pub struct EngineError {
    pub message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for EngineError {}

/// Opaque, long-running speech-to-text computation.
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    /// Transcribe one media file. Suspends the calling task for the full
    /// duration of the transcription.
    async fn transcribe(&self, media: &[u8]) -> Result<Vec<u8>, EngineError>;
}
