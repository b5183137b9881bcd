//! # Subprocess Transcription Engine
//!
//! Runs the GPU transcriber as a child process. Keeping the heavy model in
//! a separate process isolates GPU memory and CUDA state from the server:
//! a transcriber crash is an engine failure on one job, not a server crash.
//!
//! ## Transcriber contract:
//! The command is invoked as
//! `<command> <input_file> --model <model> --out_format <txt|json> --overwrite`
//! with the working directory set to the engine's scratch directory. On
//! success it writes `<input stem>.<ext>` next to the input file; that file
//! is read back as the transcript.

use crate::config::EngineConfig;
use crate::transcription::{EngineError, TranscriptionEngine};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Instant;
use uuid::Uuid;

pub struct SubprocessEngine {
    config: EngineConfig,
    work_dir: PathBuf,
}

impl SubprocessEngine {
    /// Create an engine around the configured transcriber command; the
    /// scratch directory is created if missing.
    pub fn new(config: EngineConfig) -> std::io::Result<Self> {
        let work_dir = PathBuf::from(&config.work_dir);
        std::fs::create_dir_all(&work_dir)?;
        Ok(Self { config, work_dir })
    }

    fn output_extension(&self) -> &str {
        match self.config.output_format.as_str() {
            "json" => "json",
            _ => "txt",
        }
    }
}

#[async_trait]
impl TranscriptionEngine for SubprocessEngine {
    async fn transcribe(&self, media: &[u8]) -> Result<Vec<u8>, EngineError> {
        let start = Instant::now();
        let stem = format!("job-{}", Uuid::new_v4());
        let input_path = self.work_dir.join(format!("{}.media", stem));
        let output_path = self.work_dir.join(format!("{}.{}", stem, self.output_extension()));

        tokio::fs::write(&input_path, media)
            .await
            .map_err(|e| EngineError::new(format!("failed to stage input file: {}", e)))?;

        tracing::info!(
            command = %self.config.command,
            model = %self.config.model,
            input = %input_path.display(),
            "Starting transcriber subprocess"
        );

        let result = tokio::process::Command::new(&self.config.command)
            .arg(&input_path)
            .arg("--model")
            .arg(&self.config.model)
            .arg("--out_format")
            .arg(&self.config.output_format)
            .arg("--overwrite")
            .current_dir(&self.work_dir)
            .output()
            .await;

        // The staged input is scratch either way.
        let cleanup_input = tokio::fs::remove_file(&input_path).await;
        if let Err(e) = cleanup_input {
            tracing::warn!(path = %input_path.display(), error = %e, "Failed to remove staged input");
        }

        let output = result
            .map_err(|e| EngineError::new(format!("failed to run transcriber: {}", e)))?;

        if !output.stdout.is_empty() {
            tracing::debug!(stdout = %String::from_utf8_lossy(&output.stdout), "Transcriber stdout");
        }
        if !output.stderr.is_empty() {
            // The transcriber is noisy on stderr even on success; keep it for the logs.
            tracing::debug!(stderr = %String::from_utf8_lossy(&output.stderr), "Transcriber stderr");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().into_iter().rev().collect::<Vec<_>>().join("\n");
            return Err(EngineError::new(format!(
                "transcriber exited with {}: {}",
                output.status, tail
            )));
        }

        let transcript = tokio::fs::read(&output_path).await.map_err(|e| {
            EngineError::new(format!(
                "transcriber succeeded but expected output {} is unreadable: {}",
                output_path.display(),
                e
            ))
        })?;

        if let Err(e) = tokio::fs::remove_file(&output_path).await {
            tracing::warn!(path = %output_path.display(), error = %e, "Failed to remove transcriber output");
        }

        tracing::info!(
            elapsed_s = start.elapsed().as_secs(),
            transcript_bytes = transcript.len(),
            "Transcriber subprocess finished"
        );

        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn fake_transcriber(dir: &std::path::Path, script_body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-transcriber.sh");
        std::fs::write(&path, script_body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_subprocess_run() {
        let dir = tempfile::tempdir().unwrap();
        // Upper-cases the input into the expected <stem>.txt output file
        let command = fake_transcriber(
            dir.path(),
            "#!/bin/sh\nin=\"$1\"\nstem=\"${in%.media}\"\ntr a-z A-Z < \"$in\" > \"$stem.txt\"\n",
        );

        let engine = SubprocessEngine::new(EngineConfig {
            command,
            model: "medium".to_string(),
            output_format: "txt".to_string(),
            work_dir: dir.path().join("scratch").to_string_lossy().into_owned(),
        })
        .unwrap();

        let transcript = engine.transcribe(b"hello world").await.unwrap();
        assert_eq!(transcript, b"HELLO WORLD");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_engine_error() {
        let dir = tempfile::tempdir().unwrap();
        let command = fake_transcriber(
            dir.path(),
            "#!/bin/sh\necho 'CUDA out of memory' >&2\nexit 3\n",
        );

        let engine = SubprocessEngine::new(EngineConfig {
            command,
            model: "medium".to_string(),
            output_format: "txt".to_string(),
            work_dir: dir.path().join("scratch").to_string_lossy().into_owned(),
        })
        .unwrap();

        let err = engine.transcribe(b"audio").await.unwrap_err();
        assert!(err.message.contains("CUDA out of memory"));
    }

    #[tokio::test]
    async fn test_missing_command_is_engine_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SubprocessEngine::new(EngineConfig {
            command: "/definitely/not/a/transcriber".to_string(),
            model: "medium".to_string(),
            output_format: "txt".to_string(),
            work_dir: dir.path().to_string_lossy().into_owned(),
        })
        .unwrap();

        let err = engine.transcribe(b"audio").await.unwrap_err();
        assert!(err.message.contains("failed to run transcriber"));
    }
}
