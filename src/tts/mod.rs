pub mod batch;

pub use batch::{sanitize_voice_id, TtsBatchGenerator};

use crate::error::{MediaSyncError, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Voice used when a request does not name one.
pub const DEFAULT_VOICE: &str = "zh-CN-XiaoxiaoNeural";

/// Sentence spoken by voice previews when the request carries no text.
pub const DEFAULT_PREVIEW_TEXT: &str = "这是一段试听文本";

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Render `text` with `voice` into an MP3 at `output`.
    async fn synthesize(&self, text: &str, voice: &str, output: &Path) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Drives the `edge-tts` command-line synthesizer.
#[derive(Debug, Clone)]
pub struct EdgeTtsCommand {
    program: String,
}

impl EdgeTtsCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for EdgeTtsCommand {
    fn default() -> Self {
        Self::new("edge-tts")
    }
}

#[async_trait]
impl SpeechSynthesizer for EdgeTtsCommand {
    async fn synthesize(&self, text: &str, voice: &str, output: &Path) -> Result<()> {
        debug!("Running {} with voice {} -> {}", self.program, voice, output.display());

        let result = Command::new(&self.program)
            .arg("--voice")
            .arg(voice)
            .arg("--text")
            .arg(text)
            .arg("--write-media")
            .arg(output)
            .output()
            .await
            .map_err(|e| {
                MediaSyncError::Synthesis(format!(
                    "Failed to run {}. Install it with `pip install edge-tts`. Error: {e}",
                    self.program
                ))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(MediaSyncError::Synthesis(format!(
                "{} exited with {}: {}",
                self.program,
                result.status,
                stderr.trim()
            )));
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "edge-tts"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_program_is_a_synthesis_error() {
        let dir = tempfile::tempdir().unwrap();
        let tts = EdgeTtsCommand::new("mediasync-no-such-tts-binary");

        let result = tts
            .synthesize("hello", DEFAULT_VOICE, &dir.path().join("out.mp3"))
            .await;
        assert!(matches!(result, Err(MediaSyncError::Synthesis(_))));
    }
}
