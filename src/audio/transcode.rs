use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MediaSyncError, Result};

/// Sample rate used for recognition slices.
pub const RECOGNITION_SAMPLE_RATE: u32 = 16_000;

/// Sample rate used for beat analysis.
pub const ANALYSIS_SAMPLE_RATE: u32 = 44_100;

/// A slice at or below this size is treated as a failed extraction.
const MIN_SLICE_BYTES: u64 = 100;

/// Check if FFmpeg is installed and accessible.
pub async fn check_ffmpeg() -> Result<()> {
    let output = Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await
        .map_err(|e| {
            MediaSyncError::Transcode(format!(
                "FFmpeg not found. Please install FFmpeg and ensure it's in your PATH. Error: {e}"
            ))
        })?;

    if !output.status.success() {
        return Err(MediaSyncError::Transcode("FFmpeg check failed".to_string()));
    }

    debug!("FFmpeg is available");
    Ok(())
}

/// Get media duration in seconds using FFprobe.
pub async fn get_media_duration(input: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(input)
        .output()
        .await
        .map_err(|e| MediaSyncError::Transcode(format!("Failed to run FFprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MediaSyncError::Transcode(format!("FFprobe failed: {stderr}")));
    }

    let duration_str = String::from_utf8_lossy(&output.stdout);
    duration_str.trim().parse::<f64>().map_err(|e| {
        MediaSyncError::Transcode(format!(
            "Failed to parse duration '{}': {e}",
            duration_str.trim()
        ))
    })
}

/// Normalizes media into mono 16-bit PCM WAV files inside a scratch directory.
///
/// Every output is a [`TempPath`]: the file is removed when the handle drops,
/// whichever way the caller exits.
#[derive(Debug, Clone)]
pub struct AudioTranscoder {
    scratch_dir: PathBuf,
}

impl AudioTranscoder {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Extract exactly `[offset, offset + length)` as mono 16 kHz WAV.
    pub async fn extract_slice(&self, input: &Path, offset: f64, length: f64) -> Result<TempPath> {
        if length <= 0.0 {
            return Err(MediaSyncError::Transcode(format!(
                "Slice length must be positive, got {length:.3}s"
            )));
        }

        let output = self.scratch_path("mediasync_slice_")?;
        let offset_arg = format!("{:.3}", offset.max(0.0));
        let length_arg = format!("{:.3}", length);

        debug!(
            "Extracting slice of {}: offset={}s length={}s",
            input.display(),
            offset_arg,
            length_arg
        );

        let mut command = Command::new("ffmpeg");
        command
            .args(["-y", "-ss"])
            .arg(&offset_arg)
            .arg("-t")
            .arg(&length_arg)
            .arg("-i")
            .arg(input)
            .args(["-vn", "-acodec", "pcm_s16le", "-ar"])
            .arg(RECOGNITION_SAMPLE_RATE.to_string())
            .args(["-ac", "1", "-f", "wav"])
            .arg(&*output);

        run_ffmpeg(command).await?;
        ensure_min_size(&output, MIN_SLICE_BYTES).await?;
        Ok(output)
    }

    /// Transcode the whole input to mono WAV at `sample_rate`.
    ///
    /// Outputs of `min_bytes` or fewer count as failures.
    pub async fn to_mono_wav(&self, input: &Path, sample_rate: u32, min_bytes: u64) -> Result<TempPath> {
        let output = self.scratch_path("mediasync_bgm_")?;

        debug!("Transcoding {} to mono {} Hz WAV", input.display(), sample_rate);

        let mut command = Command::new("ffmpeg");
        command
            .args(["-y", "-i"])
            .arg(input)
            .args(["-vn", "-acodec", "pcm_s16le", "-ac", "1", "-ar"])
            .arg(sample_rate.to_string())
            .args(["-f", "wav"])
            .arg(&*output);

        run_ffmpeg(command).await?;
        ensure_min_size(&output, min_bytes).await?;
        Ok(output)
    }

    fn scratch_path(&self, prefix: &str) -> Result<TempPath> {
        std::fs::create_dir_all(&self.scratch_dir)?;
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(".wav")
            .tempfile_in(&self.scratch_dir)?;
        Ok(file.into_temp_path())
    }
}

async fn run_ffmpeg(mut command: Command) -> Result<()> {
    let output = command
        .output()
        .await
        .map_err(|e| MediaSyncError::Transcode(format!("Failed to run FFmpeg: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines: Vec<&str> = stderr.lines().collect();
        let tail = lines[lines.len().saturating_sub(5)..].join("\n");
        warn!("FFmpeg exited with {}: {}", output.status, tail);
        return Err(MediaSyncError::Transcode(format!(
            "FFmpeg exited with {}",
            output.status
        )));
    }

    Ok(())
}

async fn ensure_min_size(path: &Path, min_bytes: u64) -> Result<()> {
    let size = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
    if size <= min_bytes {
        return Err(MediaSyncError::Transcode(format!(
            "Output {} is too small ({} bytes)",
            path.display(),
            size
        )));
    }
    Ok(())
}
