//! Speech recognition for a timeline element and placement of the results as
//! subtitles in timeline coordinates.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::audio::AudioTranscoder;
use crate::editor::{EditorClient, ElementConfig, Subtitle};
use crate::error::{MediaSyncError, Result};
use crate::transcribe::{RecognitionChain, RecognizedSegment};

/// Shortest visible span, and shortest subtitle, in seconds.
pub const MIN_SPAN: f64 = 0.1;

/// Character count below which a text counts as short.
const SHORT_TEXT_CHARS: usize = 5;

/// Short texts lasting longer than this many seconds are treated as noise.
const STRETCHED_SECS: f64 = 4.0;

/// Visible length of an element: `duration - trim_start - trim_end`, or the full
/// duration (at least [`MIN_SPAN`]) when trimming leaves almost nothing.
pub fn visible_span(duration: f64, trim_start: f64, trim_end: f64) -> f64 {
    let span = duration - trim_start - trim_end;
    if span > MIN_SPAN {
        span
    } else {
        duration.max(MIN_SPAN)
    }
}

/// What the recognized audio covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceMode {
    /// Only the visible window was recognized; times start at 0.
    Sliced,
    /// The whole source file was recognized; times are file-relative.
    Full,
}

/// Map provider segments onto the timeline and drop noise.
pub fn remap_segments(segments: &[RecognizedSegment], element: &ElementConfig, mode: SliceMode) -> Vec<Subtitle> {
    let visible = visible_span(element.duration, element.trim_start, element.trim_end);
    let window_start = element.trim_start;
    let window_end = element.trim_start + visible;

    segments
        .iter()
        .filter_map(|seg| {
            let text = seg.text.trim();
            if text.is_empty() {
                return None;
            }

            let (start, end) = match mode {
                SliceMode::Sliced => (element.start_time + seg.start, element.start_time + seg.end),
                SliceMode::Full => {
                    if seg.end <= window_start || seg.start >= window_end {
                        return None;
                    }
                    let clipped_start = seg.start.max(window_start);
                    let clipped_end = seg.end.min(window_end);
                    (
                        element.start_time + (clipped_start - window_start),
                        element.start_time + (clipped_end - window_start),
                    )
                }
            };

            let duration = end - start;
            if duration <= MIN_SPAN {
                return None;
            }
            if text.chars().count() < SHORT_TEXT_CHARS && duration > STRETCHED_SECS {
                debug!("Skipping stretched subtitle '{}' ({:.2}s)", text, duration);
                return None;
            }

            Some(Subtitle {
                text: text.to_string(),
                start_time: start,
                duration,
            })
        })
        .collect()
}

/// Recognizes the visible part of an element and pushes subtitles to the editor.
pub struct RecognitionSync {
    transcoder: AudioTranscoder,
    chain: RecognitionChain,
    editor: Arc<EditorClient>,
}

impl RecognitionSync {
    pub fn new(transcoder: AudioTranscoder, chain: RecognitionChain, editor: Arc<EditorClient>) -> Self {
        Self {
            transcoder,
            chain,
            editor,
        }
    }

    pub async fn recognize_and_sync(&self, source: &Path, element: &ElementConfig) -> Result<Vec<Subtitle>> {
        if self.chain.is_empty() {
            return Err(MediaSyncError::Config(
                "No speech recognition provider configured. Set DASHSCOPE_API_KEY or GROQ_API_KEY".to_string(),
            ));
        }

        let visible = visible_span(element.duration, element.trim_start, element.trim_end);
        info!(
            "Recognizing {} for element {} (offset {:.2}s, length {:.2}s)",
            source.display(),
            element.id,
            element.trim_start,
            visible
        );

        // The slice handle must outlive recognition; dropping it removes the file.
        let slice = match self
            .transcoder
            .extract_slice(source, element.trim_start, visible)
            .await
        {
            Ok(slice) => Some(slice),
            Err(e) => {
                warn!("Slice extraction failed, recognizing the whole file: {}", e);
                None
            }
        };

        let (work_file, mode) = match &slice {
            Some(path) => (&**path, SliceMode::Sliced),
            None => (source, SliceMode::Full),
        };

        let segments = self.chain.recognize(work_file).await;
        let subtitles = remap_segments(&segments, element, mode);

        if subtitles.is_empty() {
            info!("No speech detected in {}", source.display());
            return Ok(subtitles);
        }

        self.editor.add_subtitles(&subtitles).await?;
        info!("Synced {} subtitles", subtitles.len());
        Ok(subtitles)
    }
}
