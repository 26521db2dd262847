use crate::error::{MediaSyncError, Result};
use crate::transcribe::{RecognitionProvider, RecognizedSegment};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

/// Groq's OpenAI-compatible transcription endpoint.
const GROQ_API_URL: &str = "https://api.groq.com/openai/v1/audio/transcriptions";

const DEFAULT_MODEL: &str = "whisper-large-v3";

/// Maximum upload size accepted by the endpoint (25 MB).
const MAX_FILE_SIZE: u64 = 25 * 1024 * 1024;

/// Maximum retries for API calls.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (milliseconds).
const BASE_DELAY_MS: u64 = 1000;

/// Words may spill this far past a segment boundary and still belong to it.
const WORD_SLACK: f64 = 0.1;

/// Groq Whisper client.
pub struct GroqClient {
    client: reqwest::Client,
    api_key: String,
    api_url: String,
    model: String,
    language: Option<String>,
    base_delay: Duration,
}

/// A failed attempt, and whether another attempt could help.
struct AttemptError {
    error: MediaSyncError,
    retryable: bool,
}

impl From<MediaSyncError> for AttemptError {
    fn from(error: MediaSyncError) -> Self {
        Self {
            error,
            retryable: true,
        }
    }
}

impl From<reqwest::Error> for AttemptError {
    fn from(error: reqwest::Error) -> Self {
        MediaSyncError::from(error).into()
    }
}

impl GroqClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            api_url: GROQ_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            language: None,
            base_delay: Duration::from_millis(BASE_DELAY_MS),
        }
    }

    /// Point the client at another endpoint (a proxy or a test server).
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the source language (ISO 639-1 code).
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    async fn build_form(&self, audio_path: &Path) -> Result<Form> {
        let file_bytes = fs::read(audio_path).await?;
        let file_name = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.wav")
            .to_string();

        let mime_type = match audio_path.extension().and_then(|e| e.to_str()) {
            Some("wav") => "audio/wav",
            Some("mp3") => "audio/mpeg",
            Some("m4a") => "audio/mp4",
            Some("webm") => "audio/webm",
            _ => "application/octet-stream",
        };

        let file_part = Part::bytes(file_bytes)
            .file_name(file_name)
            .mime_str(mime_type)?;

        let mut form = Form::new()
            .part("file", file_part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment")
            .text("timestamp_granularities[]", "word");

        if let Some(ref lang) = self.language {
            form = form.text("language", lang.clone());
        }

        Ok(form)
    }

    async fn call_api(&self, form: Form) -> std::result::Result<GroqResponse, AttemptError> {
        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        debug!("Groq API response status: {}", status);

        if status.is_success() {
            let body = response.text().await?;
            let parsed: GroqResponse = serde_json::from_str(&body).map_err(MediaSyncError::from)?;
            return Ok(parsed);
        }

        let error_body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ApiErrorResponse>(&error_body) {
            Ok(api_error) => api_error.error.message,
            Err(_) => error_body,
        };

        Err(AttemptError {
            error: MediaSyncError::Api(format!("Groq API error ({}): {}", status, message)),
            retryable: !status.is_client_error(),
        })
    }

    /// Rebuilds the form on each attempt; client errors are not retried.
    async fn transcribe_with_retry(&self, audio: &Path) -> Result<GroqResponse> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.pow(attempt - 1);
                debug!("Retry attempt {} after {:?}", attempt, delay);
                tokio::time::sleep(delay).await;
            }

            let form = self.build_form(audio).await?;

            match self.call_api(form).await {
                Ok(response) => return Ok(response),
                Err(AttemptError { error, retryable: false }) => return Err(error),
                Err(AttemptError { error, .. }) => {
                    warn!("Groq attempt {} failed: {}", attempt + 1, error);
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| MediaSyncError::Api("Unknown error".to_string())))
    }

    /// Convert the verbose JSON into segments, tightening each segment to the
    /// words that fall inside it.
    fn parse_response(response: GroqResponse) -> Vec<RecognizedSegment> {
        let words = response.words.unwrap_or_default();

        let Some(api_segments) = response.segments else {
            let text = response.text.trim();
            return match response.duration {
                Some(duration) if !text.is_empty() && duration > 0.0 => {
                    vec![RecognizedSegment::new(0.0, duration, text)]
                }
                _ => Vec::new(),
            };
        };

        api_segments
            .into_iter()
            .map(|seg| {
                let mut inside = words
                    .iter()
                    .filter(|w| w.start >= seg.start - WORD_SLACK && w.end <= seg.end + WORD_SLACK);

                let (start, end) = match inside.next() {
                    Some(first) => {
                        let last = inside.last().unwrap_or(first);
                        (first.start, last.end)
                    }
                    None => (seg.start, seg.end),
                };

                RecognizedSegment::new(start, end, seg.text.trim())
            })
            .collect()
    }
}

#[async_trait]
impl RecognitionProvider for GroqClient {
    async fn recognize(&self, audio: &Path) -> Result<Vec<RecognizedSegment>> {
        let metadata = fs::metadata(audio).await?;
        if metadata.len() > MAX_FILE_SIZE {
            return Err(MediaSyncError::Recognition(format!(
                "File too large for Groq: {} bytes (max {} bytes)",
                metadata.len(),
                MAX_FILE_SIZE
            )));
        }

        let response = self.transcribe_with_retry(audio).await?;
        let segments = Self::parse_response(response);
        debug!("Groq returned {} segments", segments.len());
        Ok(segments)
    }

    fn name(&self) -> &'static str {
        "Groq Whisper"
    }
}

// API response types

#[derive(Debug, Deserialize)]
struct GroqResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    segments: Option<Vec<GroqSegment>>,
    #[serde(default)]
    words: Option<Vec<GroqWord>>,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct GroqSegment {
    start: f64,
    end: f64,
    text: String,
}

#[derive(Debug, Deserialize)]
struct GroqWord {
    start: f64,
    end: f64,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}
