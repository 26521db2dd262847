use crate::error::{MediaSyncError, Result};
use crate::transcribe::{RecognitionProvider, RecognizedSegment};
use async_trait::async_trait;
use regex::Regex;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{debug, info};

const DASHSCOPE_BASE_URL: &str = "https://dashscope.aliyuncs.com";

const DEFAULT_MODEL: &str = "sensevoice-v1";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// SenseVoice annotates text with `<|tag|>` markers (language, emotion, events).
fn markup_regex() -> &'static Regex {
    static MARKUP: OnceLock<Regex> = OnceLock::new();
    MARKUP.get_or_init(|| Regex::new(r"<\|[^|>]*\|>").expect("valid markup regex"))
}

/// Remove SenseVoice markup tags and surrounding whitespace.
pub fn strip_markup(text: &str) -> String {
    markup_regex().replace_all(text, "").trim().to_string()
}

/// DashScope SenseVoice client.
///
/// Recognition is asynchronous on the server side: the audio is uploaded to a
/// temporary bucket, a transcription task is submitted, and the task is polled
/// until it settles. The finished task points at a JSON transcript.
pub struct DashScopeClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    language_hints: Vec<String>,
    poll_interval: Duration,
    timeout: Duration,
}

impl DashScopeClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: DASHSCOPE_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            language_hints: vec!["zh".to_string(), "en".to_string()],
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_language_hints(mut self, hints: Vec<String>) -> Self {
        self.language_hints = hints;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Upper bound on how long a submitted task may take.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response, step: &str) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiError>(&body)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or(body);
            return Err(MediaSyncError::Api(format!(
                "DashScope {} failed ({}): {}",
                step, status, message
            )));
        }

        Ok(serde_json::from_str(&body)?)
    }

    /// Upload a local file to DashScope's temporary storage and return its `oss://` URL.
    async fn upload(&self, audio: &Path) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/api/v1/uploads", self.base_url))
            .bearer_auth(&self.api_key)
            .query(&[("action", "getPolicy"), ("model", self.model.as_str())])
            .send()
            .await?;
        let policy: PolicyResponse = Self::read_json(response, "upload policy").await?;
        let policy = policy.data;

        let file_name = audio
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.wav")
            .to_string();
        let key = format!("{}/{}", policy.upload_dir.trim_end_matches('/'), file_name);
        let bytes = fs::read(audio).await?;

        let form = Form::new()
            .text("OSSAccessKeyId", policy.oss_access_key_id)
            .text("Signature", policy.signature)
            .text("policy", policy.policy)
            .text("x-oss-object-acl", policy.x_oss_object_acl)
            .text("x-oss-forbid-overwrite", policy.x_oss_forbid_overwrite)
            .text("key", key.clone())
            .text("success_action_status", "200")
            .part("file", Part::bytes(bytes).file_name(file_name));

        let response = self.client.post(&policy.upload_host).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MediaSyncError::Api(format!(
                "DashScope upload failed ({}): {}",
                status, body
            )));
        }

        debug!("Uploaded {} as {}", audio.display(), key);
        Ok(format!("oss://{}", key))
    }

    async fn submit(&self, file_url: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "input": { "file_urls": [file_url] },
            "parameters": { "language_hints": self.language_hints },
        });

        let response = self
            .client
            .post(format!("{}/api/v1/services/audio/asr/transcription", self.base_url))
            .bearer_auth(&self.api_key)
            .header("X-DashScope-Async", "enable")
            .header("X-DashScope-OssResourceResolve", "enable")
            .json(&body)
            .send()
            .await?;

        let task: TaskResponse = Self::read_json(response, "task submission").await?;
        debug!("Submitted DashScope task {}", task.output.task_id);
        Ok(task.output.task_id)
    }

    /// Poll a task until it settles and return its transcription URL.
    async fn wait(&self, task_id: &str) -> Result<String> {
        let started = Instant::now();
        let url = format!("{}/api/v1/tasks/{}", self.base_url, task_id);

        loop {
            let response = self.client.get(&url).bearer_auth(&self.api_key).send().await?;
            let task: TaskResponse = Self::read_json(response, "task query").await?;

            match task.output.task_status.as_str() {
                "SUCCEEDED" => {
                    let result = task.output.results.into_iter().next().ok_or_else(|| {
                        MediaSyncError::Recognition(format!("Task {} finished without results", task_id))
                    })?;

                    return match result.transcription_url {
                        Some(url) => Ok(url),
                        None => Err(MediaSyncError::Recognition(format!(
                            "Task {} result failed: {}",
                            task_id,
                            result.message.unwrap_or_else(|| "no transcription".to_string())
                        ))),
                    };
                }
                "FAILED" | "CANCELED" | "UNKNOWN" => {
                    return Err(MediaSyncError::Recognition(format!(
                        "Task {} {}: {}",
                        task_id,
                        task.output.task_status,
                        task.output.message.unwrap_or_default()
                    )));
                }
                status => debug!("Task {} is {}", task_id, status),
            }

            if started.elapsed() >= self.timeout {
                return Err(MediaSyncError::Recognition(format!(
                    "Task {} did not finish within {:?}",
                    task_id, self.timeout
                )));
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn fetch_transcript(&self, url: &str) -> Result<Vec<RecognizedSegment>> {
        let response = self.client.get(url).send().await?;
        let transcript: TranscriptionResult = Self::read_json(response, "transcript download").await?;
        Ok(Self::parse_transcript(transcript))
    }

    /// Sentences of the first transcript, in seconds, with markup removed.
    fn parse_transcript(result: TranscriptionResult) -> Vec<RecognizedSegment> {
        let Some(transcript) = result.transcripts.into_iter().next() else {
            return Vec::new();
        };

        transcript
            .sentences
            .into_iter()
            .filter_map(|s| {
                let text = strip_markup(&s.text);
                if text.is_empty() {
                    return None;
                }
                Some(RecognizedSegment::new(
                    s.begin_time as f64 / 1000.0,
                    s.end_time as f64 / 1000.0,
                    text,
                ))
            })
            .collect()
    }
}

#[async_trait]
impl RecognitionProvider for DashScopeClient {
    async fn recognize(&self, audio: &Path) -> Result<Vec<RecognizedSegment>> {
        let file_url = self.upload(audio).await?;
        let task_id = self.submit(&file_url).await?;
        info!("DashScope task {} submitted, waiting for result", task_id);

        let transcription_url = self.wait(&task_id).await?;
        self.fetch_transcript(&transcription_url).await
    }

    fn name(&self) -> &'static str {
        "DashScope SenseVoice"
    }
}

// API response types

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PolicyResponse {
    data: UploadPolicy,
}

#[derive(Debug, Deserialize)]
struct UploadPolicy {
    policy: String,
    signature: String,
    upload_dir: String,
    upload_host: String,
    oss_access_key_id: String,
    #[serde(default = "default_acl")]
    x_oss_object_acl: String,
    #[serde(default = "default_forbid_overwrite")]
    x_oss_forbid_overwrite: String,
}

fn default_acl() -> String {
    "private".to_string()
}

fn default_forbid_overwrite() -> String {
    "true".to_string()
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    output: TaskOutput,
}

#[derive(Debug, Deserialize)]
struct TaskOutput {
    task_id: String,
    task_status: String,
    #[serde(default)]
    results: Vec<TaskResult>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskResult {
    #[serde(default)]
    transcription_url: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResult {
    #[serde(default)]
    transcripts: Vec<Transcript>,
}

#[derive(Debug, Deserialize)]
struct Transcript {
    #[serde(default)]
    sentences: Vec<Sentence>,
}

#[derive(Debug, Deserialize)]
struct Sentence {
    #[serde(default)]
    begin_time: u64,
    #[serde(default)]
    end_time: u64,
    #[serde(default)]
    text: String,
}
