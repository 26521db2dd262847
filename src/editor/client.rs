use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::audio::get_media_duration;
use crate::error::{MediaSyncError, Result};

use super::import::{apply_import, ImportOutcome, ImportRequest};
use super::{Snapshot, Subtitle, Task};

/// Path of the editor's AI edit endpoint, relative to its base URL.
const AI_EDIT_PATH: &str = "/api/ai-edit";

/// Client for the editor's task queue and project snapshot store.
#[derive(Debug, Clone)]
pub struct EditorClient {
    client: reqwest::Client,
    api_url: String,
}

#[derive(Debug, Deserialize)]
struct PendingEditsResponse {
    #[serde(default)]
    edits: Vec<Task>,
}

#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    snapshot: Option<Snapshot>,
    #[serde(default)]
    error: Option<String>,
}

/// Leading part of a response body, cut on a character boundary.
fn preview(body: &str, max_chars: usize) -> &str {
    match body.char_indices().nth(max_chars) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

impl EditorClient {
    /// Create a client for an editor listening at `base_url` (e.g. `http://localhost:3000`).
    pub fn new(base_url: impl AsRef<str>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: format!("{}{}", base_url.as_ref().trim_end_matches('/'), AI_EDIT_PATH),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn get_action<T: DeserializeOwned>(&self, action: &str) -> Result<T> {
        let response = self
            .client
            .get(&self.api_url)
            .query(&[("action", action)])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(MediaSyncError::Editor(format!(
                "{} failed ({}): {}",
                action,
                status,
                preview(&body, 300)
            )));
        }

        Ok(serde_json::from_str(&body)?)
    }

    async fn post_action(&self, action: &str, data: Value) -> Result<Value> {
        let payload = json!({ "action": action, "data": data });
        let response = self.client.post(&self.api_url).json(&payload).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(MediaSyncError::Editor(format!(
                "{} failed ({}): {}",
                action,
                status,
                preview(&body, 300)
            )));
        }

        debug!("{} -> {}", action, preview(&body, 200));
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Fetch the pending task queue.
    pub async fn pending_edits(&self) -> Result<Vec<Task>> {
        let response: PendingEditsResponse = self.get_action("getPendingEdits").await?;
        Ok(response.edits)
    }

    /// Acknowledge tasks so the editor stops handing them out.
    pub async fn mark_processed(&self, ids: &[String]) -> Result<()> {
        self.post_action("markProcessed", json!({ "ids": ids })).await?;
        Ok(())
    }

    /// Current project snapshot, or `None` when the editor reports no success.
    pub async fn snapshot(&self) -> Result<Option<Snapshot>> {
        let response: SnapshotResponse = self.get_action("getSnapshot").await?;
        if !response.success {
            if let Some(error) = response.error {
                warn!("Editor returned no snapshot: {}", error);
            }
            return Ok(None);
        }
        Ok(response.snapshot)
    }

    pub async fn add_subtitles(&self, subtitles: &[Subtitle]) -> Result<()> {
        self.post_action("addMultipleSubtitles", json!({ "subtitles": subtitles }))
            .await?;
        Ok(())
    }

    pub async fn add_markers(&self, times: &[f64]) -> Result<()> {
        self.post_action("addMarkers", json!({ "times": times })).await?;
        Ok(())
    }

    pub async fn update_snapshot(&self, snapshot: &Snapshot) -> Result<Value> {
        self.post_action("updateSnapshot", serde_json::to_value(snapshot)?)
            .await
    }

    /// Import a local media file into the project by rewriting the snapshot.
    pub async fn import_media(&self, request: &ImportRequest) -> Result<ImportOutcome> {
        let mut snapshot = self
            .snapshot()
            .await?
            .ok_or_else(|| MediaSyncError::Editor("Project snapshot unavailable".to_string()))?;

        let duration = match request.duration {
            Some(d) => Some(d),
            None => match get_media_duration(&request.file_path).await {
                Ok(d) => Some(d),
                Err(e) => {
                    debug!("Could not probe {}: {}", request.file_path.display(), e);
                    None
                }
            },
        };

        let outcome = apply_import(&mut snapshot, request, duration);
        let response = self.update_snapshot(&snapshot).await?;

        let success = response
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        if !success {
            return Err(MediaSyncError::Editor(format!(
                "updateSnapshot rejected import of {}: {}",
                request.file_path.display(),
                response
            )));
        }

        Ok(outcome)
    }
}
