//! The editor's side of the conversation: task queue, project snapshot, and
//! the value types exchanged with it.

pub mod client;
pub mod import;

pub use client::EditorClient;
pub use import::{apply_import, ImportOutcome, ImportRequest};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Only tasks with this action carry work for the daemon.
pub const REQUEST_TASK_ACTION: &str = "requestTask";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub data: TaskData,
    #[serde(default)]
    pub processed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    SubtitleGeneration,
    TtsGeneration,
    TtsPreview,
    BgmBeatAnalysis,
    #[default]
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskType::SubtitleGeneration => write!(f, "subtitle_generation"),
            TaskType::TtsGeneration => write!(f, "tts_generation"),
            TaskType::TtsPreview => write!(f, "tts_preview"),
            TaskType::BgmBeatAnalysis => write!(f, "bgm_beat_analysis"),
            TaskType::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskData {
    pub task_type: TaskType,
    pub media_id: Option<String>,
    pub media_name: Option<String>,
    pub element_id: Option<String>,
    pub file_path: Option<PathBuf>,
    pub text_elements: Vec<TextElement>,
    pub voice_id: Option<String>,
    pub text: Option<String>,
}

/// A text element to be voiced by TTS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextElement {
    pub id: String,
    #[serde(default, alias = "text")]
    pub content: String,
    #[serde(default)]
    pub start_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
}

/// Where and how much of an asset is visible on the timeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementConfig {
    pub id: String,
    pub start_time: f64,
    pub duration: f64,
    pub trim_start: f64,
    pub trim_end: f64,
}

impl From<&TimelineElement> for ElementConfig {
    fn from(el: &TimelineElement) -> Self {
        Self {
            id: el.id.clone(),
            start_time: el.start_time,
            duration: el.duration,
            trim_start: el.trim_start,
            trim_end: el.trim_end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtitle {
    pub text: String,
    pub start_time: f64,
    pub duration: f64,
}

/// One successful synthesis, waiting to be imported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsItem {
    pub file_path: PathBuf,
    pub name: String,
    pub start_time: f64,
    pub duration: Option<f64>,
}

/// The editor's serialized project state. Fields the daemon does not model are
/// kept in `extra` so a read-modify-write round trip loses nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<Project>,
    #[serde(default)]
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Snapshot {
    pub fn project_id(&self) -> Option<&str> {
        self.project
            .as_ref()
            .and_then(|p| p.id.as_deref())
            .filter(|id| !id.is_empty())
    }

    pub fn find_element(&self, element_id: &str) -> Option<&TimelineElement> {
        self.tracks
            .iter()
            .flat_map(|t| t.elements.iter())
            .find(|el| el.id == element_id)
    }

    pub fn find_asset(&self, asset_id: &str) -> Option<&Asset> {
        self.assets.iter().find(|a| a.id == asset_id)
    }

    pub fn first_asset_of_kind(&self, kind: &str) -> Option<&Asset> {
        self.assets.iter().find(|a| a.kind == kind)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Project {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub elements: Vec<TimelineElement>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Track {
    pub fn is_main(&self) -> bool {
        self.extra
            .get("isMain")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineElement {
    pub id: String,
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub trim_start: f64,
    #[serde(default)]
    pub trim_end: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_type_parsing() {
        let task: Task = serde_json::from_value(json!({
            "id": "t1",
            "action": "requestTask",
            "data": {"taskType": "bgm_beat_analysis", "mediaName": "song.mp3"}
        }))
        .unwrap();

        assert_eq!(task.data.task_type, TaskType::BgmBeatAnalysis);
        assert_eq!(task.data.media_name.as_deref(), Some("song.mp3"));
        assert!(!task.processed);
    }

    #[test]
    fn test_unknown_task_type() {
        let data: TaskData =
            serde_json::from_value(json!({"taskType": "render_video"})).unwrap();
        assert_eq!(data.task_type, TaskType::Unknown);
    }

    #[test]
    fn test_text_element_accepts_text_alias() {
        let el: TextElement =
            serde_json::from_value(json!({"id": "e1", "text": "hi", "startTime": 2.5})).unwrap();
        assert_eq!(el.content, "hi");
        assert_eq!(el.start_time, 2.5);
    }

    #[test]
    fn test_snapshot_round_trip_keeps_unknown_fields() {
        let raw = json!({
            "project": {"id": "p1", "name": "Demo"},
            "tracks": [{
                "id": "tr1", "name": "Main", "type": "media", "isMain": true,
                "elements": [{"id": "el1", "startTime": 5, "duration": 10,
                              "trimStart": 2, "trimEnd": 1, "mediaId": "a1"}]
            }],
            "assets": [{"id": "a1", "name": "clip.mp4", "type": "video",
                        "filePath": "/media/clip.mp4", "duration": 10, "url": "/x"}],
            "canvas": {"width": 1920}
        });

        let snapshot: Snapshot = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(snapshot.project_id(), Some("p1"));
        assert!(snapshot.tracks[0].is_main());

        let el = snapshot.find_element("el1").unwrap();
        let config = ElementConfig::from(el);
        assert_eq!(config.trim_start, 2.0);
        assert_eq!(config.start_time, 5.0);

        let back = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(back["canvas"]["width"], 1920);
        assert_eq!(back["tracks"][0]["elements"][0]["mediaId"], "a1");
        assert_eq!(back["assets"][0]["url"], "/x");
    }

    #[test]
    fn test_subtitle_serializes_camel_case() {
        let sub = Subtitle {
            text: "hello".to_string(),
            start_time: 6.0,
            duration: 2.0,
        };
        assert_eq!(
            serde_json::to_value(&sub).unwrap(),
            json!({"text": "hello", "startTime": 6.0, "duration": 2.0})
        );
    }
}
