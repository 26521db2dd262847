use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use uuid::Uuid;

use super::{Asset, Snapshot, TimelineElement, Track};

/// Elements without a known duration get this many seconds on the timeline.
const DEFAULT_ELEMENT_DURATION: f64 = 5.0;

/// Asset and track type of imported audio.
const AUDIO_KIND: &str = "audio";

/// Name of a track created for a request that names none.
const DEFAULT_TRACK_NAME: &str = "Audio Track";

/// An audio file to place on the timeline.
///
/// The target track is looked up by `track_id` first, then by `track_name`;
/// without either, the first non-main audio track is used. A track is created
/// when nothing matches.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub file_path: PathBuf,
    pub name: Option<String>,
    pub start_time: f64,
    pub duration: Option<f64>,
    pub track_id: Option<String>,
    pub track_name: Option<String>,
}

impl ImportRequest {
    pub fn audio(file_path: impl Into<PathBuf>, start_time: f64) -> Self {
        Self {
            file_path: file_path.into(),
            name: None,
            start_time,
            duration: None,
            track_id: None,
            track_name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_duration(mut self, duration: Option<f64>) -> Self {
        self.duration = duration;
        self
    }

    pub fn on_track(mut self, track_name: impl Into<String>) -> Self {
        self.track_name = Some(track_name.into());
        self
    }

    pub fn in_track(mut self, track_id: impl Into<String>) -> Self {
        self.track_id = Some(track_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
    pub asset_id: String,
    pub track_id: String,
    pub element_id: String,
    pub created_track: bool,
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// URL under which the editor serves a local file.
pub fn serve_url(path: &Path) -> String {
    let raw = path.to_string_lossy();
    match reqwest::Url::parse_with_params("http://localhost/api/media/serve", &[("path", raw.as_ref())]) {
        Ok(url) => format!("{}?{}", url.path(), url.query().unwrap_or_default()),
        Err(_) => format!("/api/media/serve?path={raw}"),
    }
}

/// Append an asset (reused when the same file is already registered), find or
/// create the target track, and append a new element referencing the asset.
///
/// `duration` is the resolved media duration; `None` or zero falls back to the
/// default element length.
pub fn apply_import(snapshot: &mut Snapshot, request: &ImportRequest, duration: Option<f64>) -> ImportOutcome {
    let abs_path = absolute(&request.file_path);
    let abs_str = abs_path.to_string_lossy().to_string();
    let file_name = request.name.clone().unwrap_or_else(|| {
        abs_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| abs_str.clone())
    });
    let url = serve_url(&abs_path);

    let asset_id = match snapshot
        .assets
        .iter()
        .find(|a| a.file_path.as_deref() == Some(abs_str.as_str()))
    {
        Some(existing) => existing.id.clone(),
        None => {
            let id = format!("asset_{}", Uuid::new_v4().simple());
            let mut asset = Asset {
                id: id.clone(),
                name: file_name.clone(),
                kind: AUDIO_KIND.to_string(),
                file_path: Some(abs_str.clone()),
                duration: Some(duration.unwrap_or(0.0)),
                ..Asset::default()
            };
            asset.extra.insert("url".to_string(), json!(url));
            asset.extra.insert("thumbnailUrl".to_string(), json!(url));
            asset.extra.insert("isLinked".to_string(), json!(true));
            snapshot.assets.push(asset);
            id
        }
    };

    let mut position = request
        .track_id
        .as_deref()
        .and_then(|id| snapshot.tracks.iter().position(|t| t.id == id));

    if position.is_none() {
        if let Some(name) = request.track_name.as_deref() {
            position = snapshot.tracks.iter().position(|t| t.name == name);
        } else {
            position = snapshot
                .tracks
                .iter()
                .position(|t| t.kind == AUDIO_KIND && !t.is_main());
        }
    }

    let created_track = position.is_none();
    let index = match position {
        Some(index) => index,
        None => {
            let mut track = Track {
                id: Uuid::new_v4().to_string(),
                name: request
                    .track_name
                    .clone()
                    .unwrap_or_else(|| DEFAULT_TRACK_NAME.to_string()),
                kind: AUDIO_KIND.to_string(),
                elements: Vec::new(),
                ..Track::default()
            };
            track.extra.insert("muted".to_string(), json!(false));
            snapshot.tracks.push(track);
            snapshot.tracks.len() - 1
        }
    };

    let element_duration = duration
        .filter(|d| *d > 0.0)
        .unwrap_or(DEFAULT_ELEMENT_DURATION);
    let element_id = Uuid::new_v4().to_string();

    let mut element = TimelineElement {
        id: element_id.clone(),
        start_time: request.start_time,
        duration: element_duration,
        trim_start: 0.0,
        trim_end: 0.0,
        ..TimelineElement::default()
    };
    let fields: [(&str, Value); 12] = [
        ("type", json!("media")),
        ("mediaId", json!(asset_id)),
        ("name", json!(file_name)),
        ("thumbnailUrl", json!(url)),
        ("muted", json!(false)),
        ("volume", json!(1)),
        ("x", json!(960)),
        ("y", json!(540)),
        ("scale", json!(1)),
        ("rotation", json!(0)),
        ("opacity", json!(1)),
        ("metadata", json!({"importSource": "mediasync"})),
    ];
    for (key, value) in fields {
        element.extra.insert(key.to_string(), value);
    }

    let track = &mut snapshot.tracks[index];
    track.elements.push(element);

    ImportOutcome {
        asset_id,
        track_id: track.id.clone(),
        element_id,
        created_track,
    }
}
