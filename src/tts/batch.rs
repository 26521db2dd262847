use crate::config::Config;
use crate::editor::{EditorClient, ImportRequest, TextElement, TtsItem};
use crate::error::{MediaSyncError, Result};
use crate::state::{Clock, InMemoryStateStore, StateStore, SystemClock};
use crate::tts::SpeechSynthesizer;
use futures::stream::{FuturesUnordered, StreamExt};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Synthesized files smaller than this are treated as failures.
const MIN_AUDIO_BYTES: u64 = 100;

/// Cached previews larger than this are reused.
const PREVIEW_CACHE_BYTES: u64 = 1000;

/// How often, and how long apart, to look for the synthesizer's output.
const FILE_WAIT_ATTEMPTS: u32 = 10;
const FILE_WAIT_DELAY: Duration = Duration::from_millis(500);

/// Characters of the text shown in an imported item's name.
const NAME_PREVIEW_CHARS: usize = 10;

/// Length of the random tag appended to batch track names.
const TRACK_TAG_CHARS: usize = 6;

/// Replace everything but ASCII letters, digits and `-` with `_`.
pub fn sanitize_voice_id(voice: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    UNSAFE
        .get_or_init(|| Regex::new(r"[^a-zA-Z0-9-]").expect("valid voice id regex"))
        .replace_all(voice, "_")
        .into_owned()
}

/// Name for a batch's new track: local time plus a random tag.
fn batch_track_name() -> String {
    let tag = Uuid::new_v4().simple().to_string();
    format!(
        "AI Voice {} {}",
        chrono::Local::now().format("%H:%M:%S"),
        &tag[..TRACK_TAG_CHARS]
    )
}

async fn file_size(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

/// Synthesizes batches of text elements and imports the results into the editor.
pub struct TtsBatchGenerator {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    editor: Arc<EditorClient>,
    cooldowns: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    cooldown: Duration,
    concurrency: usize,
    workspace_root: PathBuf,
    default_output_dir: PathBuf,
    default_voice: String,
}

impl TtsBatchGenerator {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, editor: Arc<EditorClient>, config: &Config) -> Self {
        Self {
            synthesizer,
            editor,
            cooldowns: Arc::new(InMemoryStateStore::new()),
            clock: Arc::new(SystemClock),
            cooldown: config.tts_cooldown(),
            concurrency: config.tts_concurrency.max(1),
            workspace_root: config.workspace_root.clone(),
            default_output_dir: config.tts_output_dir(),
            default_voice: config.default_voice.clone(),
        }
    }

    /// Share the cooldown store and clock with the caller.
    pub fn with_state(mut self, cooldowns: Arc<dyn StateStore>, clock: Arc<dyn Clock>) -> Self {
        self.cooldowns = cooldowns;
        self.clock = clock;
        self
    }

    pub fn cooldowns(&self) -> &Arc<dyn StateStore> {
        &self.cooldowns
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Drop repeated and cooling-down elements, in input order.
    ///
    /// Every kept element is stamped "now", whether or not it is synthesized later.
    fn admit(&self, elements: &[TextElement]) -> Vec<TextElement> {
        let now = self.clock.now();
        let mut order: Vec<String> = Vec::new();
        let mut unique: HashMap<String, TextElement> = HashMap::new();

        for el in elements {
            if self.cooldowns.seen_within(&el.id, now, self.cooldown) {
                debug!("Skipping {} (cooldown)", el.id);
                continue;
            }

            if unique.insert(el.id.clone(), el.clone()).is_none() {
                order.push(el.id.clone());
            }
            self.cooldowns.mark_seen(&el.id, now);
        }

        order
            .into_iter()
            .filter_map(|id| unique.remove(&id))
            .collect()
    }

    /// `<root>/projects/<id>/assets/audio` when the active project has an assets
    /// directory, otherwise the default TTS directory.
    async fn output_dir(&self) -> PathBuf {
        let snapshot = match self.editor.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!("Snapshot unavailable, using default TTS directory: {}", e);
                None
            }
        };

        if let Some(project_id) = snapshot.as_ref().and_then(|s| s.project_id()) {
            let assets = self.workspace_root.join("projects").join(project_id).join("assets");
            if assets.is_dir() {
                let dir = assets.join("audio");
                info!("Redirecting TTS output to project assets: {}", dir.display());
                return dir;
            }
        }

        self.default_output_dir.clone()
    }

    async fn synthesize_one(&self, el: &TextElement, output_dir: &Path) -> Result<Option<TtsItem>> {
        let text = el.content.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let voice = el.voice_id.as_deref().unwrap_or(&self.default_voice);
        let file_path = output_dir.join(format!("tts_{}.mp3", el.id));
        debug!(
            "Generating voice for {}: {} (voice: {})",
            el.id,
            text.chars().take(20).collect::<String>(),
            voice
        );

        self.synthesizer.synthesize(text, voice, &file_path).await?;

        for _ in 0..FILE_WAIT_ATTEMPTS {
            if file_size(&file_path).await > 0 {
                break;
            }
            tokio::time::sleep(FILE_WAIT_DELAY).await;
        }

        let size = file_size(&file_path).await;
        if size < MIN_AUDIO_BYTES {
            return Err(MediaSyncError::Synthesis(format!(
                "Generated audio {} is too small or missing ({} bytes)",
                file_path.display(),
                size
            )));
        }

        Ok(Some(TtsItem {
            file_path,
            name: format!("TTS: {}", text.chars().take(NAME_PREVIEW_CHARS).collect::<String>()),
            start_time: el.start_time,
            duration: None,
        }))
    }

    /// Synthesize a batch and import the results on a new track.
    ///
    /// Returns the items that were synthesized, in input order. Per-element
    /// synthesis and import failures are logged and skipped.
    pub async fn generate_batch(&self, elements: &[TextElement]) -> Result<Vec<TtsItem>> {
        let elements = self.admit(elements);
        if elements.is_empty() {
            info!("No new TTS tasks to process");
            return Ok(Vec::new());
        }

        let output_dir = self.output_dir().await;
        tokio::fs::create_dir_all(&output_dir).await?;

        info!(
            "Generating speech for {} elements ({} concurrent) into {}",
            elements.len(),
            self.concurrency,
            output_dir.display()
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut futures = FuturesUnordered::new();

        for (index, el) in elements.iter().enumerate() {
            let sem = semaphore.clone();
            let output_dir = &output_dir;

            futures.push(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return (index, None);
                };

                match self.synthesize_one(el, output_dir).await {
                    Ok(item) => (index, item),
                    Err(e) => {
                        warn!("TTS failed for element {}: {}", el.id, e);
                        (index, None)
                    }
                }
            });
        }

        let mut results: Vec<(usize, Option<TtsItem>)> = Vec::with_capacity(elements.len());
        while let Some(result) = futures.next().await {
            results.push(result);
        }
        results.sort_by_key(|(index, _)| *index);

        let items: Vec<TtsItem> = results.into_iter().filter_map(|(_, item)| item).collect();
        if items.is_empty() {
            info!("TTS finished but no audio files were generated");
            return Ok(items);
        }

        let track_name = batch_track_name();
        info!("Importing {} TTS items to new track: {}", items.len(), track_name);

        let mut track_id: Option<String> = None;
        for item in &items {
            let mut request = ImportRequest::audio(item.file_path.clone(), item.start_time)
                .with_name(item.name.clone())
                .with_duration(item.duration)
                .on_track(track_name.clone());
            if let Some(id) = &track_id {
                request = request.in_track(id.clone());
            }

            match self.editor.import_media(&request).await {
                Ok(outcome) => {
                    debug!("Imported {} as asset {}", item.name, outcome.asset_id);
                    track_id.get_or_insert(outcome.track_id);
                }
                Err(e) => warn!("Import failed for {}: {}", item.name, e),
            }
        }

        Ok(items)
    }

    /// Render a short voice sample into the default TTS directory, reusing a
    /// previously rendered file when one exists.
    pub async fn generate_preview(&self, voice_id: &str, text: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.default_output_dir).await?;
        let file_path = self
            .default_output_dir
            .join(format!("preview_{}.mp3", sanitize_voice_id(voice_id)));

        if file_size(&file_path).await > PREVIEW_CACHE_BYTES {
            info!("Using cached preview {}", file_path.display());
            return Ok(file_path);
        }

        self.synthesizer.synthesize(text, voice_id, &file_path).await?;

        let size = file_size(&file_path).await;
        if size <= MIN_AUDIO_BYTES {
            return Err(MediaSyncError::Synthesis(format!(
                "Generated preview {} is too small or missing ({} bytes)",
                file_path.display(),
                size
            )));
        }

        info!("Preview generated: {}", file_path.display());
        Ok(file_path)
    }
}
