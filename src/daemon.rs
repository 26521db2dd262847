//! The task poller: drains the editor's queue and dispatches each task once.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::audio::{AudioTranscoder, BeatDetector};
use crate::config::Config;
use crate::editor::{EditorClient, ElementConfig, Snapshot, Task, TaskData, TaskType, REQUEST_TASK_ACTION};
use crate::error::Result;
use crate::events::{DaemonEvent, EventSink, StdoutEventSink};
use crate::locate::{FileLocator, WalkLocator};
use crate::state::{Clock, InMemoryStateStore, StateStore, SystemClock};
use crate::sync::RecognitionSync;
use crate::transcribe::RecognitionChain;
use crate::tts::{EdgeTtsCommand, SpeechSynthesizer, TtsBatchGenerator, DEFAULT_PREVIEW_TEXT};

/// How often the processed and cooldown stores are swept.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Upper bound on the sleep between failing polls.
pub const MAX_POLL_BACKOFF: Duration = Duration::from_secs(5);

/// Sleep after `failures` consecutive poll errors: the base interval doubled per
/// failure, capped at [`MAX_POLL_BACKOFF`].
pub fn poll_delay(base: Duration, failures: u32) -> Duration {
    if failures == 0 {
        return base;
    }
    let factor = 2u32.saturating_pow(failures.min(16));
    base.checked_mul(factor)
        .unwrap_or(MAX_POLL_BACKOFF)
        .min(MAX_POLL_BACKOFF)
}

pub struct Daemon {
    editor: Arc<EditorClient>,
    locator: Arc<dyn FileLocator>,
    recognition: RecognitionSync,
    beats: BeatDetector,
    tts: TtsBatchGenerator,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    processed: Arc<dyn StateStore>,
    cooldowns: Arc<dyn StateStore>,
    /// Task ids listed by the most recent successful poll.
    queued: Mutex<HashSet<String>>,
    poll_interval: Duration,
    processed_ttl: Duration,
    default_voice: String,
}

/// Assembles a [`Daemon`] from a [`Config`], with every collaborator replaceable.
pub struct DaemonBuilder {
    config: Config,
    editor: Option<Arc<EditorClient>>,
    locator: Option<Arc<dyn FileLocator>>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    recognition: Option<RecognitionChain>,
    events: Option<Arc<dyn EventSink>>,
    clock: Option<Arc<dyn Clock>>,
    processed: Option<Arc<dyn StateStore>>,
    cooldowns: Option<Arc<dyn StateStore>>,
}

impl DaemonBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            editor: None,
            locator: None,
            synthesizer: None,
            recognition: None,
            events: None,
            clock: None,
            processed: None,
            cooldowns: None,
        }
    }

    pub fn with_editor(mut self, editor: Arc<EditorClient>) -> Self {
        self.editor = Some(editor);
        self
    }

    pub fn with_locator(mut self, locator: Arc<dyn FileLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn with_recognition(mut self, chain: RecognitionChain) -> Self {
        self.recognition = Some(chain);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_processed_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.processed = Some(store);
        self
    }

    pub fn with_cooldown_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.cooldowns = Some(store);
        self
    }

    pub fn build(self) -> Daemon {
        let config = self.config;
        let editor = self
            .editor
            .unwrap_or_else(|| Arc::new(EditorClient::new(config.editor_base_url())));
        let locator = self.locator.unwrap_or_else(|| {
            Arc::new(WalkLocator::for_workspace(&config.workspace_root, &config.static_dirs))
        });
        let synthesizer = self
            .synthesizer
            .unwrap_or_else(|| Arc::new(EdgeTtsCommand::new(config.tts_command.clone())));
        let chain = self
            .recognition
            .unwrap_or_else(|| RecognitionChain::from_config(&config));
        let events = self.events.unwrap_or_else(|| Arc::new(StdoutEventSink));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let processed = self
            .processed
            .unwrap_or_else(|| Arc::new(InMemoryStateStore::new()));
        let cooldowns = self
            .cooldowns
            .unwrap_or_else(|| Arc::new(InMemoryStateStore::new()));

        let transcoder = AudioTranscoder::new(config.scratch_dir());
        let tts = TtsBatchGenerator::new(synthesizer, editor.clone(), &config)
            .with_state(cooldowns.clone(), clock.clone());

        Daemon {
            recognition: RecognitionSync::new(transcoder.clone(), chain, editor.clone()),
            beats: BeatDetector::new(transcoder),
            tts,
            editor,
            locator,
            events,
            clock,
            processed,
            cooldowns,
            queued: Mutex::new(HashSet::new()),
            poll_interval: config.poll_interval(),
            processed_ttl: config.processed_ttl(),
            default_voice: config.default_voice,
        }
    }
}

impl Daemon {
    pub fn builder(config: Config) -> DaemonBuilder {
        DaemonBuilder::new(config)
    }

    pub fn processed(&self) -> &Arc<dyn StateStore> {
        &self.processed
    }

    /// Poll until `shutdown` is set.
    pub async fn run(self: Arc<Self>, shutdown: Arc<AtomicBool>) {
        info!("Daemon started, polling {}", self.editor.api_url());

        let mut failures: u32 = 0;
        let mut last_sweep = self.clock.now();

        while !shutdown.load(Ordering::SeqCst) {
            match self.poll_once().await {
                Ok(count) => {
                    if count > 0 {
                        debug!("Dispatched {} tasks", count);
                    }
                    failures = 0;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!("Poll error ({} in a row): {}", failures, e);
                }
            }

            let now = self.clock.now();
            if now.saturating_duration_since(last_sweep) >= SWEEP_INTERVAL {
                self.sweep();
                last_sweep = now;
            }

            tokio::time::sleep(poll_delay(self.poll_interval, failures)).await;
        }

        info!("Daemon stopped");
    }

    /// Fetch the queue once and dispatch every task not seen before.
    ///
    /// Tasks are recorded and acknowledged before any work starts, so a task that
    /// fails or panics is never dispatched again. Returns how many tasks were dispatched.
    pub async fn poll_once(self: &Arc<Self>) -> Result<usize> {
        let tasks = self.editor.pending_edits().await?;
        let mut dispatched = 0;

        {
            let mut queued = self.queued.lock().unwrap_or_else(|e| e.into_inner());
            *queued = tasks.iter().map(|t| t.id.clone()).collect();
        }

        for task in tasks {
            if task.processed || self.processed.has(&task.id) {
                continue;
            }

            self.processed.mark_seen(&task.id, self.clock.now());
            if let Err(e) = self.editor.mark_processed(std::slice::from_ref(&task.id)).await {
                warn!("Failed to acknowledge task {}: {}", task.id, e);
            }

            if task.action != REQUEST_TASK_ACTION {
                debug!("Ignoring task {} with action '{}'", task.id, task.action);
                continue;
            }

            let id = task.id.clone();
            let task_type = task.data.task_type;
            let this = Arc::clone(self);

            match tokio::spawn(async move { this.dispatch(task).await }).await {
                Ok(Ok(())) => debug!("Task {} ({}) finished", id, task_type),
                Ok(Err(e)) => error!("Task {} ({}) failed: {}", id, task_type, e),
                Err(e) => error!("Task {} ({}) aborted: {}", id, task_type, e),
            }
            dispatched += 1;
        }

        Ok(dispatched)
    }

    /// Evict expired processed ids and cooldown stamps.
    ///
    /// A processed id is only evicted once the editor has stopped listing it, so
    /// a task whose acknowledgement never landed is not dispatched again.
    pub fn sweep(&self) {
        let now = self.clock.now();
        let processed = {
            let queued = self.queued.lock().unwrap_or_else(|e| e.into_inner());
            self.processed
                .sweep_except(now, self.processed_ttl, &|id: &str| queued.contains(id))
        };
        let cooldowns = self.cooldowns.sweep(now, self.tts.cooldown());
        if processed + cooldowns > 0 {
            debug!(
                "Swept {} processed ids and {} cooldown entries",
                processed, cooldowns
            );
        }
    }

    async fn dispatch(&self, task: Task) -> Result<()> {
        info!("Task {}: {}", task.id, task.data.task_type);

        match task.data.task_type {
            TaskType::SubtitleGeneration => self.generate_subtitles(&task.data).await,
            TaskType::TtsGeneration => self.generate_tts(&task.data).await,
            TaskType::TtsPreview => self.generate_preview(&task.data).await,
            TaskType::BgmBeatAnalysis => self.analyze_beats(&task.data).await,
            TaskType::Unknown => {
                warn!("Task {} has an unknown task type, ignoring", task.id);
                Ok(())
            }
        }
    }

    /// Snapshot for lookups that can proceed without one.
    async fn optional_snapshot(&self) -> Option<Snapshot> {
        match self.editor.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Could not fetch project snapshot: {}", e);
                None
            }
        }
    }

    async fn generate_subtitles(&self, data: &TaskData) -> Result<()> {
        let Some(element_id) = data.element_id.as_deref() else {
            warn!("Subtitle task without an elementId");
            return Ok(());
        };
        info!(
            "New recognition task: {}",
            data.media_name.as_deref().unwrap_or(element_id)
        );

        let Some(snapshot) = self.optional_snapshot().await else {
            warn!("No project snapshot, cannot place subtitles for {}", element_id);
            return Ok(());
        };
        let Some(element) = snapshot.find_element(element_id) else {
            info!("Element {} not found in project snapshot", element_id);
            return Ok(());
        };

        let asset = data.media_id.as_deref().and_then(|id| snapshot.find_asset(id));
        let duration = asset.and_then(|a| a.duration);
        let hint = asset.and_then(|a| a.file_path.as_deref()).map(PathBuf::from);
        let name = data
            .media_name
            .as_deref()
            .or(asset.map(|a| a.name.as_str()))
            .unwrap_or_default();

        let Some(path) = self.locator.locate(name, duration, hint.as_deref()).await else {
            warn!("File not found on disk: {}", name);
            return Ok(());
        };

        let subtitles = self
            .recognition
            .recognize_and_sync(&path, &ElementConfig::from(element))
            .await?;

        if !subtitles.is_empty() {
            self.events.emit(&DaemonEvent::new(
                "subtitlesSynced",
                json!({ "elementId": element_id, "count": subtitles.len() }),
            ));
        }
        Ok(())
    }

    async fn generate_tts(&self, data: &TaskData) -> Result<()> {
        let items = self.tts.generate_batch(&data.text_elements).await?;

        if !items.is_empty() {
            self.events.emit(&DaemonEvent::new(
                "ttsGenerated",
                json!({ "count": items.len(), "items": items }),
            ));
        }
        Ok(())
    }

    async fn generate_preview(&self, data: &TaskData) -> Result<()> {
        let voice = data.voice_id.as_deref().unwrap_or(&self.default_voice);
        let text = data.text.as_deref().unwrap_or(DEFAULT_PREVIEW_TEXT);
        info!("Generating TTS preview for voice {}", voice);

        let path = self.tts.generate_preview(voice, text).await?;
        self.events.emit(&DaemonEvent::new(
            "ttsPreviewReady",
            json!({ "voiceId": voice, "filePath": path }),
        ));
        Ok(())
    }

    async fn analyze_beats(&self, data: &TaskData) -> Result<()> {
        let mut name = data.media_name.clone();
        let mut hint = data.file_path.clone();

        let snapshot = self.optional_snapshot().await;
        if let Some(snapshot) = &snapshot {
            if hint.is_none() {
                if let Some(asset) = data.media_id.as_deref().and_then(|id| snapshot.find_asset(id)) {
                    hint = asset.file_path.as_ref().map(PathBuf::from);
                    if name.is_none() {
                        name = Some(asset.name.clone());
                    }
                }
            }

            if name.is_none() {
                if let Some(asset) = snapshot.first_asset_of_kind("audio") {
                    name = Some(asset.name.clone());
                    if hint.is_none() {
                        hint = asset.file_path.as_ref().map(PathBuf::from);
                    }
                }
            }
        }

        if name.is_none() && hint.is_none() {
            info!("BGM beat analysis skipped: no audio reference");
            return Ok(());
        }

        let name = name.unwrap_or_default();
        let Some(path) = self.locator.locate(&name, None, hint.as_deref()).await else {
            info!("BGM beat analysis skipped: audio file not found");
            return Ok(());
        };

        info!("Analyzing BGM beats: {}", path.display());
        let beats = self.beats.detect(&path).await;
        if beats.is_empty() {
            info!("No beats detected");
            return Ok(());
        }

        self.editor.add_markers(&beats).await?;
        info!("Beat markers added: {}", beats.len());
        self.events.emit(&DaemonEvent::new(
            "beatMarkersAdded",
            json!({ "count": beats.len(), "times": beats }),
        ));
        Ok(())
    }
}
