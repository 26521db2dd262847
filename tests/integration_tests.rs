//! Integration tests for mediasync
//!
//! These tests exercise the pure parts of the pipeline (remapping, beat
//! picking, file location, state bookkeeping) without an editor or API keys.

use mediasync::audio::{detect_beats_in_wav, pick_beats, BeatConfig};
use mediasync::config::{parse_provider_list, AsrProvider, Config};
use mediasync::editor::ElementConfig;
use mediasync::events::{DaemonEvent, StdoutEventSink, STDOUT_EVENT_PREFIX};
use mediasync::locate::{DurationProbe, FileLocator, WalkLocator};
use mediasync::state::{Clock, InMemoryStateStore, ManualClock, StateStore};
use mediasync::sync::{remap_segments, visible_span, SliceMode};
use mediasync::transcribe::RecognizedSegment;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn element(start_time: f64, duration: f64, trim_start: f64, trim_end: f64) -> ElementConfig {
    ElementConfig {
        id: "el".to_string(),
        start_time,
        duration,
        trim_start,
        trim_end,
    }
}

// ============================================================================
// Config Integration Tests
// ============================================================================

mod config_tests {
    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();
        assert_eq!(config.tts_concurrency, 4);
        assert_eq!(config.default_voice, "zh-CN-XiaoxiaoNeural");
        assert_eq!(config.processed_ttl(), Duration::from_secs(3600));
        assert!(config
            .tts_output_dir()
            .ends_with("AIcut-Studio/apps/web/public/assets/tts"));
        assert_eq!(config.static_dirs, vec!["public", "AIcut-Studio/apps/web/public"]);
    }

    #[test]
    fn test_config_validation() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config {
            workspace_root: dir.path().to_path_buf(),
            ..Config::default()
        };
        assert!(config.validate().is_ok());

        config.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        config.poll_interval_ms = 500;
        config.workspace_root = dir.path().join("missing");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let config: Config = toml::from_str(
            r#"
            api_port = 4100
            asr_providers = ["groq"]
            tts_cooldown_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.api_port, 4100);
        assert_eq!(config.asr_providers, vec![AsrProvider::Groq]);
        assert_eq!(config.tts_cooldown(), Duration::from_secs(30));
        // Unset fields keep their defaults.
        assert_eq!(config.poll_interval_ms, 500);
    }

    #[test]
    fn test_provider_list() {
        assert_eq!(
            parse_provider_list("dashscope,groq").unwrap(),
            vec![AsrProvider::DashScope, AsrProvider::Groq]
        );
    }
}

// ============================================================================
// Timestamp Remapping Tests
// ============================================================================

mod remap_tests {
    use super::*;

    #[test]
    fn test_visible_span_is_always_positive() {
        let values = [-5.0, 0.0, 0.05, 0.1, 1.0, 7.5, 30.0];
        for &duration in &values {
            for &trim_start in &values {
                for &trim_end in &values {
                    let span = visible_span(duration, trim_start, trim_end);
                    assert!(
                        span > 0.0,
                        "span {} for duration={} trim_start={} trim_end={}",
                        span,
                        duration,
                        trim_start,
                        trim_end
                    );
                }
            }
        }
    }

    #[test]
    fn test_sliced_example() {
        let subs = remap_segments(
            &[RecognizedSegment::new(1.0, 3.0, "hello")],
            &element(5.0, 10.0, 2.0, 1.0),
            SliceMode::Sliced,
        );
        assert_eq!(subs.len(), 1);
        assert!((subs[0].start_time - 6.0).abs() < 1e-9);
        assert!((subs[0].duration - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_full_example() {
        let subs = remap_segments(
            &[RecognizedSegment::new(0.0, 4.0, "hello")],
            &element(5.0, 10.0, 2.0, 1.0),
            SliceMode::Full,
        );
        assert_eq!(subs.len(), 1);
        assert!((subs[0].start_time - 5.0).abs() < 1e-9);
        assert!((subs[0].duration - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_full_mode_never_leaves_the_window() {
        let el = element(10.0, 20.0, 3.0, 4.0);
        let segments: Vec<RecognizedSegment> = (0..30)
            .map(|i| RecognizedSegment::new(i as f64 * 0.8, i as f64 * 0.8 + 2.5, "some words here"))
            .collect();

        let subs = remap_segments(&segments, &el, SliceMode::Full);
        assert!(!subs.is_empty());
        for sub in subs {
            assert!(sub.start_time >= 10.0 - 1e-9);
            assert!(sub.start_time + sub.duration <= 10.0 + 13.0 + 1e-9);
            assert!(sub.duration > 0.1);
        }
    }

    #[test]
    fn test_stretched_short_text() {
        let el = element(0.0, 10.0, 0.0, 0.0);
        let dropped = remap_segments(&[RecognizedSegment::new(0.0, 4.5, "嗯嗯嗯")], &el, SliceMode::Sliced);
        let kept = remap_segments(&[RecognizedSegment::new(0.0, 1.0, "嗯嗯嗯")], &el, SliceMode::Sliced);

        assert!(dropped.is_empty());
        assert_eq!(kept.len(), 1);
    }
}

// ============================================================================
// Beat Detection Tests
// ============================================================================

mod beat_tests {
    use super::*;

    const RATE: u32 = 44_100;
    const HOP: usize = 1024;

    /// Mono 16-bit WAV of silence with one loud frame at each index in `loud_frames`.
    fn write_click_track(path: &Path, total_frames: usize, loud_frames: &[usize]) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for frame in 0..total_frames {
            let value: i16 = if loud_frames.contains(&frame) { 8000 } else { 0 };
            for _ in 0..HOP {
                writer.write_sample(value).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_click_track_beats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clicks.wav");
        let loud: Vec<usize> = (0..7).map(|i| 20 + i * 22).collect();
        write_click_track(&path, 173, &loud);

        let beats = detect_beats_in_wav(&path, &BeatConfig::default()).unwrap();

        assert_eq!(beats.len(), 7);
        assert_eq!(beats[0], 0.464);
        for pair in beats.windows(2) {
            assert!(pair[1] > pair[0]);
            assert!(pair[1] - pair[0] >= 0.3 - 1e-9);
        }
    }

    #[test]
    fn test_stereo_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..4096 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        assert!(detect_beats_in_wav(&path, &BeatConfig::default()).is_err());
    }

    #[test]
    fn test_silence_has_no_beats() {
        let config = BeatConfig::default();
        assert!(pick_beats(&[0.0; 50], HOP, RATE, &config).is_empty());
        assert!(pick_beats(&[], HOP, RATE, &config).is_empty());
    }

    #[test]
    fn test_beats_are_spaced() {
        // Dense alternating peaks every two frames (about 46 ms apart).
        let energies: Vec<f64> = (0..400)
            .map(|i| if i % 2 == 1 { 100.0 } else { 1.0 })
            .chain(std::iter::repeat(0.0).take(400))
            .collect();
        let beats = pick_beats(&energies, HOP, RATE, &BeatConfig::default());

        assert!(!beats.is_empty());
        for pair in beats.windows(2) {
            assert!(pair[1] - pair[0] >= 0.3 - 1e-9, "{:?}", pair);
        }
    }
}

// ============================================================================
// File Locator Tests
// ============================================================================

mod locator_tests {
    use super::*;

    /// Reports a fixed duration for files whose name contains a key.
    struct TableProbe(Vec<(&'static str, f64)>);

    #[async_trait]
    impl DurationProbe for TableProbe {
        async fn duration(&self, path: &Path) -> Option<f64> {
            let name = path.file_name()?.to_string_lossy().to_string();
            self.0
                .iter()
                .find(|(key, _)| name.contains(key))
                .map(|(_, d)| *d)
        }
    }

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"data").unwrap();
    }

    #[tokio::test]
    async fn test_locate_by_name_in_static_dir() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("app");
        touch(&root.join("public").join("media").join("Intro.mp4"));

        let locator = WalkLocator::new(vec![root.clone(), root.join("public")]);
        let found = locator.locate("intro.MP4", None, None).await.unwrap();
        assert!(found.ends_with("public/media/Intro.mp4"));
    }

    #[tokio::test]
    async fn test_locate_falls_back_to_duration() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a_short.mp3"));
        touch(&dir.path().join("b_match.wav"));
        touch(&dir.path().join("c_notes.txt"));

        let locator = WalkLocator::new(vec![dir.path().to_path_buf()])
            .with_probe(Arc::new(TableProbe(vec![("short", 3.0), ("match", 61.2), ("notes", 60.0)])));

        let found = locator.locate("renamed.mp3", Some(60.0), None).await;
        assert_eq!(found, Some(dir.path().join("b_match.wav")));

        let none = locator.locate("renamed.mp3", Some(200.0), None).await;
        assert!(none.is_none());
    }

    #[test]
    fn test_absolute_name_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("abs.wav");
        touch(&file);

        let locator = WalkLocator::new(Vec::<PathBuf>::new());
        let found = tokio_test::block_on(locator.locate(&file.to_string_lossy(), None, None));
        assert_eq!(found, Some(file));
    }
}

// ============================================================================
// State Store Tests
// ============================================================================

mod state_tests {
    use super::*;

    #[test]
    fn test_cooldown_window_with_manual_clock() {
        let store = InMemoryStateStore::new();
        let clock = ManualClock::new();
        let window = Duration::from_secs(10);

        store.mark_seen("el-1", clock.now());
        clock.advance(Duration::from_secs(3));
        assert!(store.seen_within("el-1", clock.now(), window));

        clock.advance(Duration::from_secs(8));
        assert!(!store.seen_within("el-1", clock.now(), window));
    }

    #[test]
    fn test_sweep_by_ttl() {
        let store = InMemoryStateStore::new();
        let clock = ManualClock::new();

        for i in 0..5 {
            store.mark_seen(&format!("task-{}", i), clock.now());
            clock.advance(Duration::from_secs(60));
        }

        // Ages are now 300, 240, 180, 120 and 60 seconds.
        assert_eq!(store.sweep(clock.now(), Duration::from_secs(150)), 3);
        assert_eq!(store.len(), 2);
        assert!(store.has("task-4"));
    }
}

// ============================================================================
// Event Tests
// ============================================================================

mod event_tests {
    use super::*;

    #[test]
    fn test_event_line_is_parseable_json() {
        let event = DaemonEvent::new("beatMarkersAdded", serde_json::json!({"count": 4}));
        let line = StdoutEventSink::format_line(&event).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(line.strip_prefix(STDOUT_EVENT_PREFIX).unwrap()).unwrap();
        assert_eq!(json["action"], "beatMarkersAdded");
        assert_eq!(json["data"]["count"], 4);
        assert!(json["id"].as_str().unwrap().starts_with("evt_"));
        assert!(json["timestamp"].is_i64());
    }
}
