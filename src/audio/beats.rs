use std::io::Read;
use std::path::Path;
use std::time::Duration;

use hound::{SampleFormat, WavReader};
use tracing::{debug, info, warn};

use crate::error::{MediaSyncError, Result};

use super::transcode::{AudioTranscoder, ANALYSIS_SAMPLE_RATE};

/// Configuration for energy-based beat detection.
#[derive(Debug, Clone)]
pub struct BeatConfig {
    /// Samples per analysis frame.
    pub hop_size: usize,

    /// Sample rate the input is transcoded to before analysis.
    pub sample_rate: u32,

    /// A frame must reach `mean + threshold_sigma * std` to count as a beat.
    pub threshold_sigma: f64,

    /// Minimum spacing between two accepted beats.
    pub min_interval: Duration,

    /// Transcoded WAVs at or below this size are treated as decode failures.
    pub min_wav_bytes: u64,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            hop_size: 1024,
            sample_rate: ANALYSIS_SAMPLE_RATE,
            threshold_sigma: 1.5,
            min_interval: Duration::from_millis(300),
            min_wav_bytes: 1000,
        }
    }
}

/// Calculate RMS energy of a frame of 16-bit samples, in sample units.
pub fn calculate_rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let s = s as f64;
            s * s
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt()
}

/// Stream a mono 16-bit WAV in `hop_size` frames and return each frame's RMS.
///
/// The trailing partial frame is kept.
pub fn frame_energies<R: Read>(reader: WavReader<R>, hop_size: usize) -> Result<Vec<f64>> {
    let spec = reader.spec();

    if spec.channels != 1 {
        return Err(MediaSyncError::Transcode(format!(
            "Beat analysis needs mono audio, got {} channels",
            spec.channels
        )));
    }
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(MediaSyncError::Transcode(format!(
            "Beat analysis needs 16-bit PCM, got {:?} {} bits",
            spec.sample_format, spec.bits_per_sample
        )));
    }

    let hop_size = hop_size.max(1);
    let mut energies = Vec::new();
    let mut frame: Vec<i16> = Vec::with_capacity(hop_size);

    for sample in reader.into_samples::<i16>() {
        frame.push(sample?);
        if frame.len() == hop_size {
            energies.push(calculate_rms(&frame));
            frame.clear();
        }
    }

    if !frame.is_empty() {
        energies.push(calculate_rms(&frame));
    }

    Ok(energies)
}

/// Pick beat timestamps (seconds, millisecond precision) from an RMS series.
///
/// A frame is a beat when it clears `mean + k * std` (population statistics),
/// is a local maximum, and lands at least `min_interval` after the previous beat.
pub fn pick_beats(energies: &[f64], hop_size: usize, sample_rate: u32, config: &BeatConfig) -> Vec<f64> {
    if energies.len() < 3 || sample_rate == 0 {
        return Vec::new();
    }

    let n = energies.len() as f64;
    let mean = energies.iter().sum::<f64>() / n;
    let variance = energies.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let threshold = mean + config.threshold_sigma * variance.sqrt();

    let min_gap_ms = config.min_interval.as_millis() as i64;
    let mut last_ms: Option<i64> = None;
    let mut beats = Vec::new();

    for i in 1..energies.len() - 1 {
        let value = energies[i];
        if value < threshold {
            continue;
        }
        if value <= energies[i - 1] || value < energies[i + 1] {
            continue;
        }

        let t_ms = ((i * hop_size) as f64 * 1000.0 / sample_rate as f64).round() as i64;
        if last_ms.map_or(true, |last| t_ms - last >= min_gap_ms) {
            beats.push(t_ms as f64 / 1000.0);
            last_ms = Some(t_ms);
        }
    }

    beats
}

/// Detect beats in a WAV file that is already mono 16-bit PCM.
pub fn detect_beats_in_wav(wav_path: &Path, config: &BeatConfig) -> Result<Vec<f64>> {
    let reader = WavReader::open(wav_path)?;
    let sample_rate = reader.spec().sample_rate;

    let energies = frame_energies(reader, config.hop_size)?;
    debug!("Computed {} energy frames", energies.len());

    Ok(pick_beats(&energies, config.hop_size, sample_rate, config))
}

/// Energy-based onset detector for background music.
#[derive(Debug, Clone)]
pub struct BeatDetector {
    transcoder: AudioTranscoder,
    config: BeatConfig,
}

impl BeatDetector {
    pub fn new(transcoder: AudioTranscoder) -> Self {
        Self {
            transcoder,
            config: BeatConfig::default(),
        }
    }

    /// Detect beats in any media file. Failures of any kind yield an empty list.
    pub async fn detect(&self, input: &Path) -> Vec<f64> {
        let wav = match self
            .transcoder
            .to_mono_wav(input, self.config.sample_rate, self.config.min_wav_bytes)
            .await
        {
            Ok(wav) => wav,
            Err(e) => {
                warn!("Could not transcode {} for beat analysis: {}", input.display(), e);
                return Vec::new();
            }
        };

        let config = self.config.clone();
        let analysis = tokio::task::spawn_blocking(move || {
            let result = detect_beats_in_wav(&wav, &config);
            drop(wav);
            result
        })
        .await;

        match analysis {
            Ok(Ok(beats)) => {
                info!("Detected {} beats in {}", beats.len(), input.display());
                beats
            }
            Ok(Err(e)) => {
                warn!("Beat analysis failed for {}: {}", input.display(), e);
                Vec::new()
            }
            Err(e) => {
                warn!("Beat analysis task aborted: {}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_rms_silence() {
        let samples = vec![0i16; 100];
        assert_eq!(calculate_rms(&samples), 0.0);
    }

    #[test]
    fn test_calculate_rms_constant() {
        let samples = vec![-1000i16; 64];
        assert!((calculate_rms(&samples) - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_peak_is_one_beat() {
        let energies = vec![1.0, 1.0, 1.0, 50.0, 1.0, 1.0];
        let beats = pick_beats(&energies, 1024, 1024, &BeatConfig::default());
        assert_eq!(beats, vec![3.0]);
    }

    #[test]
    fn test_edges_are_never_beats() {
        let energies = vec![90.0, 1.0, 1.0, 1.0, 1.0, 90.0];
        let beats = pick_beats(&energies, 1024, 1024, &BeatConfig::default());
        assert!(beats.is_empty());
    }

    #[test]
    fn test_silence_has_no_beats() {
        let energies = vec![0.0; 50];
        assert!(pick_beats(&energies, 1024, 44100, &BeatConfig::default()).is_empty());
    }

    #[test]
    fn test_plateau_counts_once() {
        // rms[i] > rms[i-1] and rms[i] >= rms[i+1]: only the first frame of a plateau qualifies.
        let energies = vec![1.0, 1.0, 40.0, 40.0, 1.0, 1.0, 1.0, 1.0];
        let beats = pick_beats(&energies, 1, 10, &BeatConfig::default());
        assert_eq!(beats, vec![0.2]);
    }

    #[test]
    fn test_min_interval_suppresses_close_peaks() {
        // 10 frames/s: peaks at 1.0s and 1.2s are too close, 2.0s is fine.
        let mut energies = vec![0.0; 40];
        energies[10] = 100.0;
        energies[12] = 100.0;
        energies[20] = 100.0;
        let beats = pick_beats(&energies, 1, 10, &BeatConfig::default());

        assert_eq!(beats, vec![1.0, 2.0]);
    }

    #[test]
    fn test_too_short_series() {
        assert!(pick_beats(&[5.0, 9.0], 1024, 44100, &BeatConfig::default()).is_empty());
    }
}
