pub mod beats;
pub mod transcode;

pub use beats::{calculate_rms, detect_beats_in_wav, frame_energies, pick_beats, BeatConfig, BeatDetector};
pub use transcode::{
    check_ffmpeg, get_media_duration, AudioTranscoder, ANALYSIS_SAMPLE_RATE,
    RECOGNITION_SAMPLE_RATE,
};
