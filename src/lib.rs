pub mod audio;
pub mod config;
pub mod daemon;
pub mod editor;
pub mod error;
pub mod events;
pub mod locate;
pub mod state;
pub mod sync;
pub mod transcribe;
pub mod tts;

pub use config::{AsrProvider, Config};
pub use daemon::{Daemon, DaemonBuilder};
pub use error::{MediaSyncError, Result};
pub use events::{DaemonEvent, EventSink};
pub use locate::{FileLocator, WalkLocator};
pub use state::{Clock, InMemoryStateStore, StateStore};
pub use sync::{remap_segments, visible_span, RecognitionSync, SliceMode};
pub use transcribe::{RecognitionChain, RecognitionProvider, RecognizedSegment};
pub use tts::{EdgeTtsCommand, SpeechSynthesizer, TtsBatchGenerator};
