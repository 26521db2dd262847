pub mod dashscope;
pub mod groq;

pub use dashscope::DashScopeClient;
pub use groq::GroqClient;

use crate::config::{AsrProvider, Config};
use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A recognized utterance with times in seconds, relative to the audio handed
/// to the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl RecognizedSegment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

#[async_trait]
pub trait RecognitionProvider: Send + Sync {
    async fn recognize(&self, audio: &Path) -> Result<Vec<RecognizedSegment>>;
    fn name(&self) -> &'static str;
}

/// Ordered list of recognition providers.
///
/// Providers are tried in order; the first one returning a non-empty result
/// wins. Failures and empty results fall through to the next provider.
#[derive(Clone, Default)]
pub struct RecognitionChain {
    providers: Vec<Arc<dyn RecognitionProvider>>,
}

impl RecognitionChain {
    pub fn new(providers: Vec<Arc<dyn RecognitionProvider>>) -> Self {
        Self { providers }
    }

    /// Build the providers that have credentials, in the configured order.
    pub fn from_config(config: &Config) -> Self {
        let mut providers: Vec<Arc<dyn RecognitionProvider>> = Vec::new();

        for kind in &config.asr_providers {
            let Some(key) = config.api_key(*kind) else {
                debug!("Skipping {} recognition: no API key configured", kind);
                continue;
            };

            match kind {
                AsrProvider::DashScope => providers.push(Arc::new(DashScopeClient::new(key.to_string()))),
                AsrProvider::Groq => providers.push(Arc::new(GroqClient::new(key.to_string()))),
            }
        }

        Self::new(providers)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub async fn recognize(&self, audio: &Path) -> Vec<RecognizedSegment> {
        for (i, provider) in self.providers.iter().enumerate() {
            info!("Recognizing {} with {}", audio.display(), provider.name());

            match provider.recognize(audio).await {
                Ok(segments) if !segments.is_empty() => {
                    info!("{} returned {} segments", provider.name(), segments.len());
                    return segments;
                }
                Ok(_) => info!("{} returned no segments", provider.name()),
                Err(e) => warn!("{} recognition failed: {}", provider.name(), e),
            }

            if let Some(next) = self.providers.get(i + 1) {
                info!("Falling back to {}", next.name());
            }
        }

        Vec::new()
    }
}
