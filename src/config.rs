use crate::error::{MediaSyncError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Speech recognition backends, tried in the configured order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AsrProvider {
    DashScope,
    Groq,
}

impl std::fmt::Display for AsrProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AsrProvider::DashScope => write!(f, "dashscope"),
            AsrProvider::Groq => write!(f, "groq"),
        }
    }
}

impl std::str::FromStr for AsrProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dashscope" => Ok(AsrProvider::DashScope),
            "groq" => Ok(AsrProvider::Groq),
            _ => Err(format!(
                "Unknown ASR provider: {}. Use 'dashscope' or 'groq'",
                s
            )),
        }
    }
}

/// Parse a comma separated provider list such as `groq,dashscope`.
pub fn parse_provider_list(s: &str) -> std::result::Result<Vec<AsrProvider>, String> {
    s.split(',')
        .filter(|p| !p.trim().is_empty())
        .map(str::parse)
        .collect()
}

/// The editor's public web directory, relative to the workspace root.
pub const EDITOR_PUBLIC_DIR: &str = "AIcut-Studio/apps/web/public";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub workspace_root: PathBuf,
    pub api_port: u16,
    pub dashscope_api_key: Option<String>,
    pub groq_api_key: Option<String>,
    pub asr_providers: Vec<AsrProvider>,
    pub poll_interval_ms: u64,
    pub tts_concurrency: usize,
    pub tts_cooldown_secs: u64,
    pub processed_ttl_secs: u64,
    pub tts_command: String,
    pub default_voice: String,
    /// Static asset directories searched by the file locator, relative to the workspace root.
    pub static_dirs: Vec<String>,
    pub scratch_dir: Option<PathBuf>,
    pub tts_output_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            api_port: 3000,
            dashscope_api_key: None,
            groq_api_key: None,
            asr_providers: vec![AsrProvider::DashScope, AsrProvider::Groq],
            poll_interval_ms: 500,
            tts_concurrency: 4,
            tts_cooldown_secs: 10,
            processed_ttl_secs: 3600,
            tts_command: "edge-tts".to_string(),
            default_voice: "zh-CN-XiaoxiaoNeural".to_string(),
            static_dirs: vec!["public".to_string(), EDITOR_PUBLIC_DIR.to_string()],
            scratch_dir: None,
            tts_output_dir: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        // Load from config file if it exists
        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                let contents = std::fs::read_to_string(&config_path)?;
                if let Ok(file_config) = toml::from_str::<Config>(&contents) {
                    config = file_config;
                }
            }
        }

        // Override with environment variables
        if let Ok(root) = std::env::var("WORKSPACE_ROOT") {
            config.workspace_root = PathBuf::from(root);
        }
        if let Ok(port) = std::env::var("API_PORT") {
            if let Ok(p) = port.parse() {
                config.api_port = p;
            }
        }
        if let Ok(key) = std::env::var("DASHSCOPE_API_KEY") {
            config.dashscope_api_key = Some(key);
        }
        if let Ok(key) = std::env::var("GROQ_API_KEY") {
            config.groq_api_key = Some(key);
        }
        if let Ok(providers) = std::env::var("MEDIASYNC_ASR_PROVIDERS") {
            if let Ok(list) = parse_provider_list(&providers) {
                config.asr_providers = list;
            }
        }
        if let Ok(interval) = std::env::var("MEDIASYNC_POLL_INTERVAL_MS") {
            if let Ok(ms) = interval.parse() {
                config.poll_interval_ms = ms;
            }
        }
        if let Ok(concurrency) = std::env::var("MEDIASYNC_TTS_CONCURRENCY") {
            if let Ok(c) = concurrency.parse() {
                config.tts_concurrency = c;
            }
        }
        if let Ok(command) = std::env::var("MEDIASYNC_TTS_COMMAND") {
            config.tts_command = command;
        }
        if let Ok(dir) = std::env::var("MEDIASYNC_SCRATCH_DIR") {
            config.scratch_dir = Some(PathBuf::from(dir));
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.workspace_root.is_dir() {
            return Err(MediaSyncError::Config(format!(
                "Workspace root {} does not exist. Set WORKSPACE_ROOT or pass --workspace",
                self.workspace_root.display()
            )));
        }

        if self.tts_concurrency == 0 {
            return Err(MediaSyncError::Config(
                "TTS concurrency must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(MediaSyncError::Config(
                "Poll interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// API key for a recognition backend, if configured.
    pub fn api_key(&self, provider: AsrProvider) -> Option<&str> {
        match provider {
            AsrProvider::DashScope => self.dashscope_api_key.as_deref(),
            AsrProvider::Groq => self.groq_api_key.as_deref(),
        }
        .filter(|k| !k.trim().is_empty())
    }

    pub fn editor_base_url(&self) -> String {
        format!("http://localhost:{}", self.api_port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn tts_cooldown(&self) -> Duration {
        Duration::from_secs(self.tts_cooldown_secs)
    }

    pub fn processed_ttl(&self) -> Duration {
        Duration::from_secs(self.processed_ttl_secs)
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn tts_output_dir(&self) -> PathBuf {
        self.tts_output_dir.clone().unwrap_or_else(|| {
            self.workspace_root
                .join(EDITOR_PUBLIC_DIR)
                .join("assets")
                .join("tts")
        })
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("mediasync").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parsing() {
        assert_eq!(
            "dashscope".parse::<AsrProvider>().unwrap(),
            AsrProvider::DashScope
        );
        assert_eq!("GROQ".parse::<AsrProvider>().unwrap(), AsrProvider::Groq);
        assert!("whisper".parse::<AsrProvider>().is_err());
    }

    #[test]
    fn test_provider_list_parsing() {
        assert_eq!(
            parse_provider_list("groq, dashscope").unwrap(),
            vec![AsrProvider::Groq, AsrProvider::DashScope]
        );
        assert_eq!(parse_provider_list("groq,").unwrap(), vec![AsrProvider::Groq]);
        assert!(parse_provider_list("groq,nope").is_err());
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api_port, 3000);
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.tts_cooldown(), Duration::from_secs(10));
        assert_eq!(
            config.asr_providers,
            vec![AsrProvider::DashScope, AsrProvider::Groq]
        );
        assert_eq!(config.editor_base_url(), "http://localhost:3000");
    }

    #[test]
    fn test_api_key_ignores_blank_values() {
        let mut config = Config::default();
        config.groq_api_key = Some("  ".to_string());
        assert!(config.api_key(AsrProvider::Groq).is_none());

        config.groq_api_key = Some("gsk-test".to_string());
        assert_eq!(config.api_key(AsrProvider::Groq), Some("gsk-test"));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config {
            workspace_root: dir.path().to_path_buf(),
            ..Config::default()
        };
        assert!(config.validate().is_ok());

        config.tts_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_workspace() {
        let config = Config {
            workspace_root: PathBuf::from("/nonexistent/mediasync/workspace"),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tts_output_dir_defaults_under_workspace() {
        let config = Config {
            workspace_root: PathBuf::from("/work"),
            ..Config::default()
        };
        assert_eq!(
            config.tts_output_dir(),
            PathBuf::from("/work/AIcut-Studio/apps/web/public/assets/tts")
        );
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("api_port = 4000\nasr_providers = [\"groq\"]").unwrap();
        assert_eq!(config.api_port, 4000);
        assert_eq!(config.asr_providers, vec![AsrProvider::Groq]);
        assert_eq!(config.tts_concurrency, 4);
    }
}
