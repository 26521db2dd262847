use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mediasync::audio::{check_ffmpeg, AudioTranscoder, BeatDetector};
use mediasync::{Config, Daemon, FileLocator, WalkLocator};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mediasync")]
#[command(version, about = "Media synchronization daemon for the video editor")]
#[command(long_about = "Polls the editor's task queue and runs speech recognition, beat detection and text-to-speech jobs against the open project.")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Workspace root (overrides WORKSPACE_ROOT)
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    /// Editor API port (overrides API_PORT)
    #[arg(short, long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon (default)
    Run,

    /// Print the beat times of an audio or video file as JSON
    Beats {
        file: PathBuf,
    },

    /// Resolve a media name to a file in the workspace
    Locate {
        name: String,

        /// Expected duration in seconds, used when no file matches by name
        #[arg(short, long)]
        duration: Option<f64>,

        /// Path registered by the editor, used when it exists
        #[arg(long)]
        hint: Option<PathBuf>,
    },
}

/// Logs go to stderr; stdout carries host events.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

async fn run_daemon(config: Config) -> Result<()> {
    if let Err(e) = check_ffmpeg().await {
        warn!("{}", e);
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl+C handler")?;

    info!("Workspace: {}", config.workspace_root.display());
    info!("Editor:    {}", config.editor_base_url());
    info!(
        "ASR:       {}",
        config
            .asr_providers
            .iter()
            .filter(|p| config.api_key(**p).is_some())
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let daemon = Arc::new(Daemon::builder(config).build());
    daemon.run(shutdown).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(workspace) = cli.workspace {
        config.workspace_root = workspace;
    }
    if let Some(port) = cli.port {
        config.api_port = port;
    }
    config.validate().context("Configuration validation failed")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_daemon(config).await?,
        Command::Beats { file } => {
            if !file.exists() {
                anyhow::bail!("Input file not found: {}", file.display());
            }
            let detector = BeatDetector::new(AudioTranscoder::new(config.scratch_dir()));
            let beats = detector.detect(&file).await;
            println!("{}", serde_json::to_string(&beats)?);
        }
        Command::Locate { name, duration, hint } => {
            let locator = WalkLocator::for_workspace(&config.workspace_root, &config.static_dirs);
            match locator.locate(&name, duration, hint.as_deref()).await {
                Some(path) => println!("{}", path.display()),
                None => anyhow::bail!("No file found for '{}'", name),
            }
        }
    }

    Ok(())
}
