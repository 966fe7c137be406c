use anyhow::{bail, Context, Result};
use avatar_companion::avatar::{FsAssetSource, HeadlessRenderer};
use avatar_companion::{
    AudioCaptureSession, AudioSource, AvatarOptions, AvatarSession, Config, DisplayScheduler,
    PreferenceStore, RecorderState, Viewport,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "avatar-companion")]
#[command(about = "Avatar viewer and voice recorder for the companion demo")]
struct Cli {
    /// Config file (without extension)
    #[arg(short, long, default_value = "config/companion")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mount the avatar headless and drive lip-sync for a few frames
    View {
        /// Frames to render before tearing down
        #[arg(short, long, default_value = "180")]
        frames: u64,

        /// Avatar asset path (defaults to the configured one)
        #[arg(short, long)]
        asset: Option<String>,
    },

    /// Record audio into a WAV file
    Record {
        /// Audio source: mic, mic:<device>, file:<path> or silence
        #[arg(short, long, default_value = "mic")]
        source: String,

        /// Seconds to record (Ctrl+C stops early)
        #[arg(short, long, default_value = "5")]
        duration: u64,

        /// Output file (defaults to a timestamped file under the recordings path)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show or change provider preferences
    Prefs {
        /// Language model provider (groq, openai, anthropic)
        #[arg(long)]
        llm: Option<String>,

        /// Speech synthesis provider (coqui, kokoro)
        #[arg(long)]
        tts: Option<String>,
    },

    /// List microphone input devices
    #[cfg(feature = "microphone")]
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = Config::load_or_default(&cli.config)?;

    info!("Avatar Companion v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::View { frames, asset } => view(&cfg, frames, asset).await,
        Command::Record { source, duration, output } => record(&cfg, &source, duration, output).await,
        Command::Prefs { llm, tts } => prefs(&cfg, llm, tts),
        #[cfg(feature = "microphone")]
        Command::Devices => {
            for name in avatar_companion::audio::CpalMicrophone::list_devices()? {
                println!("{}", name);
            }
            Ok(())
        }
    }
}

async fn view(cfg: &Config, frames: u64, asset: Option<String>) -> Result<()> {
    let settings = &cfg.avatar;
    let viewport = Viewport::new(settings.width, settings.height).with_pixel_ratio(settings.pixel_ratio);
    let options = AvatarOptions {
        asset_path: asset.unwrap_or_else(|| settings.asset_path.clone()),
    };

    info!("Asset root: {}", settings.asset_root.display());

    let session = AvatarSession::mount(
        viewport,
        options,
        Arc::new(FsAssetSource::new(&settings.asset_root)),
        Box::new(HeadlessRenderer::new()),
        Box::new(DisplayScheduler::new(settings.refresh_hz)),
    );

    // Speak through the middle third of the run
    let frames = frames.max(3);
    session.wait_for_frame(frames / 3).await?;
    session.set_speaking(true);
    info!("Speaking");

    let snapshot = session.wait_for_frame(frames * 2 / 3).await?;
    session.set_speaking(false);
    info!("Silent (mouth open {:.3})", snapshot.lip_value);

    let snapshot = session.wait_for_frame(frames).await?;
    if !snapshot.is_ready() {
        warn!("Avatar not loaded; rendered an empty scene");
    }

    let stats = session.dispose().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}

async fn record(cfg: &Config, source: &str, duration: u64, output: Option<PathBuf>) -> Result<()> {
    let source: AudioSource = source.parse()?;
    let session = AudioCaptureSession::from_settings(source, &cfg.capture)?;

    if session.start().await != RecorderState::Recording {
        bail!("Recording did not start; check microphone access");
    }

    info!("Recording for {} seconds (Ctrl+C to stop early)", duration);
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(duration)) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Interrupted");
        }
    }

    let url = session.stop().await;
    let stats = session.stats().await;

    match (url, session.artifact().await) {
        (Some(url), Some(artifact)) => {
            let path = output.unwrap_or_else(|| {
                let stamp = artifact.recorded_at.format("%Y%m%d-%H%M%S");
                cfg.capture.recordings_path.join(format!("recording-{}.wav", stamp))
            });
            artifact.save(&path)?;
            info!("Playback reference: {}", url);
        }
        _ => warn!("Nothing was captured"),
    }

    println!("{}", serde_json::to_string_pretty(&stats)?);

    session.dispose().await;

    Ok(())
}

fn prefs(cfg: &Config, llm: Option<String>, tts: Option<String>) -> Result<()> {
    let mut store = PreferenceStore::open(&cfg.preferences.path);

    if let Some(llm) = llm {
        store.set_llm_provider(&llm)?;
    }
    if let Some(tts) = tts {
        store.set_tts_provider(&tts)?;
    }

    let current = serde_json::json!({
        "llm": store.llm_provider(),
        "tts": store.tts_provider(),
    });
    println!("{}", serde_json::to_string_pretty(&current)?);

    Ok(())
}
