// Command-line player driving the handle registry with the cpal engine
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use soundbridge_lib::audio::CpalPlayerFactory;
use soundbridge_lib::{
    constants, AudioHandleRegistry, CompletionStatus, PlayOutcome, SoundConfig, SourceResolver,
    StreamRoute,
};

const KEY: i32 = 0;

#[derive(Parser, Debug)]
#[command(name = "soundbridge")]
#[command(about = "Play sounds through the native handle registry")]
#[command(version)]
struct Args {
    /// Directory holding sound.json
    #[arg(long, env = "SOUNDBRIDGE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Directory searched for bundled sounds by name
    #[arg(long)]
    bundle_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prepare a source and play it to the end
    Play {
        source: String,

        /// Raw stream route value (see `routes`)
        #[arg(long, default_value_t = StreamRoute::Default.raw(), allow_hyphen_values = true)]
        route: i32,

        /// Left gain, 0.0-1.0
        #[arg(long, default_value_t = 1.0)]
        volume: f32,

        /// Right gain, defaults to the left one
        #[arg(long)]
        right: Option<f32>,

        #[arg(long = "loop")]
        looping: bool,

        /// Start position in seconds
        #[arg(long)]
        seek: Option<f64>,

        /// Stop after this many seconds
        #[arg(long = "for")]
        limit: Option<f64>,
    },
    /// Print duration and channel count as JSON
    Probe { source: String },
    /// Print the stream route constants as JSON
    Routes,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("soundbridge=info,soundbridge_lib=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config_dir {
        Some(dir) => SoundConfig::load(dir).context("Failed to load sound config")?,
        None => SoundConfig::default(),
    };
    if args.bundle_dir.is_some() {
        config.bundle_dir = args.bundle_dir.clone();
    }

    let mut registry = AudioHandleRegistry::new(
        CpalPlayerFactory::new(&config),
        SourceResolver::new(config.bundle_dir.clone()),
    );

    match args.command {
        Command::Routes => {
            println!("{}", serde_json::to_string_pretty(&constants())?);
        }
        Command::Probe { source } => {
            let info = registry
                .prepare(&source, KEY, StreamRoute::Default)
                .with_context(|| format!("Failed to prepare {}", source))?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            registry.release(KEY);
        }
        Command::Play {
            source,
            route,
            volume,
            right,
            looping,
            seek,
            limit,
        } => {
            let route = StreamRoute::from_raw(route);
            let info = registry
                .prepare(&source, KEY, route)
                .with_context(|| format!("Failed to prepare {}", source))?;
            info!("{} ({:.2}s, {} ch) on {:?}", source, info.duration, info.channels, route);

            registry.set_volume(KEY, volume, right.unwrap_or(volume));
            registry.set_looping(KEY, looping);
            if let Some(seconds) = seek {
                registry.set_current_time(KEY, seconds);
            }

            let outcome = play_until_done(&mut registry, limit.map(Duration::from_secs_f64));
            registry.release(KEY);

            match outcome {
                Some(PlayOutcome::Completed) | None => {}
                Some(PlayOutcome::Failed) => bail!("Playback of {} failed", source),
            }
        }
    }

    Ok(())
}

fn play_until_done(
    registry: &mut AudioHandleRegistry<CpalPlayerFactory>,
    limit: Option<Duration>,
) -> Option<PlayOutcome> {
    let started = Instant::now();
    let mut completion = registry.play(KEY);

    loop {
        match completion.status() {
            CompletionStatus::Done(outcome) => return Some(outcome),
            CompletionStatus::Cancelled => return None,
            CompletionStatus::Pending => {}
        }

        if limit.map(|limit| started.elapsed() >= limit).unwrap_or(false) {
            info!("Time limit reached, stopping");
            registry.stop(KEY);
            return None;
        }

        let now = registry.get_current_time(KEY);
        tracing::debug!("position {:.3}s playing={}", now.position_seconds, now.is_playing);
        std::thread::sleep(Duration::from_millis(250));
    }
}
