use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use segmented_recorder::{
    AudioBackendFactory, AudioFile, AudioSource, Authorization, Config, SegmentedRecorder,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, Level};

const DEFAULT_CONFIG: &str = "config/segrec";

#[derive(Parser)]
#[command(name = "segrec")]
#[command(about = "Record audio into fixed-length segment files")]
struct Cli {
    /// Config file (defaults to config/segrec.toml when present)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record until the duration elapses or Ctrl+C
    Record(RecordArgs),
    /// Print format and duration of a segment file
    Inspect { path: PathBuf },
}

#[derive(Parser)]
struct RecordArgs {
    /// Output directory (must exist or be creatable)
    #[arg(short, long)]
    directory: Option<String>,

    /// Segment length in seconds
    #[arg(short, long)]
    interval: Option<f64>,

    /// Stop after this many seconds (runs until Ctrl+C when omitted)
    #[arg(long)]
    duration: Option<u64>,

    /// Where audio comes from
    #[arg(short, long, value_enum, default_value_t = SourceKind::Tone)]
    source: SourceKind,

    /// WAV file to replay with `--source file`
    #[arg(long, required_if_eq("source", "file"))]
    file: Option<PathBuf>,

    /// Print each segment as a JSON line
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceKind {
    Microphone,
    Tone,
    File,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let cfg = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Record(args) => record(cfg, args).await,
        Command::Inspect { path } => inspect(&path),
    }
}

fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path).with_context(|| format!("Failed to load config {}", path)),
        None if Path::new(&format!("{}.toml", DEFAULT_CONFIG)).exists() => Config::load(DEFAULT_CONFIG),
        None => Ok(Config::default()),
    }
}

async fn record(cfg: Config, args: RecordArgs) -> Result<()> {
    let directory = match args.directory.as_deref() {
        Some(dir) => PathBuf::from(shellexpand::tilde(dir).as_ref()),
        None => cfg.recorder.directory().unwrap_or_else(std::env::temp_dir),
    };
    std::fs::create_dir_all(&directory)
        .with_context(|| format!("Failed to create output directory {}", directory.display()))?;

    let interval = match args.interval {
        Some(secs) => Duration::try_from_secs_f64(secs).context("Interval must be a non-negative number")?,
        None => cfg.recorder.segment_interval()?,
    };

    let source = match args.source {
        SourceKind::Microphone => AudioSource::Microphone,
        SourceKind::Tone => AudioSource::Tone { frequency_hz: 440.0 },
        SourceKind::File => AudioSource::File(args.file.clone().context("--file is required")?),
    };

    let backend = AudioBackendFactory::create(source, cfg.audio.backend_config())?;
    info!("Backend created: {}", backend.name());

    let authorization = Authorization::from_granted(cfg.audio.microphone_authorized);
    let recorder = SegmentedRecorder::new(backend, authorization).with_options(cfg.recorder.options());

    recorder.configure(&directory, interval).await?;

    let mut events = recorder.recording_events().await?;
    let json = args.json;
    let printer = tokio::spawn(async move {
        let mut count = 0usize;
        while let Some(event) = events.next().await {
            match event {
                Ok(segment) => {
                    count += 1;
                    if json {
                        match serde_json::to_string(&segment) {
                            Ok(line) => println!("{}", line),
                            Err(e) => error!("Failed to encode segment: {}", e),
                        }
                    } else {
                        println!("New recording: {}", segment.file_path.display());
                    }
                }
                Err(e) => {
                    error!("{}", e);
                    break;
                }
            }
        }
        count
    });

    recorder.start().await?;

    match args.duration {
        Some(secs) => {
            info!("Recording for {} seconds (Ctrl+C to stop early)", secs);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
        }
        None => {
            info!("Recording until Ctrl+C");
            tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
        }
    }

    let stopped = recorder.stop().await;
    let count = printer.await.context("Event printer panicked")?;

    if let Some(session) = recorder.session().await {
        info!(
            "Session {} {}: {} segments, {} frames written, {} dropped",
            session.id, session.state, session.segments_emitted, session.frames_written, session.frames_dropped
        );
    }
    info!("Saved {} segments to {}", count, directory.display());

    Ok(stopped?)
}

fn inspect(path: &Path) -> Result<()> {
    let audio = AudioFile::open(path)?;

    println!("{}", audio.path);
    println!("  Duration: {:.3}s", audio.duration_seconds);
    println!("  Sample rate: {}Hz", audio.sample_rate);
    println!("  Channels: {}", audio.channels);
    println!("  Frames: {}", audio.frame_count());

    Ok(())
}
