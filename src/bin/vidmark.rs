use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use vidmark::{
    CodecBackend, MediaInput as _, Mp4File, OverlaySpec, PendingWritePolicy, PipelineOutcome,
    Placement, TranscodeConfig, Transcoder,
};

/// Re-encode a video with an overlay drawn on every frame.
#[derive(Parser, Debug)]
#[command(name = "vidmark", version)]
struct Cli {
    /// Input MP4 file.
    input: PathBuf,

    /// Output MP4 path (default: watermark_<timestamp>.mp4 in the output directory).
    #[arg(long)]
    out: Option<PathBuf>,

    /// Directory for generated output names.
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Replace an existing output file.
    #[arg(long)]
    overwrite: bool,

    /// Overlay image (PNG/JPEG) or SVG.
    #[arg(long)]
    overlay: Option<PathBuf>,

    /// Overlay placement: fill, center, top-left, top-right, bottom-left, bottom-right.
    #[arg(long)]
    placement: Option<Placement>,

    /// Overlay margin in pixels for corner placements.
    #[arg(long)]
    margin: Option<u32>,

    /// Overlay size relative to the frame for non-fill placements, in (0, 1].
    #[arg(long)]
    scale: Option<f32>,

    /// Overlay opacity in [0, 1].
    #[arg(long)]
    opacity: Option<f32>,

    /// Video bit rate in bits per second.
    #[arg(long)]
    bitrate: Option<u32>,

    /// Output frame rate (default: source rate clamped to 30..=60).
    #[arg(long)]
    fps: Option<u32>,

    /// Drop samples encoded before every output track is known instead of queueing them.
    #[arg(long)]
    drop_early_samples: bool,

    /// Codec backend: ffmpeg or soft.
    #[arg(long)]
    backend: Option<CodecBackend>,

    /// JSON config file; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON-lines file receiving an entry per finished output.
    #[arg(long)]
    media_index: Option<PathBuf>,

    /// Print the input's stream metadata as JSON and exit.
    #[arg(long)]
    info: bool,

    /// Debug logging.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.info {
        let info = Mp4File::new(&cli.input)
            .inspect()
            .with_context(|| format!("inspect '{}'", cli.input.display()))?;
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    let config = build_config(&cli)?;
    let transcoder = Transcoder::from_config(&cli.input, config)?;
    match transcoder.run() {
        PipelineOutcome::Success(report) => {
            if let Some(path) = &report.output {
                eprintln!("wrote {}", path.display());
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        PipelineOutcome::SourceError(e) => {
            Err(anyhow::Error::new(e)).with_context(|| format!("read '{}'", cli.input.display()))
        }
        PipelineOutcome::ProcessingError(e) => Err(anyhow::Error::new(e)).context("transcode failed"),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "vidmark=debug" } else { "vidmark=info" };
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .try_init();
}

fn build_config(cli: &Cli) -> anyhow::Result<TranscodeConfig> {
    let mut config = match &cli.config {
        Some(path) => TranscodeConfig::from_json_file(path)?,
        None => TranscodeConfig::default(),
    };

    if let Some(out) = &cli.out {
        config.output_path = Some(out.clone());
    }
    if let Some(dir) = &cli.out_dir {
        config.output_dir = dir.clone();
    }
    if cli.overwrite {
        config.overwrite = true;
    }
    if let Some(bitrate) = cli.bitrate {
        config.encode.video_bit_rate = bitrate;
    }
    if let Some(fps) = cli.fps {
        config.encode.frame_rate = Some(fps);
    }
    if cli.drop_early_samples {
        config.pending_writes = PendingWritePolicy::Drop;
    }
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if let Some(index) = &cli.media_index {
        config.media_index_path = Some(index.clone());
    }

    if let Some(path) = &cli.overlay {
        let previous = config.overlay.take();
        config.overlay = Some(OverlaySpec {
            path: path.clone(),
            layout: previous.as_ref().map(|o| o.layout).unwrap_or_default(),
            opacity: previous.map_or(1.0, |o| o.opacity),
        });
    }
    let tweaks_overlay =
        cli.placement.is_some() || cli.margin.is_some() || cli.scale.is_some() || cli.opacity.is_some();
    match config.overlay.as_mut() {
        Some(overlay) => {
            if let Some(placement) = cli.placement {
                overlay.layout.placement = placement;
            }
            if let Some(margin) = cli.margin {
                overlay.layout.margin = margin;
            }
            if let Some(scale) = cli.scale {
                overlay.layout.scale = scale;
            }
            if let Some(opacity) = cli.opacity {
                overlay.opacity = opacity;
            }
        }
        None if tweaks_overlay => {
            anyhow::bail!("--placement, --margin, --scale and --opacity need an overlay");
        }
        None => {}
    }

    config.validate()?;
    Ok(config)
}
