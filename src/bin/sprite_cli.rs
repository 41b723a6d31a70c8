use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use image::RgbaImage;
use serde::Serialize;
use sprite_lipsync::analysis::{analyze, LoudnessFrame, MouthState};
use sprite_lipsync::animation::EyeState;
use sprite_lipsync::audio::DecodedAudio;
use sprite_lipsync::config::AppConfig;
use sprite_lipsync::render::{render_tick, FrameSet, SharedSurface, SurfaceOwner, TickOutcome};
use sprite_lipsync::session::AnimatorSession;
use sprite_lipsync::sprite::analysis::parse_analysis_text;
use sprite_lipsync::sprite::{
    open_sheet, pick_mouth_frames, slice_grid, FacePart, FacePartRectMap, FrameSelection, Resolution, SelectionKey,
    SpriteSheetAnalysis,
};
use sprite_lipsync::telemetry;
use sprite_lipsync::TriggerOutcome;
use tokio::sync::oneshot;
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "sprite_cli",
    about = "Loudness analysis, frame resolution and lip-synced recording for sprite sheets"
)]
struct Cli {
    /// JSON configuration file (defaults are used when missing)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Print telemetry events to stderr as JSON lines
    #[arg(long, global = true)]
    events: bool,
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze a WAV file into loudness frames
    Loudness {
        #[arg(long)]
        audio: PathBuf,
        #[arg(long)]
        fps: Option<f64>,
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long)]
        release: Option<f64>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Slice a sprite sheet into numbered PNG frames
    Slice {
        #[arg(long)]
        sheet: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Print the (eyes, mouth) → frame resolution table
    Table {
        #[arg(long)]
        sheet: PathBuf,
        /// Analysis JSON as returned by the classifier
        #[arg(long)]
        analysis: Option<PathBuf>,
        /// User override, e.g. `open:mid=5`
        #[arg(long = "select", value_parser = parse_select)]
        selects: Vec<(SelectionKey, usize)>,
    },
    /// Render one preview frame to a PNG
    Preview {
        #[arg(long)]
        sheet: PathBuf,
        #[arg(long)]
        analysis: Option<PathBuf>,
        #[arg(long = "select", value_parser = parse_select)]
        selects: Vec<(SelectionKey, usize)>,
        #[arg(long, value_enum, default_value_t = EyeArg::Open)]
        eyes: EyeArg,
        #[arg(long, value_enum, default_value_t = MouthArg::Closed)]
        mouth: MouthArg,
        #[arg(long)]
        output: PathBuf,
    },
    /// Record a lip-synced AVI of the sheet speaking the audio
    Record {
        #[arg(long)]
        sheet: PathBuf,
        #[arg(long)]
        audio: PathBuf,
        #[arg(long)]
        analysis: Option<PathBuf>,
        #[arg(long = "select", value_parser = parse_select)]
        selects: Vec<(SelectionKey, usize)>,
        #[arg(long)]
        output: PathBuf,
    },
    /// Remote sprite generation and sheet classification
    #[cfg(feature = "remote")]
    #[command(subcommand)]
    Remote(RemoteCommands),
}

#[cfg(feature = "remote")]
#[derive(Subcommand, Debug)]
enum RemoteCommands {
    /// Generate a 4x4 sprite sheet from a reference image
    Generate {
        #[arg(long)]
        reference: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, value_enum, default_value_t = KindArg::Motion)]
        kind: KindArg,
        #[arg(long, value_enum, default_value_t = BackgroundArg::Flat)]
        background: BackgroundArg,
        #[arg(long)]
        instruction: Option<String>,
    },
    /// Classify the frames of a sprite sheet
    Classify {
        #[arg(long)]
        sheet: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum EyeArg {
    Open,
    Closed,
}

impl From<EyeArg> for EyeState {
    fn from(arg: EyeArg) -> Self {
        match arg {
            EyeArg::Open => EyeState::Open,
            EyeArg::Closed => EyeState::Closed,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum MouthArg {
    Open,
    Mid,
    Closed,
}

impl From<MouthArg> for MouthState {
    fn from(arg: MouthArg) -> Self {
        match arg {
            MouthArg::Open => MouthState::Open,
            MouthArg::Mid => MouthState::Mid,
            MouthArg::Closed => MouthState::Closed,
        }
    }
}

#[cfg(feature = "remote")]
#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Motion,
    Expression,
}

#[cfg(feature = "remote")]
#[derive(ValueEnum, Clone, Copy, Debug)]
enum BackgroundArg {
    Flat,
    Transparent,
}

/// Parse `eyes:mouth=index`.
fn parse_select(raw: &str) -> Result<(SelectionKey, usize), String> {
    let (key, index) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected eyes:mouth=index, got {raw:?}"))?;
    let (eye, mouth) = key
        .split_once(':')
        .ok_or_else(|| format!("expected eyes:mouth before '=', got {key:?}"))?;
    let eye = match eye.trim() {
        "open" => EyeState::Open,
        "closed" => EyeState::Closed,
        other => return Err(format!("unknown eye state {other:?}")),
    };
    let mouth = match mouth.trim() {
        "open" => MouthState::Open,
        "mid" => MouthState::Mid,
        "closed" => MouthState::Closed,
        other => return Err(format!("unknown mouth state {other:?}")),
    };
    let index = index
        .trim()
        .parse()
        .map_err(|err| format!("invalid frame index {index:?}: {err}"))?;
    Ok((SelectionKey::new(eye, mouth), index))
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path),
        None => AppConfig::default(),
    };

    // `record` streams events while it runs; the rest dump the history after
    let streams_events = matches!(cli.command, Commands::Record { .. });
    let code = match cli.command {
        Commands::Loudness {
            audio,
            fps,
            threshold,
            release,
            output,
        } => run_loudness(config, &audio, fps, threshold, release, output),
        Commands::Slice { sheet, out_dir } => run_slice(&config, &sheet, &out_dir),
        Commands::Table {
            sheet,
            analysis,
            selects,
        } => run_table(&config, &sheet, analysis.as_deref(), &selects),
        Commands::Preview {
            sheet,
            analysis,
            selects,
            eyes,
            mouth,
            output,
        } => run_preview(&config, &sheet, analysis.as_deref(), &selects, eyes.into(), mouth.into(), &output),
        Commands::Record {
            sheet,
            audio,
            analysis,
            selects,
            output,
        } => runtime()?.block_on(run_record(
            config,
            &sheet,
            &audio,
            analysis.as_deref(),
            &selects,
            &output,
            cli.events,
        )),
        #[cfg(feature = "remote")]
        Commands::Remote(command) => runtime()?.block_on(remote::run(&config, command)),
    }?;

    if cli.events && !streams_events {
        emit_events()?;
    }
    Ok(code)
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting tokio runtime")
}

fn run_loudness(
    mut config: AppConfig,
    audio_path: &Path,
    fps: Option<f64>,
    threshold: Option<f64>,
    release: Option<f64>,
    output_path: Option<PathBuf>,
) -> Result<ExitCode> {
    if let Some(fps) = fps {
        config.analysis.fps = fps;
    }
    if let Some(threshold) = threshold {
        config.analysis.threshold = threshold;
    }
    if let Some(release) = release {
        config.analysis.release_time = release;
    }

    let audio = DecodedAudio::open(audio_path).with_context(|| format!("decoding {}", audio_path.display()))?;
    let params = config.analysis.loudness_params();
    let frames = analyze(&audio, &params);
    let open_frames = frames
        .iter()
        .filter(|frame| frame.mouth_state == sprite_lipsync::analysis::FrameMouth::Open)
        .count();

    let report = LoudnessReport {
        sample_rate: audio.sample_rate(),
        duration: audio.duration(),
        fps: params.fps,
        threshold: params.threshold,
        release_frames: params.release_frames(),
        frame_count: frames.len(),
        open_frames,
        frames: &frames,
    };
    emit_json(&report, output_path)?;
    Ok(ExitCode::from(0))
}

fn run_slice(config: &AppConfig, sheet_path: &Path, out_dir: &Path) -> Result<ExitCode> {
    let frames = load_frames(config, sheet_path)?;
    fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    for (index, frame) in frames.iter().enumerate() {
        let path = out_dir.join(format!("frame_{index:02}.png"));
        frame
            .save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    println!("{} frames written to {}", frames.len(), out_dir.display());
    Ok(ExitCode::from(0))
}

fn run_table(
    config: &AppConfig,
    sheet_path: &Path,
    analysis_path: Option<&Path>,
    selects: &[(SelectionKey, usize)],
) -> Result<ExitCode> {
    let frames = FrameSet::from_images(load_frames(config, sheet_path)?);
    let selection = build_selection(&frames, analysis_path, selects)?;
    let report = TableReport {
        frame_count: frames.len(),
        table: selection.table(frames.len()),
    };
    emit_json(&report, None)?;
    Ok(ExitCode::from(0))
}

fn run_preview(
    config: &AppConfig,
    sheet_path: &Path,
    analysis_path: Option<&Path>,
    selects: &[(SelectionKey, usize)],
    eyes: EyeState,
    mouth: MouthState,
    output: &Path,
) -> Result<ExitCode> {
    let frames = FrameSet::from_images(load_frames(config, sheet_path)?);
    let selection = build_selection(&frames, analysis_path, selects)?;
    let (width, height) = frames.frame_dimensions().unwrap_or((0, 0));
    let surface = SharedSurface::new(width, height);

    match render_tick(&surface, SurfaceOwner::Preview, &frames, &selection, eyes, mouth) {
        TickOutcome::Drawn { frame_index } => {
            surface
                .snapshot()
                .save(output)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("frame {} → {}", frame_index, output.display());
            Ok(ExitCode::from(0))
        }
        other => bail!("nothing drawn: {other:?}"),
    }
}

async fn run_record(
    config: AppConfig,
    sheet_path: &Path,
    audio_path: &Path,
    analysis_path: Option<&Path>,
    selects: &[(SelectionKey, usize)],
    output: &Path,
    events: bool,
) -> Result<ExitCode> {
    let sheet = fs::read(sheet_path).with_context(|| format!("reading {}", sheet_path.display()))?;
    let audio = DecodedAudio::open(audio_path).with_context(|| format!("decoding {}", audio_path.display()))?;

    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let printer = events.then(|| {
        let mut stream = Box::pin(telemetry::hub().collector().stream());
        tokio::spawn(async move {
            // Buffered events are printed before the stop signal is honoured
            loop {
                tokio::select! {
                    biased;
                    Some(event) = stream.next() => {
                        if let Ok(line) = serde_json::to_string(&event) {
                            eprintln!("{line}");
                        }
                    }
                    _ = &mut stop_rx => break,
                }
            }
        })
    });

    let mut session = AnimatorSession::new(config);
    session
        .load_sheet(&sheet)
        .with_context(|| format!("slicing {}", sheet_path.display()))?;
    if let Some(path) = analysis_path {
        let analysis = read_analysis(path, session.frame_count())?;
        session.set_analysis(analysis).context("applying analysis")?;
    }
    for (key, index) in selects {
        session.select_frame(*key, *index);
    }
    session.load_audio(audio);

    match session.trigger_recording() {
        TriggerOutcome::Started => {}
        other => bail!("recording did not start: {other:?}"),
    }
    let finished = tokio::select! {
        biased;
        result = session.wait_recording() => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let result = match finished {
        Some(result) => result,
        None => {
            log::warn!("[sprite_cli] interrupted, cancelling recording");
            session.cancel_recording();
            session.wait_recording().await
        }
    };
    let artifact = result.context("recording")?;
    artifact
        .write_to(output)
        .with_context(|| format!("writing {}", output.display()))?;
    session.shutdown().await;
    let _ = stop_tx.send(());
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    let report = RecordReport {
        output: output.display().to_string(),
        mime: artifact.mime,
        bytes: artifact.len(),
        frames: artifact.frame_count,
        width: artifact.width,
        height: artifact.height,
        duration_ms: artifact.duration.as_millis() as u64,
    };
    emit_json(&report, None)?;
    Ok(ExitCode::from(0))
}

fn load_frames(config: &AppConfig, sheet_path: &Path) -> Result<Vec<RgbaImage>> {
    let sheet = open_sheet(sheet_path).with_context(|| format!("decoding {}", sheet_path.display()))?;
    slice_grid(&sheet, config.grid.columns, config.grid.rows)
        .with_context(|| format!("slicing {}", sheet_path.display()))
}

fn read_analysis(path: &Path, frame_count: usize) -> Result<SpriteSheetAnalysis> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_analysis_text(&text, frame_count).with_context(|| format!("parsing {}", path.display()))
}

/// Selection seeded the same way a session seeds it.
fn build_selection(
    frames: &FrameSet,
    analysis_path: Option<&Path>,
    selects: &[(SelectionKey, usize)],
) -> Result<FrameSelection> {
    let mut selection = FrameSelection::new();
    match analysis_path {
        Some(path) => {
            let analysis = read_analysis(path, frames.len())?;
            let region = FacePartRectMap::seeded_from(&analysis).get(FacePart::MouthOpen);
            let pick = pick_mouth_frames(frames.slots(), Some(&analysis), region);
            selection.seed_from_analysis(&analysis, pick);
        }
        None => {
            let region = FacePartRectMap::default().get(FacePart::MouthOpen);
            if let Some(pick) = pick_mouth_frames(frames.slots(), None, region) {
                selection.seed_from_pick(pick);
            }
        }
    }
    for (key, index) in selects {
        selection.set_user(*key, *index);
    }
    Ok(selection)
}

fn emit_json<T: Serialize>(value: &T, output_path: Option<PathBuf>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    if let Some(path) = output_path {
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    } else {
        println!("{json}");
    }
    Ok(())
}

fn emit_events() -> Result<()> {
    for event in telemetry::hub().snapshot().recent {
        eprintln!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

#[derive(Serialize)]
struct LoudnessReport<'a> {
    sample_rate: u32,
    duration: f64,
    fps: f64,
    threshold: f64,
    release_frames: usize,
    frame_count: usize,
    open_frames: usize,
    frames: &'a [LoudnessFrame],
}

#[derive(Serialize)]
struct TableReport {
    frame_count: usize,
    table: Vec<Resolution>,
}

#[derive(Serialize)]
struct RecordReport {
    output: String,
    mime: &'static str,
    bytes: usize,
    frames: usize,
    width: u32,
    height: u32,
    duration_ms: u64,
}

#[cfg(feature = "remote")]
mod remote {
    use super::*;
    use sprite_lipsync::remote::{
        sniff_image_mime, BackgroundMode, GenerationRequest, HttpRemoteClient, SheetAnalyzer, SpriteGenerator,
        SpriteKind,
    };

    pub async fn run(config: &AppConfig, command: RemoteCommands) -> Result<ExitCode> {
        let client = HttpRemoteClient::from_env().context("creating remote client")?;
        match command {
            RemoteCommands::Generate {
                reference,
                output,
                kind,
                background,
                instruction,
            } => {
                let bytes = fs::read(&reference).with_context(|| format!("reading {}", reference.display()))?;
                let kind = match kind {
                    KindArg::Motion => SpriteKind::Motion,
                    KindArg::Expression => SpriteKind::Expression,
                };
                let background = match background {
                    BackgroundArg::Flat => BackgroundMode::Flat,
                    BackgroundArg::Transparent => BackgroundMode::Transparent,
                };
                let mime = sniff_image_mime(&bytes);
                let mut request = GenerationRequest::new(bytes, mime, kind, background);
                if let Some(instruction) = instruction {
                    request = request.with_instruction(instruction);
                }
                let sheet = client.generate(&request).await.context("generating sprite sheet")?;
                fs::write(&output, &sheet).with_context(|| format!("writing {}", output.display()))?;
                println!("{} bytes written to {}", sheet.len(), output.display());
            }
            RemoteCommands::Classify { sheet, output } => {
                let bytes = fs::read(&sheet).with_context(|| format!("reading {}", sheet.display()))?;
                let frame_count = config.grid.frame_count().context("grid configuration")?;
                let analysis = client
                    .analyze(&bytes, sniff_image_mime(&bytes), frame_count)
                    .await
                    .context("classifying sprite sheet")?;
                emit_json(&analysis, output)?;
            }
        }
        Ok(ExitCode::from(0))
    }
}
