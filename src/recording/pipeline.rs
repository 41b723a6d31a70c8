// Recording pipeline - playback-synchronized classify → render → capture loop
//
// Preparing:  validate the container and inputs, take surface authority,
//             build the playhead and chunk recorder. Loudness frames arrive
//             pre-computed with the inputs (one analysis per audio source).
// Recording:  start playhead and recorder on the same instant. Each wake:
//             classify + smooth every loudness frame now due, redraw if the
//             resolved frame changed, capture due video slots, pump audio.
//             Sleep until the next loudness frame, the next capture slot or
//             one render tick, whichever is sooner.
// Drain:      after the last loudness frame keep capturing until the audio
//             has played out and the drain interval has passed.
// Finalizing: stop the playhead, collect chunks, mux.
//
// Every exit path drops the surface claim and the playhead, so an error or
// cancellation leaves no resource held and exposes no partial artifact.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::time::{sleep_until, Instant};

use crate::analysis::loudness::LoudnessFrame;
use crate::analysis::viseme::{smooth_step, MouthState, VisemeThresholds};
use crate::animation::EyeState;
use crate::audio::{AudioPlayback, DecodedAudio};
use crate::config::AppConfig;
use crate::error::RecordingError;
use crate::recording::avi::{mux, VideoArtifact};
use crate::recording::capture::ChunkRecorder;
use crate::recording::state::{PhaseTracker, RecordingPhase};
use crate::render::{render_tick, FrameSet, RecordingClaim, SharedSurface, SurfaceOwner, TickOutcome};
use crate::sprite::selection::FrameSelection;
use crate::telemetry;

/// Containers the muxer can produce
pub const SUPPORTED_CONTAINERS: &[&str] = &["avi"];

/// Tunables for one recording
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub container: String,
    pub thresholds: VisemeThresholds,
    pub render_tick: Duration,
    pub capture_fps: u32,
    pub drain: Duration,
    pub jpeg_quality: u8,
    pub background: [u8; 3],
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            container: config.recording.container.clone(),
            thresholds: config.viseme_thresholds(),
            render_tick: config.preview.tick(),
            capture_fps: config.recording.capture_fps,
            drain: config.recording.drain(),
            jpeg_quality: config.recording.jpeg_quality,
            background: config.recording.background,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Shared state the pipeline reads and writes
#[derive(Clone)]
pub struct PipelineInputs {
    pub audio: Arc<DecodedAudio>,
    /// Loudness frames of `audio`, analyzed once per source
    pub loudness: Arc<Vec<LoudnessFrame>>,
    pub frames: FrameSet,
    pub selection: watch::Receiver<FrameSelection>,
    pub eye: watch::Receiver<EyeState>,
    /// Live mouth state, written by the pipeline while recording
    pub mouth: Arc<watch::Sender<MouthState>>,
    pub surface: SharedSurface,
}

/// Per-run drawing state threaded through the loop
struct Renderer<'a> {
    claim: RecordingClaim,
    inputs: &'a PipelineInputs,
    last_drawn: Option<usize>,
}

impl Renderer<'_> {
    /// Draw if the resolved frame differs from what is on the surface.
    fn refresh(&mut self, mouth: MouthState) {
        let eye = *self.inputs.eye.borrow();
        let frame_count = self.inputs.frames.len();
        let index = self.inputs.selection.borrow().resolve(eye, mouth, frame_count);
        if self.last_drawn == Some(index) {
            return;
        }
        let outcome = {
            let selection = self.inputs.selection.borrow();
            render_tick(
                self.claim.surface(),
                SurfaceOwner::Recording,
                &self.inputs.frames,
                &selection,
                eye,
                mouth,
            )
        };
        match outcome {
            TickOutcome::Drawn { frame_index } => self.last_drawn = Some(frame_index),
            other => tracing::debug!(?other, "recording draw skipped"),
        }
    }
}

/// Run Preparing → Recording → Finalizing.
///
/// The caller moves the phase into `Preparing` beforehand and into `Done` or
/// `Error` afterwards. Resolving `cancel` (sent or dropped) aborts with
/// [`RecordingError::Cancelled`].
#[tracing::instrument(name = "recording", skip_all, fields(container = %settings.container))]
pub async fn run_pipeline(
    inputs: PipelineInputs,
    settings: PipelineSettings,
    phase: Arc<PhaseTracker>,
    mut cancel: oneshot::Receiver<()>,
) -> Result<VideoArtifact, RecordingError> {
    // Preparing
    if !SUPPORTED_CONTAINERS.contains(&settings.container.to_ascii_lowercase().as_str()) {
        return Err(RecordingError::UnsupportedFormat {
            container: settings.container.clone(),
        });
    }
    if inputs.audio.frame_len() == 0 {
        return Err(RecordingError::NoAudio);
    }
    if inputs.frames.is_empty() {
        return Err(RecordingError::NoFrames);
    }
    let loudness = Arc::clone(&inputs.loudness);
    tracing::info!(
        loudness_frames = loudness.len(),
        duration_s = inputs.audio.duration(),
        "preparing recording"
    );

    let claim = inputs
        .surface
        .claim_recording()
        .ok_or_else(|| RecordingError::CaptureFailed {
            reason: "surface is already claimed by another recording".to_string(),
        })?;
    let mut renderer = Renderer {
        claim,
        inputs: &inputs,
        last_drawn: None,
    };
    renderer.refresh(MouthState::Closed);

    let mut playback = AudioPlayback::new(Arc::clone(&inputs.audio));
    let mut recorder = ChunkRecorder::new(
        inputs.surface.clone(),
        settings.capture_fps,
        settings.jpeg_quality,
        settings.background,
        inputs.audio.sample_rate(),
        inputs.audio.output_channels(),
    );

    // Recording
    if !phase.advance(RecordingPhase::Recording) {
        return Err(RecordingError::CaptureFailed {
            reason: format!("cannot start recording from {:?}", phase.current()),
        });
    }
    let start = Instant::now();
    playback.start(start);
    recorder.start(start);

    let mut displayed: Option<MouthState> = None;
    let mut next = 0usize;
    loop {
        let now = Instant::now();
        next = advance_mouth(&loudness, next, start, now, &settings.thresholds, &mut displayed, &inputs);
        renderer.refresh(displayed.unwrap_or(MouthState::Closed));
        recorder.capture_due(now)?;
        if let Some(chunk) = playback.pump(now) {
            recorder.push_audio(chunk);
        }

        let Some(frame) = loudness.get(next) else {
            break;
        };
        let wake = earliest(due_at(start, frame), now + settings.render_tick, recorder.next_capture_at());
        wait_or_cancel(wake, &mut cancel).await?;
    }

    // Drain
    let audio_end = start + Duration::from_secs_f64(inputs.audio.duration());
    let drain_end = (Instant::now() + settings.drain).max(audio_end);
    tracing::debug!(
        drain_ms = settings.drain.as_millis() as u64,
        captured = recorder.frames_captured(),
        "loudness exhausted, draining"
    );
    loop {
        let now = Instant::now();
        renderer.refresh(displayed.unwrap_or(MouthState::Closed));
        recorder.capture_due(now)?;
        if let Some(chunk) = playback.pump(now) {
            recorder.push_audio(chunk);
        }
        if now >= drain_end {
            break;
        }
        let wake = earliest(drain_end, now + settings.render_tick, recorder.next_capture_at());
        wait_or_cancel(wake, &mut cancel).await?;
    }

    // Finalizing
    phase.advance(RecordingPhase::Finalizing);
    let now = Instant::now();
    if let Some(chunk) = playback.stop(now) {
        recorder.push_audio(chunk);
    }
    if !playback.is_exhausted() {
        tracing::warn!(
            played = playback.position(),
            total = inputs.audio.frame_len(),
            "playback stopped before the audio ended"
        );
    }
    drop(renderer);
    let streams = recorder.finish()?;
    let artifact = mux(&streams)?;

    telemetry::hub().record_recording_summary(
        streams.video_frames.len(),
        streams.audio_frames(),
        streams.duration(),
        artifact.len(),
    );
    tracing::info!(
        video_frames = streams.video_frames.len(),
        audio_frames = streams.audio_frames(),
        bytes = artifact.len(),
        "recording finalized"
    );
    Ok(artifact)
}

/// Instant a loudness frame falls due. Both the wake-up and the due check
/// go through here so a wake can never land just short of its frame.
fn due_at(start: Instant, frame: &LoudnessFrame) -> Instant {
    start + Duration::from_secs_f64(frame.time.max(0.0))
}

/// Process every loudness frame due by `now`; returns the new cursor.
fn advance_mouth(
    loudness: &[LoudnessFrame],
    mut next: usize,
    start: Instant,
    now: Instant,
    thresholds: &VisemeThresholds,
    displayed: &mut Option<MouthState>,
    inputs: &PipelineInputs,
) -> usize {
    while let Some(frame) = loudness.get(next) {
        if due_at(start, frame) > now {
            break;
        }
        let shown = smooth_step(*displayed, thresholds.classify(frame.volume));
        *displayed = Some(shown);
        inputs.mouth.send_replace(shown);
        next += 1;
    }
    next
}

fn earliest(a: Instant, b: Instant, c: Option<Instant>) -> Instant {
    let ab = a.min(b);
    match c {
        Some(c) => ab.min(c),
        None => ab,
    }
}

async fn wait_or_cancel(wake: Instant, cancel: &mut oneshot::Receiver<()>) -> Result<(), RecordingError> {
    tokio::select! {
        biased;
        _ = cancel => Err(RecordingError::Cancelled),
        _ = sleep_until(wake) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::loudness::analyze;
    use crate::sprite::selection::SelectionKey;
    use image::{Rgba, RgbaImage};

    struct Harness {
        inputs: PipelineInputs,
        phase: Arc<PhaseTracker>,
        mouth_rx: watch::Receiver<MouthState>,
        _eye_tx: watch::Sender<EyeState>,
        _selection_tx: watch::Sender<FrameSelection>,
    }

    fn harness(samples: Vec<f32>) -> Harness {
        let frames = FrameSet::from_images(
            (0..4u8)
                .map(|i| RgbaImage::from_pixel(8, 8, Rgba([i * 60, 0, 0, 255])))
                .collect(),
        );
        let mut selection = FrameSelection::new();
        selection.set_user(SelectionKey::new(EyeState::Open, MouthState::Open), 1);
        selection.set_user(SelectionKey::new(EyeState::Open, MouthState::Mid), 2);
        selection.set_user(SelectionKey::new(EyeState::Open, MouthState::Closed), 3);
        let (eye_tx, eye) = watch::channel(EyeState::Open);
        let (selection_tx, selection) = watch::channel(selection);
        let (mouth_tx, mouth_rx) = watch::channel(MouthState::Closed);
        let phase = Arc::new(PhaseTracker::new());
        phase.advance(RecordingPhase::Preparing);

        let audio = DecodedAudio::from_mono(1000, samples).unwrap();
        let loudness = analyze(&audio, &AppConfig::default().analysis.loudness_params());
        Harness {
            inputs: PipelineInputs {
                audio: Arc::new(audio),
                loudness: Arc::new(loudness),
                frames,
                selection,
                eye,
                mouth: Arc::new(mouth_tx),
                surface: SharedSurface::new(8, 8),
            },
            phase,
            mouth_rx,
            _eye_tx: eye_tx,
            _selection_tx: selection_tx,
        }
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            capture_fps: 10,
            drain: Duration::from_millis(200),
            ..PipelineSettings::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_audio_and_video_in_sync() {
        let h = harness(vec![0.5; 1000]);
        let (_cancel_tx, cancel) = oneshot::channel();
        let artifact = run_pipeline(h.inputs.clone(), settings(), Arc::clone(&h.phase), cancel)
            .await
            .unwrap();

        assert_eq!(h.phase.current(), RecordingPhase::Finalizing);
        assert_eq!(&artifact.bytes[0..4], b"RIFF");
        // 1 s of audio + 200 ms drain at 10 fps
        assert!(
            (11..=13).contains(&artifact.frame_count),
            "frame count {}",
            artifact.frame_count
        );
        assert_eq!(*h.mouth_rx.borrow(), MouthState::Open);
        assert_eq!(h.inputs.surface.owner(), SurfaceOwner::Preview, "claim released");
    }

    #[tokio::test(start_paused = true)]
    async fn test_mouth_passes_through_mid() {
        let mut samples = vec![0.0; 300];
        samples.extend(vec![0.8; 700]);
        let h = harness(samples);
        let mut mouth_rx = h.mouth_rx.clone();
        let seen = tokio::spawn(async move {
            let mut seen = vec![*mouth_rx.borrow_and_update()];
            while mouth_rx.changed().await.is_ok() {
                seen.push(*mouth_rx.borrow_and_update());
            }
            seen
        });

        let (_cancel_tx, cancel) = oneshot::channel();
        let mut s = settings();
        s.thresholds = VisemeThresholds::new(0.05, 0.2);
        run_pipeline(h.inputs.clone(), s, Arc::clone(&h.phase), cancel)
            .await
            .unwrap();
        drop(h);

        let seen = seen.await.unwrap();
        let open_at = seen.iter().position(|m| *m == MouthState::Open).unwrap();
        assert_eq!(seen[open_at - 1], MouthState::Mid, "sequence {:?}", seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mouth_follows_supplied_loudness() {
        // Silent audio, but the supplied frames say loud
        let mut h = harness(vec![0.0; 1000]);
        let loud: Vec<LoudnessFrame> = h
            .inputs
            .loudness
            .iter()
            .map(|frame| LoudnessFrame {
                volume: 0.9,
                ..*frame
            })
            .collect();
        h.inputs.loudness = Arc::new(loud);

        let (_cancel_tx, cancel) = oneshot::channel();
        run_pipeline(h.inputs.clone(), settings(), Arc::clone(&h.phase), cancel)
            .await
            .unwrap();
        assert_eq!(*h.mouth_rx.borrow(), MouthState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_container_fails_before_recording() {
        let h = harness(vec![0.1; 100]);
        let (_cancel_tx, cancel) = oneshot::channel();
        let mut s = settings();
        s.container = "webm".to_string();
        let err = run_pipeline(h.inputs.clone(), s, Arc::clone(&h.phase), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RecordingError::UnsupportedFormat { .. }));
        assert_eq!(h.phase.current(), RecordingPhase::Preparing);
        assert_eq!(h.inputs.surface.owner(), SurfaceOwner::Preview);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_frames_is_an_error() {
        let mut h = harness(vec![0.1; 100]);
        h.inputs.frames = FrameSet::default();
        let (_cancel_tx, cancel) = oneshot::channel();
        let err = run_pipeline(h.inputs.clone(), settings(), Arc::clone(&h.phase), cancel)
            .await
            .unwrap_err();
        assert_eq!(err, RecordingError::NoFrames);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_audio_is_no_audio() {
        let h = harness(Vec::new());
        let (_cancel_tx, cancel) = oneshot::channel();
        let err = run_pipeline(h.inputs.clone(), settings(), Arc::clone(&h.phase), cancel)
            .await
            .unwrap_err();
        assert_eq!(err, RecordingError::NoAudio);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_releases_surface() {
        let h = harness(vec![0.3; 5000]);
        let (cancel_tx, cancel) = oneshot::channel();
        let surface = h.inputs.surface.clone();
        let task = tokio::spawn(run_pipeline(h.inputs.clone(), settings(), Arc::clone(&h.phase), cancel));

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(surface.owner(), SurfaceOwner::Recording);
        cancel_tx.send(()).unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err, RecordingError::Cancelled);
        assert_eq!(surface.owner(), SurfaceOwner::Preview);
    }
}
