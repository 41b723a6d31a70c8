//! Animator session
//!
//! Owns everything one character animation needs: the sliced sprite frames,
//! the optional sheet analysis, the frame selection, the loaded audio, the
//! blink scheduler, the live preview and the recording session.
//!
//! Ownership rules:
//! - Replacing the sprite sheet drops the analysis and reseeds recommended
//!   frames from the heuristic mouth picker. User overrides survive.
//! - Replacing the audio drops the cached loudness frames and invalidates
//!   the recording, so the next trigger records again.
//! - Shutting the session down cancels every timer it started.
//!
//! Must be created inside a tokio runtime.

use std::sync::Arc;

use image::RgbaImage;
use tokio::sync::watch;

use crate::analysis::live::LiveMouthTracker;
use crate::analysis::loudness::{analyze, LoudnessFrame};
use crate::analysis::viseme::MouthState;
use crate::animation::{BlinkScheduler, EyeState};
use crate::audio::{AudioSourceId, DecodedAudio};
use crate::config::AppConfig;
use crate::error::{MediaError, RecordingError, RemoteError};
use crate::recording::{
    PipelineInputs, PipelineSettings, RecordingKey, RecordingPhase, RecordingSession, TriggerOutcome,
    VideoArtifact,
};
use crate::render::{FrameSet, LivePreview, PreviewInputs, PreviewStats, SharedSurface};
use crate::sprite::analysis::{FacePart, FacePartRect, FacePartRectMap, SpriteSheetAnalysis};
use crate::sprite::scoring::pick_mouth_frames;
use crate::sprite::selection::{FrameSelection, Resolution, SelectionKey};
use crate::sprite::sheet::{crop_part, decode_sheet, slice_grid};

struct LoadedAudio {
    id: AudioSourceId,
    audio: Arc<DecodedAudio>,
    loudness: Option<Arc<Vec<LoudnessFrame>>>,
}

pub struct AnimatorSession {
    config: AppConfig,
    frames_tx: watch::Sender<FrameSet>,
    selection_tx: watch::Sender<FrameSelection>,
    mouth_tx: Arc<watch::Sender<MouthState>>,
    analysis: Option<SpriteSheetAnalysis>,
    rects: FacePartRectMap,
    audio: Option<LoadedAudio>,
    live_mouth: LiveMouthTracker,
    blink: BlinkScheduler,
    surface: SharedSurface,
    preview: Option<LivePreview>,
    recording: RecordingSession,
    regenerate: u64,
}

impl AnimatorSession {
    pub fn new(config: AppConfig) -> Self {
        let blink = BlinkScheduler::spawn(config.blink.timings(), config.blink.seed);
        let (frames_tx, _) = watch::channel(FrameSet::default());
        let (selection_tx, _) = watch::channel(FrameSelection::new());
        let (mouth_tx, _) = watch::channel(MouthState::Closed);
        let live_mouth = LiveMouthTracker::new(config.viseme_thresholds(), config.analysis.smoothing);

        log::info!("[Session] created");
        Self {
            config,
            frames_tx,
            selection_tx,
            mouth_tx: Arc::new(mouth_tx),
            analysis: None,
            rects: FacePartRectMap::default(),
            audio: None,
            live_mouth,
            blink,
            surface: SharedSurface::new(0, 0),
            preview: None,
            recording: RecordingSession::new(),
            regenerate: 0,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn surface(&self) -> &SharedSurface {
        &self.surface
    }

    // ------------------------------------------------------------------
    // Sprite frames
    // ------------------------------------------------------------------

    /// Decode and slice a sprite sheet using the configured grid.
    pub fn load_sheet(&mut self, bytes: &[u8]) -> Result<usize, MediaError> {
        let sheet = decode_sheet(bytes)?;
        let frames = slice_grid(&sheet, self.config.grid.columns, self.config.grid.rows)?;
        Ok(self.set_frames(frames))
    }

    /// Replace the sprite frames. Returns the frame count.
    pub fn set_frames(&mut self, frames: Vec<RgbaImage>) -> usize {
        let set = FrameSet::from_images(frames);
        let count = set.len();

        self.analysis = None;
        self.rects = FacePartRectMap::default();
        let pick = pick_mouth_frames(set.slots(), None, self.rects.get(FacePart::MouthOpen));
        self.selection_tx.send_modify(|selection| match pick {
            Some(pick) => selection.seed_from_pick(pick),
            None => selection.clear_recommended(),
        });

        if let Some((width, height)) = set.frame_dimensions() {
            log::info!("[Session] {} frames of {}x{}", count, width, height);
        }
        self.frames_tx.send_replace(set);
        if count > 0 {
            self.ensure_preview();
        }
        count
    }

    pub fn frames(&self) -> FrameSet {
        self.frames_tx.borrow().clone()
    }

    pub fn frame_count(&self) -> usize {
        self.frames_tx.borrow().len()
    }

    // ------------------------------------------------------------------
    // Analysis and selection
    // ------------------------------------------------------------------

    /// Accept a sheet analysis and reseed recommendations and part rects.
    pub fn set_analysis(&mut self, analysis: SpriteSheetAnalysis) -> Result<(), RemoteError> {
        analysis.validate(self.analysis_frame_count())?;

        self.rects = FacePartRectMap::seeded_from(&analysis);
        let pick = pick_mouth_frames(
            self.frames().slots(),
            Some(&analysis),
            self.rects.get(FacePart::MouthOpen),
        );
        if let Some(pick) = pick {
            log::debug!("[Session] mouth pick open={} closed={}", pick.open, pick.closed);
        }
        self.selection_tx
            .send_modify(|selection| selection.seed_from_analysis(&analysis, pick));
        self.analysis = Some(analysis);
        Ok(())
    }

    /// Drop the analysis and fall back to heuristic recommendations.
    pub fn clear_analysis(&mut self) {
        self.analysis = None;
        self.rects = FacePartRectMap::default();
        let pick = pick_mouth_frames(self.frames().slots(), None, self.rects.get(FacePart::MouthOpen));
        self.selection_tx.send_modify(|selection| match pick {
            Some(pick) => selection.seed_from_pick(pick),
            None => selection.clear_recommended(),
        });
    }

    fn analysis_frame_count(&self) -> usize {
        match self.frame_count() {
            0 => self.config.grid.frame_count().unwrap_or(0),
            count => count,
        }
    }

    pub fn analysis(&self) -> Option<&SpriteSheetAnalysis> {
        self.analysis.as_ref()
    }

    pub fn selection(&self) -> FrameSelection {
        self.selection_tx.borrow().clone()
    }

    pub fn select_frame(&mut self, key: SelectionKey, frame_index: usize) {
        self.selection_tx
            .send_modify(|selection| selection.set_user(key, frame_index));
    }

    pub fn clear_selection(&mut self, key: SelectionKey) {
        self.selection_tx.send_modify(|selection| selection.clear_user(key));
    }

    pub fn reset_selection(&mut self) {
        self.selection_tx.send_modify(FrameSelection::reset_user);
    }

    pub fn resolve(&self, eye: EyeState, mouth: MouthState) -> usize {
        self.selection_tx
            .borrow()
            .resolve(eye, mouth, self.frame_count())
    }

    /// All six resolutions with their source.
    pub fn resolution_table(&self) -> Vec<Resolution> {
        self.selection_tx.borrow().table(self.frame_count())
    }

    pub fn part_rects(&self) -> &FacePartRectMap {
        &self.rects
    }

    pub fn set_part_rect(&mut self, part: FacePart, rect: FacePartRect) {
        self.rects.set(part, rect);
    }

    /// Frame a face part is cropped from: the analysis recommendation when
    /// present, otherwise the resolved frame of the matching key.
    pub fn part_frame_index(&self, part: FacePart) -> usize {
        let frame_count = self.frame_count();
        if let Some(index) = self
            .analysis
            .as_ref()
            .and_then(|analysis| analysis.recommended(part))
            .filter(|index| *index < frame_count)
        {
            return index;
        }
        let (eye, mouth) = match part {
            FacePart::EyesOpen => (EyeState::Open, MouthState::Closed),
            FacePart::EyesClosed => (EyeState::Closed, MouthState::Closed),
            FacePart::MouthOpen => (EyeState::Open, MouthState::Open),
            FacePart::MouthClosed => (EyeState::Open, MouthState::Closed),
        };
        self.resolve(eye, mouth)
    }

    /// Crop one face part. `None` while its frame is not ready.
    pub fn part_crop(&self, part: FacePart) -> Result<Option<RgbaImage>, MediaError> {
        let frames = self.frames();
        let Some(frame) = frames.get(self.part_frame_index(part)) else {
            return Ok(None);
        };
        crop_part(frame, &self.rects.get(part)).map(Some)
    }

    // ------------------------------------------------------------------
    // Audio and live mouth
    // ------------------------------------------------------------------

    /// Replace the audio source. Cached loudness and any recording for the
    /// previous source are discarded.
    pub fn load_audio(&mut self, audio: DecodedAudio) -> AudioSourceId {
        let id = AudioSourceId::next();
        log::info!(
            "[Session] audio {:?}: {:.2}s @ {} Hz",
            id,
            audio.duration(),
            audio.sample_rate()
        );
        self.audio = Some(LoadedAudio {
            id,
            audio: Arc::new(audio),
            loudness: None,
        });
        self.recording.invalidate();
        id
    }

    pub fn audio_source(&self) -> Option<AudioSourceId> {
        self.audio.as_ref().map(|loaded| loaded.id)
    }

    /// Loudness frames of the current audio, computed once per source.
    pub fn loudness(&mut self) -> Option<Arc<Vec<LoudnessFrame>>> {
        let params = self.config.analysis.loudness_params();
        let loaded = self.audio.as_mut()?;
        let frames = loaded
            .loudness
            .get_or_insert_with(|| Arc::new(analyze(&loaded.audio, &params)));
        Some(Arc::clone(frames))
    }

    /// Set the preview mouth state. Ignored while recording, since the
    /// recording loop drives the mouth then.
    pub fn set_live_mouth(&mut self, mouth: MouthState) -> bool {
        if self.recording.phase().is_active() {
            log::debug!("[Session] live mouth ignored during recording");
            return false;
        }
        self.mouth_tx.send_replace(mouth);
        true
    }

    /// Feed one window of live samples (e.g. a microphone) to the preview.
    pub fn push_live_window(&mut self, window: &[f32]) -> MouthState {
        let state = self.live_mouth.push_window(window);
        self.set_live_mouth(state);
        state
    }

    pub fn mouth(&self) -> MouthState {
        *self.mouth_tx.borrow()
    }

    pub fn eyes(&self) -> EyeState {
        self.blink.current()
    }

    // ------------------------------------------------------------------
    // Preview
    // ------------------------------------------------------------------

    fn preview_inputs(&self) -> PreviewInputs {
        PreviewInputs {
            eye: self.blink.subscribe(),
            mouth: self.mouth_tx.subscribe(),
            selection: self.selection_tx.subscribe(),
            frames: self.frames_tx.subscribe(),
        }
    }

    /// Start the preview loop if it is not running.
    pub fn ensure_preview(&mut self) {
        if self.preview.as_ref().is_some_and(LivePreview::is_running) {
            return;
        }
        self.preview = Some(LivePreview::spawn(
            self.surface.clone(),
            self.preview_inputs(),
            self.config.preview.tick(),
        ));
    }

    pub fn preview_running(&self) -> bool {
        self.preview.as_ref().is_some_and(LivePreview::is_running)
    }

    /// Copy of what the surface shows right now.
    pub fn snapshot(&self) -> RgbaImage {
        self.surface.snapshot()
    }

    // ------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------

    /// Record for the current audio and regenerate key.
    pub fn trigger_recording(&mut self) -> TriggerOutcome {
        let Some(loudness) = self.loudness() else {
            log::debug!("[Session] recording trigger without audio");
            return TriggerOutcome::NoAudio;
        };
        let Some(loaded) = self.audio.as_ref() else {
            return TriggerOutcome::NoAudio;
        };
        let key = RecordingKey {
            audio: loaded.id,
            regenerate: self.regenerate,
        };
        let inputs = PipelineInputs {
            audio: Arc::clone(&loaded.audio),
            loudness,
            frames: self.frames(),
            selection: self.selection_tx.subscribe(),
            eye: self.blink.subscribe(),
            mouth: Arc::clone(&self.mouth_tx),
            surface: self.surface.clone(),
        };
        let settings = PipelineSettings::from_config(&self.config);
        self.recording.trigger(key, inputs, settings)
    }

    /// Bump the regenerate key and record again.
    pub fn regenerate(&mut self) -> TriggerOutcome {
        if self.recording.phase().is_active() {
            return TriggerOutcome::SkippedInFlight;
        }
        self.regenerate += 1;
        self.trigger_recording()
    }

    pub fn regenerate_key(&self) -> u64 {
        self.regenerate
    }

    pub fn recording_phase(&self) -> RecordingPhase {
        self.recording.phase()
    }

    pub fn subscribe_recording_phase(&self) -> watch::Receiver<RecordingPhase> {
        self.recording.subscribe_phase()
    }

    pub fn recording_attempts(&self) -> u64 {
        self.recording.attempts()
    }

    pub async fn wait_recording(&mut self) -> Result<Arc<VideoArtifact>, RecordingError> {
        self.recording.wait().await
    }

    pub fn artifact(&self) -> Option<Arc<VideoArtifact>> {
        self.recording.artifact()
    }

    pub fn cancel_recording(&mut self) {
        self.recording.cancel();
    }

    /// Cancel every activity the session started. The session stays usable
    /// for inspection; the preview and blink timers do not restart.
    pub async fn shutdown(&mut self) -> PreviewStats {
        self.blink.cancel();
        self.recording.cancel();
        let _ = self.recording.wait().await;
        let stats = match self.preview.take() {
            Some(preview) => preview.stop().await,
            None => PreviewStats::default(),
        };
        log::info!(
            "[Session] shut down after {} preview ticks ({} skipped)",
            stats.ticks,
            stats.skipped
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use std::time::Duration;

    fn frames(count: usize) -> Vec<RgbaImage> {
        (0..count)
            .map(|i| RgbaImage::from_pixel(8, 8, Rgba([i as u8 * 10, 0, 0, 255])))
            .collect()
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.blink.seed = Some(3);
        config.recording.capture_fps = 10;
        config.recording.drain_ms = 100;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_sheet_keeps_user_overrides() {
        let mut session = AnimatorSession::new(config());
        session.set_frames(frames(16));
        let key = SelectionKey::new(EyeState::Open, MouthState::Open);
        session.select_frame(key, 7);

        session.set_frames(frames(16));
        assert_eq!(session.resolve(EyeState::Open, MouthState::Open), 7);
        session.reset_selection();
        assert_eq!(session.selection().user_override(key), None);
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_preview_draws_after_frames_load() {
        let mut session = AnimatorSession::new(config());
        assert!(!session.preview_running());
        session.set_frames(frames(4));
        assert!(session.preview_running());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(session.surface().dimensions(), (8, 8));
        let stats = session.shutdown().await;
        assert!(stats.drawn > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_analysis_out_of_range_rejected() {
        let mut session = AnimatorSession::new(config());
        session.set_frames(frames(4));
        let analysis = SpriteSheetAnalysis {
            recommended_mouth_open_frame: Some(9),
            ..SpriteSheetAnalysis::default()
        };
        assert!(matches!(
            session.set_analysis(analysis),
            Err(RemoteError::InvalidAnalysis { .. })
        ));
        assert!(session.analysis().is_none());
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_without_audio() {
        let mut session = AnimatorSession::new(config());
        assert_eq!(session.trigger_recording(), TriggerOutcome::NoAudio);
        assert_eq!(session.recording_phase(), RecordingPhase::Idle);
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_audio_allows_recording_again() {
        let mut session = AnimatorSession::new(config());
        session.set_frames(frames(4));
        session.load_audio(DecodedAudio::from_mono(1000, vec![0.0; 500]).unwrap());

        assert_eq!(session.trigger_recording(), TriggerOutcome::Started);
        session.wait_recording().await.unwrap();
        assert_eq!(session.trigger_recording(), TriggerOutcome::SkippedUpToDate);

        session.load_audio(DecodedAudio::from_mono(1000, vec![0.0; 500]).unwrap());
        assert_eq!(session.recording_phase(), RecordingPhase::Idle);
        assert!(session.artifact().is_none());
        assert_eq!(session.trigger_recording(), TriggerOutcome::Started);
        session.wait_recording().await.unwrap();
        assert_eq!(session.recording_attempts(), 2);
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_loudness_cached_per_source() {
        let mut session = AnimatorSession::new(config());
        assert!(session.loudness().is_none());
        session.load_audio(DecodedAudio::from_mono(1000, vec![0.0; 1000]).unwrap());
        let first = session.loudness().unwrap();
        assert_eq!(first.len(), 10);
        assert!(Arc::ptr_eq(&first, &session.loudness().unwrap()));
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_recordings_share_the_cached_loudness() {
        let mut session = AnimatorSession::new(config());
        session.set_frames(frames(4));
        session.load_audio(DecodedAudio::from_mono(1000, vec![0.1; 500]).unwrap());
        let cached = session.loudness().unwrap();

        assert_eq!(session.trigger_recording(), TriggerOutcome::Started);
        // Session cache, `cached` and the running attempt's inputs
        assert!(Arc::strong_count(&cached) >= 3);
        session.wait_recording().await.unwrap();

        assert_eq!(session.regenerate(), TriggerOutcome::Started);
        assert!(Arc::strong_count(&cached) >= 3);
        session.wait_recording().await.unwrap();
        assert!(Arc::ptr_eq(&cached, &session.loudness().unwrap()));
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_analysis_mouth_pick_seeds_unlabelled_keys() {
        let mut session = AnimatorSession::new(config());
        session.set_frames(frames(16));
        let analysis = SpriteSheetAnalysis {
            recommended_mouth_open_frame: Some(6),
            recommended_mouth_closed_frame: Some(11),
            ..SpriteSheetAnalysis::default()
        };
        session.set_analysis(analysis).unwrap();

        assert_eq!(session.resolve(EyeState::Open, MouthState::Open), 6);
        assert_eq!(session.resolve(EyeState::Open, MouthState::Closed), 11);
        assert_eq!(session.resolve(EyeState::Closed, MouthState::Open), 6);
        assert_eq!(session.resolve(EyeState::Closed, MouthState::Closed), 11);
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_part_crop_uses_rect() {
        let mut session = AnimatorSession::new(config());
        assert!(session.part_crop(FacePart::MouthOpen).unwrap().is_none());
        session.set_frames(frames(4));
        session.set_part_rect(FacePart::MouthOpen, FacePartRect::new(0.0, 0.0, 0.5, 0.5));
        let crop = session.part_crop(FacePart::MouthOpen).unwrap().unwrap();
        assert_eq!(crop.dimensions(), (4, 4));
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_blinking() {
        let mut session = AnimatorSession::new(config());
        session.shutdown().await;
        let eyes = session.eyes();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(session.eyes(), eyes);
    }
}
