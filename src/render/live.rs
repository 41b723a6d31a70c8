// Live renderer - fixed-cadence preview of the resolved sprite frame
//
// Each tick samples the latest eye state, mouth state, selection and frame
// set, resolves a frame index and draws it onto the shared surface.
// Unready frames skip the tick; an empty frame set stops the loop.

use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::analysis::viseme::MouthState;
use crate::animation::EyeState;
use crate::render::surface::{SharedSurface, SurfaceOwner};
use crate::sprite::selection::FrameSelection;
use crate::telemetry::{self, SkipReason};

/// Sliced sprite frames; `None` marks a frame that is not decoded yet
#[derive(Debug, Clone, Default)]
pub struct FrameSet {
    frames: Arc<Vec<Option<RgbaImage>>>,
}

impl FrameSet {
    pub fn from_images(images: Vec<RgbaImage>) -> Self {
        Self::from_slots(images.into_iter().map(Some).collect())
    }

    pub fn from_slots(slots: Vec<Option<RgbaImage>>) -> Self {
        Self {
            frames: Arc::new(slots),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RgbaImage> {
        self.frames.get(index).and_then(Option::as_ref)
    }

    /// Dimensions of the first ready frame.
    pub fn frame_dimensions(&self) -> Option<(u32, u32)> {
        self.frames.iter().flatten().next().map(|f| f.dimensions())
    }

    /// Every slot in sheet order; `None` while a frame is not ready.
    pub fn slots(&self) -> &[Option<RgbaImage>] {
        &self.frames
    }
}

/// Result of one render tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Drawn { frame_index: usize },
    NotReady { frame_index: usize },
    NotOwner,
    NoFrames,
}

/// Resolve and draw a single frame.
pub fn render_tick(
    surface: &SharedSurface,
    who: SurfaceOwner,
    frames: &FrameSet,
    selection: &FrameSelection,
    eye: EyeState,
    mouth: MouthState,
) -> TickOutcome {
    if frames.is_empty() {
        return TickOutcome::NoFrames;
    }
    let frame_index = selection.resolve(eye, mouth, frames.len());
    let Some(frame) = frames.get(frame_index) else {
        return TickOutcome::NotReady { frame_index };
    };
    if surface.draw_frame(who, frame) {
        TickOutcome::Drawn { frame_index }
    } else {
        TickOutcome::NotOwner
    }
}

/// Watch channels the preview samples every tick
#[derive(Clone)]
pub struct PreviewInputs {
    pub eye: watch::Receiver<EyeState>,
    pub mouth: watch::Receiver<MouthState>,
    pub selection: watch::Receiver<FrameSelection>,
    pub frames: watch::Receiver<FrameSet>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreviewStats {
    pub ticks: u64,
    pub drawn: u64,
    pub skipped: u64,
}

/// Running preview loop
pub struct LivePreview {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<PreviewStats>>,
}

impl LivePreview {
    pub fn spawn(surface: SharedSurface, inputs: PreviewInputs, tick: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run_preview(surface, inputs, tick, shutdown_rx));
        Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Stop the loop and return its counters.
    pub async fn stop(mut self) -> PreviewStats {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        match self.handle.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => PreviewStats::default(),
        }
    }
}

impl Drop for LivePreview {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[tracing::instrument(name = "live_preview", skip_all, fields(tick_ms = tick.as_millis() as u64))]
async fn run_preview(
    surface: SharedSurface,
    inputs: PreviewInputs,
    tick: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> PreviewStats {
    let mut stats = PreviewStats::default();
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::debug!("preview started");

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            _ = interval.tick() => {}
        }
        stats.ticks += 1;

        let frames = inputs.frames.borrow().clone();
        let eye = *inputs.eye.borrow();
        let mouth = *inputs.mouth.borrow();
        let outcome = {
            let selection = inputs.selection.borrow();
            render_tick(&surface, SurfaceOwner::Preview, &frames, &selection, eye, mouth)
        };

        match outcome {
            TickOutcome::Drawn { .. } => stats.drawn += 1,
            TickOutcome::NotReady { frame_index } => {
                stats.skipped += 1;
                tracing::debug!(frame_index, "frame not ready, skipping tick");
                telemetry::hub().record_tick_skipped(SkipReason::FrameNotReady);
            }
            TickOutcome::NotOwner => {
                stats.skipped += 1;
                telemetry::hub().record_tick_skipped(SkipReason::SurfaceBusy);
            }
            TickOutcome::NoFrames => {
                tracing::info!("frame list is empty, stopping preview");
                break;
            }
        }
    }

    tracing::debug!(ticks = stats.ticks, drawn = stats.drawn, skipped = stats.skipped, "preview stopped");
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sprite::selection::SelectionKey;
    use image::Rgba;

    fn frames(count: u8) -> FrameSet {
        FrameSet::from_images(
            (0..count)
                .map(|i| RgbaImage::from_pixel(4, 4, Rgba([i, 0, 0, 255])))
                .collect(),
        )
    }

    fn selection() -> FrameSelection {
        let mut selection = FrameSelection::new();
        selection.set_user(SelectionKey::new(EyeState::Open, MouthState::Open), 2);
        selection.set_user(SelectionKey::new(EyeState::Closed, MouthState::Closed), 3);
        selection
    }

    #[test]
    fn test_render_tick_draws_resolved_frame() {
        let surface = SharedSurface::new(1, 1);
        let outcome = render_tick(
            &surface,
            SurfaceOwner::Preview,
            &frames(4),
            &selection(),
            EyeState::Open,
            MouthState::Open,
        );
        assert_eq!(outcome, TickOutcome::Drawn { frame_index: 2 });
        assert_eq!(surface.dimensions(), (4, 4));
        assert_eq!(surface.snapshot().get_pixel(0, 0)[0], 2);
    }

    #[test]
    fn test_unready_frame_skips_draw() {
        let surface = SharedSurface::new(1, 1);
        let set = FrameSet::from_slots(vec![Some(RgbaImage::new(2, 2)), None, None, None]);
        let outcome = render_tick(
            &surface,
            SurfaceOwner::Preview,
            &set,
            &selection(),
            EyeState::Closed,
            MouthState::Closed,
        );
        assert_eq!(outcome, TickOutcome::NotReady { frame_index: 3 });
        assert_eq!(surface.generation(), 0);
    }

    #[test]
    fn test_empty_frames_report_no_frames() {
        let surface = SharedSurface::new(1, 1);
        let outcome = render_tick(
            &surface,
            SurfaceOwner::Preview,
            &FrameSet::default(),
            &FrameSelection::new(),
            EyeState::Open,
            MouthState::Closed,
        );
        assert_eq!(outcome, TickOutcome::NoFrames);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preview_follows_inputs_and_stops_on_empty_frames() {
        let surface = SharedSurface::new(1, 1);
        let (eye_tx, eye) = watch::channel(EyeState::Open);
        let (_mouth_tx, mouth) = watch::channel(MouthState::Open);
        let (_selection_tx, selection) = watch::channel(selection());
        let (frames_tx, frame_rx) = watch::channel(frames(4));
        let inputs = PreviewInputs {
            eye,
            mouth,
            selection,
            frames: frame_rx,
        };

        let preview = LivePreview::spawn(surface.clone(), inputs, Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(surface.snapshot().get_pixel(0, 0)[0], 2);

        // Closed eyes with open mouth fall back to index 0
        eye_tx.send_replace(EyeState::Closed);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(surface.snapshot().get_pixel(0, 0)[0], 0);

        frames_tx.send_replace(FrameSet::default());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!preview.is_running());

        let stats = preview.stop().await;
        assert!(stats.drawn >= 3, "stats: {:?}", stats);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preview_yields_to_recording_claim() {
        let surface = SharedSurface::new(1, 1);
        let (_eye_tx, eye) = watch::channel(EyeState::Open);
        let (_mouth_tx, mouth) = watch::channel(MouthState::Open);
        let (_selection_tx, selection) = watch::channel(selection());
        let (_frames_tx, frame_rx) = watch::channel(frames(4));
        let inputs = PreviewInputs {
            eye,
            mouth,
            selection,
            frames: frame_rx,
        };

        let claim = surface.claim_recording().unwrap();
        let marker = RgbaImage::from_pixel(4, 4, Rgba([99, 0, 0, 255]));
        assert!(claim.draw(&marker));

        let preview = LivePreview::spawn(surface.clone(), inputs, Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(surface.snapshot().get_pixel(0, 0)[0], 99, "preview must not draw while recording");

        drop(claim);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(surface.snapshot().get_pixel(0, 0)[0], 2);

        let stats = preview.stop().await;
        assert!(stats.skipped >= 3);
    }
}
