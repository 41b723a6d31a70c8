// Loudness module - offline audio-to-mouth analysis
//
// Converts a decoded waveform into a time-stamped sequence of loudness frames
// at a fixed frame rate. Each frame carries the smoothed RMS of its window and
// a binary open/closed mouth classification with release hysteresis.
//
// Pipeline per window:
//   RMS → single-pole IIR smoother → threshold + release gate → LoudnessFrame
//
// The whole pass is a pure function of (samples, sample rate, params); all
// filter and gate state lives on the stack of one call.

use serde::{Deserialize, Serialize};

use crate::audio::DecodedAudio;

/// Binary mouth classification carried by a loudness frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameMouth {
    Open,
    Closed,
}

/// One analysis tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoudnessFrame {
    /// Start of the window in seconds
    pub time: f64,
    /// Smoothed RMS, 0..1 for normalized input
    pub volume: f64,
    pub mouth_state: FrameMouth,
}

/// Analyzer parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoudnessParams {
    /// Frames per second
    pub fps: f64,
    /// Smoothed loudness above which the mouth opens
    pub threshold: f64,
    /// Seconds the mouth stays open after loudness last exceeded threshold
    pub release_time: f64,
    /// Weight of the newest RMS value (history gets `1 - smoothing`)
    pub smoothing: f64,
}

impl Default for LoudnessParams {
    fn default() -> Self {
        Self {
            fps: 10.0,
            threshold: 0.01,
            release_time: 0.1,
            smoothing: 0.3,
        }
    }
}

impl LoudnessParams {
    /// Release window converted to whole frames: `ceil(release_time * fps)`.
    pub fn release_frames(&self) -> usize {
        ceil_tolerant(self.release_time.max(0.0) * self.fps)
    }

    fn is_valid(&self) -> bool {
        self.fps.is_finite() && self.fps > 0.0
    }
}

/// Root-mean-square amplitude of a window
///
/// Formula: RMS = sqrt((1/N) × Σ x[n]²)
///
/// An empty window has loudness 0.
pub fn rms(window: &[f32]) -> f64 {
    if window.is_empty() {
        return 0.0;
    }
    let sum: f64 = window.iter().map(|&x| (x as f64) * (x as f64)).sum();
    (sum / window.len() as f64).sqrt()
}

/// Single-pole IIR low-pass over a sequence of RMS values
///
/// y[n] = w × x[n] + (1 - w) × y[n-1], with y[-1] = 0
#[derive(Debug, Clone)]
pub struct RmsSmoother {
    weight: f64,
    value: f64,
}

impl RmsSmoother {
    pub fn new(weight: f64) -> Self {
        Self {
            weight: weight.clamp(0.0, 1.0),
            value: 0.0,
        }
    }

    pub fn push(&mut self, rms: f64) -> f64 {
        self.value = self.weight * rms + (1.0 - self.weight) * self.value;
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

/// Threshold gate with a release window
///
/// Frame j is open when loudness exceeds the threshold at j, or when it last
/// exceeded the threshold at i with `j - i < release_frames`.
#[derive(Debug, Clone)]
struct ReleaseGate {
    threshold: f64,
    release_frames: usize,
    last_exceeded: Option<usize>,
}

impl ReleaseGate {
    fn new(threshold: f64, release_frames: usize) -> Self {
        Self {
            threshold,
            release_frames,
            last_exceeded: None,
        }
    }

    fn classify(&mut self, index: usize, volume: f64) -> FrameMouth {
        if volume > self.threshold {
            self.last_exceeded = Some(index);
            return FrameMouth::Open;
        }
        match self.last_exceeded {
            Some(last) if index - last < self.release_frames => FrameMouth::Open,
            _ => FrameMouth::Closed,
        }
    }
}

/// Analyze the first channel of a decoded source.
pub fn analyze(audio: &DecodedAudio, params: &LoudnessParams) -> Vec<LoudnessFrame> {
    analyze_samples(audio.first_channel(), audio.sample_rate(), params)
}

/// Analyze raw samples.
///
/// Produces `ceil(duration * fps)` frames with timestamps `i / fps`. Window i
/// covers samples `[floor(i * sr / fps), floor((i + 1) * sr / fps))`, clamped
/// to the signal.
pub fn analyze_samples(samples: &[f32], sample_rate: u32, params: &LoudnessParams) -> Vec<LoudnessFrame> {
    if samples.is_empty() || sample_rate == 0 {
        return Vec::new();
    }
    if !params.is_valid() {
        log::warn!("[Analyzer] Invalid frame rate {}, no frames produced", params.fps);
        return Vec::new();
    }

    let samples_per_frame = sample_rate as f64 / params.fps;
    let frame_count = ceil_tolerant(samples.len() as f64 / samples_per_frame);

    let mut smoother = RmsSmoother::new(params.smoothing);
    let mut gate = ReleaseGate::new(params.threshold, params.release_frames());
    let mut frames = Vec::with_capacity(frame_count);

    for index in 0..frame_count {
        let start = ((index as f64 * samples_per_frame).floor() as usize).min(samples.len());
        let end = (((index + 1) as f64 * samples_per_frame).floor() as usize).min(samples.len());
        let volume = smoother.push(rms(&samples[start..end]));

        frames.push(LoudnessFrame {
            time: index as f64 / params.fps,
            volume,
            mouth_state: gate.classify(index, volume),
        });
    }

    log::debug!(
        "[Analyzer] {} frames at {} fps ({} open)",
        frames.len(),
        params.fps,
        frames
            .iter()
            .filter(|f| f.mouth_state == FrameMouth::Open)
            .count()
    );

    frames
}

/// `ceil` that ignores floating point noise just above an integer.
fn ceil_tolerant(value: f64) -> usize {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    (value - 1e-9).ceil().max(0.0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SR: u32 = 1000;

    fn params() -> LoudnessParams {
        LoudnessParams {
            fps: 10.0,
            threshold: 0.01,
            release_time: 0.1,
            smoothing: 0.3,
        }
    }

    #[test]
    fn test_rms_of_constant_signal() {
        assert!((rms(&[0.5; 64]) - 0.5).abs() < 1e-9);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn test_empty_audio_yields_no_frames() {
        assert!(analyze_samples(&[], SR, &params()).is_empty());
    }

    #[test]
    fn test_silence_is_closed_and_converges_to_zero() {
        let frames = analyze_samples(&vec![0.0; SR as usize], SR, &params());
        assert_eq!(frames.len(), 10);
        for frame in &frames {
            assert_eq!(frame.mouth_state, FrameMouth::Closed);
            assert_eq!(frame.volume, 0.0);
        }
    }

    #[test]
    fn test_burst_opens_then_releases() {
        let mut samples = vec![0.0; SR as usize];
        for s in samples.iter_mut().take(50) {
            *s = 1.0;
        }
        let frames = analyze_samples(&samples, SR, &params());

        assert_eq!(frames.len(), 10);
        assert_eq!(frames[0].mouth_state, FrameMouth::Open);
        assert_eq!(frames[1].mouth_state, FrameMouth::Open);
        assert_eq!(
            frames.last().map(|f| f.mouth_state),
            Some(FrameMouth::Closed),
            "mouth must close again once the decayed loudness stays below threshold"
        );
        // Volume decays monotonically after the burst
        for pair in frames.windows(2).skip(1) {
            assert!(pair[1].volume < pair[0].volume);
        }
    }

    #[test]
    fn test_release_window_holds_mouth_open() {
        // One loud window, then a hard drop with smoothing disabled
        let mut p = params();
        p.smoothing = 1.0;
        p.release_time = 0.3; // 3 frames
        let mut samples = vec![0.0; SR as usize];
        for s in samples.iter_mut().take(100) {
            *s = 0.5;
        }
        let frames = analyze_samples(&samples, SR, &p);

        let states: Vec<FrameMouth> = frames.iter().map(|f| f.mouth_state).collect();
        assert_eq!(&states[..3], &[FrameMouth::Open; 3]);
        assert_eq!(states[3], FrameMouth::Closed);
    }

    #[test]
    fn test_partial_last_window() {
        // 1.05 s at 10 fps → 11 frames, last window holds 50 samples
        let frames = analyze_samples(&vec![0.0; 1050], SR, &params());
        assert_eq!(frames.len(), 11);
        assert!((frames[10].time - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_fps_yields_no_frames() {
        let mut p = params();
        p.fps = 0.0;
        assert!(analyze_samples(&[0.1; 100], SR, &p).is_empty());
    }

    #[test]
    fn test_analysis_is_rerunnable() {
        let samples: Vec<f32> = (0..2000).map(|i| ((i as f32) * 0.37).sin() * 0.2).collect();
        let a = analyze_samples(&samples, SR, &params());
        let b = analyze_samples(&samples, SR, &params());
        assert_eq!(a, b);
    }

    proptest! {
        #[test]
        fn prop_frame_count_and_spacing(len in 1usize..5000, fps in prop::sample::select(vec![5.0, 10.0, 24.0, 30.0])) {
            let p = LoudnessParams { fps, ..params() };
            let frames = analyze_samples(&vec![0.1; len], SR, &p);
            let expected = (len as f64 * fps / SR as f64 - 1e-9).ceil() as usize;
            prop_assert_eq!(frames.len(), expected);
            prop_assert_eq!(frames[0].time, 0.0);
            for (i, frame) in frames.iter().enumerate() {
                prop_assert!((frame.time - i as f64 / fps).abs() < 1e-9);
            }
        }

        #[test]
        fn prop_hysteresis_holds_for_release_frames(
            levels in prop::collection::vec(0.0f32..0.05, 5..40),
            release_time in 0.0f64..0.5,
        ) {
            let p = LoudnessParams { release_time, ..params() };
            let mut samples = Vec::new();
            for level in &levels {
                samples.extend(std::iter::repeat(*level).take(100));
            }
            let frames = analyze_samples(&samples, SR, &p);
            let release = p.release_frames();
            for (i, frame) in frames.iter().enumerate() {
                if frame.volume > p.threshold {
                    for j in i..(i + release).min(frames.len()) {
                        prop_assert_eq!(frames[j].mouth_state, FrameMouth::Open);
                    }
                }
            }
        }
    }
}
