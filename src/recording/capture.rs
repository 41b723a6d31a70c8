//! Chunk recorder
//!
//! Captures the drawable surface at a constant frame rate into JPEG chunks
//! and collects the PCM chunks released by the playhead. Missed capture
//! slots are filled by repeating the current canvas so the video track keeps
//! the same wall-clock length as the audio track.

use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::{imageops, ColorType, Rgb, RgbImage, RgbaImage};
use tokio::time::Instant;

use crate::audio::PcmChunk;
use crate::error::{MediaError, RecordingError};
use crate::render::SharedSurface;

/// Everything captured during one recording
#[derive(Debug, Clone)]
pub struct CapturedStreams {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// One JPEG image per video frame
    pub video_frames: Vec<Vec<u8>>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved s16le PCM
    pub audio: Vec<u8>,
}

impl CapturedStreams {
    pub fn audio_frames(&self) -> usize {
        let block = self.channels as usize * 2;
        if block == 0 {
            0
        } else {
            self.audio.len() / block
        }
    }

    pub fn duration(&self) -> Duration {
        if self.fps == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.video_frames.len() as f64 / self.fps as f64)
    }
}

pub struct ChunkRecorder {
    surface: SharedSurface,
    fps: u32,
    interval: Duration,
    quality: u8,
    background: Rgb<u8>,
    sample_rate: u32,
    channels: u16,
    started_at: Option<Instant>,
    captured: u64,
    dimensions: Option<(u32, u32)>,
    last_generation: Option<u64>,
    video_frames: Vec<Vec<u8>>,
    audio: Vec<u8>,
}

impl ChunkRecorder {
    pub fn new(
        surface: SharedSurface,
        fps: u32,
        quality: u8,
        background: [u8; 3],
        sample_rate: u32,
        channels: u16,
    ) -> Self {
        let fps = fps.clamp(1, 1000);
        Self {
            surface,
            fps,
            interval: Duration::from_nanos(1_000_000_000 / fps as u64),
            quality: quality.clamp(1, 100),
            background: Rgb(background),
            sample_rate,
            channels,
            started_at: None,
            captured: 0,
            dimensions: None,
            last_generation: None,
            video_frames: Vec::new(),
            audio: Vec::new(),
        }
    }

    pub fn start(&mut self, at: Instant) {
        self.started_at = Some(at);
        self.captured = 0;
        self.dimensions = None;
        self.last_generation = None;
        self.video_frames.clear();
        self.audio.clear();
    }

    pub fn frames_captured(&self) -> usize {
        self.video_frames.len()
    }

    /// When the next capture slot falls due.
    pub fn next_capture_at(&self) -> Option<Instant> {
        self.started_at
            .map(|start| start + self.interval * self.captured as u32)
    }

    /// Capture every slot due by `now`. Returns how many frames were added.
    pub fn capture_due(&mut self, now: Instant) -> Result<usize, RecordingError> {
        let Some(start) = self.started_at else {
            return Ok(0);
        };
        let elapsed = now.saturating_duration_since(start);
        let due = (elapsed.as_nanos() / self.interval.as_nanos()) as u64 + 1;
        let mut added = 0;
        while self.captured < due {
            self.capture_frame()?;
            self.captured += 1;
            added += 1;
        }
        Ok(added)
    }

    fn capture_frame(&mut self) -> Result<(), RecordingError> {
        let generation = self.surface.generation();
        if self.last_generation == Some(generation) {
            if let Some(previous) = self.video_frames.last().cloned() {
                self.video_frames.push(previous);
                return Ok(());
            }
        }

        let snapshot = self.surface.snapshot();
        let (width, height) = *self.dimensions.get_or_insert(snapshot.dimensions());
        if width == 0 || height == 0 {
            return Err(RecordingError::CaptureFailed {
                reason: "surface has no pixels".to_string(),
            });
        }
        let frame = if snapshot.dimensions() == (width, height) {
            snapshot
        } else {
            imageops::resize(&snapshot, width, height, imageops::FilterType::Triangle)
        };

        let jpeg = encode_jpeg(&frame, self.background, self.quality)?;
        self.video_frames.push(jpeg);
        self.last_generation = Some(generation);
        Ok(())
    }

    pub fn push_audio(&mut self, chunk: PcmChunk) {
        self.audio.extend_from_slice(&chunk.data);
    }

    /// Stop capturing and hand over the collected streams.
    pub fn finish(mut self) -> Result<CapturedStreams, RecordingError> {
        if self.video_frames.is_empty() {
            return Err(RecordingError::CaptureFailed {
                reason: "no video frames were captured".to_string(),
            });
        }
        let (width, height) = self.dimensions.unwrap_or((0, 0));
        Ok(CapturedStreams {
            width,
            height,
            fps: self.fps,
            video_frames: std::mem::take(&mut self.video_frames),
            sample_rate: self.sample_rate,
            channels: self.channels,
            audio: std::mem::take(&mut self.audio),
        })
    }
}

/// Flatten onto `background` and encode as baseline JPEG.
pub fn encode_jpeg(frame: &RgbaImage, background: Rgb<u8>, quality: u8) -> Result<Vec<u8>, MediaError> {
    let flat = flatten(frame, background);
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality).encode(
        flat.as_raw(),
        flat.width(),
        flat.height(),
        ColorType::Rgb8,
    )?;
    Ok(bytes)
}

fn flatten(frame: &RgbaImage, background: Rgb<u8>) -> RgbImage {
    RgbImage::from_fn(frame.width(), frame.height(), |x, y| {
        let px = frame.get_pixel(x, y);
        let alpha = px[3] as u32;
        let blend = |fg: u8, bg: u8| ((fg as u32 * alpha + bg as u32 * (255 - alpha) + 127) / 255) as u8;
        Rgb([
            blend(px[0], background[0]),
            blend(px[1], background[1]),
            blend(px[2], background[2]),
        ])
    })
}
