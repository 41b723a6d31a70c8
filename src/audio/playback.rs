//! Recording playhead
//!
//! Stands in for the audio output node of the recording graph: once started
//! it releases the decoded source as PCM chunks in step with elapsed wall-clock
//! time, so the audio track is captured at the same pace as the video track.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::audio::DecodedAudio;

/// Interleaved s16le PCM released by the playhead
#[derive(Debug, Clone, PartialEq)]
pub struct PcmChunk {
    /// First sample frame contained in this chunk
    pub start_frame: usize,
    /// Number of sample frames
    pub frames: usize,
    pub data: Vec<u8>,
}

/// Playhead over a decoded source
pub struct AudioPlayback {
    audio: Arc<DecodedAudio>,
    started_at: Option<Instant>,
    cursor: usize,
    stopped: bool,
}

impl AudioPlayback {
    pub fn new(audio: Arc<DecodedAudio>) -> Self {
        Self {
            audio,
            started_at: None,
            cursor: 0,
            stopped: false,
        }
    }

    pub fn start(&mut self, at: Instant) {
        self.started_at = Some(at);
        self.cursor = 0;
        self.stopped = false;
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some() && !self.stopped
    }

    /// Sample frames released so far.
    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.audio.frame_len()
    }

    /// Release every frame due by `now`.
    pub fn pump(&mut self, now: Instant) -> Option<PcmChunk> {
        let started_at = self.started_at?;
        if self.stopped {
            return None;
        }

        let elapsed = now.saturating_duration_since(started_at);
        let due = frames_for(elapsed, self.audio.sample_rate()).min(self.audio.frame_len());
        if due <= self.cursor {
            return None;
        }

        let chunk = PcmChunk {
            start_frame: self.cursor,
            frames: due - self.cursor,
            data: self.audio.pcm16_le(self.cursor, due),
        };
        self.cursor = due;
        Some(chunk)
    }

    /// Release the final chunk up to `now` and stop.
    pub fn stop(&mut self, now: Instant) -> Option<PcmChunk> {
        let last = self.pump(now);
        self.stopped = true;
        last
    }
}

fn frames_for(elapsed: Duration, sample_rate: u32) -> usize {
    (elapsed.as_secs_f64() * sample_rate as f64).floor() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(frames: usize) -> Arc<DecodedAudio> {
        Arc::new(DecodedAudio::from_mono(1000, vec![0.25; frames]).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_pump_releases_elapsed_frames() {
        let mut playback = AudioPlayback::new(source(1000));
        let start = Instant::now();
        playback.start(start);

        assert!(playback.pump(start).is_none());

        let chunk = playback.pump(start + Duration::from_millis(250)).unwrap();
        assert_eq!(chunk.start_frame, 0);
        assert_eq!(chunk.frames, 250);
        assert_eq!(chunk.data.len(), 500);

        let chunk = playback.pump(start + Duration::from_millis(400)).unwrap();
        assert_eq!(chunk.start_frame, 250);
        assert_eq!(chunk.frames, 150);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pump_never_exceeds_source() {
        let mut playback = AudioPlayback::new(source(100));
        let start = Instant::now();
        playback.start(start);

        let chunk = playback.pump(start + Duration::from_secs(5)).unwrap();
        assert_eq!(chunk.frames, 100);
        assert!(playback.is_exhausted());
        assert!(playback.pump(start + Duration::from_secs(6)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_started_or_stopped_releases_nothing() {
        let mut playback = AudioPlayback::new(source(100));
        assert!(playback.pump(Instant::now()).is_none());

        let start = Instant::now();
        playback.start(start);
        let last = playback.stop(start + Duration::from_millis(50)).unwrap();
        assert_eq!(last.frames, 50);
        assert!(!playback.is_running());
        assert!(playback.pump(start + Duration::from_millis(90)).is_none());
    }
}
