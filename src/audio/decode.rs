//! Decoded audio sources
//!
//! Audio arrives as WAV bytes (from a file or from the user) and is decoded
//! once into per-channel `f32` samples in `[-1.0, 1.0]`. The decoded signal is
//! immutable and shared between the offline analyzer and the recording
//! playhead.

use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::MediaError;

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one loaded audio source.
///
/// A new id is minted every time audio is loaded, even when the bytes are
/// identical, so replacing the source always invalidates derived state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct AudioSourceId(pub u64);

impl AudioSourceId {
    pub fn next() -> Self {
        Self(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Sample-addressable decoded audio
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl DecodedAudio {
    /// Build from already-decoded per-channel samples.
    ///
    /// All channels are truncated to the shortest one.
    pub fn from_channels(sample_rate: u32, mut channels: Vec<Vec<f32>>) -> Result<Self, MediaError> {
        if sample_rate == 0 {
            return Err(MediaError::UnsupportedAudio {
                detail: "sample rate of 0 Hz".to_string(),
            });
        }
        if channels.is_empty() {
            return Err(MediaError::UnsupportedAudio {
                detail: "no channels".to_string(),
            });
        }
        let shortest = channels.iter().map(Vec::len).min().unwrap_or(0);
        for channel in &mut channels {
            channel.truncate(shortest);
        }
        Ok(Self {
            sample_rate,
            channels,
        })
    }

    /// Convenience constructor for a single channel.
    pub fn from_mono(sample_rate: u32, samples: Vec<f32>) -> Result<Self, MediaError> {
        Self::from_channels(sample_rate, vec![samples])
    }

    /// Decode WAV bytes.
    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self, MediaError> {
        let reader = hound::WavReader::new(Cursor::new(bytes)).map_err(|err| {
            MediaError::AudioDecodeFailed {
                reason: err.to_string(),
            }
        })?;
        Self::from_reader(reader)
    }

    /// Decode a WAV file from disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, MediaError> {
        let path = path.as_ref();
        let reader =
            hound::WavReader::open(path).map_err(|err| MediaError::AudioDecodeFailed {
                reason: format!("failed to open {}: {err}", path.display()),
            })?;
        Self::from_reader(reader)
    }

    fn from_reader<R: std::io::Read>(mut reader: hound::WavReader<R>) -> Result<Self, MediaError> {
        let spec = reader.spec();
        if spec.channels == 0 {
            return Err(MediaError::UnsupportedAudio {
                detail: "zero channels".to_string(),
            });
        }

        let interleaved = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<Vec<f32>, _>>()
                .map_err(decode_failure)?,
            hound::SampleFormat::Int => {
                let bits = spec.bits_per_sample;
                if !(8..=32).contains(&bits) {
                    return Err(MediaError::UnsupportedAudio {
                        detail: format!("bits_per_sample={}", bits),
                    });
                }
                let max = ((1i64 << (bits - 1)) - 1) as f32;
                reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|value| value as f32 / max))
                    .collect::<Result<Vec<f32>, _>>()
                    .map_err(decode_failure)?
            }
        };

        let channel_count = spec.channels as usize;
        let mut channels = vec![Vec::with_capacity(interleaved.len() / channel_count); channel_count];
        for frame in interleaved.chunks_exact(channel_count) {
            for (channel, &sample) in channels.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }

        log::debug!(
            "[Decode] {} Hz, {} channel(s), {} frames",
            spec.sample_rate,
            channel_count,
            channels[0].len()
        );

        Self::from_channels(spec.sample_rate, channels)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of sample frames (samples per channel).
    pub fn frame_len(&self) -> usize {
        self.channels[0].len()
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.frame_len() as f64 / self.sample_rate as f64
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// The channel the loudness analyzer reads.
    pub fn first_channel(&self) -> &[f32] {
        &self.channels[0]
    }

    /// Channel count written to the recorded audio track (mono or stereo).
    pub fn output_channels(&self) -> u16 {
        self.channels.len().min(2) as u16
    }

    /// Interleaved signed 16-bit little-endian PCM for frames `[start, end)`.
    pub fn pcm16_le(&self, start: usize, end: usize) -> Vec<u8> {
        let end = end.min(self.frame_len());
        if start >= end {
            return Vec::new();
        }
        let out_channels = self.output_channels() as usize;
        let mut bytes = Vec::with_capacity((end - start) * out_channels * 2);
        for frame in start..end {
            for channel in &self.channels[..out_channels] {
                let value = (channel[frame].clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
        bytes
    }
}

fn decode_failure(err: hound::Error) -> MediaError {
    MediaError::AudioDecodeFailed {
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(spec: hound::WavSpec, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &sample in samples {
                writer.write_sample(sample).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_decode_stereo_deinterleaves() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let bytes = wav_bytes(spec, &[i16::MAX, 0, i16::MAX, 0, 0, i16::MAX]);
        let audio = DecodedAudio::from_wav_bytes(&bytes).unwrap();

        assert_eq!(audio.sample_rate(), 8000);
        assert_eq!(audio.channel_count(), 2);
        assert_eq!(audio.frame_len(), 3);
        assert!((audio.first_channel()[0] - 1.0).abs() < 1e-4);
        assert_eq!(audio.channel(1).unwrap()[0], 0.0);
    }

    #[test]
    fn test_decode_garbage_is_decode_failure() {
        let err = DecodedAudio::from_wav_bytes(b"definitely not a wav").unwrap_err();
        assert!(matches!(err, MediaError::AudioDecodeFailed { .. }));
    }

    #[test]
    fn test_zero_sample_rate_rejected() {
        let err = DecodedAudio::from_mono(0, vec![0.0; 10]).unwrap_err();
        assert!(matches!(err, MediaError::UnsupportedAudio { .. }));
    }

    #[test]
    fn test_duration_and_empty_audio() {
        let audio = DecodedAudio::from_mono(1000, vec![0.0; 500]).unwrap();
        assert!((audio.duration() - 0.5).abs() < 1e-12);

        let empty = DecodedAudio::from_mono(1000, Vec::new()).unwrap();
        assert_eq!(empty.duration(), 0.0);
        assert!(empty.pcm16_le(0, 10).is_empty());
    }

    #[test]
    fn test_pcm16_clamps_and_interleaves() {
        let audio =
            DecodedAudio::from_channels(1000, vec![vec![2.0, -2.0], vec![0.0, 0.5]]).unwrap();
        let bytes = audio.pcm16_le(0, 2);
        assert_eq!(bytes.len(), 8);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[4], bytes[5]]), -i16::MAX);
    }

    #[test]
    fn test_source_ids_are_unique() {
        assert_ne!(AudioSourceId::next(), AudioSourceId::next());
    }
}
