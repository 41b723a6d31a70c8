//! Shared fixtures for integration tests: synthetic WAV audio and sprite
//! sheets with a distinct flat color per frame.

#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;

use image::{ImageOutputFormat, Rgba, RgbaImage};

pub const CELL: u32 = 8;

/// Color of frame `index` in a sheet from [`sheet`].
pub fn frame_color(index: u32) -> Rgba<u8> {
    Rgba([(index * 15) as u8, 100, 255 - (index * 15) as u8, 255])
}

/// A 4x4 sheet of flat-colored 8x8 cells.
pub fn sheet() -> RgbaImage {
    RgbaImage::from_fn(CELL * 4, CELL * 4, |x, y| frame_color((y / CELL) * 4 + x / CELL))
}

pub fn sheet_png() -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    sheet()
        .write_to(&mut bytes, ImageOutputFormat::Png)
        .expect("encode sheet");
    bytes.into_inner()
}

/// Mono 16-bit WAV: `loud_secs` of a square wave followed by silence.
pub fn wav_bytes(sample_rate: u32, loud_secs: f32, total_secs: f32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("wav writer");
        let total = (total_secs * sample_rate as f32) as usize;
        let loud = (loud_secs * sample_rate as f32) as usize;
        for n in 0..total {
            let sample = if n < loud {
                if (n / 20) % 2 == 0 {
                    16_000
                } else {
                    -16_000
                }
            } else {
                0
            };
            writer.write_sample(sample as i16).expect("write sample");
        }
        writer.finalize().expect("finalize wav");
    }
    cursor.into_inner()
}

pub fn write_file(path: &Path, bytes: &[u8]) {
    std::fs::write(path, bytes).expect("write fixture");
}

/// Analysis JSON labelling frame 5 open-mouth and frame 9 closed-eyes.
pub const ANALYSIS_JSON: &str = r#"```json
{
  "frames": [
    {"frameIndex": 0, "eyesState": "open", "mouthState": "closed"},
    {"frameIndex": 5, "eyesState": "open", "mouthState": "open",
     "mouthRect": {"x": 0.25, "y": 0.5, "w": 0.5, "h": 0.25}},
    {"frameIndex": 6, "eyesState": "open", "mouthState": "half"},
    {"frameIndex": 9, "eyesState": "closed", "mouthState": "closed"}
  ],
  "recommendedEyesOpenFrame": 0,
  "recommendedEyesClosedFrame": 9,
  "recommendedMouthOpenFrame": 5,
  "recommendedMouthClosedFrame": 0
}
```"#;
