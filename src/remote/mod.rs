// Remote module - generative sprite sheet and sheet analysis services
//
// Both calls are opaque remote functions: one turns a reference image plus an
// instruction into a 4x4 sprite sheet, the other labels each frame of a sheet.
// Failures are returned to the caller and never retried here.
//
// The reqwest-backed client lives in `http` behind the `remote` feature.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::sprite::analysis::SpriteSheetAnalysis;

#[cfg(feature = "remote")]
pub mod http;

#[cfg(feature = "remote")]
pub use http::HttpRemoteClient;

/// What the generated frames should vary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpriteKind {
    /// Talking and idle motion of one pose
    #[default]
    Motion,
    /// One facial expression per frame
    Expression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundMode {
    /// Single flat color, easy to key out
    #[default]
    Flat,
    Transparent,
}

/// Input of the generation call
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Reference character image (PNG or JPEG bytes)
    pub reference: Vec<u8>,
    pub reference_mime: String,
    pub instruction: String,
    pub background: BackgroundMode,
    pub kind: SpriteKind,
}

impl GenerationRequest {
    /// Request with the default instruction for `kind` and `background`.
    pub fn new(reference: Vec<u8>, reference_mime: impl Into<String>, kind: SpriteKind, background: BackgroundMode) -> Self {
        Self {
            reference,
            reference_mime: reference_mime.into(),
            instruction: default_instruction(kind, background),
            background,
            kind,
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }
}

/// Instruction text used when the caller does not supply one.
pub fn default_instruction(kind: SpriteKind, background: BackgroundMode) -> String {
    let frames = match kind {
        SpriteKind::Motion => {
            "Each frame shows the same character in the same pose with a different \
             mouth shape (open, half open, closed) and eyes either open or closed."
        }
        SpriteKind::Expression => {
            "Each frame shows the same character with a different facial expression, \
             keeping head position and framing identical."
        }
    };
    let background = match background {
        BackgroundMode::Flat => "Use one flat, uniform background color behind every frame.",
        BackgroundMode::Transparent => "Use a fully transparent background behind every frame.",
    };
    format!(
        "Create a square sprite sheet of the character in the reference image as a \
         4x4 grid of 16 equally sized frames, ordered left to right, top to bottom. \
         {} {} No borders, labels or gaps between frames.",
        frames, background
    )
}

/// Instruction sent with the analysis call
pub const ANALYSIS_INSTRUCTION: &str = "This image is a 4x4 sprite sheet of 16 frames numbered 0-15 \
left to right, top to bottom. Return JSON only: {\"frames\": [{\"frameIndex\", \"eyesState\" \
(open|closed), \"mouthState\" (open|half|closed), \"emotion\", \"faceRect\", \"eyesRect\", \
\"mouthRect\"}], \"recommendedEyesOpenFrame\", \"recommendedEyesClosedFrame\", \
\"recommendedMouthOpenFrame\", \"recommendedMouthClosedFrame\"}. Rects are {x, y, w, h} \
normalized to one frame.";

/// Produces sprite sheets
pub trait SpriteGenerator {
    /// Returns the encoded sheet image. A response without image data is
    /// [`RemoteError::MissingImage`].
    fn generate(&self, request: &GenerationRequest) -> impl Future<Output = Result<Vec<u8>, RemoteError>> + Send;
}

/// Labels the frames of a sprite sheet
pub trait SheetAnalyzer {
    /// Malformed JSON is [`RemoteError::MalformedJson`]; indices outside the
    /// sheet are [`RemoteError::InvalidAnalysis`].
    fn analyze(
        &self,
        sheet: &[u8],
        sheet_mime: &str,
        frame_count: usize,
    ) -> impl Future<Output = Result<SpriteSheetAnalysis, RemoteError>> + Send;
}

/// Guess a MIME type from the leading bytes of an image.
pub fn sniff_image_mime(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, ..] => "image/jpeg",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "application/octet-stream",
    }
}
