// Sprite module - sheet slicing, frame analysis and frame resolution
//
// - sheet: grid slicer and face-part crops
// - analysis: remote classifier output and face-part rects
// - selection: (eye, mouth) → frame index resolution table
// - scoring: open/closed mouth frame pickers

pub mod analysis;
pub mod scoring;
pub mod selection;
pub mod sheet;

pub use analysis::{FacePart, FacePartRect, FacePartRectMap, FrameClassification, SpriteSheetAnalysis};
pub use scoring::{
    AnalysisMouthPicker, FrameScorer, HeuristicMouthPicker, MouthFramePicker, MouthPick, PixelVarianceScorer,
    pick_mouth_frames,
};
pub use selection::{FrameSelection, Resolution, ResolutionSource, SelectionKey};
pub use sheet::{crop_part, decode_sheet, grid_frame_count, open_sheet, slice_grid};
