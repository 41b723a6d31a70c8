//! Sprite-sheet slicing and face-part crops.
//!
//! A sheet is one image holding a `columns × rows` grid of equally sized
//! frames. Slicing is row-major: left to right, then top to bottom. Any
//! remainder pixels on the right or bottom edge are discarded so every
//! frame has the same dimensions.

use std::path::Path;

use image::{imageops, RgbaImage};

use crate::error::MediaError;
use crate::sprite::analysis::FacePartRect;

/// Decode an encoded sheet (PNG, JPEG, WebP, ...) into RGBA.
pub fn decode_sheet(bytes: &[u8]) -> Result<RgbaImage, MediaError> {
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

pub fn open_sheet<P: AsRef<Path>>(path: P) -> Result<RgbaImage, MediaError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let sheet = decode_sheet(&bytes)?;
    log::debug!(
        "[Slicer] loaded {} ({}x{})",
        path.display(),
        sheet.width(),
        sheet.height()
    );
    Ok(sheet)
}

/// Number of frames in a `columns × rows` grid.
pub fn grid_frame_count(columns: u32, rows: u32) -> Result<usize, MediaError> {
    if columns == 0 || rows == 0 {
        return Err(MediaError::InvalidSheet {
            reason: format!("grid must be at least 1x1, got {}x{}", columns, rows),
        });
    }
    (columns as usize)
        .checked_mul(rows as usize)
        .ok_or_else(|| MediaError::InvalidSheet {
            reason: format!("{}x{} grid has too many frames", columns, rows),
        })
}

/// Slice a sheet into `columns * rows` equal frames in row-major order.
pub fn slice_grid(sheet: &RgbaImage, columns: u32, rows: u32) -> Result<Vec<RgbaImage>, MediaError> {
    let frame_count = grid_frame_count(columns, rows)?;
    let (width, height) = sheet.dimensions();
    let cell_w = width / columns;
    let cell_h = height / rows;
    if cell_w == 0 || cell_h == 0 {
        return Err(MediaError::InvalidSheet {
            reason: format!(
                "{}x{} image is too small for a {}x{} grid",
                width, height, columns, rows
            ),
        });
    }
    if width != height {
        log::warn!("[Slicer] sheet is not square ({}x{})", width, height);
    }

    let mut frames = Vec::with_capacity(frame_count);
    for row in 0..rows {
        for col in 0..columns {
            frames.push(imageops::crop_imm(sheet, col * cell_w, row * cell_h, cell_w, cell_h).to_image());
        }
    }

    log::debug!(
        "[Slicer] {} frames of {}x{}",
        frames.len(),
        cell_w,
        cell_h
    );
    Ok(frames)
}

/// Crop the region described by a normalized rect out of one frame.
pub fn crop_part(frame: &RgbaImage, rect: &FacePartRect) -> Result<RgbaImage, MediaError> {
    let (x, y, w, h) = rect.to_pixels(frame.width(), frame.height()).ok_or_else(|| {
        MediaError::InvalidSheet {
            reason: format!("cannot crop {:?} from a {}x{} frame", rect, frame.width(), frame.height()),
        }
    })?;
    Ok(imageops::crop_imm(frame, x, y, w, h).to_image())
}
