//! Drawable surface shared by the live preview and the recording pipeline.
//!
//! Only the current owner may draw. The preview owns the surface by default;
//! a [`RecordingClaim`] hands authority to the recorder and returns it to the
//! preview when dropped.

use std::sync::{Arc, Mutex, MutexGuard};

use image::RgbaImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceOwner {
    Preview,
    Recording,
}

struct SurfaceState {
    canvas: RgbaImage,
    owner: SurfaceOwner,
    /// Bumped on every successful draw
    generation: u64,
}

#[derive(Clone)]
pub struct SharedSurface {
    inner: Arc<Mutex<SurfaceState>>,
}

impl SharedSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SurfaceState {
                canvas: RgbaImage::new(width, height),
                owner: SurfaceOwner::Preview,
                generation: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SurfaceState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn owner(&self) -> SurfaceOwner {
        self.lock().owner
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.lock().canvas.dimensions()
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Take drawing authority for a recording. `None` if already claimed.
    pub fn claim_recording(&self) -> Option<RecordingClaim> {
        let mut state = self.lock();
        if state.owner == SurfaceOwner::Recording {
            return None;
        }
        state.owner = SurfaceOwner::Recording;
        log::debug!("[Surface] recording took surface authority");
        Some(RecordingClaim {
            surface: self.clone(),
        })
    }

    /// Draw `frame` if `who` owns the surface, resizing the canvas to the
    /// frame's dimensions. Returns whether anything was drawn.
    pub fn draw_frame(&self, who: SurfaceOwner, frame: &RgbaImage) -> bool {
        let mut state = self.lock();
        if state.owner != who {
            return false;
        }
        state.canvas.clone_from(frame);
        state.generation += 1;
        true
    }

    #[cfg(test)]
    pub(crate) fn clear(&self, who: SurfaceOwner, color: image::Rgba<u8>) -> bool {
        let mut state = self.lock();
        if state.owner != who {
            return false;
        }
        for px in state.canvas.pixels_mut() {
            *px = color;
        }
        state.generation += 1;
        true
    }

    /// Copy of the current canvas.
    pub fn snapshot(&self) -> RgbaImage {
        self.lock().canvas.clone()
    }
}

/// Recording authority over a surface, released on drop
pub struct RecordingClaim {
    surface: SharedSurface,
}

impl RecordingClaim {
    pub fn surface(&self) -> &SharedSurface {
        &self.surface
    }

    #[cfg(test)]
    pub(crate) fn draw(&self, frame: &RgbaImage) -> bool {
        self.surface.draw_frame(SurfaceOwner::Recording, frame)
    }
}

impl Drop for RecordingClaim {
    fn drop(&mut self) {
        self.surface.lock().owner = SurfaceOwner::Preview;
        log::debug!("[Surface] authority returned to preview");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_only_owner_draws() {
        let surface = SharedSurface::new(4, 4);
        let frame = RgbaImage::from_pixel(8, 6, Rgba([1, 2, 3, 255]));

        assert!(surface.draw_frame(SurfaceOwner::Preview, &frame));
        assert_eq!(surface.dimensions(), (8, 6));
        assert!(!surface.draw_frame(SurfaceOwner::Recording, &frame));
        assert_eq!(surface.generation(), 1);
    }

    #[test]
    fn test_claim_supersedes_preview_until_dropped() {
        let surface = SharedSurface::new(2, 2);
        let frame = RgbaImage::from_pixel(2, 2, Rgba([9, 9, 9, 255]));
        {
            let claim = surface.claim_recording().unwrap();
            assert!(surface.claim_recording().is_none(), "claims are exclusive");
            assert_eq!(surface.owner(), SurfaceOwner::Recording);
            assert!(!surface.draw_frame(SurfaceOwner::Preview, &frame));
            assert!(claim.draw(&frame));
        }
        assert_eq!(surface.owner(), SurfaceOwner::Preview);
        assert!(surface.draw_frame(SurfaceOwner::Preview, &frame));
        assert_eq!(surface.snapshot().get_pixel(1, 1), &Rgba([9, 9, 9, 255]));
    }

    #[test]
    fn test_clear_fills_canvas() {
        let surface = SharedSurface::new(3, 3);
        assert!(surface.clear(SurfaceOwner::Preview, Rgba([255, 0, 0, 255])));
        assert!(surface
            .snapshot()
            .pixels()
            .all(|px| *px == Rgba([255, 0, 0, 255])));
    }
}
