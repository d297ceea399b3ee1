use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use image::RgbaImage;

/// A tile's output image, shared between the engine and the host.
///
/// Clones refer to the same pixels. Every redraw bumps the revision so hosts
/// can tell a re-rendered tile from a stale one.
#[derive(Debug, Clone)]
pub struct TileSurface {
    inner: Arc<Mutex<SurfaceState>>,
}

#[derive(Debug)]
struct SurfaceState {
    image: RgbaImage,
    revision: u64,
}

impl TileSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SurfaceState {
                image: RgbaImage::new(width, height),
                revision: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SurfaceState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.lock().image.dimensions()
    }

    pub fn revision(&self) -> u64 {
        self.lock().revision
    }

    /// Copy of the current pixels.
    pub fn snapshot(&self) -> RgbaImage {
        self.lock().image.clone()
    }

    pub fn same_surface(&self, other: &TileSurface) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> image::ImageResult<()> {
        self.lock().image.save(path)
    }

    /// Replaces the pixels with a freshly rendered frame, anchored top-left.
    pub(crate) fn draw(&self, frame: &RgbaImage) {
        let mut state = self.lock();
        image::imageops::replace(&mut state.image, frame, 0, 0);
        state.revision += 1;
    }
}
