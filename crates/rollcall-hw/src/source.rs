//! Frame sources driving an attendance session.

use crate::camera::CameraError;
use crate::frame::Frame;
use std::path::{Path, PathBuf};

/// Something that yields frames one at a time.
pub trait FrameSource {
    /// Next frame, or `Ok(None)` once the source is exhausted.
    /// An `Err` is a read failure; callers do not retry.
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError>;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        (**self).next_frame()
    }
}

/// Replays image files as a finite frame stream, each file `repeat` times.
pub struct StillImages {
    paths: Vec<PathBuf>,
    repeat: usize,
    index: usize,
    emitted: usize,
    current: Option<Frame>,
    sequence: u32,
}

impl StillImages {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            repeat: 1,
            index: 0,
            emitted: 0,
            current: None,
            sequence: 0,
        }
    }

    /// All `.jpg`/`.jpeg`/`.png` files in `dir`, sorted by file name.
    pub fn from_dir(dir: &Path) -> Result<Self, CameraError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| CameraError::DeviceNotFound(format!("{}: {e}", dir.display())))?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| is_image(p))
            .collect();
        paths.sort();

        tracing::info!(dir = %dir.display(), images = paths.len(), "still image source");
        Ok(Self::new(paths))
    }

    /// Emit every image `repeat` times (at least once).
    pub fn with_repeat(mut self, repeat: usize) -> Self {
        self.repeat = repeat.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for StillImages {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        if self.emitted >= self.repeat {
            self.current = None;
            self.emitted = 0;
            self.index += 1;
        }

        if self.current.is_none() {
            let Some(path) = self.paths.get(self.index) else {
                return Ok(None);
            };
            let image = image::open(path)
                .map_err(|e| CameraError::CaptureFailed(format!("{}: {e}", path.display())))?
                .to_rgb8();
            self.current = Some(Frame::new(image, 0));
        }

        self.emitted += 1;
        self.sequence = self.sequence.wrapping_add(1);
        Ok(self.current.as_ref().map(|frame| Frame {
            image: frame.image.clone(),
            sequence: self.sequence,
            timestamp: std::time::Instant::now(),
        }))
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false)
}
