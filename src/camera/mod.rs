#[cfg(feature = "camera")]
pub mod v4l2;

#[cfg(feature = "camera")]
pub use v4l2::V4lCamera;

use crate::common::{GateError, Result};
use crate::core::capabilities::VideoFrameSource;
use crate::core::frame::Frame;
use std::fs;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Replays still images from a directory in file-name order, one per
/// `current_frame` call. Used for offline enrolment and for tests.
pub struct ImageDirSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    acquired: bool,
}

impl ImageDirSource {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(GateError::Camera(format!("Frame directory not found: {:?}", dir)));
        }

        let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map_or(false, |ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(GateError::Camera(format!("No PNG or JPEG frames in {:?}", dir)));
        }
        tracing::debug!("Frame directory {:?} holds {} images", dir, files.len());

        Ok(Self { dir, files, cursor: 0, acquired: false })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.files.len() - self.cursor
    }
}

impl VideoFrameSource for ImageDirSource {
    fn acquire(&mut self) -> Result<()> {
        if self.acquired {
            return Err(GateError::Camera(format!("{:?} is already in use", self.dir)));
        }
        self.acquired = true;
        Ok(())
    }

    fn current_frame(&mut self) -> Result<Frame> {
        if !self.acquired {
            return Err(GateError::Camera("frame source not acquired".into()));
        }
        let Some(path) = self.files.get(self.cursor) else {
            return Err(GateError::Camera(format!(
                "Frame directory {:?} exhausted after {} images", self.dir, self.files.len()
            )));
        };

        let image = image::open(path)?;
        self.cursor += 1;
        Ok(Frame::from_dynamic(self.cursor as u64, &image))
    }

    fn release(&mut self) {
        self.acquired = false;
    }
}
