use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use imageproc::gradients::sobel_gradients;
use std::collections::VecDeque;
use std::sync::Arc;

/// A single grayscale frame pulled from a video source.
#[derive(Debug, Clone)]
pub struct Frame {
    sequence: u64,
    image: GrayImage,
}

impl Frame {
    pub fn new(sequence: u64, image: GrayImage) -> Self {
        Self { sequence, image }
    }

    pub fn from_dynamic(sequence: u64, image: &DynamicImage) -> Self {
        match image {
            DynamicImage::ImageLuma8(gray) => Self::new(sequence, gray.clone()),
            _ => Self::new(sequence, image.to_luma8()),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Square downsample used by the temporal signals so frames of any
    /// resolution are compared on the same grid.
    pub fn analysis_view(&self, size: u32) -> GrayImage {
        if self.image.width() == size && self.image.height() == size {
            return self.image.clone();
        }
        imageops::resize(&self.image, size, size, FilterType::Triangle)
    }
}

/// Bounded ring buffer of the most recent frames of one capture session.
#[derive(Debug, Clone)]
pub struct FrameHistory {
    frames: VecDeque<Arc<Frame>>,
    capacity: usize,
}

impl FrameHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a frame, evicting the oldest one when full.
    pub fn push(&mut self, frame: Arc<Frame>) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&Arc<Frame>> {
        self.frames.back()
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Arc<Frame>> + '_ {
        self.frames.iter()
    }

    /// Up to `count` frames, newest first.
    pub fn recent(&self, count: usize) -> impl Iterator<Item = &Arc<Frame>> + '_ {
        self.frames.iter().rev().take(count)
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

/// Mean absolute per-pixel luma difference on the 0-255 scale.
pub fn mean_abs_diff(a: &GrayImage, b: &GrayImage) -> f32 {
    if a.dimensions() != b.dimensions() {
        return f32::MAX;
    }
    let pixels = a.as_raw().len();
    if pixels == 0 {
        return 0.0;
    }
    let total: u64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw().iter())
        .map(|(&x, &y)| (x as i16 - y as i16).unsigned_abs() as u64)
        .sum();
    total as f32 / pixels as f32
}

/// Mean Sobel gradient magnitude. Flat surfaces (blank screens, blurred
/// prints) score near zero.
pub fn texture_energy(image: &GrayImage) -> f32 {
    if image.width() < 3 || image.height() < 3 {
        return 0.0;
    }
    let gradients = sobel_gradients(image);
    let raw = gradients.as_raw();
    let total: u64 = raw.iter().map(|&g| g as u64).sum();
    total as f32 / raw.len() as f32
}

pub fn mean_luma(image: &GrayImage) -> f32 {
    let raw = image.as_raw();
    if raw.is_empty() {
        return 0.0;
    }
    let total: u64 = raw.iter().map(|&p| p as u64).sum();
    total as f32 / raw.len() as f32
}
