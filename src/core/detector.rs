use crate::common::{Config, GateError, Result};
use crate::common::config::{DetectorConfig, PerformanceConfig};
use image::{imageops::FilterType, DynamicImage, GrayImage};
use ndarray::{Array4, CowArray};
use ort::{Environment, GraphOptimizationLevel, Session, SessionBuilder, Value};
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

/// Boxes narrower or shorter than this (in model input pixels) are noise.
const MIN_BOX_SIDE: f32 = 10.0;
/// Candidates below this never reach NMS.
const PRE_NMS_CONFIDENCE: f32 = 0.001;
const MAX_FACES: usize = 5;
/// YOLOv8-face rows: 4 box values, 1 score, then 5 keypoints of (x, y, visibility).
const KEYPOINT_COUNT: usize = 5;
const KEYPOINT_ROW_LEN: usize = 5 + KEYPOINT_COUNT * 3;

#[derive(Debug, Clone, PartialEq)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    /// Flattened (x, y) pairs when the model emits keypoints.
    pub keypoints: Option<Vec<f32>>,
}

impl FaceBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Self {
        Self { x1, y1, x2, y2, confidence, keypoints: None }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    fn scale(&mut self, sx: f32, sy: f32) {
        self.x1 *= sx;
        self.x2 *= sx;
        self.y1 *= sy;
        self.y2 *= sy;
        if let Some(points) = &mut self.keypoints {
            for pair in points.chunks_mut(2) {
                pair[0] *= sx;
                if pair.len() > 1 {
                    pair[1] *= sy;
                }
            }
        }
    }
}

pub(crate) fn build_session(name: &str, model_path: &Path, performance: &PerformanceConfig) -> Result<(Session, Arc<Environment>)> {
    let environment = Arc::new(
        Environment::builder()
            .with_name(name)
            .build()
            .map_err(|e| GateError::Model(format!("Failed to create environment: {}", e)))?,
    );

    if !model_path.exists() {
        return Err(GateError::Model(format!("Model not found at: {:?}", model_path)));
    }

    let opt_level = match performance.optimization_level {
        0 => GraphOptimizationLevel::Disable,
        1 => GraphOptimizationLevel::Level1,
        2 => GraphOptimizationLevel::Level2,
        _ => GraphOptimizationLevel::Level3,
    };
    let session = SessionBuilder::new(&environment)?
        .with_optimization_level(opt_level)?
        .with_model_from_file(model_path)?;

    Ok((session, environment))
}

pub struct FaceDetector {
    session: Session,
    _environment: Arc<Environment>,
    config: DetectorConfig,
}

impl FaceDetector {
    pub fn new(config: &Config) -> Result<Self> {
        let (session, environment) =
            build_session("face_detector", &config.models.detector_path, &config.performance)?;
        tracing::info!("Loaded face detector from {:?}", config.models.detector_path);

        Ok(Self {
            session,
            _environment: environment,
            config: config.detector.clone(),
        })
    }

    /// Faces in `image`, best first, in original image coordinates.
    pub fn detect(&self, image: &GrayImage) -> Result<Vec<FaceBox>> {
        let (orig_width, orig_height) = (image.width() as f32, image.height() as f32);
        let (input_width, input_height) = (self.config.input_width, self.config.input_height);

        let input = if image.width() == input_width && image.height() == input_height {
            image_to_array(image)
        } else {
            let resized = DynamicImage::ImageLuma8(image.clone())
                .resize_exact(input_width, input_height, FilterType::Nearest)
                .to_luma8();
            image_to_array(&resized)
        };

        let cow_array = CowArray::from(input.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let Some(first) = outputs.first() else {
            return Ok(Vec::new());
        };
        let tensor = first.try_extract::<f32>()?;
        let view = tensor.view();
        let shape = view.shape().to_vec();
        let data: Vec<f32> = view.iter().copied().collect();

        let mut faces = decode_predictions(&data, &shape, &self.config);
        let sx = orig_width / input_width as f32;
        let sy = orig_height / input_height as f32;
        for face in &mut faces {
            face.scale(sx, sy);
        }

        tracing::debug!(faces = faces.len(), "face detection complete");
        Ok(faces)
    }
}

fn image_to_array(gray: &GrayImage) -> Array4<f32> {
    let (width, height) = (gray.width() as usize, gray.height() as usize);
    let mut array = Array4::<f32>::zeros((1, 3, height, width));
    let norm_factor = 1.0 / 255.0;

    // The detector expects three channels; replicate luma into each
    for (x, y, pixel) in gray.enumerate_pixels() {
        let value = pixel[0] as f32 * norm_factor;
        for channel in 0..3 {
            array[[0, channel, y as usize, x as usize]] = value;
        }
    }
    array
}

/// Decodes raw YOLO output, either `[1, N, C]` or transposed `[1, C, N]`,
/// into boxes in model input coordinates, then runs NMS and the confidence
/// cut.
pub fn decode_predictions(data: &[f32], shape: &[usize], config: &DetectorConfig) -> Vec<FaceBox> {
    let (count, row_len, transposed) = match shape {
        [_, a, b] if b > a && *a <= KEYPOINT_ROW_LEN => (*b, *a, true),
        [_, a, b] => (*a, *b, false),
        [a, b] => (*a, *b, false),
        _ => {
            tracing::warn!("Unexpected detector output shape: {:?}", shape);
            return Vec::new();
        }
    };
    if row_len < 4 || data.len() < count * row_len {
        tracing::warn!("Detector output too short for shape {:?}", shape);
        return Vec::new();
    }

    let value = |i: usize, field: usize| {
        if transposed { data[field * count + i] } else { data[i * row_len + field] }
    };
    let (input_w, input_h) = (config.input_width as f32, config.input_height as f32);

    let mut faces = Vec::new();
    for i in 0..count {
        let confidence = if row_len > 4 { value(i, 4) } else { 0.0 };
        if confidence <= PRE_NMS_CONFIDENCE {
            continue;
        }

        let (cx, cy, w, h) = (value(i, 0), value(i, 1), value(i, 2), value(i, 3));
        // Normalised outputs are scaled up to pixels, per axis
        let normalised = cx <= 1.0 && cy <= 1.0 && w <= 1.0 && h <= 1.0;
        let (sx, sy) = if normalised { (input_w, input_h) } else { (1.0, 1.0) };
        let (cx, cy, w, h) = (cx * sx, cy * sy, w * sx, h * sy);

        let x1 = (cx - w / 2.0).max(0.0);
        let y1 = (cy - h / 2.0).max(0.0);
        let x2 = (cx + w / 2.0).min(input_w);
        let y2 = (cy + h / 2.0).min(input_h);
        if x2 - x1 <= MIN_BOX_SIDE || y2 - y1 <= MIN_BOX_SIDE {
            continue;
        }

        let keypoints = (row_len >= KEYPOINT_ROW_LEN).then(|| {
            (0..KEYPOINT_COUNT)
                .flat_map(|k| [value(i, 5 + k * 3) * sx, value(i, 6 + k * 3) * sy])
                .collect()
        });

        faces.push(FaceBox { x1, y1, x2, y2, confidence, keypoints });
    }

    let mut faces = apply_nms(faces, config.nms_iou_threshold);
    faces.retain(|face| face.confidence >= config.detection_confidence);
    faces.truncate(MAX_FACES);
    faces
}

/// Greedy non-maximum suppression; output is sorted by confidence.
pub fn apply_nms(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal));

    let mut keep: Vec<FaceBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|kept| calculate_iou(kept, &candidate) < iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

pub fn calculate_iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width() * a.height() + b.width() * b.height() - intersection;

    if union > 0.0 { intersection / union } else { 0.0 }
}
