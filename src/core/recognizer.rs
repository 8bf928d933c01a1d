use crate::common::config::RecognizerConfig;
use crate::common::{Config, GateError, Result};
use crate::core::detector::{build_session, FaceBox};
use crate::core::sample::Embedding;
use image::{imageops::{self, FilterType}, GrayImage};
use ndarray::{Array4, CowArray};
use ort::{Environment, Session, Value};
use std::sync::Arc;

pub struct FaceRecognizer {
    session: Session,
    _environment: Arc<Environment>,
    config: RecognizerConfig,
}

impl FaceRecognizer {
    pub fn new(config: &Config) -> Result<Self> {
        let (session, environment) =
            build_session("face_recognizer", &config.models.recognizer_path, &config.performance)?;
        tracing::info!("Loaded face recognizer from {:?}", config.models.recognizer_path);

        Ok(Self {
            session,
            _environment: environment,
            config: config.recognizer.clone(),
        })
    }

    pub fn get_embedding(&self, image: &GrayImage, face: &FaceBox) -> Result<Embedding> {
        let input = preprocess_face(image, face, &self.config);
        let cow_array = CowArray::from(input.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;

        let outputs = self.session.run(vec![input_tensor])?;
        embedding_from_outputs(&outputs)
    }
}

fn embedding_from_outputs(outputs: &[Value<'_>]) -> Result<Embedding> {
    let Some(first) = outputs.first() else {
        return Err(GateError::Model("recognizer produced no outputs".into()));
    };
    let embedding = first.try_extract::<f32>()?.view().iter().copied().collect();
    Ok(embedding)
}

/// Crops the face, resizes it to the model input and applies ArcFace
/// normalisation on a single channel.
fn preprocess_face(image: &GrayImage, face: &FaceBox, config: &RecognizerConfig) -> Array4<f32> {
    let x = (face.x1.max(0.0) as u32).min(image.width().saturating_sub(1));
    let y = (face.y1.max(0.0) as u32).min(image.height().saturating_sub(1));
    let width = (face.width().max(1.0) as u32).min(image.width() - x).max(1);
    let height = (face.height().max(1.0) as u32).min(image.height() - y).max(1);

    let crop = imageops::crop_imm(image, x, y, width, height).to_image();
    let size = config.input_size;
    let resized = imageops::resize(&crop, size, size, FilterType::Triangle);

    let norm = config.normalization_value;
    let mut array = Array4::<f32>::zeros((1, 1, size as usize, size as usize));
    for (px, py, pixel) in resized.enumerate_pixels() {
        array[[0, 0, py as usize, px as usize]] = (pixel[0] as f32 - norm) / norm;
    }
    array
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn missing_output_is_a_model_error() {
        let err = embedding_from_outputs(&[]).unwrap_err();
        assert!(matches!(err, GateError::Model(_)));
    }

    #[test]
    fn preprocessing_maps_pixels_to_unit_range() {
        let image = GrayImage::from_fn(200, 200, |x, _| if x < 100 { Luma([0]) } else { Luma([255]) });
        let config = RecognizerConfig { input_size: 112, normalization_value: 127.5 };
        let array = preprocess_face(&image, &FaceBox::new(0.0, 0.0, 200.0, 200.0, 0.9), &config);

        assert_eq!(array.shape(), &[1, 1, 112, 112]);
        assert!((array[[0, 0, 50, 0]] + 1.0).abs() < 1e-6);
        assert!((array[[0, 0, 50, 111]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn box_outside_frame_is_clamped() {
        let image = GrayImage::from_pixel(64, 64, Luma([128]));
        let config = RecognizerConfig { input_size: 32, normalization_value: 127.5 };
        let array = preprocess_face(&image, &FaceBox::new(50.0, 50.0, 400.0, 400.0, 0.9), &config);
        assert_eq!(array.shape(), &[1, 1, 32, 32]);
    }
}
