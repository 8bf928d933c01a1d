use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::common::error::{GateError, Result};
use crate::core::orchestrator::{MIN_SAMPLE_INTERVAL, REQUIRED_SAMPLES};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub anti_spoofing: AntiSpoofingConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub models: ModelConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub recognizer: RecognizerConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CaptureConfig {
    #[serde(default = "default_sample_interval")]
    pub sample_interval_ms: u64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_sample_interval() -> u64 {
    MIN_SAMPLE_INTERVAL.as_millis() as u64
}

fn default_history_capacity() -> usize {
    15
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl CaptureConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LivenessConfig {
    /// Mean absolute luma difference (0-255) below which consecutive frames count as static.
    #[serde(default = "default_min_motion")]
    pub min_motion: f32,
    /// Mean Sobel gradient magnitude below which a frame looks like a flat surface.
    #[serde(default = "default_min_texture")]
    pub min_texture: f32,
    #[serde(default = "default_analysis_size")]
    pub analysis_size: u32,
}

fn default_min_motion() -> f32 {
    1.0
}

fn default_min_texture() -> f32 {
    8.0
}

fn default_analysis_size() -> u32 {
    64
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            min_motion: default_min_motion(),
            min_texture: default_min_texture(),
            analysis_size: default_analysis_size(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AntiSpoofingConfig {
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    #[serde(default = "default_check_floor")]
    pub check_floor: f32,
    #[serde(default = "default_min_frames")]
    pub min_frames: usize,
    #[serde(default = "default_min_motion")]
    pub min_motion: f32,
    #[serde(default = "default_min_texture")]
    pub min_texture: f32,
    /// Two frames closer than this (mean absolute luma difference) are treated as the same frame.
    #[serde(default = "default_repeat_tolerance")]
    pub repeat_tolerance: f32,
    #[serde(default = "default_max_luminance_jitter")]
    pub max_luminance_jitter: f32,
    #[serde(default = "default_analysis_size")]
    pub analysis_size: u32,
}

fn default_min_score() -> f32 {
    0.7
}

fn default_check_floor() -> f32 {
    0.5
}

fn default_min_frames() -> usize {
    REQUIRED_SAMPLES
}

fn default_repeat_tolerance() -> f32 {
    0.5
}

fn default_max_luminance_jitter() -> f32 {
    25.0
}

impl Default for AntiSpoofingConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            check_floor: default_check_floor(),
            min_frames: default_min_frames(),
            min_motion: default_min_motion(),
            min_texture: default_min_texture(),
            repeat_tolerance: default_repeat_tolerance(),
            max_luminance_jitter: default_max_luminance_jitter(),
            analysis_size: default_analysis_size(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MatcherConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
}

fn default_similarity_threshold() -> f32 {
    0.75
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self { similarity_threshold: default_similarity_threshold() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "default_extraction_timeout")]
    pub timeout_ms: u64,
}

fn default_workers() -> usize {
    2
}

fn default_queue_depth() -> usize {
    8
}

fn default_extraction_timeout() -> u64 {
    5000
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_depth: default_queue_depth(),
            timeout_ms: default_extraction_timeout(),
        }
    }
}

impl ExtractionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default)]
    pub device_index: u32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: u32,
    #[serde(default = "default_warmup_delay")]
    pub warmup_delay_ms: u64,
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

fn default_warmup_frames() -> u32 {
    5
}

fn default_warmup_delay() -> u64 {
    50
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: default_width(),
            height: default_height(),
            warmup_frames: default_warmup_frames(),
            warmup_delay_ms: default_warmup_delay(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_detector_path")]
    pub detector_path: PathBuf,
    #[serde(default = "default_recognizer_path")]
    pub recognizer_path: PathBuf,
}

fn default_detector_path() -> PathBuf {
    PathBuf::from("models/face_detector.onnx")
}

fn default_recognizer_path() -> PathBuf {
    PathBuf::from("models/face_recognizer.onnx")
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            detector_path: default_detector_path(),
            recognizer_path: default_recognizer_path(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_input")]
    pub input_width: u32,
    #[serde(default = "default_detector_input")]
    pub input_height: u32,
    #[serde(default = "default_detection_confidence")]
    pub detection_confidence: f32,
    #[serde(default = "default_nms_iou")]
    pub nms_iou_threshold: f32,
}

fn default_detector_input() -> u32 {
    640
}

fn default_detection_confidence() -> f32 {
    0.5
}

fn default_nms_iou() -> f32 {
    0.45
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_width: default_detector_input(),
            input_height: default_detector_input(),
            detection_confidence: default_detection_confidence(),
            nms_iou_threshold: default_nms_iou(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecognizerConfig {
    #[serde(default = "default_recognizer_input")]
    pub input_size: u32,
    #[serde(default = "default_normalization")]
    pub normalization_value: f32,
}

fn default_recognizer_input() -> u32 {
    112
}

fn default_normalization() -> f32 {
    127.5
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            input_size: default_recognizer_input(),
            normalization_value: default_normalization(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PerformanceConfig {
    #[serde(default = "default_optimization_level")]
    pub optimization_level: u32,
}

fn default_optimization_level() -> u32 {
    3
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self { optimization_level: default_optimization_level() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StorageConfig {
    /// Overrides the platform data directory for enrolled templates.
    #[serde(default)]
    pub templates_dir: Option<PathBuf>,
}

fn invalid(message: String) -> GateError {
    GateError::Config(message)
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(invalid(format!("{} must be between 0.0 and 1.0, got {}", name, value)));
    }
    Ok(())
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from_path(Path::new("configs/votergate.toml"))
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(GateError::Other(anyhow::anyhow!(
                "Config file not found: {}. Please create it from the example.", path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&contents)?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| invalid(format!("Config parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capture.sample_interval() < MIN_SAMPLE_INTERVAL {
            return Err(invalid(format!(
                "Sample interval must be at least {} ms, got {}",
                MIN_SAMPLE_INTERVAL.as_millis(), self.capture.sample_interval_ms
            )));
        }
        if self.capture.history_capacity < REQUIRED_SAMPLES || self.capture.history_capacity > 120 {
            return Err(invalid(format!(
                "History capacity must be between {} and 120 frames, got {}",
                REQUIRED_SAMPLES, self.capture.history_capacity
            )));
        }

        if self.liveness.min_motion < 0.0 || self.liveness.min_texture < 0.0 {
            return Err(invalid("Liveness thresholds must not be negative".into()));
        }
        if self.liveness.analysis_size < 8 || self.liveness.analysis_size > 512 {
            return Err(invalid(format!(
                "Liveness analysis size must be between 8 and 512, got {}",
                self.liveness.analysis_size
            )));
        }

        check_unit("Anti-spoofing min score", self.anti_spoofing.min_score)?;
        check_unit("Anti-spoofing check floor", self.anti_spoofing.check_floor)?;
        if self.anti_spoofing.min_frames < 2 {
            return Err(invalid(format!(
                "Anti-spoofing needs at least 2 frames, got {}", self.anti_spoofing.min_frames
            )));
        }
        if self.anti_spoofing.max_luminance_jitter <= 0.0 {
            return Err(invalid("Luminance jitter bound must be positive".into()));
        }
        if self.anti_spoofing.analysis_size < 8 || self.anti_spoofing.analysis_size > 512 {
            return Err(invalid(format!(
                "Anti-spoofing analysis size must be between 8 and 512, got {}",
                self.anti_spoofing.analysis_size
            )));
        }

        check_unit("Similarity threshold", self.matcher.similarity_threshold)?;

        if self.extraction.workers == 0 || self.extraction.workers > 32 {
            return Err(invalid(format!(
                "Extraction workers must be between 1 and 32, got {}", self.extraction.workers
            )));
        }
        if self.extraction.queue_depth == 0 {
            return Err(invalid("Extraction queue depth must be at least 1".into()));
        }
        if self.extraction.timeout_ms == 0 || self.extraction.timeout_ms > 60_000 {
            return Err(invalid(format!(
                "Extraction timeout must be between 1 and 60000 ms, got {}",
                self.extraction.timeout_ms
            )));
        }

        if self.camera.width == 0 || self.camera.width > 4096 {
            return Err(invalid(format!(
                "Camera width must be between 1 and 4096, got {}", self.camera.width
            )));
        }
        if self.camera.height == 0 || self.camera.height > 4096 {
            return Err(invalid(format!(
                "Camera height must be between 1 and 4096, got {}", self.camera.height
            )));
        }

        check_unit("Detection confidence", self.detector.detection_confidence)?;
        check_unit("NMS IoU threshold", self.detector.nms_iou_threshold)?;
        if self.detector.input_width == 0 || self.detector.input_width > 4096
            || self.detector.input_height == 0 || self.detector.input_height > 4096
        {
            return Err(invalid(format!(
                "Detector input must be between 1 and 4096 pixels, got {}x{}",
                self.detector.input_width, self.detector.input_height
            )));
        }
        if self.recognizer.input_size == 0 || self.recognizer.input_size > 1024 {
            return Err(invalid(format!(
                "Recognizer input size must be between 1 and 1024, got {}",
                self.recognizer.input_size
            )));
        }
        if self.recognizer.normalization_value <= 0.0 {
            return Err(invalid("Recognizer normalization value must be positive".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.capture.sample_interval_ms, 800);
        assert_eq!(config.extraction.workers, 2);
        assert!((config.matcher.similarity_threshold - 0.75).abs() < f32::EPSILON);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config = Config::from_toml("[matcher]\nsimilarity_threshold = 0.9\n").unwrap();
        assert!((config.matcher.similarity_threshold - 0.9).abs() < f32::EPSILON);
        assert_eq!(config.capture.history_capacity, 15);
    }

    #[test]
    fn sample_interval_cannot_drop_below_minimum() {
        let err = Config::from_toml("[capture]\nsample_interval_ms = 200\n").unwrap_err();
        assert!(err.to_string().contains("at least 800 ms"));
    }

    #[test]
    fn history_must_hold_every_sample() {
        let mut config = Config::default();
        config.capture.history_capacity = REQUIRED_SAMPLES - 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn threshold_out_of_range_is_rejected() {
        let mut config = Config::default();
        config.matcher.similarity_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut config = Config::default();
        config.extraction.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_missing_path_fails() {
        let err = Config::load_from_path(Path::new("/nonexistent/votergate.toml")).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn shipped_example_config_is_valid() {
        let config = Config::from_toml(include_str!("../../configs/votergate.toml")).unwrap();
        assert_eq!(config.anti_spoofing.min_frames, REQUIRED_SAMPLES);
        assert!(config.storage.templates_dir.is_none());
    }
}
