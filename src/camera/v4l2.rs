use crate::common::config::CameraConfig;
use crate::common::{GateError, Result};
use crate::core::capabilities::VideoFrameSource;
use crate::core::frame::Frame;
use image::{GrayImage, ImageBuffer, Luma};
use std::time::Duration;
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

const STREAM_BUFFERS: u32 = 4;

/// V4L2 capture device. The device node is opened on `acquire` and closed on
/// `release`; every frame comes from a fresh short-lived stream so the
/// camera is not held busy between samples.
pub struct V4lCamera {
    config: CameraConfig,
    device: Option<Device>,
    format: Option<v4l::Format>,
    sequence: u64,
}

impl V4lCamera {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            config: config.clone(),
            device: None,
            format: None,
            sequence: 0,
        }
    }

    fn open(&self) -> Result<(Device, v4l::Format)> {
        let index = self.config.device_index;
        let device = Device::new(index as usize)
            .map_err(|e| GateError::Camera(format!("Failed to open camera {}: {}", index, e)))?;

        let caps = device.query_caps()
            .map_err(|e| GateError::Camera(format!("Failed to query capabilities: {}", e)))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            tracing::warn!("Device {} ({}) may not support standard video capture", index, caps.card);
        }

        let mut fmt = device.format()
            .map_err(|e| GateError::Camera(format!("Failed to get format: {}", e)))?;
        fmt.width = self.config.width;
        fmt.height = self.config.height;
        if fmt.fourcc != FourCC::new(b"GREY") && fmt.fourcc != FourCC::new(b"YUYV") {
            fmt.fourcc = FourCC::new(b"MJPG");
        }
        if let Err(e) = device.set_format(&fmt) {
            tracing::warn!("Could not set exact format: {}. Using device defaults.", e);
        }

        let actual = device.format()
            .map_err(|e| GateError::Camera(format!("Failed to get final format: {}", e)))?;
        if actual.width != self.config.width || actual.height != self.config.height {
            tracing::warn!(
                "Camera resolution {}x{} differs from requested {}x{}",
                actual.width, actual.height, self.config.width, self.config.height
            );
        }
        tracing::info!("Camera {} ready: {}x{} {}", index, actual.width, actual.height, actual.fourcc);

        Ok((device, actual))
    }
}

impl VideoFrameSource for V4lCamera {
    fn acquire(&mut self) -> Result<()> {
        if self.device.is_some() {
            return Err(GateError::Camera("camera already acquired".into()));
        }
        let (mut device, format) = self.open()?;

        // Let exposure and any IR emitter settle
        {
            let mut stream = v4l::io::mmap::Stream::with_buffers(&mut device, Type::VideoCapture, STREAM_BUFFERS)
                .map_err(|e| GateError::Camera(format!("Failed to create stream: {}", e)))?;
            for i in 0..self.config.warmup_frames {
                stream.next()
                    .map_err(|e| GateError::Camera(format!("Failed to capture warmup frame {}: {}", i, e)))?;
                std::thread::sleep(Duration::from_millis(self.config.warmup_delay_ms));
            }
        }

        self.device = Some(device);
        self.format = Some(format);
        Ok(())
    }

    fn current_frame(&mut self) -> Result<Frame> {
        let (Some(device), Some(format)) = (self.device.as_mut(), self.format.as_ref()) else {
            return Err(GateError::Camera("camera not acquired".into()));
        };

        let mut stream = v4l::io::mmap::Stream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| GateError::Camera(format!("Failed to create stream: {}", e)))?;
        // The first buffer of a new stream can be stale
        stream.next().map_err(|e| GateError::Camera(format!("Failed to capture: {}", e)))?;
        let (buf, _meta) = stream.next()
            .map_err(|e| GateError::Camera(format!("Failed to capture: {}", e)))?;

        let image = decode_buffer(buf, format)?;
        self.sequence += 1;
        Ok(Frame::new(self.sequence, image))
    }

    fn release(&mut self) {
        if self.device.take().is_some() {
            tracing::debug!("Camera {} released", self.config.device_index);
        }
        self.format = None;
    }
}

fn decode_buffer(data: &[u8], format: &v4l::Format) -> Result<GrayImage> {
    let (width, height) = (format.width, format.height);
    let pixels = (width * height) as usize;

    match &format.fourcc.repr {
        b"GREY" => ImageBuffer::<Luma<u8>, _>::from_raw(width, height, data.get(..pixels).unwrap_or(data).to_vec())
            .ok_or_else(|| GateError::Camera("Failed to create grayscale image buffer".into())),
        // Y0 U Y1 V: luma is every other byte
        b"YUYV" => {
            let luma: Vec<u8> = data.iter().step_by(2).take(pixels).copied().collect();
            ImageBuffer::<Luma<u8>, _>::from_raw(width, height, luma)
                .ok_or_else(|| GateError::Camera("Truncated YUYV frame".into()))
        }
        b"MJPG" => Ok(image::load_from_memory(data)?.to_luma8()),
        other => Err(GateError::Camera(format!("Unsupported format: {}", String::from_utf8_lossy(other)))),
    }
}
