//! Camera capture as a scoped resource.
//!
//! A [`CameraSession`] owns the live stream and stops it when released or
//! dropped. [`CaptureController`] holds at most one pending session per upload
//! interaction and releases it on capture, cancel, supersede and drop.

use std::path::PathBuf;

use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use platemorph_contracts::assets::ImageAsset;
use tracing::debug;

use super::normalize_bytes;
use crate::error::IngestError;

const CAPTURE_MIME: &str = "image/jpeg";
const CAPTURE_JPEG_QUALITY: u8 = 90;

pub trait CameraStream: Send {
    fn capture_frame(&mut self) -> anyhow::Result<DynamicImage>;
    fn stop(&mut self);
}

pub trait CameraDevice {
    /// Fails with [`IngestError::CameraUnavailable`] when permission is denied
    /// or there is no device.
    fn acquire(&self) -> Result<Box<dyn CameraStream>, IngestError>;
}

pub struct CameraSession {
    stream: Option<Box<dyn CameraStream>>,
}

impl CameraSession {
    pub fn open(device: &dyn CameraDevice) -> Result<Self, IngestError> {
        let stream = device.acquire()?;
        debug!("camera stream acquired");
        Ok(Self {
            stream: Some(stream),
        })
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    pub fn capture(&mut self) -> anyhow::Result<DynamicImage> {
        match self.stream.as_mut() {
            Some(stream) => stream.capture_frame(),
            None => anyhow::bail!("camera stream already released"),
        }
    }

    /// Stops the underlying stream. Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            debug!("camera stream released");
        }
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.release();
    }
}

#[derive(Default)]
pub struct CaptureController {
    session: Option<CameraSession>,
}

impl CaptureController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.session
            .as_ref()
            .map(CameraSession::is_active)
            .unwrap_or(false)
    }

    /// Starts a capture interaction, releasing any capture still pending.
    pub fn start(&mut self, device: &dyn CameraDevice) -> Result<(), IngestError> {
        self.cancel();
        self.session = Some(CameraSession::open(device)?);
        Ok(())
    }

    pub fn cancel(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.release();
        }
    }

    /// Grabs one frame and ends the interaction. The stream is released
    /// before this returns, whether or not the frame was usable.
    pub fn take_photo(&mut self) -> Result<ImageAsset, IngestError> {
        let Some(mut session) = self.session.take() else {
            return Err(IngestError::CameraUnavailable(
                "no capture in progress".to_string(),
            ));
        };
        let frame = session.capture();
        session.release();
        let frame = frame.map_err(|err| IngestError::decode("camera frame", format!("{err:#}")))?;
        encode_capture(&frame, chrono::Utc::now().timestamp_millis())
    }
}

fn encode_capture(frame: &DynamicImage, stamp_millis: i64) -> Result<ImageAsset, IngestError> {
    let name = format!("capture-{stamp_millis}.jpg");
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, CAPTURE_JPEG_QUALITY);
    encoder
        .encode_image(&DynamicImage::ImageRgb8(frame.to_rgb8()))
        .map_err(|err| IngestError::decode(&name, err))?;
    normalize_bytes(&bytes, Some(CAPTURE_MIME), &name)
}

/// Device backed by a still frame that an external capture tool keeps
/// refreshed on disk, e.g. a webcam daemon writing `/dev/shm/frame.jpg`.
#[derive(Debug, Clone)]
pub struct FrameFileCamera {
    path: PathBuf,
}

impl FrameFileCamera {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CameraDevice for FrameFileCamera {
    fn acquire(&self) -> Result<Box<dyn CameraStream>, IngestError> {
        if !self.path.is_file() {
            return Err(IngestError::CameraUnavailable(format!(
                "no frame source at {}",
                self.path.display()
            )));
        }
        Ok(Box::new(FrameFileStream {
            path: self.path.clone(),
        }))
    }
}

struct FrameFileStream {
    path: PathBuf,
}

impl CameraStream for FrameFileStream {
    fn capture_frame(&mut self) -> anyhow::Result<DynamicImage> {
        Ok(image::open(&self.path)?)
    }

    fn stop(&mut self) {}
}
