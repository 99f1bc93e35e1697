//! Error types for vexai-eye

use std::time::Duration;
use thiserror::Error;

/// Failures that prevent the pipeline from ever entering its loop
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("No inference backend available (tried: {tried})")]
    NoBackendAvailable { tried: String },

    #[error("Camera unavailable: {0}")]
    Camera(#[from] CameraError),

    #[error("Backend initialization failed: {0}")]
    Backend(#[from] BackendError),

    #[error("Detector configuration rejected: {0}")]
    Detector(#[from] DetectorError),

    #[error("Configuration error: {0}")]
    Config(String),
}

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Camera unavailable: {0}")]
    Unavailable(String),

    #[error("No frame pair within {0:?}")]
    Timeout(Duration),

    #[error("Bad frame pair: {0}")]
    BadFrame(String),

    #[error("Camera disconnected: {0}")]
    Disconnected(String),

    #[error("Invalid camera profile: {0}")]
    Profile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl CameraError {
    /// Whether the loop can continue with the next capture cycle
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CameraError::Timeout(_) | CameraError::BadFrame(_))
    }
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Buffer allocation failed: {0}")]
    AllocationFailed(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Inference exceeded {0:?}")]
    Timeout(Duration),

    #[error("Backend still busy with a previous inference")]
    Busy,

    #[error("ONNX Runtime error: {0}")]
    Ort(String),
}

impl From<ort::Error> for BackendError {
    fn from(err: ort::Error) -> Self {
        BackendError::Ort(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Expected {expected} output tensors, backend returned {actual}")]
    OutputCountMismatch { expected: usize, actual: usize },

    #[error("No expected output shape has {elements} elements")]
    UnmatchedOutput { elements: usize },

    #[error("Output shapes {first:?} and {second:?} have the same element count")]
    AmbiguousOutputShapes { first: Vec<usize>, second: Vec<usize> },

    #[error("Preprocessing error: {0}")]
    Preprocess(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LocalizationError {
    #[error("Degenerate bounding box {width}x{height}")]
    DegenerateBox { width: i32, height: i32 },
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that end the pipeline loop
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Startup failed: {0}")]
    Startup(#[from] StartupError),

    #[error("Camera lost: {0}")]
    CameraLost(CameraError),

    #[error("Pipeline already stopped")]
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_error_recoverability() {
        assert!(CameraError::Timeout(Duration::from_millis(5)).is_recoverable());
        assert!(CameraError::BadFrame("short".to_string()).is_recoverable());
        assert!(!CameraError::Disconnected("usb".to_string()).is_recoverable());
        assert!(!CameraError::Unavailable("none".to_string()).is_recoverable());
    }

    #[test]
    fn test_startup_error_display() {
        let err = StartupError::NoBackendAvailable { tried: "gpu, quantized".to_string() };
        assert!(err.to_string().contains("No inference backend"));
        assert!(err.to_string().contains("gpu, quantized"));
    }

    #[test]
    fn test_startup_error_from_camera() {
        let err: StartupError = CameraError::Unavailable("no device".to_string()).into();
        match err {
            StartupError::Camera(CameraError::Unavailable(msg)) => assert_eq!(msg, "no device"),
            _ => panic!("Expected Camera error"),
        }
    }

    #[test]
    fn test_sink_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let sink_err: SinkError = io_err.into();
        match sink_err {
            SinkError::Io(_) => {}
            _ => panic!("Expected Io error"),
        }
    }
}
