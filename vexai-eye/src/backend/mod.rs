//! Accelerator abstraction: tensor in, raw output tensors out

pub mod onnx;

use crate::error::{BackendError, StartupError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

pub use self::onnx::{OrtBackend, OrtProbe};

/// Accelerator family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// CUDA device, float32 tensors
    Gpu,
    /// int8 quantized model
    Quantized,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Gpu => write!(f, "gpu"),
            BackendKind::Quantized => write!(f, "quantized"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gpu" | "cuda" => Ok(BackendKind::Gpu),
            "quantized" | "int8" | "tpu" => Ok(BackendKind::Quantized),
            other => Err(format!("Unknown backend '{}'", other)),
        }
    }
}

/// Affine int8 quantization parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantization {
    pub scale: f32,
    pub zero_point: i32,
}

impl Quantization {
    pub fn quantize(&self, value: f32) -> i8 {
        if self.scale == 0.0 {
            return value.round().clamp(i8::MIN as f32, i8::MAX as f32) as i8;
        }
        (value / self.scale + self.zero_point as f32)
            .round()
            .clamp(i8::MIN as f32, i8::MAX as f32) as i8
    }

    /// Identity when the scale is zero
    pub fn dequantize(&self, value: i8) -> f32 {
        if self.scale == 0.0 {
            return value as f32;
        }
        (value as i32 - self.zero_point) as f32 * self.scale
    }
}

/// Element type the backend expects on its input
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TensorType {
    Float32,
    Int8(Quantization),
}

/// Immutable description of the selected accelerator
#[derive(Debug, Clone, PartialEq)]
pub struct BackendCapability {
    pub kind: BackendKind,
    pub input: TensorType,
    /// Applied to int8 outputs; float outputs pass through untouched
    pub output_quantization: Option<Quantization>,
    pub model_path: PathBuf,
    pub device_id: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    I8(Vec<i8>),
}

/// Preprocessed network input, NHWC
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    pub shape: [usize; 4],
    pub data: TensorData,
}

impl InputTensor {
    pub fn len(&self) -> usize {
        match &self.data {
            TensorData::F32(v) => v.len(),
            TensorData::I8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One backend output, already converted to float
#[derive(Debug, Clone, PartialEq)]
pub struct RawTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl RawTensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self { shape, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A loaded model on one accelerator
pub trait InferenceBackend: Send {
    fn capability(&self) -> &BackendCapability;

    /// Run one inference. Output order is unspecified.
    fn infer(&mut self, input: &InputTensor) -> Result<Vec<RawTensor>, BackendError>;
}

/// Checks whether one accelerator family is usable on this machine
pub trait BackendProbe: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn probe(&self) -> Result<BackendCapability, String>;
}

/// Run each probe named by `policy` once, in order, and keep the first success
pub fn probe_backend(
    policy: &[BackendKind],
    probes: &[&dyn BackendProbe],
) -> Result<BackendCapability, StartupError> {
    let mut tried = Vec::new();

    for kind in policy {
        let Some(probe) = probes.iter().find(|p| p.kind() == *kind) else {
            tried.push(format!("{}: no probe", kind));
            continue;
        };

        match probe.probe() {
            Ok(capability) => {
                info!("Using {} backend ({})", kind, capability.model_path.display());
                return Ok(capability);
            }
            Err(reason) => {
                warn!("{} backend unavailable: {}", kind, reason);
                tried.push(format!("{}: {}", kind, reason));
            }
        }
    }

    Err(StartupError::NoBackendAvailable { tried: tried.join("; ") })
}

/// Load the model described by `capability` onto its accelerator
pub fn initialize(capability: BackendCapability) -> Result<Box<dyn InferenceBackend>, BackendError> {
    let backend = OrtBackend::new(capability)?;
    Ok(Box::new(backend))
}
