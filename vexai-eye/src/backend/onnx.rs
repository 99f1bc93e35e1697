//! ONNX Runtime backends (CUDA/TensorRT float32, CPU int8)

use super::{
    BackendCapability, BackendKind, BackendProbe, InferenceBackend, InputTensor, Quantization,
    RawTensor, TensorData, TensorType,
};
use crate::config::BackendConfig;
use crate::error::BackendError;
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider, TensorRTExecutionProvider,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::PathBuf;
use tracing::{debug, info};

/// Availability check for one backend kind against the configured model files
pub struct OrtProbe {
    kind: BackendKind,
    config: BackendConfig,
}

impl OrtProbe {
    pub fn new(kind: BackendKind, config: BackendConfig) -> Self {
        Self { kind, config }
    }

    /// One probe per backend kind
    pub fn all(config: &BackendConfig) -> Vec<OrtProbe> {
        vec![
            OrtProbe::new(BackendKind::Gpu, config.clone()),
            OrtProbe::new(BackendKind::Quantized, config.clone()),
        ]
    }

    fn model_path(&self) -> PathBuf {
        let file = match self.kind {
            BackendKind::Gpu => &self.config.gpu_model,
            BackendKind::Quantized => &self.config.quantized_model,
        };
        self.config.model_dir.join(file)
    }
}

impl BackendProbe for OrtProbe {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn probe(&self) -> Result<BackendCapability, String> {
        let model_path = self.model_path();
        if !model_path.is_file() {
            return Err(format!("model not found at {}", model_path.display()));
        }

        match self.kind {
            BackendKind::Gpu => {
                let cuda = CUDAExecutionProvider::default();
                match cuda.is_available() {
                    Ok(true) => {}
                    Ok(false) => return Err("CUDA execution provider not available".to_string()),
                    Err(e) => return Err(format!("CUDA check failed: {}", e)),
                }

                Ok(BackendCapability {
                    kind: BackendKind::Gpu,
                    input: TensorType::Float32,
                    output_quantization: None,
                    model_path,
                    device_id: self.config.device_id,
                })
            }
            BackendKind::Quantized => {
                let output_quantization = (self.config.output_scale != 0.0).then_some(Quantization {
                    scale: self.config.output_scale,
                    zero_point: self.config.output_zero_point,
                });

                Ok(BackendCapability {
                    kind: BackendKind::Quantized,
                    input: TensorType::Int8(Quantization {
                        scale: self.config.input_scale,
                        zero_point: self.config.input_zero_point,
                    }),
                    output_quantization,
                    model_path,
                    device_id: self.config.device_id,
                })
            }
        }
    }
}

/// ONNX Runtime session bound to the execution providers of its capability
pub struct OrtBackend {
    capability: BackendCapability,
    session: Session,
}

impl OrtBackend {
    pub fn new(capability: BackendCapability) -> Result<Self, BackendError> {
        let builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

        let builder = match capability.kind {
            BackendKind::Gpu => builder.with_execution_providers([
                TensorRTExecutionProvider::default()
                    .with_device_id(capability.device_id)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(capability.device_id)
                    .build(),
            ])?,
            BackendKind::Quantized => {
                builder.with_execution_providers([CPUExecutionProvider::default().build()])?
            }
        };

        let session = builder.commit_from_file(&capability.model_path).map_err(|e| {
            BackendError::ModelLoad(format!("{}: {}", capability.model_path.display(), e))
        })?;

        info!(
            "{} backend loaded {} ({} outputs)",
            capability.kind,
            capability.model_path.display(),
            session.outputs.len()
        );

        Ok(Self { capability, session })
    }
}

fn extract_output(
    capability: &BackendCapability,
    value: &ort::value::DynValue,
) -> Result<RawTensor, BackendError> {
    if let Ok((shape, data)) = value.try_extract_tensor::<f32>() {
        return Ok(RawTensor::new(dims(shape), data.to_vec()));
    }

    let (shape, data) = value
        .try_extract_tensor::<i8>()
        .map_err(|e| BackendError::Inference(format!("unsupported output type: {}", e)))?;
    let quant = capability
        .output_quantization
        .unwrap_or(Quantization { scale: 0.0, zero_point: 0 });
    Ok(RawTensor::new(
        dims(shape),
        data.iter().map(|&q| quant.dequantize(q)).collect(),
    ))
}

fn dims(shape: &[i64]) -> Vec<usize> {
    shape.iter().map(|&d| d.max(0) as usize).collect()
}

impl InferenceBackend for OrtBackend {
    fn capability(&self) -> &BackendCapability {
        &self.capability
    }

    fn infer(&mut self, input: &InputTensor) -> Result<Vec<RawTensor>, BackendError> {
        let value = match (&input.data, &self.capability.input) {
            (TensorData::F32(data), TensorType::Float32) => Tensor::from_array((input.shape, data.clone()))
                .map_err(|e| BackendError::AllocationFailed(e.to_string()))?
                .into_dyn(),
            (TensorData::I8(data), TensorType::Int8(_)) => Tensor::from_array((input.shape, data.clone()))
                .map_err(|e| BackendError::AllocationFailed(e.to_string()))?
                .into_dyn(),
            _ => {
                return Err(BackendError::Inference(format!(
                    "input dtype does not match {:?} backend",
                    self.capability.kind
                )))
            }
        };

        let outputs = self
            .session
            .run(ort::inputs![value])
            .map_err(|e| BackendError::Inference(e.to_string()))?;

        let mut tensors = Vec::with_capacity(outputs.len());
        for (name, output) in outputs.iter() {
            let tensor = extract_output(&self.capability, &output)?;
            debug!("output {} shape {:?}", name, tensor.shape);
            tensors.push(tensor);
        }
        Ok(tensors)
    }
}
