//! Detector front end: preprocessing, output re-association, decoding

pub mod yolo;

use crate::backend::{InferenceBackend, InputTensor, RawTensor, TensorData, TensorType};
use crate::config::DetectorConfig;
use crate::error::DetectorError;
use crate::types::RawDetection;
use image::imageops::{self, FilterType};
use image::RgbImage;
use tracing::debug;

pub use self::yolo::YoloDecoder;

/// Output tensor reshaped to the layout the decoder expects
#[derive(Debug, Clone, PartialEq)]
pub struct ShapedTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Decoded box in original image pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedBox {
    /// x, y (top-left), width, height
    pub bbox: (f32, f32, f32, f32),
    pub score: f32,
    pub class_id: usize,
}

/// Turns matched output tensors into boxes.
///
/// `None` or an empty vector both mean nothing was detected.
pub trait PostProcessor: Send + Sync {
    fn process(&self, outputs: &[ShapedTensor], original_size: (u32, u32)) -> Option<Vec<DecodedBox>>;
}

/// Resize to the network input and cast to the backend's element type (NHWC)
pub fn preprocess(
    image: &RgbImage,
    target_resolution: (u32, u32),
    input: &TensorType,
) -> Result<(InputTensor, (u32, u32)), DetectorError> {
    let original_size = image.dimensions();
    if original_size.0 == 0 || original_size.1 == 0 {
        return Err(DetectorError::Preprocess("empty image".to_string()));
    }

    let (width, height) = target_resolution;
    if width == 0 || height == 0 {
        return Err(DetectorError::Preprocess("target resolution cannot be zero".to_string()));
    }

    let resized = if original_size == target_resolution {
        image.clone()
    } else {
        imageops::resize(image, width, height, FilterType::Triangle)
    };

    let pixels = resized.as_raw().iter().map(|&v| v as f32 / 255.0);
    let data = match input {
        TensorType::Float32 => TensorData::F32(pixels.collect()),
        TensorType::Int8(quant) => TensorData::I8(pixels.map(|v| quant.quantize(v)).collect()),
    };

    let tensor = InputTensor {
        shape: [1, height as usize, width as usize, 3],
        data,
    };
    Ok((tensor, original_size))
}

pub struct Detector {
    input_resolution: (u32, u32),
    input: TensorType,
    expected_shapes: Vec<Vec<usize>>,
    postprocessor: Box<dyn PostProcessor>,
}

impl Detector {
    /// Fails when two expected output shapes hold the same number of elements,
    /// since outputs are told apart by size alone.
    pub fn new(
        config: &DetectorConfig,
        input: TensorType,
        postprocessor: Box<dyn PostProcessor>,
    ) -> Result<Self, DetectorError> {
        let expected_shapes = config.output_shapes.clone();
        for (i, first) in expected_shapes.iter().enumerate() {
            for second in &expected_shapes[i + 1..] {
                if element_count(first) == element_count(second) {
                    return Err(DetectorError::AmbiguousOutputShapes {
                        first: first.clone(),
                        second: second.clone(),
                    });
                }
            }
        }

        Ok(Self {
            input_resolution: config.input_resolution,
            input,
            expected_shapes,
            postprocessor,
        })
    }

    /// YOLO decoder built from the same configuration
    pub fn yolo(config: &DetectorConfig, input: TensorType) -> Result<Self, DetectorError> {
        Self::new(config, input, Box::new(YoloDecoder::from_config(config)))
    }

    pub fn preprocess(&self, image: &RgbImage) -> Result<(InputTensor, (u32, u32)), DetectorError> {
        preprocess(image, self.input_resolution, &self.input)
    }

    /// Assign each backend output to the expected shape with its element count
    pub fn match_outputs(&self, raw: Vec<RawTensor>) -> Result<Vec<ShapedTensor>, DetectorError> {
        if raw.len() != self.expected_shapes.len() {
            return Err(DetectorError::OutputCountMismatch {
                expected: self.expected_shapes.len(),
                actual: raw.len(),
            });
        }

        let mut slots: Vec<Option<ShapedTensor>> = vec![None; self.expected_shapes.len()];
        for tensor in raw {
            let elements = tensor.len();
            let idx = self
                .expected_shapes
                .iter()
                .position(|shape| element_count(shape) == elements)
                .ok_or(DetectorError::UnmatchedOutput { elements })?;

            if slots[idx].is_some() {
                return Err(DetectorError::UnmatchedOutput { elements });
            }
            slots[idx] = Some(ShapedTensor {
                shape: self.expected_shapes[idx].clone(),
                data: tensor.data,
            });
        }

        // every slot is filled: counts match and no slot was taken twice
        Ok(slots.into_iter().flatten().collect())
    }

    pub fn postprocess(
        &self,
        raw: Vec<RawTensor>,
        original_size: (u32, u32),
    ) -> Result<Option<Vec<DecodedBox>>, DetectorError> {
        let matched = self.match_outputs(raw)?;
        Ok(self.postprocessor.process(&matched, original_size))
    }

    /// Decoded boxes to detection values, rounded into the image
    pub fn to_detections(&self, decoded: Option<Vec<DecodedBox>>, original_size: (u32, u32)) -> Vec<RawDetection> {
        decoded
            .unwrap_or_default()
            .into_iter()
            .map(|b| RawDetection::from_decoded(b.bbox, b.score, b.class_id, original_size))
            .collect()
    }

    /// Preprocess, infer and decode in one call
    pub fn detect(
        &self,
        backend: &mut dyn InferenceBackend,
        image: &RgbImage,
    ) -> Result<Vec<RawDetection>, DetectorError> {
        let (tensor, original_size) = self.preprocess(image)?;
        let raw = backend.infer(&tensor)?;
        let decoded = self.postprocess(raw, original_size)?;
        let detections = self.to_detections(decoded, original_size);
        debug!("Detected {} objects", detections.len());
        Ok(detections)
    }
}

fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}
