//! YOLOv3-tiny grid decoding

use super::{DecodedBox, PostProcessor, ShapedTensor};
use crate::config::DetectorConfig;
use tracing::{debug, warn};

/// Decodes NHWC YOLO grids into boxes in original image pixels
#[derive(Debug, Clone)]
pub struct YoloDecoder {
    masks: Vec<Vec<usize>>,
    anchors: Vec<(f32, f32)>,
    class_thresholds: Vec<f32>,
    nms_threshold: f32,
    input_resolution: (u32, u32),
}

impl YoloDecoder {
    pub fn new(
        masks: Vec<Vec<usize>>,
        anchors: Vec<(f32, f32)>,
        class_thresholds: Vec<f32>,
        nms_threshold: f32,
        input_resolution: (u32, u32),
    ) -> Self {
        Self { masks, anchors, class_thresholds, nms_threshold, input_resolution }
    }

    pub fn from_config(config: &DetectorConfig) -> Self {
        Self::new(
            config.masks.clone(),
            config.anchors.clone(),
            config.class_thresholds.clone(),
            config.nms_threshold,
            config.input_resolution,
        )
    }

    fn num_classes(&self) -> usize {
        self.class_thresholds.len()
    }

    /// Candidate boxes of one grid in normalized [0, 1] coordinates
    fn decode_grid(&self, tensor: &ShapedTensor, mask: &[usize], out: &mut Vec<DecodedBox>) {
        let [_, grid_h, grid_w, channels] = match tensor.shape.as_slice() {
            &[n, h, w, c] => [n, h, w, c],
            other => {
                warn!("Skipping output with non-NHWC shape {:?}", other);
                return;
            }
        };

        let stride = 5 + self.num_classes();
        if channels != mask.len() * stride {
            warn!(
                "Output has {} channels, expected {} anchors x {}",
                channels,
                mask.len(),
                stride
            );
            return;
        }

        let (input_w, input_h) = (self.input_resolution.0 as f32, self.input_resolution.1 as f32);

        for row in 0..grid_h {
            for col in 0..grid_w {
                let cell = (row * grid_w + col) * channels;
                for (a, &anchor_idx) in mask.iter().enumerate() {
                    let base = cell + a * stride;
                    let Some(values) = tensor.data.get(base..base + stride) else {
                        return;
                    };

                    let confidence = sigmoid(values[4]);
                    let (class_id, class_score) = values[5..]
                        .iter()
                        .map(|&v| confidence * sigmoid(v))
                        .enumerate()
                        .fold((0, f32::MIN), |best, (i, s)| if s > best.1 { (i, s) } else { best });

                    if class_score < self.class_thresholds[class_id] {
                        continue;
                    }

                    let Some(&(anchor_w, anchor_h)) = self.anchors.get(anchor_idx) else {
                        continue;
                    };
                    let cx = (col as f32 + sigmoid(values[0])) / grid_w as f32;
                    let cy = (row as f32 + sigmoid(values[1])) / grid_h as f32;
                    let w = values[2].exp() * anchor_w / input_w;
                    let h = values[3].exp() * anchor_h / input_h;

                    out.push(DecodedBox {
                        bbox: (cx - w / 2.0, cy - h / 2.0, w, h),
                        score: class_score,
                        class_id,
                    });
                }
            }
        }
    }
}

impl PostProcessor for YoloDecoder {
    fn process(&self, outputs: &[ShapedTensor], original_size: (u32, u32)) -> Option<Vec<DecodedBox>> {
        let mut candidates = Vec::new();
        for (tensor, mask) in outputs.iter().zip(&self.masks) {
            self.decode_grid(tensor, mask, &mut candidates);
        }

        if candidates.is_empty() {
            return None;
        }

        let (width, height) = (original_size.0 as f32, original_size.1 as f32);
        for candidate in &mut candidates {
            let (x, y, w, h) = candidate.bbox;
            candidate.bbox = (x * width, y * height, w * width, h * height);
        }

        let mut kept = Vec::new();
        for class_id in 0..self.num_classes() {
            let of_class: Vec<DecodedBox> =
                candidates.iter().copied().filter(|c| c.class_id == class_id).collect();
            kept.extend(apply_nms(of_class, self.nms_threshold));
        }

        debug!("YOLO kept {} of {} candidates", kept.len(), candidates.len());
        Some(kept)
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Greedy non-maximum suppression, highest score first
pub fn apply_nms(mut boxes: Vec<DecodedBox>, iou_threshold: f32) -> Vec<DecodedBox> {
    boxes.retain(|d| d.score.is_finite());
    boxes.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep = Vec::new();
    let mut suppressed = vec![false; boxes.len()];

    for i in 0..boxes.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(boxes[i]);

        for j in (i + 1)..boxes.len() {
            if !suppressed[j] && compute_iou(&boxes[i].bbox, &boxes[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// IoU of two (x, y, width, height) boxes
pub fn compute_iou(a: &(f32, f32, f32, f32), b: &(f32, f32, f32, f32)) -> f32 {
    let (x1, y1, w1, h1) = *a;
    let (x2, y2, w2, h2) = *b;

    if w1 < 0.0 || h1 < 0.0 || w2 < 0.0 || h2 < 0.0 {
        return 0.0;
    }

    let inter_w = (x1 + w1).min(x2 + w2) - x1.max(x2);
    let inter_h = (y1 + h1).min(y2 + h2) - y1.max(y2);
    if inter_w <= 0.0 || inter_h <= 0.0 {
        return 0.0;
    }

    let inter_area = inter_w * inter_h;
    let union_area = w1 * h1 + w2 * h2 - inter_area;
    if union_area <= 0.0 || !union_area.is_finite() {
        return 0.0;
    }

    (inter_area / union_area).clamp(0.0, 1.0)
}
