//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use image::{Luma, RgbImage};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vexai_eye::backend::{
    BackendCapability, BackendKind, BackendProbe, InferenceBackend, InputTensor, RawTensor, TensorType,
};
use vexai_eye::camera::{CameraProfile, DepthCamera};
use vexai_eye::detector::{DecodedBox, PostProcessor, ShapedTensor};
use vexai_eye::error::{BackendError, CameraError};
use vexai_eye::geometry::{Extrinsics, Intrinsics, StreamGeometry};
use vexai_eye::types::{DepthBuffer, DepthImage, RawFramePair};

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 48;

pub fn intrinsics() -> Intrinsics {
    Intrinsics { width: WIDTH, height: HEIGHT, fx: 60.0, fy: 60.0, ppx: 32.0, ppy: 24.0 }
}

/// Depth and color share one optical center
pub fn profile() -> CameraProfile {
    CameraProfile {
        depth_scale: 0.001,
        depth_intrinsics: intrinsics(),
        color_intrinsics: intrinsics(),
        color_to_depth: Extrinsics::identity(),
        depth_to_color: Extrinsics::identity(),
    }
}

pub fn geometry() -> StreamGeometry {
    profile().geometry()
}

pub fn flat_depth(raw: u16) -> DepthImage {
    DepthImage::from_pixel(WIDTH, HEIGHT, Luma([raw]))
}

pub fn frame(frame_number: u64, raw_depth: u16) -> RawFramePair {
    RawFramePair {
        depth: Some(DepthBuffer {
            width: WIDTH,
            height: HEIGHT,
            data: vec![raw_depth; (WIDTH * HEIGHT) as usize],
        }),
        color: Some(RgbImage::new(WIDTH, HEIGHT)),
        timestamp: Utc::now(),
        frame_number,
    }
}

pub fn depth_only(frame_number: u64) -> RawFramePair {
    RawFramePair { color: None, ..frame(frame_number, 1500) }
}

/// Plays a fixed list of capture results, then reports a disconnect
pub struct ScriptedCamera {
    script: Mutex<VecDeque<Result<RawFramePair, CameraError>>>,
    running: AtomicBool,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

impl ScriptedCamera {
    pub fn new(script: Vec<Result<RawFramePair, CameraError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            running: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        })
    }

    pub fn frames(count: u64, raw_depth: u16) -> Arc<Self> {
        Self::new((1..=count).map(|n| Ok(frame(n, raw_depth))).collect())
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_running_now(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DepthCamera for ScriptedCamera {
    async fn start(&self) -> Result<CameraProfile, CameraError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        Ok(profile())
    }

    async fn get_frames(&self, _timeout: Duration) -> Result<RawFramePair, CameraError> {
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(CameraError::Disconnected("end of script".to_string())))
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub fn capability(kind: BackendKind) -> BackendCapability {
    BackendCapability {
        kind,
        input: TensorType::Float32,
        output_quantization: None,
        model_path: PathBuf::from("models/pushback_lite.onnx"),
        device_id: 0,
    }
}

/// Returns zeroed tensors of the default output shapes, or fails on demand
pub struct StubBackend {
    capability: BackendCapability,
    fail: bool,
    delay: Option<Duration>,
    pub calls: Arc<AtomicUsize>,
}

impl StubBackend {
    pub fn working() -> Self {
        Self {
            capability: capability(BackendKind::Gpu),
            fail: false,
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::working() }
    }

    /// Blocks the calling thread for `delay` on every inference
    pub fn slow(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::working() }
    }
}

impl InferenceBackend for StubBackend {
    fn capability(&self) -> &BackendCapability {
        &self.capability
    }

    fn infer(&mut self, input: &InputTensor) -> Result<Vec<RawTensor>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(input.shape, [1, 320, 320, 3]);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail {
            return Err(BackendError::Inference("device fault".to_string()));
        }
        Ok(vec![
            RawTensor::new(vec![8400], vec![0.0; 8400]),
            RawTensor::new(vec![2100], vec![0.0; 2100]),
        ])
    }
}

/// Ignores the network output and reports the same boxes every frame
pub struct FixedBoxes(pub Vec<DecodedBox>);

impl PostProcessor for FixedBoxes {
    fn process(&self, outputs: &[ShapedTensor], _original_size: (u32, u32)) -> Option<Vec<DecodedBox>> {
        assert_eq!(outputs.len(), 2);
        Some(self.0.clone())
    }
}

pub fn two_balls() -> FixedBoxes {
    FixedBoxes(vec![
        DecodedBox { bbox: (20.0, 14.0, 10.0, 10.0), score: 0.9, class_id: 0 },
        DecodedBox { bbox: (40.0, 20.0, 8.0, 8.0), score: 0.7, class_id: 1 },
    ])
}

pub struct Unavailable(pub BackendKind);

impl BackendProbe for Unavailable {
    fn kind(&self) -> BackendKind {
        self.0
    }

    fn probe(&self) -> Result<BackendCapability, String> {
        Err("not present".to_string())
    }
}

pub struct Available(pub BackendKind);

impl BackendProbe for Available {
    fn kind(&self) -> BackendKind {
        self.0
    }

    fn probe(&self) -> Result<BackendCapability, String> {
        Ok(capability(self.0))
    }
}
