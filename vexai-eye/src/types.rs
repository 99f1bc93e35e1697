//! Value types flowing through the perception pipeline

use chrono::{DateTime, Utc};
use image::{ImageBuffer, Luma, RgbImage};
use serde::{Deserialize, Serialize};

/// 16-bit depth image, one raw sensor unit per pixel
pub type DepthImage = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Depth samples exactly as the driver hands them over
#[derive(Debug, Clone)]
pub struct DepthBuffer {
    pub width: u32,
    pub height: u32,
    /// Row-major samples, expected to hold `width * height` values
    pub data: Vec<u16>,
}

/// One acquisition cycle as returned by the camera, before validation
#[derive(Debug, Clone)]
pub struct RawFramePair {
    pub depth: Option<DepthBuffer>,
    pub color: Option<RgbImage>,
    pub timestamp: DateTime<Utc>,
    pub frame_number: u64,
}

/// Validated depth+color pair owned by a single loop iteration
#[derive(Debug, Clone)]
pub struct Frame {
    depth: DepthImage,
    color: RgbImage,
    timestamp: DateTime<Utc>,
    frame_number: u64,
}

impl Frame {
    pub(crate) fn new(
        depth: DepthImage,
        color: RgbImage,
        timestamp: DateTime<Utc>,
        frame_number: u64,
    ) -> Self {
        Self { depth, color, timestamp, frame_number }
    }

    pub fn depth(&self) -> &DepthImage {
        &self.depth
    }

    pub fn color(&self) -> &RgbImage {
        &self.color
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn into_parts(self) -> (DepthImage, RgbImage, DateTime<Utc>, u64) {
        (self.depth, self.color, self.timestamp, self.frame_number)
    }
}

/// Detector output in color-image pixel space.
///
/// The integer box is the anchor rounded half-up and clamped to the image;
/// the floating anchor keeps the decoder's unclamped top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    confidence: f32,
    class_id: usize,
    anchor: (f32, f32),
}

impl RawDetection {
    pub fn new(
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        confidence: f32,
        class_id: usize,
        anchor: (f32, f32),
    ) -> Self {
        Self { x, y, width, height, confidence, class_id, anchor }
    }

    /// Build from a decoded floating box, snapping its edges into the image
    pub fn from_decoded(
        bbox: (f32, f32, f32, f32),
        confidence: f32,
        class_id: usize,
        image_size: (u32, u32),
    ) -> Self {
        let (bx, by, bw, bh) = bbox;
        let (img_w, img_h) = (image_size.0 as i32, image_size.1 as i32);

        // float to int casts saturate, NaN becomes 0
        let left = ((bx + 0.5).floor() as i32).clamp(0, img_w);
        let top = ((by + 0.5).floor() as i32).clamp(0, img_h);
        let right = ((bx + bw + 0.5).floor() as i32).clamp(left, img_w);
        let bottom = ((by + bh + 0.5).floor() as i32).clamp(top, img_h);

        Self {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
            confidence: confidence.clamp(0.0, 1.0),
            class_id,
            anchor: (bx, by),
        }
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn class_id(&self) -> usize {
        self.class_id
    }

    pub fn anchor(&self) -> (f32, f32) {
        self.anchor
    }

    /// Box center derived from the floating anchor
    pub fn center(&self) -> (f32, f32) {
        (
            self.anchor.0 + self.width as f32 / 2.0,
            self.anchor.1 + self.height as f32 / 2.0,
        )
    }
}

/// Robust depth of one detection
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DepthEstimate {
    Meters(f32),
    Undefined,
}

impl DepthEstimate {
    /// Depth in meters, NaN when undefined
    pub fn meters(&self) -> f32 {
        match self {
            DepthEstimate::Meters(m) => *m,
            DepthEstimate::Undefined => f32::NAN,
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, DepthEstimate::Meters(_))
    }
}

/// Point in the world (field) frame, meters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl WorldPoint {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn undefined() -> Self {
        Self { x: f32::NAN, y: f32::NAN, z: f32::NAN }
    }

    pub fn is_defined(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Robot pose as reported by the positioning sensor.
///
/// `azimuth` follows the compass convention: 0 degrees faces +Y and angles
/// grow clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotPose {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub azimuth: f32,
    pub elevation: f32,
    pub rotation: f32,
    pub frame_count: u32,
    pub status: u32,
    pub connected: bool,
}

impl RobotPose {
    pub fn new(x: f32, y: f32, z: f32, azimuth: f32) -> Self {
        Self {
            x,
            y,
            z,
            azimuth,
            elevation: 0.0,
            rotation: 0.0,
            frame_count: 0,
            status: 0,
            connected: true,
        }
    }

    pub fn disconnected() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            azimuth: 0.0,
            elevation: 0.0,
            rotation: 0.0,
            frame_count: 0,
            status: 0,
            connected: false,
        }
    }
}

impl Default for RobotPose {
    fn default() -> Self {
        Self::disconnected()
    }
}

/// Pixel box as shown on the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScreenLocation {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// One localized detection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRecord {
    #[serde(rename = "class")]
    pub class_id: usize,
    pub class_name: String,
    #[serde(rename = "prob")]
    pub confidence: f32,
    /// Meters; NaN (serialized as null) when no depth could be measured
    pub depth: f32,
    pub screen_location: ScreenLocation,
    pub map_location: WorldPoint,
    #[serde(skip)]
    pub pose: RobotPose,
}

/// Everything published for one frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionBatch {
    pub frame_number: u64,
    pub timestamp: DateTime<Utc>,
    pub pose: RobotPose,
    pub detections: Vec<DetectionRecord>,
}

impl DetectionBatch {
    pub fn empty(frame_number: u64, timestamp: DateTime<Utc>, pose: RobotPose) -> Self {
        Self { frame_number, timestamp, pose, detections: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }
}

/// Loop health figures sent to the dashboard
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    /// 1 / duration of the last iteration
    pub fps: f32,
    pub gps_connected: bool,
    /// Seconds spent in inference during the last iteration
    pub invoke_time: f32,
    /// Seconds since the loop started
    pub run_time: f32,
    pub loop_time: f32,
    pub cpu_temp: Option<f32>,
    pub video_width: u32,
    pub video_height: u32,
    pub frames_dropped: u64,
    pub inference_failures: u64,
}
