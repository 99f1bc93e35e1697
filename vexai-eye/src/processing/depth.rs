//! Robust per-detection depth from the inner window of the box

use crate::config::DepthConfig;
use crate::error::LocalizationError;
use crate::geometry::StreamGeometry;
use crate::types::{DepthEstimate, DepthImage, RawDetection};
use glam::Vec2;

/// Maps a detection's inner window into depth pixels and averages it
#[derive(Debug, Clone)]
pub struct DepthEstimator {
    geometry: StreamGeometry,
    config: DepthConfig,
}

impl DepthEstimator {
    pub fn new(geometry: StreamGeometry, config: DepthConfig) -> Self {
        Self { geometry, config }
    }

    pub fn geometry(&self) -> &StreamGeometry {
        &self.geometry
    }

    /// Inner window of the box in color pixels: (left, top, right, bottom)
    pub fn window(&self, detection: &RawDetection) -> (i32, i32, i32, i32) {
        let low = self.config.window_low_percent as i64;
        let high = self.config.window_high_percent as i64;
        let (x, y) = (detection.x() as i64, detection.y() as i64);
        let (w, h) = (detection.width() as i64, detection.height() as i64);

        let edge = |origin: i64, size: i64, percent: i64| {
            (origin + size * percent / 100).clamp(i32::MIN as i64, i32::MAX as i64) as i32
        };
        (edge(x, w, low), edge(y, h, low), edge(x, w, high), edge(y, h, high))
    }

    /// Mean of the non-zero depth samples under the window, in meters
    pub fn estimate(
        &self,
        detection: &RawDetection,
        depth: &DepthImage,
    ) -> Result<DepthEstimate, LocalizationError> {
        if detection.width() <= 0 || detection.height() <= 0 {
            return Err(LocalizationError::DegenerateBox {
                width: detection.width(),
                height: detection.height(),
            });
        }

        let (left, top, right, bottom) = self.window(detection);
        let top_left = self.to_depth_pixel(depth, left, top);
        let bottom_right = self.to_depth_pixel(depth, right, bottom);

        let (c1, r1) = top_left;
        let (c2, r2) = bottom_right;

        let mut sum = 0.0f64;
        let mut count = 0usize;
        for row in r1..r2 {
            for col in c1..c2 {
                let raw = depth.get_pixel(col, row).0[0];
                if raw != 0 {
                    sum += raw as f64 * self.geometry.depth_scale as f64;
                    count += 1;
                }
            }
        }

        if count == 0 {
            return Ok(DepthEstimate::Undefined);
        }
        Ok(DepthEstimate::Meters((sum / count as f64) as f32))
    }

    /// Projected pixel as (column, row), clamped to the depth image so it can
    /// bound a half-open slice
    fn to_depth_pixel(&self, depth: &DepthImage, x: i32, y: i32) -> (u32, u32) {
        let pixel = self.geometry.project_color_pixel_to_depth_pixel(
            depth,
            self.config.depth_min,
            self.config.depth_max,
            Vec2::new(x as f32, y as f32),
        );
        let col = (pixel.x.round() as i64).clamp(0, depth.width() as i64) as u32;
        let row = (pixel.y.round() as i64).clamp(0, depth.height() as i64) as u32;
        (col, row)
    }
}
