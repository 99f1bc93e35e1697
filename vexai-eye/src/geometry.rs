//! Pinhole camera geometry and color-to-depth pixel projection

use crate::types::DepthImage;
use glam::{Mat3, Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// Pinhole intrinsics of one stream (no lens distortion)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub width: u32,
    pub height: u32,
    pub fx: f32,
    pub fy: f32,
    pub ppx: f32,
    pub ppy: f32,
}

impl Intrinsics {
    /// Pixel + depth (meters) to a 3D point in this stream's optical frame
    pub fn deproject(&self, pixel: Vec2, depth: f32) -> Vec3 {
        let x = (pixel.x - self.ppx) / self.fx;
        let y = (pixel.y - self.ppy) / self.fy;
        Vec3::new(depth * x, depth * y, depth)
    }

    pub fn project(&self, point: Vec3) -> Vec2 {
        let x = point.x / point.z;
        let y = point.y / point.z;
        Vec2::new(x * self.fx + self.ppx, y * self.fy + self.ppy)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err("Intrinsics size must be non-zero".to_string());
        }
        if !(self.fx.is_finite() && self.fy.is_finite()) || self.fx == 0.0 || self.fy == 0.0 {
            return Err("Focal lengths must be finite and non-zero".to_string());
        }
        Ok(())
    }
}

/// Rigid transform between two stream frames.
///
/// `rotation` is column-major, as camera SDKs report it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extrinsics {
    pub rotation: [f32; 9],
    pub translation: [f32; 3],
}

impl Extrinsics {
    pub fn identity() -> Self {
        Self {
            rotation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            translation: [0.0; 3],
        }
    }

    pub fn transform(&self, point: Vec3) -> Vec3 {
        Mat3::from_cols_array(&self.rotation) * point + Vec3::from_array(self.translation)
    }
}

/// Calibration needed to move between color and depth pixels
#[derive(Debug, Clone, Copy)]
pub struct StreamGeometry {
    pub depth_scale: f32,
    pub depth_intrinsics: Intrinsics,
    pub color_intrinsics: Intrinsics,
    pub color_to_depth: Extrinsics,
    pub depth_to_color: Extrinsics,
}

impl StreamGeometry {
    /// Find the depth pixel observing the same surface as `color_pixel`.
    ///
    /// The color pixel is deprojected at `depth_min` and `depth_max`; the
    /// segment between the two resulting depth pixels is walked and the
    /// sample whose reprojection lands closest to `color_pixel` wins. When
    /// the segment holds no valid sample the midpoint is returned.
    pub fn project_color_pixel_to_depth_pixel(
        &self,
        depth: &DepthImage,
        depth_min: f32,
        depth_max: f32,
        color_pixel: Vec2,
    ) -> Vec2 {
        let start = self.color_to_depth_at(color_pixel, depth_min, depth);
        let end = self.color_to_depth_at(color_pixel, depth_max, depth);

        let mut best: Option<(f32, Vec2)> = None;
        for candidate in LineWalk::new(start, end) {
            let col = candidate.x.round() as u32;
            let row = candidate.y.round() as u32;
            if col >= depth.width() || row >= depth.height() {
                continue;
            }

            let raw = depth.get_pixel(col, row).0[0];
            if raw == 0 {
                continue;
            }
            let meters = self.depth_scale * raw as f32;

            let point = self.depth_intrinsics.deproject(candidate, meters);
            let reprojected = self.color_intrinsics.project(self.depth_to_color.transform(point));
            let dist = reprojected.distance_squared(color_pixel);

            match best {
                Some((best_dist, _)) if best_dist <= dist => {}
                _ => best = Some((dist, candidate)),
            }
        }

        best.map(|(_, pixel)| pixel).unwrap_or((start + end) * 0.5)
    }

    fn color_to_depth_at(&self, color_pixel: Vec2, meters: f32, depth: &DepthImage) -> Vec2 {
        let point = self.color_intrinsics.deproject(color_pixel, meters);
        let pixel = self.depth_intrinsics.project(self.color_to_depth.transform(point));
        clamp_to_image(pixel, depth.width(), depth.height())
    }
}

fn clamp_to_image(pixel: Vec2, width: u32, height: u32) -> Vec2 {
    let max_x = width.saturating_sub(1) as f32;
    let max_y = height.saturating_sub(1) as f32;
    let x = if pixel.x.is_finite() { pixel.x.clamp(0.0, max_x) } else { 0.0 };
    let y = if pixel.y.is_finite() { pixel.y.clamp(0.0, max_y) } else { 0.0 };
    Vec2::new(x, y)
}

/// Walks a pixel line one step at a time along its dominant axis
struct LineWalk {
    current: Vec2,
    start: Vec2,
    end: Vec2,
    done: bool,
}

impl LineWalk {
    fn new(start: Vec2, end: Vec2) -> Self {
        Self { current: start, start, end, done: false }
    }

    fn contains(&self, p: Vec2) -> bool {
        let lo = self.start.min(self.end);
        let hi = self.start.max(self.end);
        p.x >= lo.x && p.x <= hi.x && p.y >= lo.y && p.y <= hi.y
    }

    fn advance(&mut self) {
        let dx = self.end.x - self.current.x;
        let dy = self.end.y - self.current.y;
        let span = self.end - self.start;

        if dx.abs() > dy.abs() {
            self.current.x += dx.signum();
            // span.x is non-zero here since x still differs from the end
            let slope = span.y / span.x;
            self.current.y = self.end.y - slope * (self.end.x - self.current.x);
        } else if dy != 0.0 {
            self.current.y += dy.signum();
            self.current.x = if span.y == 0.0 {
                self.end.x
            } else {
                self.end.x - span.x / span.y * (self.end.y - self.current.y)
            };
        } else {
            self.done = true;
        }
    }
}

impl Iterator for LineWalk {
    type Item = Vec2;

    fn next(&mut self) -> Option<Vec2> {
        if self.done || !self.contains(self.current) {
            return None;
        }
        let pixel = self.current;
        self.advance();
        Some(pixel)
    }
}
