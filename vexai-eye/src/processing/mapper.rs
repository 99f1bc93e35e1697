//! Color pixel + depth + robot pose to a point on the field

use crate::config::MountConfig;
use crate::geometry::Intrinsics;
use crate::types::{DepthEstimate, RawDetection, RobotPose, WorldPoint};
use glam::{Mat3, Vec2, Vec3};

#[derive(Debug, Clone)]
pub struct CoordinateMapper {
    color_intrinsics: Intrinsics,
    mount_rotation: Mat3,
    mount_offset: Vec3,
}

impl CoordinateMapper {
    pub fn new(color_intrinsics: Intrinsics, mount: &MountConfig) -> Self {
        let mount_rotation = Mat3::from_rotation_z(mount.yaw_deg.to_radians())
            * Mat3::from_rotation_y(mount.pitch_deg.to_radians());
        Self {
            color_intrinsics,
            mount_rotation,
            mount_offset: Vec3::new(mount.offset_forward, mount.offset_left, mount.offset_up),
        }
    }

    /// Point in the robot body frame (x forward, y left, z up)
    pub fn body_point(&self, pixel: Vec2, meters: f32) -> Vec3 {
        let optical = self.color_intrinsics.deproject(pixel, meters);
        // optical frame is x right, y down, z forward
        let camera = Vec3::new(optical.z, -optical.x, -optical.y);
        self.mount_offset + self.mount_rotation * camera
    }

    pub fn compute_world_point(
        &self,
        detection: &RawDetection,
        depth: DepthEstimate,
        pose: &RobotPose,
    ) -> WorldPoint {
        let DepthEstimate::Meters(meters) = depth else {
            return WorldPoint::undefined();
        };
        if !meters.is_finite() {
            return WorldPoint::undefined();
        }

        let (cx, cy) = detection.center();
        let body = self.body_point(Vec2::new(cx, cy), meters);

        let (sin_h, cos_h) = pose.azimuth.to_radians().sin_cos();
        WorldPoint::new(
            pose.x + body.x * sin_h - body.y * cos_h,
            pose.y + body.x * cos_h + body.y * sin_h,
            pose.z + body.z,
        )
    }
}
