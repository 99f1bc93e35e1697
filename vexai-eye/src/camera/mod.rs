//! Depth+color camera interface

pub mod replay;

use crate::error::CameraError;
use crate::geometry::{Extrinsics, Intrinsics, StreamGeometry};
use crate::types::RawFramePair;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub use replay::ReplayCamera;

/// Calibration reported by the camera once streaming starts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraProfile {
    /// Meters per raw depth unit
    pub depth_scale: f32,
    pub depth_intrinsics: Intrinsics,
    pub color_intrinsics: Intrinsics,
    pub color_to_depth: Extrinsics,
    pub depth_to_color: Extrinsics,
}

impl CameraProfile {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CameraError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let profile: CameraProfile =
            toml::from_str(&content).map_err(|e| CameraError::Profile(e.to_string()))?;
        profile.validate().map_err(CameraError::Profile)?;
        Ok(profile)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CameraError> {
        let content = toml::to_string(self).map_err(|e| CameraError::Profile(e.to_string()))?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.depth_scale.is_finite() && self.depth_scale > 0.0) {
            return Err("Depth scale must be positive".to_string());
        }
        self.depth_intrinsics.validate()?;
        self.color_intrinsics.validate()
    }

    pub fn geometry(&self) -> StreamGeometry {
        StreamGeometry {
            depth_scale: self.depth_scale,
            depth_intrinsics: self.depth_intrinsics,
            color_intrinsics: self.color_intrinsics,
            color_to_depth: self.color_to_depth,
            depth_to_color: self.depth_to_color,
        }
    }
}

/// Synchronized depth+color source
#[async_trait]
pub trait DepthCamera: Send + Sync {
    /// Begin streaming and report the calibration
    async fn start(&self) -> Result<CameraProfile, CameraError>;

    /// Next frame pair, or `Timeout` when none arrives in time
    async fn get_frames(&self, timeout: Duration) -> Result<RawFramePair, CameraError>;

    /// Release the device. Safe to call more than once.
    fn stop(&self);

    fn is_running(&self) -> bool;
}

/// Stops the camera when dropped, whichever way the loop exits
pub struct CameraGuard {
    camera: Arc<dyn DepthCamera>,
}

impl CameraGuard {
    pub fn new(camera: Arc<dyn DepthCamera>) -> Self {
        Self { camera }
    }
}

impl Drop for CameraGuard {
    fn drop(&mut self) {
        if self.camera.is_running() {
            self.camera.stop();
            info!("Camera released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> CameraProfile {
        let intrinsics = Intrinsics { width: 640, height: 480, fx: 615.0, fy: 615.0, ppx: 320.0, ppy: 240.0 };
        CameraProfile {
            depth_scale: 0.001,
            depth_intrinsics: intrinsics,
            color_intrinsics: intrinsics,
            color_to_depth: Extrinsics::identity(),
            depth_to_color: Extrinsics::identity(),
        }
    }

    #[test]
    fn test_profile_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.toml");
        profile().save(&path).unwrap();
        assert_eq!(CameraProfile::from_file(&path).unwrap(), profile());
    }

    #[test]
    fn test_profile_rejects_bad_scale() {
        let mut p = profile();
        p.depth_scale = 0.0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_profile_missing_file() {
        let err = CameraProfile::from_file("/nonexistent/profile.toml").unwrap_err();
        assert!(matches!(err, CameraError::Io(_)));
    }

    struct Counting {
        running: parking_lot::RwLock<bool>,
        stops: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl DepthCamera for Counting {
        async fn start(&self) -> Result<CameraProfile, CameraError> {
            *self.running.write() = true;
            Ok(profile())
        }

        async fn get_frames(&self, timeout: Duration) -> Result<RawFramePair, CameraError> {
            Err(CameraError::Timeout(timeout))
        }

        fn stop(&self) {
            *self.running.write() = false;
            self.stops.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }

        fn is_running(&self) -> bool {
            *self.running.read()
        }
    }

    #[test]
    fn test_guard_stops_running_camera_once() {
        let camera = Arc::new(Counting {
            running: parking_lot::RwLock::new(false),
            stops: std::sync::atomic::AtomicUsize::new(0),
        });
        tokio_test::block_on(camera.start()).unwrap();

        let guard = CameraGuard::new(camera.clone());
        camera.stop();
        drop(guard);
        assert_eq!(camera.stops.load(std::sync::atomic::Ordering::SeqCst), 1);

        tokio_test::block_on(camera.start()).unwrap();
        drop(CameraGuard::new(camera.clone()));
        assert!(!camera.is_running());
        assert_eq!(camera.stops.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
