//! Depth measurement and world placement of detections

mod common;

use common::{flat_depth, geometry, intrinsics, HEIGHT, WIDTH};
use proptest::prelude::*;
use vexai_eye::config::{DepthConfig, MountConfig};
use vexai_eye::geometry::Intrinsics;
use vexai_eye::processing::{CoordinateMapper, DepthEstimator};
use vexai_eye::types::{DepthEstimate, DepthImage, RawDetection, RobotPose};

fn estimator() -> DepthEstimator {
    DepthEstimator::new(geometry(), DepthConfig::default())
}

fn detection(x: i32, y: i32, w: i32, h: i32) -> RawDetection {
    RawDetection::new(x, y, w, h, 0.9, 0, (x as f32, y as f32))
}

#[test]
fn test_uniform_depth_under_box() {
    let intr = Intrinsics { width: 640, height: 480, fx: 600.0, fy: 600.0, ppx: 320.0, ppy: 240.0 };
    let mut geom = geometry();
    geom.depth_intrinsics = intr;
    geom.color_intrinsics = intr;
    let estimator = DepthEstimator::new(geom, DepthConfig::default());

    let depth = DepthImage::from_pixel(640, 480, image::Luma([2000]));
    let estimate = estimator.estimate(&detection(100, 100, 50, 50), &depth).unwrap();
    assert!((estimate.meters() - 2.0).abs() < 1e-5);
}

#[test]
fn test_no_valid_samples_gives_undefined_point() {
    let depth = DepthImage::new(WIDTH, HEIGHT);
    let det = detection(20, 14, 10, 10);

    let estimate = estimator().estimate(&det, &depth).unwrap();
    assert_eq!(estimate, DepthEstimate::Undefined);
    assert!(estimate.meters().is_nan());

    let mapper = CoordinateMapper::new(intrinsics(), &MountConfig::default());
    let point = mapper.compute_world_point(&det, estimate, &RobotPose::new(1.0, 1.0, 0.0, 0.0));
    assert!(!point.is_defined());
    assert!(point.x.is_nan() && point.y.is_nan() && point.z.is_nan());
}

#[test]
fn test_zero_sized_box_rejected() {
    let err = estimator().estimate(&detection(10, 10, 0, 5), &flat_depth(1000));
    assert!(err.is_err());
}

#[test]
fn test_box_at_image_edge_stays_in_bounds() {
    // inner window falls entirely past the bottom-right corner
    let det = detection(WIDTH as i32 - 2, HEIGHT as i32 - 2, 40, 40);
    let estimate = estimator().estimate(&det, &flat_depth(1200)).unwrap();
    assert_eq!(estimate, DepthEstimate::Undefined);

    // window straddles the right edge: columns 62..63 remain
    let straddling = detection(44, 20, 40, 20);
    assert_eq!(estimator().window(&straddling), (62, 29, 66, 31));
    let estimate = estimator().estimate(&straddling, &flat_depth(1200)).unwrap();
    match estimate {
        DepthEstimate::Meters(m) => assert!((m - 1.2).abs() < 1e-5),
        DepthEstimate::Undefined => panic!("expected a depth for the straddling box"),
    }
}

#[test]
fn test_detection_ahead_lands_in_front_of_robot() {
    let mapper = CoordinateMapper::new(intrinsics(), &MountConfig::default());
    // centered on the principal point
    let det = detection(27, 19, 10, 10);

    let facing_north = mapper.compute_world_point(&det, DepthEstimate::Meters(1.5), &RobotPose::new(0.5, 0.5, 0.0, 0.0));
    assert!((facing_north.x - 0.5).abs() < 1e-4);
    assert!((facing_north.y - 2.0).abs() < 1e-4);
    assert!(facing_north.z.abs() < 1e-4);

    let facing_east = mapper.compute_world_point(&det, DepthEstimate::Meters(1.5), &RobotPose::new(0.5, 0.5, 0.0, 90.0));
    assert!((facing_east.x - 2.0).abs() < 1e-4);
    assert!((facing_east.y - 0.5).abs() < 1e-4);
}

#[test]
fn test_mount_offset_added() {
    let mount = MountConfig { offset_forward: 0.1, offset_up: 0.3, ..MountConfig::default() };
    let mapper = CoordinateMapper::new(intrinsics(), &mount);
    let det = detection(27, 19, 10, 10);

    let point = mapper.compute_world_point(&det, DepthEstimate::Meters(1.0), &RobotPose::new(0.0, 0.0, 0.0, 0.0));
    assert!((point.y - 1.1).abs() < 1e-4);
    assert!((point.z - 0.3).abs() < 1e-4);
}

proptest! {
    #[test]
    fn prop_depth_scales_linearly(raw in 100u16..2000, k in 1u16..=10, x in 0i32..40, y in 0i32..30) {
        let det = detection(x, y, 16, 12);
        let base = estimator().estimate(&det, &flat_depth(raw)).unwrap();
        let scaled = estimator().estimate(&det, &flat_depth(raw * k)).unwrap();

        prop_assert!(base.is_defined() && scaled.is_defined());
        let expected = base.meters() * k as f32;
        prop_assert!((scaled.meters() - expected).abs() <= expected * 1e-4);
    }

    #[test]
    fn prop_estimate_never_panics(x in -20i32..80, y in -20i32..60, w in -5i32..100, h in -5i32..100) {
        let det = detection(x, y, w, h);
        let _ = estimator().estimate(&det, &flat_depth(800));
    }
}
