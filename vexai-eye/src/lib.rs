//! vexai-eye: perception for a competition robot
//!
//! Pairs color and depth frames from a stereo depth camera, runs an object
//! detector on the color image, measures each detection's depth and places it
//! in the robot's world frame using the latest pose. Results go to the robot
//! controller and, at lower priority, to a dashboard.

pub mod backend;
pub mod camera;
pub mod config;
pub mod detector;
pub mod error;
pub mod geometry;
pub mod pipeline;
pub mod pose;
pub mod processing;
pub mod publish;
pub mod render;
pub mod sinks;
pub mod types;

pub use backend::{BackendKind, InferenceBackend, OrtProbe};
pub use camera::{CameraProfile, DepthCamera, ReplayCamera};
pub use config::VexConfig;
pub use error::{PipelineError, StartupError};
pub use pipeline::{IterationOutcome, Pipeline, PipelineReport, PipelineState};
pub use types::{DetectionBatch, DetectionRecord, RobotPose, Statistics, WorldPoint};
