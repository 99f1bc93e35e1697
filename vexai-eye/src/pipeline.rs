//! Per-frame loop: capture, align, detect, localize, publish

use crate::backend::{self, BackendCapability, BackendProbe, InferenceBackend};
use crate::camera::{CameraGuard, CameraProfile, DepthCamera};
use crate::config::VexConfig;
use crate::detector::{Detector, PostProcessor, YoloDecoder};
use crate::error::{BackendError, CameraError, DetectorError, PipelineError, StartupError};
use crate::pose::{FixedPose, PoseSource};
use crate::processing::{CoordinateMapper, DepthEstimator, FrameAligner};
use crate::publish::SinkPublisher;
use crate::render::colorize_depth;
use crate::sinks::{ControllerSink, DashboardSink, DashboardUpdate, LogSink};
use crate::types::{
    DepthEstimate, DepthImage, DetectionBatch, DetectionRecord, RawDetection, RobotPose,
    ScreenLocation, Statistics,
};
use image::RgbImage;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Capturing,
    Aligning,
    Detecting,
    Localizing,
    Publishing,
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    CaptureTimeout,
    BadFrame,
    IncompleteFrame,
}

/// Result of one loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    Published { frame_number: u64, detections: usize },
    Skipped(SkipReason),
}

/// Totals reported once the loop has shut down
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub iterations: u64,
    pub published: u64,
    pub frames_dropped: u64,
    pub inference_failures: u64,
    pub controller_dropped: u64,
    pub sink_failures: u64,
}

/// Clonable handle that asks the loop to stop after the current iteration
#[derive(Debug, Clone)]
pub struct StopHandle {
    running: Arc<RwLock<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        *self.running.write() = false;
    }

    pub fn is_running(&self) -> bool {
        *self.running.read()
    }
}

type SharedBackend = Arc<Mutex<Box<dyn InferenceBackend>>>;

/// Collaborators wired into the loop
pub struct PipelineBuilder {
    config: Arc<VexConfig>,
    camera: Option<Arc<dyn DepthCamera>>,
    pose: Arc<dyn PoseSource>,
    controller: Arc<dyn ControllerSink>,
    dashboard: Option<Arc<dyn DashboardSink>>,
    postprocessor: Option<Box<dyn PostProcessor>>,
}

impl PipelineBuilder {
    pub fn new(config: Arc<VexConfig>) -> Self {
        Self {
            config,
            camera: None,
            pose: Arc::new(FixedPose::new(RobotPose::disconnected())),
            controller: Arc::new(LogSink),
            dashboard: None,
            postprocessor: None,
        }
    }

    pub fn camera(mut self, camera: Arc<dyn DepthCamera>) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn pose(mut self, pose: Arc<dyn PoseSource>) -> Self {
        self.pose = pose;
        self
    }

    pub fn controller(mut self, sink: Arc<dyn ControllerSink>) -> Self {
        self.controller = sink;
        self
    }

    pub fn dashboard(mut self, sink: Arc<dyn DashboardSink>) -> Self {
        self.dashboard = Some(sink);
        self
    }

    /// Replace the bundled YOLO decoder
    pub fn postprocessor(mut self, postprocessor: Box<dyn PostProcessor>) -> Self {
        self.postprocessor = Some(postprocessor);
        self
    }

    /// Probe for an accelerator, load the model, then start the camera
    pub async fn launch(self, probes: &[&dyn BackendProbe]) -> Result<Pipeline, StartupError> {
        self.launch_with(probes, backend::initialize).await
    }

    /// As `launch`, with a custom backend loader
    pub async fn launch_with<F>(self, probes: &[&dyn BackendProbe], load: F) -> Result<Pipeline, StartupError>
    where
        F: FnOnce(BackendCapability) -> Result<Box<dyn InferenceBackend>, BackendError>,
    {
        self.config.validate().map_err(StartupError::Config)?;
        let capability = backend::probe_backend(&self.config.backend.policy, probes)?;
        let backend = load(capability)?;
        self.start(backend).await
    }

    /// Start the camera and assemble the loop around an initialized backend
    pub async fn start(self, backend: Box<dyn InferenceBackend>) -> Result<Pipeline, StartupError> {
        let config = self.config;
        config.validate().map_err(StartupError::Config)?;

        let camera = self
            .camera
            .ok_or_else(|| StartupError::Config("no camera configured".to_string()))?;

        let postprocessor = self
            .postprocessor
            .unwrap_or_else(|| Box::new(YoloDecoder::from_config(&config.detector)));
        let detector = Detector::new(&config.detector, backend.capability().input, postprocessor)?;

        let profile: CameraProfile = camera.start().await?;
        let guard = CameraGuard::new(camera.clone());
        profile.validate().map_err(|e| StartupError::Camera(CameraError::Profile(e)))?;

        let estimator = DepthEstimator::new(profile.geometry(), config.depth.clone());
        let mapper = CoordinateMapper::new(profile.color_intrinsics, &config.mount);

        let controller = SinkPublisher::controller(&config.publish.controller, self.controller);
        let dashboard = match (config.dashboard.enabled, self.dashboard) {
            (true, Some(sink)) => Some(SinkPublisher::dashboard(&config.publish.dashboard, sink)),
            _ => None,
        };

        info!(
            "Pipeline ready: {} backend, color {}x{}, depth {}x{}",
            backend.capability().kind,
            profile.color_intrinsics.width,
            profile.color_intrinsics.height,
            profile.depth_intrinsics.width,
            profile.depth_intrinsics.height
        );

        Ok(Pipeline {
            config,
            camera,
            guard: Some(guard),
            backend: Some(Arc::new(Mutex::new(backend))),
            detector: Arc::new(detector),
            aligner: FrameAligner::new(),
            estimator,
            mapper,
            pose: self.pose,
            controller: Some(controller),
            dashboard,
            state: PipelineState::Idle,
            running: Arc::new(RwLock::new(true)),
            started_at: Instant::now(),
            bad_frames: 0,
            capture_timeouts: 0,
            inference_failures: 0,
            iterations: 0,
            published: 0,
            last_stats: None,
        })
    }
}

pub struct Pipeline {
    config: Arc<VexConfig>,
    camera: Arc<dyn DepthCamera>,
    guard: Option<CameraGuard>,
    backend: Option<SharedBackend>,
    detector: Arc<Detector>,
    aligner: FrameAligner,
    estimator: DepthEstimator,
    mapper: CoordinateMapper,
    pose: Arc<dyn PoseSource>,
    controller: Option<SinkPublisher<DetectionBatch>>,
    dashboard: Option<SinkPublisher<DashboardUpdate>>,
    state: PipelineState,
    running: Arc<RwLock<bool>>,
    started_at: Instant,
    bad_frames: u64,
    capture_timeouts: u64,
    inference_failures: u64,
    iterations: u64,
    published: u64,
    last_stats: Option<Statistics>,
}

impl Pipeline {
    pub fn builder(config: Arc<VexConfig>) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle { running: self.running.clone() }
    }

    pub fn last_stats(&self) -> Option<&Statistics> {
        self.last_stats.as_ref()
    }

    pub fn frames_dropped(&self) -> u64 {
        self.aligner.dropped() + self.bad_frames
    }

    pub fn inference_failures(&self) -> u64 {
        self.inference_failures
    }

    /// Run one iteration.
    ///
    /// Per-frame problems are absorbed and reported as an outcome; only a lost
    /// camera or a stop request end the loop, after the camera is released.
    pub async fn step(&mut self) -> Result<IterationOutcome, PipelineError> {
        if self.state == PipelineState::ShuttingDown {
            return Err(PipelineError::Stopped);
        }
        if !*self.running.read() {
            self.enter_shutdown();
            return Err(PipelineError::Stopped);
        }

        let iteration_start = Instant::now();
        self.iterations += 1;

        self.state = PipelineState::Capturing;
        let frame_timeout = self.config.frame_timeout();
        let captured = match timeout(frame_timeout, self.camera.get_frames(frame_timeout)).await {
            Ok(result) => result,
            Err(_) => Err(CameraError::Timeout(frame_timeout)),
        };

        let raw = match captured {
            Ok(raw) => raw,
            Err(CameraError::Timeout(waited)) => {
                self.capture_timeouts += 1;
                if self.capture_timeouts == 1 || self.capture_timeouts % 100 == 0 {
                    warn!("No frames within {:?} ({} timeouts)", waited, self.capture_timeouts);
                }
                return Ok(IterationOutcome::Skipped(SkipReason::CaptureTimeout));
            }
            Err(CameraError::BadFrame(reason)) => {
                self.bad_frames += 1;
                debug!("Bad frame from camera: {}", reason);
                return Ok(IterationOutcome::Skipped(SkipReason::BadFrame));
            }
            Err(e) => {
                error!("Camera lost: {}", e);
                self.enter_shutdown();
                return Err(PipelineError::CameraLost(e));
            }
        };

        self.state = PipelineState::Aligning;
        let Some(frame) = self.aligner.align(raw) else {
            return Ok(IterationOutcome::Skipped(SkipReason::IncompleteFrame));
        };
        let (depth, color, timestamp, frame_number) = frame.into_parts();
        let color = Arc::new(color);

        self.state = PipelineState::Detecting;
        let (detections, invoke_time) = match self.detect(color.clone()).await {
            Ok(result) => result,
            Err(e) => {
                self.inference_failures += 1;
                if self.inference_failures == 1 || self.inference_failures % 50 == 0 {
                    warn!("Detection failed ({} failures): {}", self.inference_failures, e);
                }
                (Vec::new(), Duration::ZERO)
            }
        };

        self.state = PipelineState::Localizing;
        let pose = self.pose.current_pose();
        let records: Vec<DetectionRecord> = detections
            .iter()
            .map(|detection| self.localize(detection, &depth, &pose))
            .collect();

        self.state = PipelineState::Publishing;
        let batch = DetectionBatch { frame_number, timestamp, pose, detections: records };
        let count = batch.len();

        let loop_time = iteration_start.elapsed().as_secs_f32();
        let stats = Statistics {
            fps: if loop_time > 0.0 { 1.0 / loop_time } else { 0.0 },
            gps_connected: pose.connected,
            invoke_time: invoke_time.as_secs_f32(),
            run_time: self.started_at.elapsed().as_secs_f32(),
            loop_time,
            cpu_temp: None,
            video_width: color.width(),
            video_height: color.height(),
            frames_dropped: self.frames_dropped(),
            inference_failures: self.inference_failures,
        };

        if let Some(dashboard) = &self.dashboard {
            let depth_map = self
                .config
                .dashboard
                .render_depth
                .then(|| Arc::new(colorize_depth(&depth)));
            dashboard.publish(DashboardUpdate {
                color: Some(color.clone()),
                depth_map,
                batch: batch.clone(),
                stats: stats.clone(),
            });
        }
        if let Some(controller) = &self.controller {
            controller.publish(batch);
        }

        self.last_stats = Some(stats);
        self.published += 1;
        Ok(IterationOutcome::Published { frame_number, detections: count })
    }

    /// Loop until stopped or the camera is lost, then release everything
    pub async fn run(mut self) -> Result<PipelineReport, PipelineError> {
        info!("Starting loop");
        let result = loop {
            match self.step().await {
                Ok(_) => {}
                Err(PipelineError::Stopped) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        let report = self.shutdown().await;
        result.map(|_| report)
    }

    /// Release the camera and backend and drain the publishers
    pub async fn shutdown(mut self) -> PipelineReport {
        self.enter_shutdown();

        let mut report = PipelineReport {
            iterations: self.iterations,
            published: self.published,
            frames_dropped: self.frames_dropped(),
            inference_failures: self.inference_failures,
            ..PipelineReport::default()
        };

        if let Some(controller) = self.controller.take() {
            let stats = controller.close().await;
            report.controller_dropped = stats.dropped();
            report.sink_failures += stats.failed();
        }
        if let Some(dashboard) = self.dashboard.take() {
            let stats = dashboard.close().await;
            report.sink_failures += stats.failed();
        }

        info!(
            "Loop finished: {} iterations, {} published, {} frames dropped, {} inference failures",
            report.iterations, report.published, report.frames_dropped, report.inference_failures
        );
        report
    }

    fn enter_shutdown(&mut self) {
        if self.state != PipelineState::ShuttingDown {
            info!("Pipeline shutting down");
        }
        self.state = PipelineState::ShuttingDown;
        *self.running.write() = false;
        self.guard.take();
        self.backend.take();
    }

    async fn detect(&self, color: Arc<RgbImage>) -> Result<(Vec<RawDetection>, Duration), DetectorError> {
        let backend = self
            .backend
            .clone()
            .ok_or_else(|| BackendError::Inference("backend released".to_string()))?;
        let detector = self.detector.clone();
        let limit = self.config.inference_timeout();

        let task = tokio::task::spawn_blocking(move || -> Result<_, DetectorError> {
            let (tensor, original_size) = detector.preprocess(&color)?;

            // a timed-out inference may still hold the session
            let mut session = backend.try_lock().ok_or(BackendError::Busy)?;
            let started = Instant::now();
            let raw = session.infer(&tensor)?;
            let invoke_time = started.elapsed();
            drop(session);

            let decoded = detector.postprocess(raw, original_size)?;
            Ok((detector.to_detections(decoded, original_size), invoke_time))
        });

        match timeout(limit, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(BackendError::Inference(format!("inference task failed: {}", e)).into()),
            Err(_) => Err(BackendError::Timeout(limit).into()),
        }
    }

    fn localize(&self, detection: &RawDetection, depth: &DepthImage, pose: &RobotPose) -> DetectionRecord {
        let estimate = self.estimator.estimate(detection, depth).unwrap_or_else(|e| {
            debug!("Depth unavailable: {}", e);
            DepthEstimate::Undefined
        });
        let map_location = self.mapper.compute_world_point(detection, estimate, pose);

        DetectionRecord {
            class_id: detection.class_id(),
            class_name: self.config.detector.class_name(detection.class_id()),
            confidence: detection.confidence(),
            depth: estimate.meters(),
            screen_location: ScreenLocation {
                x: detection.x(),
                y: detection.y(),
                width: detection.width(),
                height: detection.height(),
            },
            map_location,
            pose: *pose,
        }
    }
}
