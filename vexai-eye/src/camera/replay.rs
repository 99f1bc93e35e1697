//! Replays recorded frame pairs from a directory

use super::{CameraProfile, DepthCamera};
use crate::error::CameraError;
use crate::types::{DepthBuffer, DepthImage, RawFramePair};
use async_trait::async_trait;
use chrono::Utc;
use image::RgbImage;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const PROFILE_FILE: &str = "profile.toml";

/// One recorded cycle; either half may be missing
#[derive(Debug, Clone, Default)]
struct RecordedPair {
    color: Option<PathBuf>,
    depth: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct ReplayState {
    pairs: Vec<RecordedPair>,
    cursor: usize,
    frame_number: u64,
    next_due: Option<Instant>,
}

/// Camera backed by `color_NNNN.png` / `depth_NNNN.png` files and a
/// `profile.toml` holding the calibration
pub struct ReplayCamera {
    dir: PathBuf,
    frame_interval: Duration,
    looping: bool,
    state: Mutex<ReplayState>,
    is_running: RwLock<bool>,
}

impl ReplayCamera {
    pub fn new(dir: impl Into<PathBuf>, frame_rate: u32, looping: bool) -> Self {
        let frame_rate = frame_rate.max(1);
        Self {
            dir: dir.into(),
            frame_interval: Duration::from_secs_f64(1.0 / frame_rate as f64),
            looping,
            state: Mutex::new(ReplayState::default()),
            is_running: RwLock::new(false),
        }
    }

    fn scan(dir: &Path) -> Result<Vec<RecordedPair>, CameraError> {
        let mut pairs: BTreeMap<u32, RecordedPair> = BTreeMap::new();

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if path.extension().and_then(|e| e.to_str()) != Some("png") {
                continue;
            }

            if let Some(index) = stem.strip_prefix("color_").and_then(|n| n.parse().ok()) {
                pairs.entry(index).or_default().color = Some(path);
            } else if let Some(index) = stem.strip_prefix("depth_").and_then(|n| n.parse().ok()) {
                pairs.entry(index).or_default().depth = Some(path);
            }
        }

        Ok(pairs.into_values().collect())
    }

    fn load(pair: &RecordedPair) -> Result<(Option<RgbImage>, Option<DepthBuffer>), CameraError> {
        let color = match &pair.color {
            Some(path) => Some(image::open(path)?.to_rgb8()),
            None => None,
        };

        let depth = match &pair.depth {
            Some(path) => {
                let image = image::open(path)?.into_luma16();
                let (width, height) = image.dimensions();
                Some(DepthBuffer { width, height, data: image.into_raw() })
            }
            None => None,
        };

        Ok((color, depth))
    }

    /// Advance the cursor and claim the next pair, honoring looping
    fn next_pair(&self) -> Result<(RecordedPair, u64), CameraError> {
        let mut state = self.state.lock();
        if state.cursor >= state.pairs.len() {
            if !self.looping || state.pairs.is_empty() {
                return Err(CameraError::Disconnected("recording exhausted".to_string()));
            }
            debug!("Replay wrapped after {} frames", state.pairs.len());
            state.cursor = 0;
        }

        let pair = state.pairs[state.cursor].clone();
        state.cursor += 1;
        state.frame_number += 1;
        Ok((pair, state.frame_number))
    }
}

#[async_trait]
impl DepthCamera for ReplayCamera {
    async fn start(&self) -> Result<CameraProfile, CameraError> {
        if !self.dir.is_dir() {
            return Err(CameraError::Unavailable(format!(
                "replay directory {} not found",
                self.dir.display()
            )));
        }

        let profile = CameraProfile::from_file(self.dir.join(PROFILE_FILE))?;
        let pairs = Self::scan(&self.dir)?;
        if pairs.is_empty() {
            return Err(CameraError::Unavailable(format!(
                "no recorded frames in {}",
                self.dir.display()
            )));
        }

        info!(
            "Replay camera started: {} frames from {} (loop: {})",
            pairs.len(),
            self.dir.display(),
            self.looping
        );

        *self.state.lock() = ReplayState { pairs, ..ReplayState::default() };
        *self.is_running.write() = true;
        Ok(profile)
    }

    async fn get_frames(&self, timeout: Duration) -> Result<RawFramePair, CameraError> {
        if !self.is_running() {
            return Err(CameraError::Disconnected("camera stopped".to_string()));
        }

        let now = Instant::now();
        let due = self.state.lock().next_due.unwrap_or(now);
        if due > now {
            let wait = due - now;
            if wait > timeout {
                tokio::time::sleep(timeout).await;
                return Err(CameraError::Timeout(timeout));
            }
            tokio::time::sleep(wait).await;
        }
        self.state.lock().next_due = Some(due.max(now) + self.frame_interval);

        let (pair, frame_number) = self.next_pair()?;
        let (color, depth) = tokio::task::spawn_blocking(move || Self::load(&pair))
            .await
            .map_err(|e| CameraError::BadFrame(format!("frame loader panicked: {}", e)))?
            .map_err(|e| CameraError::BadFrame(e.to_string()))?;

        Ok(RawFramePair { depth, color, timestamp: Utc::now(), frame_number })
    }

    fn stop(&self) {
        let mut running = self.is_running.write();
        if *running {
            *running = false;
            info!("Replay camera stopped");
        }
    }

    fn is_running(&self) -> bool {
        *self.is_running.read()
    }
}

/// Write one cycle in the layout `ReplayCamera` reads
pub fn write_recorded_pair(
    dir: &Path,
    index: u32,
    color: Option<&RgbImage>,
    depth: Option<&DepthImage>,
) -> Result<(), CameraError> {
    if let Some(color) = color {
        color.save(dir.join(format!("color_{:04}.png", index)))?;
    }
    if let Some(depth) = depth {
        depth.save(dir.join(format!("depth_{:04}.png", index)))?;
    }
    Ok(())
}
