//! Consumers of detection batches and dashboard telemetry

use crate::error::SinkError;
use crate::types::{DetectionBatch, Statistics};
use async_trait::async_trait;
use image::RgbImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Receives every detection batch meant for the robot controller
#[async_trait]
pub trait ControllerSink: Send + Sync {
    async fn deliver(&self, batch: &DetectionBatch) -> Result<(), SinkError>;
}

/// Everything the dashboard shows for one frame
#[derive(Debug, Clone)]
pub struct DashboardUpdate {
    pub color: Option<Arc<RgbImage>>,
    pub depth_map: Option<Arc<RgbImage>>,
    pub batch: DetectionBatch,
    pub stats: Statistics,
}

#[async_trait]
pub trait DashboardSink: Send + Sync {
    async fn deliver(&self, update: &DashboardUpdate) -> Result<(), SinkError>;
}

/// Appends one JSON document per batch
pub struct JsonLinesSink {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl JsonLinesSink {
    pub fn new(writer: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self { writer: Mutex::new(writer) }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(tokio::io::stdout()))
    }

    /// Open `path` for appending, creating it if needed
    pub async fn append_to(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .await?;
        info!("Writing detection records to {}", path.as_ref().display());
        Ok(Self::new(Box::new(file)))
    }
}

#[async_trait]
impl ControllerSink for JsonLinesSink {
    async fn deliver(&self, batch: &DetectionBatch) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(batch)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotStats<'a> {
    frame_number: u64,
    #[serde(flatten)]
    stats: &'a Statistics,
}

/// Overwrites the latest imagery and telemetry in a directory
pub struct SnapshotDirSink {
    dir: PathBuf,
}

impl SnapshotDirSink {
    pub async fn create(dir: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        info!("Dashboard snapshots in {}", dir.display());
        Ok(Self { dir })
    }

    async fn save_image(&self, image: &Arc<RgbImage>, name: &str) -> Result<(), SinkError> {
        let image = image.clone();
        let path = self.dir.join(name);
        tokio::task::spawn_blocking(move || image.save(path))
            .await
            .map_err(|e| SinkError::Unavailable(format!("image writer panicked: {}", e)))??;
        Ok(())
    }
}

#[async_trait]
impl DashboardSink for SnapshotDirSink {
    async fn deliver(&self, update: &DashboardUpdate) -> Result<(), SinkError> {
        if let Some(color) = &update.color {
            self.save_image(color, "color.png").await?;
        }
        if let Some(depth_map) = &update.depth_map {
            self.save_image(depth_map, "depth.png").await?;
        }

        let detections = serde_json::to_vec_pretty(&update.batch)?;
        tokio::fs::write(self.dir.join("detections.json"), detections).await?;

        let stats = SnapshotStats { frame_number: update.batch.frame_number, stats: &update.stats };
        tokio::fs::write(self.dir.join("stats.json"), serde_json::to_vec_pretty(&stats)?).await?;
        Ok(())
    }
}

/// Logs what would have been sent
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl DashboardSink for LogSink {
    async fn deliver(&self, update: &DashboardUpdate) -> Result<(), SinkError> {
        let s = &update.stats;
        debug!(
            "frame {}: {} detections, {:.1} fps, invoke {:.3}s, loop {:.3}s, gps {}",
            update.batch.frame_number,
            update.batch.len(),
            s.fps,
            s.invoke_time,
            s.loop_time,
            s.gps_connected
        );
        Ok(())
    }
}

#[async_trait]
impl ControllerSink for LogSink {
    async fn deliver(&self, batch: &DetectionBatch) -> Result<(), SinkError> {
        debug!("frame {}: {} detections", batch.frame_number, batch.len());
        Ok(())
    }
}
