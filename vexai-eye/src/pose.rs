//! Robot pose sources

use crate::types::RobotPose;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Latest known robot pose. Implementations must not block.
pub trait PoseSource: Send + Sync {
    fn current_pose(&self) -> RobotPose;
}

/// Always reports the same pose
#[derive(Debug, Clone)]
pub struct FixedPose {
    pose: RobotPose,
}

impl FixedPose {
    pub fn new(pose: RobotPose) -> Self {
        Self { pose }
    }
}

impl PoseSource for FixedPose {
    fn current_pose(&self) -> RobotPose {
        self.pose
    }
}

/// Last pose written by a background reader, marked disconnected once stale
#[derive(Debug, Clone)]
pub struct SharedPose {
    latest: Arc<RwLock<Option<(RobotPose, Instant)>>>,
    stale_after: Duration,
}

impl SharedPose {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            latest: Arc::new(RwLock::new(None)),
            stale_after,
        }
    }

    pub fn update(&self, pose: RobotPose) {
        *self.latest.write() = Some((pose, Instant::now()));
    }

    /// Feed the pose from JSON lines, one `RobotPose` document per line
    pub fn spawn_json_reader<R>(&self, reader: R) -> JoinHandle<()>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let shared = self.clone();
        tokio::spawn(async move {
            let mut lines = reader.lines();
            let mut rejected = 0u64;
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => match serde_json::from_str::<RobotPose>(&line) {
                        Ok(pose) => shared.update(pose),
                        Err(e) => {
                            rejected += 1;
                            if rejected == 1 || rejected % 100 == 0 {
                                warn!("Ignoring malformed pose ({} so far): {}", rejected, e);
                            }
                        }
                    },
                    Ok(None) => {
                        info!("Pose stream closed");
                        break;
                    }
                    Err(e) => {
                        warn!("Pose stream error: {}", e);
                        break;
                    }
                }
            }
            debug!("Pose reader exiting");
        })
    }
}

impl PoseSource for SharedPose {
    fn current_pose(&self) -> RobotPose {
        match *self.latest.read() {
            Some((pose, at)) if at.elapsed() <= self.stale_after => pose,
            Some((pose, _)) => RobotPose { connected: false, ..pose },
            None => RobotPose::disconnected(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_pose() {
        let source = FixedPose::new(RobotPose::new(1.0, 2.0, 0.0, 45.0));
        assert_eq!(source.current_pose().azimuth, 45.0);
        assert!(source.current_pose().connected);
    }

    #[test]
    fn test_shared_pose_starts_disconnected() {
        let shared = SharedPose::new(Duration::from_secs(1));
        assert_eq!(shared.current_pose(), RobotPose::disconnected());
    }

    #[test]
    fn test_shared_pose_goes_stale() {
        let shared = SharedPose::new(Duration::from_millis(20));
        shared.update(RobotPose::new(0.3, 0.4, 0.0, 10.0));
        assert!(shared.current_pose().connected);

        std::thread::sleep(Duration::from_millis(40));
        let stale = shared.current_pose();
        assert!(!stale.connected);
        assert_eq!(stale.x, 0.3);
    }

    #[tokio::test]
    async fn test_json_reader_updates_pose() {
        let shared = SharedPose::new(Duration::from_secs(5));
        let input = b"{\"x\":1.0,\"y\":2.0,\"z\":0.0,\"azimuth\":90.0,\"elevation\":0.0,\"rotation\":0.0,\"frameCount\":3,\"status\":0,\"connected\":true}\nnot json\n\n";
        let handle = shared.spawn_json_reader(&input[..]);
        handle.await.unwrap();

        let pose = shared.current_pose();
        assert_eq!(pose.x, 1.0);
        assert_eq!(pose.frame_count, 3);
        assert!(pose.connected);
    }
}
