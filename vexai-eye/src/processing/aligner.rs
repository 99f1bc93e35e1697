//! Pairs depth and color from one acquisition cycle

use crate::types::{DepthImage, Frame, RawFramePair};
use tracing::warn;

/// Log once per this many dropped pairs
const DROP_LOG_INTERVAL: u64 = 100;

#[derive(Debug, Default)]
pub struct FrameAligner {
    dropped: u64,
}

impl FrameAligner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a raw pair; incomplete or malformed pairs are dropped and counted
    pub fn align(&mut self, raw: RawFramePair) -> Option<Frame> {
        match Self::validate(raw) {
            Ok(frame) => Some(frame),
            Err(reason) => {
                self.dropped += 1;
                if self.dropped == 1 || self.dropped % DROP_LOG_INTERVAL == 0 {
                    warn!("Dropped frame pair ({} total): {}", self.dropped, reason);
                }
                None
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn validate(raw: RawFramePair) -> Result<Frame, String> {
        let depth = raw.depth.ok_or("missing depth")?;
        let color = raw.color.ok_or("missing color")?;

        if color.width() == 0 || color.height() == 0 {
            return Err("empty color image".to_string());
        }
        if depth.data.is_empty() {
            return Err("empty depth buffer".to_string());
        }

        let (width, height) = (depth.width, depth.height);
        let expected = width as usize * height as usize;
        if depth.data.len() != expected {
            return Err(format!(
                "depth buffer holds {} samples, expected {}x{}",
                depth.data.len(),
                width,
                height
            ));
        }
        let depth = DepthImage::from_raw(width, height, depth.data)
            .ok_or_else(|| format!("depth buffer does not fit {}x{}", width, height))?;

        Ok(Frame::new(depth, color, raw.timestamp, raw.frame_number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DepthBuffer;
    use chrono::Utc;
    use image::RgbImage;

    fn pair(depth: Option<DepthBuffer>, color: Option<RgbImage>) -> RawFramePair {
        RawFramePair { depth, color, timestamp: Utc::now(), frame_number: 7 }
    }

    fn depth(width: u32, height: u32, len: usize) -> DepthBuffer {
        DepthBuffer { width, height, data: vec![1000; len] }
    }

    #[test]
    fn test_align_complete_pair() {
        let mut aligner = FrameAligner::new();
        let frame = aligner
            .align(pair(Some(depth(4, 3, 12)), Some(RgbImage::new(4, 3))))
            .unwrap();
        assert_eq!(frame.frame_number(), 7);
        assert_eq!(frame.depth().dimensions(), (4, 3));
        assert_eq!(aligner.dropped(), 0);
    }

    #[test]
    fn test_align_missing_color() {
        let mut aligner = FrameAligner::new();
        assert!(aligner.align(pair(Some(depth(4, 3, 12)), None)).is_none());
        assert_eq!(aligner.dropped(), 1);
    }

    #[test]
    fn test_align_missing_depth() {
        let mut aligner = FrameAligner::new();
        assert!(aligner.align(pair(None, Some(RgbImage::new(4, 3)))).is_none());
        assert_eq!(aligner.dropped(), 1);
    }

    #[test]
    fn test_align_short_depth_buffer() {
        let mut aligner = FrameAligner::new();
        assert!(aligner
            .align(pair(Some(depth(4, 3, 11)), Some(RgbImage::new(4, 3))))
            .is_none());
    }

    #[test]
    fn test_align_empty_color() {
        let mut aligner = FrameAligner::new();
        assert!(aligner
            .align(pair(Some(depth(4, 3, 12)), Some(RgbImage::new(0, 0))))
            .is_none());
        assert!(aligner.align(pair(Some(depth(0, 0, 0)), Some(RgbImage::new(4, 3)))).is_none());
        assert_eq!(aligner.dropped(), 2);
    }
}
