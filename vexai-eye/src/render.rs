//! Dashboard imagery

use crate::types::DepthImage;
use image::{Rgb, RgbImage};

/// Min-max normalize depth into [0.01, 255] and apply the JET colormap
pub fn colorize_depth(depth: &DepthImage) -> RgbImage {
    const LOW: f32 = 0.01;
    const HIGH: f32 = 255.0;

    let (min, max) = depth
        .pixels()
        .fold((u16::MAX, u16::MIN), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
    let range = max.saturating_sub(min) as f32;

    RgbImage::from_fn(depth.width(), depth.height(), |x, y| {
        let raw = depth.get_pixel(x, y).0[0];
        let level = if range > 0.0 {
            (raw - min) as f32 / range * (HIGH - LOW) + LOW
        } else {
            LOW
        };
        jet(level.round() as u8)
    })
}

/// JET colormap: dark blue through cyan, yellow, to dark red
pub fn jet(level: u8) -> Rgb<u8> {
    let x = level as f32 / 255.0;
    let channel = |offset: f32| ((1.5 - (4.0 * x - offset).abs()).clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jet_endpoints() {
        assert_eq!(jet(0), Rgb([0, 0, 128]));
        assert_eq!(jet(255), Rgb([128, 0, 0]));
        let mid = jet(128);
        assert!(mid.0[1] > 250);
    }

    #[test]
    fn test_colorize_depth_normalizes() {
        let mut depth = DepthImage::new(2, 1);
        depth.put_pixel(0, 0, image::Luma([500]));
        depth.put_pixel(1, 0, image::Luma([4000]));
        let colored = colorize_depth(&depth);
        assert_eq!(*colored.get_pixel(0, 0), jet(0));
        assert_eq!(*colored.get_pixel(1, 0), jet(255));
    }

    #[test]
    fn test_colorize_flat_depth() {
        let depth = DepthImage::from_pixel(3, 3, image::Luma([1200]));
        let colored = colorize_depth(&depth);
        assert!(colored.pixels().all(|p| *p == jet(0)));
    }
}
