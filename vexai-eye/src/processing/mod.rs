//! Per-frame processing stages

pub mod aligner;
pub mod depth;
pub mod mapper;

pub use aligner::FrameAligner;
pub use depth::DepthEstimator;
pub use mapper::CoordinateMapper;
