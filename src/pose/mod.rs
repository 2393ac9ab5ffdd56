pub mod detection;
pub mod keypoint;

pub use detection::{BBox, Detection, PoseDetector};
pub use keypoint::{Keypoint, KeypointIndex, Pose};
