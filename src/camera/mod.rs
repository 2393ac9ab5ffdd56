pub mod frame;
pub mod intrinsics;

pub use frame::{ColorFrame, DepthFrame, FramePair, FrameSource, StreamProfile};
pub use intrinsics::{deproject_pixel_to_point, DistortionModel, Intrinsics};
