pub mod depth;
pub mod record;
pub mod session;
pub mod smooth;
pub mod tracks;

pub use depth::{DepthLocalizer, RoiWindow};
pub use record::TrackingRecord;
pub use session::TrackingSession;
pub use smooth::DepthSmoother;
pub use tracks::{Track, TrackManager, TrackStore};
