pub mod collector;
pub mod estimator;
pub mod procedure;
pub mod store;
pub mod transform;

#[cfg(feature = "desktop")]
pub mod aruco;

pub use collector::{CorrespondenceCollector, MarkerDetector, MarkerObservation, MarkerTargets};
pub use estimator::{check_spread, estimate_similarity, fit_residual, Correspondence, MIN_CORRESPONDENCES};
pub use procedure::{CalibrationOutcome, CalibrationProcedure, CalibrationState, OperatorPrompt, StdinPrompt};
pub use store::CalibrationStore;
pub use transform::{CalibrationTransform, CoordinateTransformer};

#[cfg(feature = "desktop")]
pub use aruco::{generate_marker_images, parse_dictionary, ArucoMarkerDetector};
