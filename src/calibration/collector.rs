use anyhow::Result;
use nalgebra::Vector3;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use super::estimator::{Correspondence, MIN_CORRESPONDENCES};
use crate::camera::{ColorFrame, FramePair, Intrinsics};
use crate::config::{CalibrationConfig, DepthConfig, TrackingConfig};
use crate::error::CalibrationError;
use crate::tracker::DepthLocalizer;

/// 検出されたマーカー（コーナーはピクセル座標、検出器の並び順）
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerObservation {
    pub id: u32,
    pub corners: [(f32, f32); 4],
}

impl MarkerObservation {
    pub fn new(id: u32, corners: [(f32, f32); 4]) -> Self {
        Self { id, corners }
    }

    /// 4コーナーの平均
    pub fn center(&self) -> (f32, f32) {
        let (sx, sy) = self
            .corners
            .iter()
            .fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
        (sx / 4.0, sy / 4.0)
    }
}

/// カラー画像からマーカーを検出する
pub trait MarkerDetector {
    fn detect(&mut self, image: &ColorFrame) -> Result<Vec<MarkerObservation>>;
}

/// マーカーID → ターゲット座標系の既知位置
#[derive(Debug, Clone, Default)]
pub struct MarkerTargets {
    positions: BTreeMap<u32, Vector3<f64>>,
}

impl MarkerTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &CalibrationConfig) -> Self {
        let mut targets = Self::new();
        for marker in &config.markers {
            targets.insert(marker.id, Vector3::from(marker.position));
        }
        targets
    }

    pub fn insert(&mut self, id: u32, position: Vector3<f64>) {
        if self.positions.insert(id, position).is_some() {
            warn!(marker_id = id, "duplicate marker target; keeping the last one");
        }
    }

    pub fn get(&self, id: u32) -> Option<&Vector3<f64>> {
        self.positions.get(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.positions.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// 検出マーカーを深度で3D化し、既知位置と対応づける
pub struct CorrespondenceCollector {
    localizer: DepthLocalizer,
    targets: MarkerTargets,
}

impl CorrespondenceCollector {
    pub fn new(localizer: DepthLocalizer, targets: MarkerTargets) -> Self {
        Self { localizer, targets }
    }

    pub fn from_config(tracking: &TrackingConfig, depth: &DepthConfig, calibration: &CalibrationConfig) -> Self {
        Self::new(
            DepthLocalizer::from_config(tracking, depth),
            MarkerTargets::from_config(calibration),
        )
    }

    pub fn targets(&self) -> &MarkerTargets {
        &self.targets
    }

    /// 1フレーム分の対応点を集める（マーカーID昇順）
    ///
    /// 既知位置の無いID・深度の取れないマーカーは捨てる。
    /// 同じIDが複数検出された場合は最初の1つだけ使う。
    pub fn collect(
        &self,
        frames: &FramePair,
        intrinsics: &Intrinsics,
        observations: &[MarkerObservation],
    ) -> Result<Vec<Correspondence>, CalibrationError> {
        if observations.len() < MIN_CORRESPONDENCES {
            return Err(CalibrationError::InsufficientMarkers {
                found: observations.len(),
            });
        }

        let mut seen = BTreeSet::new();
        let mut correspondences = Vec::with_capacity(observations.len());

        for marker in observations {
            if !seen.insert(marker.id) {
                debug!(marker_id = marker.id, "duplicate detection ignored");
                continue;
            }
            let Some(target) = self.targets.get(marker.id) else {
                debug!(marker_id = marker.id, "marker has no known position");
                continue;
            };
            let center = marker.center();
            let Some(sensor) = self.localizer.measure_once(&frames.depth, intrinsics, center) else {
                warn!(
                    marker_id = marker.id,
                    "no valid depth at marker center ({:.1}, {:.1})",
                    center.0,
                    center.1
                );
                continue;
            };
            correspondences.push(Correspondence::new(marker.id, sensor, *target));
        }

        if correspondences.len() < MIN_CORRESPONDENCES {
            return Err(CalibrationError::InsufficientCorrespondences {
                found: correspondences.len(),
            });
        }

        correspondences.sort_by_key(|c| c.marker_id);
        Ok(correspondences)
    }
}
