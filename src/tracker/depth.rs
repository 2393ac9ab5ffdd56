use nalgebra::Vector3;
use tracing::debug;

use super::tracks::Track;
use crate::camera::{deproject_pixel_to_point, DepthFrame, Intrinsics};
use crate::config::{DepthConfig, TrackingConfig};
use crate::pose::{BBox, KeypointIndex, Pose};

/// 足元ROIの深度サンプリング設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoiWindow {
    /// 半径（ピクセル）
    pub half_size: u32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl RoiWindow {
    pub fn from_config(config: &DepthConfig) -> Self {
        Self {
            half_size: config.roi_size,
            min_depth: config.roi_min_depth,
            max_depth: config.roi_max_depth,
        }
    }

    /// anchor を中心とした正方窓の有効深度の中央値
    ///
    /// 窓は画像内にクリップし、[min_depth, max_depth] 外のサンプルは捨てる。
    /// 有効サンプルが無い・anchor が非有限値ならNone。
    pub fn sample(&self, frame: &DepthFrame, anchor: (f32, f32)) -> Option<f32> {
        if frame.width == 0 || frame.height == 0 {
            return None;
        }
        if !(anchor.0.is_finite() && anchor.1.is_finite()) {
            return None;
        }
        // f32 → i64 は飽和キャスト。窓の端も飽和演算で求める
        let cx = anchor.0 as i64;
        let cy = anchor.1 as i64;
        let r = self.half_size as i64;

        let x_start = cx.saturating_sub(r).max(0);
        let x_end = cx.saturating_add(r + 1).min(frame.width as i64);
        let y_start = cy.saturating_sub(r).max(0);
        let y_end = cy.saturating_add(r + 1).min(frame.height as i64);

        let mut samples = Vec::new();
        for y in y_start..y_end {
            for x in x_start..x_end {
                if let Some(d) = frame.meters_at(x as u32, y as u32) {
                    if d >= self.min_depth && d <= self.max_depth {
                        samples.push(d);
                    }
                }
            }
        }
        median(&mut samples)
    }
}

/// 中央値。偶数個なら中央2値の平均
fn median(values: &mut [f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// トラックごとの足元3D位置（カメラ座標系）を求める
#[derive(Debug, Clone)]
pub struct DepthLocalizer {
    feet_confidence: f32,
    roi: RoiWindow,
}

impl DepthLocalizer {
    pub fn new(feet_confidence: f32, roi: RoiWindow) -> Self {
        Self { feet_confidence, roi }
    }

    pub fn from_config(tracking: &TrackingConfig, depth: &DepthConfig) -> Self {
        Self::new(tracking.feet_confidence, RoiWindow::from_config(depth))
    }

    pub fn roi(&self) -> &RoiWindow {
        &self.roi
    }

    /// 足元のアンカーピクセル
    ///
    /// 両足首が閾値超 → 中点、片方のみ → その足首、どちらも不可 → BBox下辺中央
    pub fn anchor_pixel(&self, pose: &Pose, bbox: &BBox) -> (f32, f32) {
        let left = pose.get(KeypointIndex::LeftAnkle);
        let right = pose.get(KeypointIndex::RightAnkle);

        match (left.exceeds(self.feet_confidence), right.exceeds(self.feet_confidence)) {
            (true, true) => ((left.x + right.x) / 2.0, (left.y + right.y) / 2.0),
            (true, false) => left.position(),
            (false, true) => right.position(),
            (false, false) => bbox.bottom_center(),
        }
    }

    /// 単発計測（平滑化なし）。キャリブレーションのマーカー位置に使う
    pub fn measure_once(
        &self,
        frame: &DepthFrame,
        intrinsics: &Intrinsics,
        pixel: (f32, f32),
    ) -> Option<Vector3<f64>> {
        let depth = self.roi.sample(frame, pixel)?;
        Some(deproject_pixel_to_point(intrinsics, pixel, depth))
    }

    /// トラックの足元位置を計測し、EMAで平滑化した深度で逆投影する
    ///
    /// 有効深度が無いフレームはNoneを返し、平滑化状態は保持する。
    pub fn localize(
        &self,
        track: &mut Track,
        pose: &Pose,
        bbox: &BBox,
        frame: &DepthFrame,
        intrinsics: &Intrinsics,
    ) -> Option<Vector3<f64>> {
        let anchor = self.anchor_pixel(pose, bbox);

        let Some(sample) = self.roi.sample(frame, anchor) else {
            debug!(
                track_id = track.id,
                "no valid depth at ({:.1}, {:.1})",
                anchor.0,
                anchor.1
            );
            return None;
        };

        let depth = track.depth.apply(sample);
        Some(deproject_pixel_to_point(intrinsics, anchor, depth))
    }
}
