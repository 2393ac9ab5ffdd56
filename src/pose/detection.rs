use anyhow::Result;

use super::keypoint::Pose;
use crate::camera::ColorFrame;

/// ピクセル座標のバウンディングボックス
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BBox {
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self { x_min, y_min, x_max, y_max }
    }

    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }

    /// 整数ピクセルに切り捨てて画像内に収める
    pub fn clamped(&self, width: u32, height: u32) -> Self {
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;
        Self {
            x_min: self.x_min.trunc().max(0.0),
            y_min: self.y_min.trunc().max(0.0),
            x_max: self.x_max.trunc().min(max_x),
            y_max: self.y_max.trunc().min(max_y),
        }
    }

    /// 下辺中央（足元のフォールバック）
    pub fn bottom_center(&self) -> (f32, f32) {
        (self.x_min + self.width() / 2.0, self.y_max)
    }

    pub fn to_pixels(&self) -> [i32; 4] {
        [
            self.x_min as i32,
            self.y_min as i32,
            self.x_max as i32,
            self.y_max as i32,
        ]
    }
}

/// 1フレーム分の人物検出
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// 検出器が付与する追跡ID。未追跡ならNone
    pub track_id: Option<u32>,
    pub bbox: BBox,
    pub class_id: u32,
    pub confidence: f32,
    /// キーポイントが欠落・不正な場合はNone
    pub keypoints: Option<Pose>,
}

/// 姿勢推定つき人物検出器（追跡IDを維持する）
pub trait PoseDetector {
    fn detect(&mut self, image: &ColorFrame) -> Result<Vec<Detection>>;
}
