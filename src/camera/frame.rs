use anyhow::Result;
use std::time::Duration;

use super::Intrinsics;

/// 深度フレーム（カラーに位置合わせ済み、生値 z16）
#[derive(Debug, Clone)]
pub struct DepthFrame {
    pub width: u32,
    pub height: u32,
    /// row-major の生深度値
    pub data: Vec<u16>,
    /// 生値 → メートルの係数（D435系では通常 0.001）
    pub depth_scale: f32,
}

impl DepthFrame {
    pub fn new(width: u32, height: u32, data: Vec<u16>, depth_scale: f32) -> Self {
        Self { width, height, data, depth_scale }
    }

    /// 全画素を同じ生値で埋めたフレーム
    pub fn filled(width: u32, height: u32, raw: u16, depth_scale: f32) -> Self {
        Self::new(width, height, vec![raw; (width * height) as usize], depth_scale)
    }

    /// (x, y) の深度（メートル）。範囲外ならNone
    pub fn meters_at(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = (y * self.width + x) as usize;
        self.data.get(index).map(|&raw| raw as f32 * self.depth_scale)
    }

    /// 生値を書き込む。範囲外は無視
    pub fn set_raw(&mut self, x: u32, y: u32, raw: u16) {
        if x < self.width && y < self.height {
            let index = (y * self.width + x) as usize;
            if let Some(v) = self.data.get_mut(index) {
                *v = raw;
            }
        }
    }
}

/// カラーフレーム（BGR8）
#[derive(Debug, Clone)]
pub struct ColorFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl ColorFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self { width, height, data }
    }

    pub fn blank(width: u32, height: u32) -> Self {
        Self::new(width, height, vec![0; (width * height * 3) as usize])
    }
}

/// 同期済みの深度・カラーフレーム対
#[derive(Debug, Clone)]
pub struct FramePair {
    pub depth: DepthFrame,
    pub color: ColorFrame,
}

/// 要求するストリーム設定（深度・カラー共通）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamProfile {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// 深度カメラ
///
/// `start`/`stop` の失敗は致命的エラーとして呼び出し側に返す。
/// `wait_for_frames` は `timeout` 内にフレーム対が揃わなければ `Ok(None)`。
pub trait FrameSource {
    fn start(&mut self, profile: &StreamProfile) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    /// カラーストリームの内部パラメータ
    fn intrinsics(&self) -> Result<Intrinsics>;
    fn wait_for_frames(&mut self, timeout: Duration) -> Result<Option<FramePair>>;
}
