use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::camera::StreamProfile;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub depth: DepthConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
}

/// 人物検出結果のフィルタとトラック数の上限
#[derive(Debug, Deserialize, Clone)]
pub struct TrackingConfig {
    /// 人物クラスID (COCO: 0)
    #[serde(default = "default_person_class")]
    pub person_class: u32,
    /// 人物検出の信頼度閾値
    #[serde(default = "default_person_confidence")]
    pub person_confidence: f32,
    /// 足首キーポイントの信頼度閾値
    #[serde(default = "default_feet_confidence")]
    pub feet_confidence: f32,
    /// 同時追跡人数の上限
    #[serde(default = "default_max_tracks")]
    pub max_tracks: usize,
    /// これより小さいBBox（ピクセル）はそのフレームでは無視
    #[serde(default = "default_min_bbox_size")]
    pub min_bbox_size: f32,
}

fn default_person_class() -> u32 { 0 }
fn default_person_confidence() -> f32 { 0.6 }
fn default_feet_confidence() -> f32 { 0.6 }
fn default_max_tracks() -> usize { 3 }
fn default_min_bbox_size() -> f32 { 10.0 }

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            person_class: default_person_class(),
            person_confidence: default_person_confidence(),
            feet_confidence: default_feet_confidence(),
            max_tracks: default_max_tracks(),
            min_bbox_size: default_min_bbox_size(),
        }
    }
}

/// 足元ROIの深度サンプリングと平滑化
#[derive(Debug, Deserialize, Clone)]
pub struct DepthConfig {
    /// ROIの半径（ピクセル）。5なら11x11
    #[serde(default = "default_roi_size")]
    pub roi_size: u32,
    /// 有効深度の下限（メートル）
    #[serde(default = "default_roi_min_depth")]
    pub roi_min_depth: f32,
    /// 有効深度の上限（メートル）
    #[serde(default = "default_roi_max_depth")]
    pub roi_max_depth: f32,
    /// EMA係数
    #[serde(default = "default_ema_alpha")]
    pub ema_alpha: f32,
}

fn default_roi_size() -> u32 { 5 }
fn default_roi_min_depth() -> f32 { 1.0 }
fn default_roi_max_depth() -> f32 { 4.0 }
fn default_ema_alpha() -> f32 { 0.2 }

impl Default for DepthConfig {
    fn default() -> Self {
        Self {
            roi_size: default_roi_size(),
            roi_min_depth: default_roi_min_depth(),
            roi_max_depth: default_roi_max_depth(),
            ema_alpha: default_ema_alpha(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaptureConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// フレーム待ちのタイムアウト（ミリ秒）
    #[serde(default = "default_frame_timeout_ms")]
    pub frame_timeout_ms: u64,
    /// 連続タイムアウトがこの回数に達したらデバイス停止とみなす
    #[serde(default = "default_max_stalled_frames")]
    pub max_stalled_frames: u32,
}

fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }
fn default_fps() -> u32 { 30 }
fn default_frame_timeout_ms() -> u64 { 5000 }
fn default_max_stalled_frames() -> u32 { 3 }

impl CaptureConfig {
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    pub fn stream_profile(&self) -> StreamProfile {
        StreamProfile {
            width: self.width,
            height: self.height,
            fps: self.fps,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            frame_timeout_ms: default_frame_timeout_ms(),
            max_stalled_frames: default_max_stalled_frames(),
        }
    }
}

/// マーカーIDとターゲット座標系での位置
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MarkerTargetConfig {
    pub id: u32,
    pub position: [f64; 3],
}

#[derive(Debug, Deserialize, Clone)]
pub struct CalibrationConfig {
    /// 変換パラメータの保存先
    #[serde(default = "default_calibration_output")]
    pub output_path: String,
    /// ArUco辞書タイプ
    #[serde(default = "default_dictionary")]
    pub dictionary: String,
    /// 既知のマーカー配置
    #[serde(default = "default_markers")]
    pub markers: Vec<MarkerTargetConfig>,
    /// 対応点の最小広がり（メートル）。一直線・一点集中の配置を弾く
    #[serde(default = "default_min_spread")]
    pub min_spread: f64,
    /// マーカー画像の一辺（ピクセル）
    #[serde(default = "default_marker_image_size")]
    pub marker_image_size: i32,
    /// マーカー画像の出力先
    #[serde(default = "default_marker_output_dir")]
    pub marker_output_dir: String,
}

fn default_calibration_output() -> String { "calibration.json".to_string() }
fn default_dictionary() -> String { "DICT_6X6_250".to_string() }
fn default_markers() -> Vec<MarkerTargetConfig> {
    vec![
        MarkerTargetConfig { id: 0, position: [0.0, 0.0, 0.0] },
        MarkerTargetConfig { id: 1, position: [1.0, 0.0, 0.0] },
        MarkerTargetConfig { id: 2, position: [0.0, 0.0, 1.0] },
    ]
}
fn default_min_spread() -> f64 { 0.05 }
fn default_marker_image_size() -> i32 { 200 }
fn default_marker_output_dir() -> String { "markers".to_string() }

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            output_path: default_calibration_output(),
            dictionary: default_dictionary(),
            markers: default_markers(),
            min_spread: default_min_spread(),
            marker_image_size: default_marker_image_size(),
            marker_output_dir: default_marker_output_dir(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config")?;
        Ok(config)
    }

    /// 読み込みに失敗した場合はデフォルト設定を使う
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                warn!("{:#}; using default config", e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.tracking.max_tracks, 3);
        assert_eq!(config.tracking.person_class, 0);
        assert_eq!(config.depth.roi_size, 5);
        assert_eq!(config.depth.roi_min_depth, 1.0);
        assert_eq!(config.depth.roi_max_depth, 4.0);
        assert_eq!(config.depth.ema_alpha, 0.2);
        assert_eq!(config.capture.frame_timeout(), Duration::from_millis(5000));
        assert_eq!(config.calibration.markers.len(), 3);
        assert_eq!(config.calibration.output_path, "calibration.json");
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = Config::parse(
            r#"
            [tracking]
            max_tracks = 5

            [depth]
            ema_alpha = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(config.tracking.max_tracks, 5);
        assert_eq!(config.tracking.person_confidence, 0.6);
        assert_eq!(config.depth.ema_alpha, 0.5);
        assert_eq!(config.depth.roi_size, 5);
    }

    #[test]
    fn test_stream_profile() {
        let config = Config::parse(
            r#"
            [capture]
            width = 640
            height = 480
            "#,
        )
        .unwrap();
        assert_eq!(
            config.capture.stream_profile(),
            StreamProfile { width: 640, height: 480, fps: 30 }
        );
    }

    #[test]
    fn test_marker_table() {
        let config = Config::parse(
            r#"
            [[calibration.markers]]
            id = 7
            position = [0.5, 0.0, 2.0]

            [[calibration.markers]]
            id = 9
            position = [1.5, 0.0, 2.0]
            "#,
        )
        .unwrap();
        assert_eq!(
            config.calibration.markers,
            vec![
                MarkerTargetConfig { id: 7, position: [0.5, 0.0, 2.0] },
                MarkerTargetConfig { id: 9, position: [1.5, 0.0, 2.0] },
            ]
        );
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = Config::load_or_default("does/not/exist.toml");
        assert_eq!(config.tracking.max_tracks, 3);
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(Config::parse("[tracking\nmax_tracks = ").is_err());
    }
}
