use serde::Serialize;

/// 1フレーム・1人分の出力
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingRecord {
    pub id: u32,
    /// ターゲット座標系の足元位置。深度が取れなかったフレームはNone
    pub position: Option<[f64; 3]>,
    /// [x_min, y_min, x_max, y_max]
    pub bbox: [i32; 4],
}
