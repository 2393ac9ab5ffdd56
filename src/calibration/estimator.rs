//! 対応点からの相似変換推定（閉形式）
//!
//! 1. 両点群の重心を引いて中心化
//! 2. スケール = ‖中心化ターゲット‖ / ‖中心化センサ‖（フロベニウスノルム）
//! 3. H = Σ sᵢ·tᵢᵀ を SVD し R = V·Uᵀ
//! 4. det(R) < 0 なら最小特異値に対応する V の列を反転（鏡映を除く）
//! 5. t = c_t − s·R·c_s

use nalgebra::{Matrix3, Vector3};

use super::transform::CalibrationTransform;
use crate::error::CalibrationError;

/// 推定に必要な最小対応点数
pub const MIN_CORRESPONDENCES: usize = 3;

const DEGENERATE_EPS: f64 = 1e-12;

/// マーカー1個分の対応点
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub marker_id: u32,
    /// カメラ座標系
    pub sensor: Vector3<f64>,
    /// ターゲット座標系
    pub target: Vector3<f64>,
}

impl Correspondence {
    pub fn new(marker_id: u32, sensor: Vector3<f64>, target: Vector3<f64>) -> Self {
        Self { marker_id, sensor, target }
    }
}

fn centroid(points: &[Vector3<f64>]) -> Vector3<f64> {
    let sum: Vector3<f64> = points.iter().sum();
    sum / points.len() as f64
}

/// 対応点から sensor → target の相似変換を求める
///
/// 入力順が同じなら結果は決定的。一点に集中したセンサ点は
/// `DegenerateCorrespondences`。一直線の配置は呼び出し側で
/// [`check_spread`] により事前に弾くこと。
pub fn estimate_similarity(
    correspondences: &[Correspondence],
) -> Result<CalibrationTransform, CalibrationError> {
    let n = correspondences.len();
    if n < MIN_CORRESPONDENCES {
        return Err(CalibrationError::InsufficientCorrespondences { found: n });
    }

    let sensor: Vec<Vector3<f64>> = correspondences.iter().map(|c| c.sensor).collect();
    let target: Vec<Vector3<f64>> = correspondences.iter().map(|c| c.target).collect();

    let sensor_centroid = centroid(&sensor);
    let target_centroid = centroid(&target);
    let sensor_centered: Vec<_> = sensor.iter().map(|p| p - sensor_centroid).collect();
    let target_centered: Vec<_> = target.iter().map(|p| p - target_centroid).collect();

    let sensor_norm = sensor_centered.iter().map(|p| p.norm_squared()).sum::<f64>().sqrt();
    let target_norm = target_centered.iter().map(|p| p.norm_squared()).sum::<f64>().sqrt();
    if sensor_norm < DEGENERATE_EPS {
        return Err(CalibrationError::DegenerateCorrespondences);
    }
    let scale = target_norm / sensor_norm;

    let mut h = Matrix3::zeros();
    for (s, t) in sensor_centered.iter().zip(&target_centered) {
        h += s * t.transpose();
    }

    let svd = h.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(CalibrationError::DegenerateCorrespondences);
    };

    let mut v = v_t.transpose();
    let mut rotation = v * u.transpose();

    if rotation.determinant() < 0.0 {
        // 特異値の並び順に依存しないよう最小値の位置を探す
        let weakest = svd
            .singular_values
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(2);
        let flipped = -v.column(weakest);
        v.set_column(weakest, &flipped);
        rotation = v * u.transpose();
    }

    let translation = target_centroid - scale * (rotation * sensor_centroid);
    Ok(CalibrationTransform::new(scale, rotation, translation))
}

/// 点群の第2主軸方向の広がり（RMS、点と同じ単位）
pub fn point_spread(points: &[Vector3<f64>]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let c = centroid(points);
    let mut scatter = Matrix3::zeros();
    for p in points {
        let d = p - c;
        scatter += d * d.transpose();
    }

    let mut eigenvalues: Vec<f64> = scatter.symmetric_eigen().eigenvalues.iter().copied().collect();
    eigenvalues.sort_by(|a, b| b.total_cmp(a));
    (eigenvalues[1].max(0.0) / points.len() as f64).sqrt()
}

/// 一点集中・一直線の配置を弾く
pub fn check_spread(points: &[Vector3<f64>], min_spread: f64) -> Result<(), CalibrationError> {
    if point_spread(points) < min_spread {
        return Err(CalibrationError::DegenerateCorrespondences);
    }
    Ok(())
}

/// 当てはめ誤差（RMS、ターゲット座標系の単位）
pub fn fit_residual(transform: &CalibrationTransform, correspondences: &[Correspondence]) -> f64 {
    if correspondences.is_empty() {
        return 0.0;
    }
    let sum: f64 = correspondences
        .iter()
        .map(|c| (transform.apply(&c.sensor) - c.target).norm_squared())
        .sum();
    (sum / correspondences.len() as f64).sqrt()
}
