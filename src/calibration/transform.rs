use anyhow::Result;
use nalgebra::{Matrix3, Vector3};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

use super::store::CalibrationStore;

/// 相似変換 p' = s·R·p + t（カメラ座標系 → ターゲット座標系）
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationTransform {
    pub scale: f64,
    /// 正規直交・det = +1
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

impl CalibrationTransform {
    pub fn new(scale: f64, rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Self { scale, rotation, translation }
    }

    /// 未キャリブレーション時の変換
    pub fn identity() -> Self {
        Self::new(1.0, Matrix3::identity(), Vector3::zeros())
    }

    pub fn apply(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.scale * (self.rotation * point) + self.translation
    }

    /// R·Rᵀ ≈ I かつ det(R) ≈ +1
    pub fn is_proper_rotation(&self, tolerance: f64) -> bool {
        let r = &self.rotation;
        let orthogonality = (r * r.transpose() - Matrix3::identity()).amax();
        orthogonality < tolerance && (r.determinant() - 1.0).abs() < tolerance
    }
}

impl Default for CalibrationTransform {
    fn default() -> Self {
        Self::identity()
    }
}

/// 現在の変換への共有ハンドル
///
/// 読み手はスナップショット (`Arc`) を取り、差し替えはロック内のポインタ交換のみ。
/// 追跡ループを止めずに再読み込みできる。
#[derive(Debug, Clone)]
pub struct CoordinateTransformer {
    current: Arc<RwLock<Arc<CalibrationTransform>>>,
}

impl CoordinateTransformer {
    pub fn new(transform: CalibrationTransform) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(transform))),
        }
    }

    pub fn identity() -> Self {
        Self::new(CalibrationTransform::identity())
    }

    pub fn snapshot(&self) -> Arc<CalibrationTransform> {
        self.current.read().clone()
    }

    pub fn apply(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.snapshot().apply(point)
    }

    pub fn install(&self, transform: CalibrationTransform) {
        *self.current.write() = Arc::new(transform);
    }

    /// 保存済みの変換を読み直して差し替える（無ければ恒等変換）
    ///
    /// 読み込みに失敗した場合は現在の変換を維持する。
    pub fn reload(&self, store: &CalibrationStore) -> Result<()> {
        let transform = store.load_or_identity()?;
        info!(
            path = %store.path().display(),
            scale = transform.scale,
            "calibration transform loaded"
        );
        self.install(transform);
        Ok(())
    }
}

impl Default for CoordinateTransformer {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Rotation3, Unit};

    #[test]
    fn test_identity_returns_input() {
        let t = CoordinateTransformer::identity();
        let p = Vector3::new(0.3, -1.2, 2.5);
        assert_eq!(t.apply(&p), p);
    }

    #[test]
    fn test_scale_and_translation() {
        let t = CalibrationTransform::new(2.0, Matrix3::identity(), Vector3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(t.apply(&Vector3::new(0.0, 0.0, 2.0)), Vector3::new(1.0, 0.0, 4.0));
    }

    #[test]
    fn test_rotation_applied_before_translation() {
        let rotation = Rotation3::from_axis_angle(&Unit::new_normalize(Vector3::z()), std::f64::consts::FRAC_PI_2);
        let t = CalibrationTransform::new(1.0, rotation.into_inner(), Vector3::new(0.0, 0.0, 1.0));
        assert_relative_eq!(
            t.apply(&Vector3::new(1.0, 0.0, 0.0)),
            Vector3::new(0.0, 1.0, 1.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_is_proper_rotation() {
        assert!(CalibrationTransform::identity().is_proper_rotation(1e-9));
        let mut mirrored = CalibrationTransform::identity();
        mirrored.rotation[(2, 2)] = -1.0;
        assert!(!mirrored.is_proper_rotation(1e-9));
    }

    #[test]
    fn test_install_is_visible_to_clones() {
        let a = CoordinateTransformer::identity();
        let b = a.clone();
        let before = a.snapshot();
        b.install(CalibrationTransform::new(3.0, Matrix3::identity(), Vector3::zeros()));
        // 取得済みスナップショットは変わらない
        assert_eq!(before.scale, 1.0);
        assert_eq!(a.snapshot().scale, 3.0);
    }
}
