use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// 歪みモデル（係数の並びは [k1, k2, p1, p2, k3]）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistortionModel {
    None,
    BrownConrady,
    InverseBrownConrady,
    /// 魚眼。係数は [k1, k2, k3, k4, -]
    KannalaBrandt4,
}

/// カメラ内部パラメータ。プロセス中は不変
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub width: u32,
    pub height: u32,
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    pub model: DistortionModel,
    pub coeffs: [f32; 5],
}

/// Brown-Conrady 系の不動点反復回数
const UNDISTORT_ITERATIONS: usize = 10;
/// Kannala-Brandt の Newton 反復回数
const FISHEYE_ITERATIONS: usize = 4;

impl Intrinsics {
    /// 歪みなしのピンホールモデル
    pub fn pinhole(width: u32, height: u32, fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self {
            width,
            height,
            fx,
            fy,
            cx,
            cy,
            model: DistortionModel::None,
            coeffs: [0.0; 5],
        }
    }

    /// ピクセルを正規化カメラ座標 (z = 1) に戻す
    pub fn undistort_normalized(&self, u: f32, v: f32) -> (f32, f32) {
        let xo = (u - self.cx) / self.fx;
        let yo = (v - self.cy) / self.fy;
        let [c0, c1, c2, c3, c4] = self.coeffs;

        match self.model {
            DistortionModel::None => (xo, yo),
            DistortionModel::BrownConrady => {
                let (mut x, mut y) = (xo, yo);
                for _ in 0..UNDISTORT_ITERATIONS {
                    let r2 = x * x + y * y;
                    let icdist = 1.0 / (1.0 + ((c4 * r2 + c1) * r2 + c0) * r2);
                    let delta_x = 2.0 * c2 * x * y + c3 * (r2 + 2.0 * x * x);
                    let delta_y = 2.0 * c3 * x * y + c2 * (r2 + 2.0 * y * y);
                    x = (xo - delta_x) * icdist;
                    y = (yo - delta_y) * icdist;
                }
                (x, y)
            }
            DistortionModel::InverseBrownConrady => {
                let (mut x, mut y) = (xo, yo);
                for _ in 0..UNDISTORT_ITERATIONS {
                    let r2 = x * x + y * y;
                    let icdist = 1.0 / (1.0 + ((c4 * r2 + c1) * r2 + c0) * r2);
                    let xq = x / icdist;
                    let yq = y / icdist;
                    let delta_x = 2.0 * c2 * xq * yq + c3 * (r2 + 2.0 * xq * xq);
                    let delta_y = 2.0 * c3 * xq * yq + c2 * (r2 + 2.0 * yq * yq);
                    x = (xo - delta_x) * icdist;
                    y = (yo - delta_y) * icdist;
                }
                (x, y)
            }
            DistortionModel::KannalaBrandt4 => {
                let rd = (xo * xo + yo * yo).sqrt().max(f32::EPSILON);
                let mut theta = rd;
                let mut theta2 = rd * rd;
                for _ in 0..FISHEYE_ITERATIONS {
                    let f = theta * (1.0 + theta2 * (c0 + theta2 * (c1 + theta2 * (c2 + theta2 * c3))))
                        - rd;
                    if f.abs() < f32::EPSILON {
                        break;
                    }
                    let df = 1.0
                        + theta2 * (3.0 * c0 + theta2 * (5.0 * c1 + theta2 * (7.0 * c2 + 9.0 * theta2 * c3)));
                    theta -= f / df;
                    theta2 = theta * theta;
                }
                let r = theta.tan();
                (xo * r / rd, yo * r / rd)
            }
        }
    }
}

/// 逆ピンホール投影: ピクセル + 深度（メートル）→ カメラ座標系の3D点
pub fn deproject_pixel_to_point(intrinsics: &Intrinsics, pixel: (f32, f32), depth: f32) -> Vector3<f64> {
    let (x, y) = intrinsics.undistort_normalized(pixel.0, pixel.1);
    Vector3::new(
        (depth * x) as f64,
        (depth * y) as f64,
        depth as f64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_intrinsics() -> Intrinsics {
        Intrinsics::pinhole(640, 480, 600.0, 600.0, 320.0, 240.0)
    }

    /// Brown-Conrady の順方向歪み（正規化座標）
    fn distort(x: f32, y: f32, c: [f32; 5]) -> (f32, f32) {
        let r2 = x * x + y * y;
        let f = 1.0 + c[0] * r2 + c[1] * r2 * r2 + c[4] * r2 * r2 * r2;
        let xd = x * f + 2.0 * c[2] * x * y + c[3] * (r2 + 2.0 * x * x);
        let yd = y * f + 2.0 * c[3] * x * y + c[2] * (r2 + 2.0 * y * y);
        (xd, yd)
    }

    #[test]
    fn test_principal_point_lies_on_axis() {
        let p = deproject_pixel_to_point(&test_intrinsics(), (320.0, 240.0), 2.0);
        assert!(p.x.abs() < 1e-9);
        assert!(p.y.abs() < 1e-9);
        assert!((p.z - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_pinhole_offset() {
        // 120px右 @ fx=600, 深度2m → x = 0.4m
        let p = deproject_pixel_to_point(&test_intrinsics(), (440.0, 360.0), 2.0);
        assert!((p.x - 0.4).abs() < 1e-6, "x: {}", p.x);
        assert!((p.y - 0.4).abs() < 1e-6, "y: {}", p.y);
        assert!((p.z - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_brown_conrady_zero_coeffs_matches_pinhole() {
        let mut intr = test_intrinsics();
        intr.model = DistortionModel::BrownConrady;
        let a = deproject_pixel_to_point(&intr, (100.0, 50.0), 3.0);
        let b = deproject_pixel_to_point(&test_intrinsics(), (100.0, 50.0), 3.0);
        assert!((a - b).norm() < 1e-6);
    }

    #[test]
    fn test_brown_conrady_inverts_forward_distortion() {
        let coeffs = [0.05, -0.01, 0.001, -0.002, 0.0];
        let mut intr = test_intrinsics();
        intr.model = DistortionModel::BrownConrady;
        intr.coeffs = coeffs;

        let (x, y) = (0.25f32, -0.15f32);
        let (xd, yd) = distort(x, y, coeffs);
        let u = xd * intr.fx + intr.cx;
        let v = yd * intr.fy + intr.cy;

        let (ux, uy) = intr.undistort_normalized(u, v);
        assert!((ux - x).abs() < 1e-4, "x: {} vs {}", ux, x);
        assert!((uy - y).abs() < 1e-4, "y: {} vs {}", uy, y);
    }

    #[test]
    fn test_fisheye_near_center_is_pinhole() {
        let mut intr = test_intrinsics();
        intr.model = DistortionModel::KannalaBrandt4;
        let (x, y) = intr.undistort_normalized(326.0, 240.0);
        // 小角度では tan(θ) ≈ θ
        assert!((x - 0.01).abs() < 1e-5);
        assert!(y.abs() < 1e-6);
    }
}
