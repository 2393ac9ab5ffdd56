use anyhow::{bail, Context, Result};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::transform::CalibrationTransform;

const STORE_VERSION: u32 = 1;
const ROTATION_TOLERANCE: f64 = 1e-6;

/// 保存形式（rotation は row-major）
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredTransform {
    version: u32,
    scale: f64,
    rotation: [[f64; 3]; 3],
    translation: [f64; 3],
}

impl From<&CalibrationTransform> for StoredTransform {
    fn from(t: &CalibrationTransform) -> Self {
        let mut rotation = [[0.0; 3]; 3];
        for (r, row) in rotation.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                *value = t.rotation[(r, c)];
            }
        }
        Self {
            version: STORE_VERSION,
            scale: t.scale,
            rotation,
            translation: [t.translation.x, t.translation.y, t.translation.z],
        }
    }
}

impl StoredTransform {
    fn into_transform(self) -> CalibrationTransform {
        let r = self.rotation;
        CalibrationTransform::new(
            self.scale,
            Matrix3::new(
                r[0][0], r[0][1], r[0][2],
                r[1][0], r[1][1], r[1][2],
                r[2][0], r[2][1], r[2][2],
            ),
            Vector3::from(self.translation),
        )
    }
}

/// キャリブレーション結果の保存先（JSONファイル）
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    path: PathBuf,
}

impl CalibrationStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 保存済みの変換を読む。ファイルが無ければ `Ok(None)`
    pub fn load(&self) -> Result<Option<CalibrationTransform>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read calibration file {}", self.path.display())
                })
            }
        };

        let stored: StoredTransform =
            serde_json::from_str(&content).context("Failed to parse calibration file")?;
        if stored.version != STORE_VERSION {
            bail!(
                "Unsupported calibration file version {} (expected {})",
                stored.version,
                STORE_VERSION
            );
        }
        if !(stored.scale.is_finite() && stored.scale > 0.0) {
            bail!("Invalid calibration scale {}", stored.scale);
        }

        let transform = stored.into_transform();
        if !transform.is_proper_rotation(ROTATION_TOLERANCE) {
            bail!("Calibration rotation is not a proper rotation matrix");
        }
        Ok(Some(transform))
    }

    /// ファイルが無ければ恒等変換
    pub fn load_or_identity(&self) -> Result<CalibrationTransform> {
        Ok(self.load()?.unwrap_or_else(CalibrationTransform::identity))
    }

    /// 一時ファイルに書いてから rename で置き換える
    pub fn save(&self, transform: &CalibrationTransform) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).context("Failed to create calibration directory")?;
            }
        }

        let json = serde_json::to_string_pretty(&StoredTransform::from(transform))?;
        let tmp = self.temp_path();
        fs::write(&tmp, json).context("Failed to write calibration file")?;
        fs::rename(&tmp, &self.path).context("Failed to replace calibration file")?;
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }
}
