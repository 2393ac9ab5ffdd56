use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use opencv::{
    core::{Mat, Point2f, Vector},
    imgcodecs,
    objdetect::{self, ArucoDetector, DetectorParameters, Dictionary, PredefinedDictionaryType, RefineParameters},
    prelude::*,
};

use super::collector::{MarkerDetector, MarkerObservation};
use crate::camera::ColorFrame;

// --- 辞書ヘルパー ---

pub fn parse_dictionary(name: &str) -> Result<Dictionary> {
    let dict_type = match name {
        "DICT_4X4_50" => PredefinedDictionaryType::DICT_4X4_50,
        "DICT_4X4_100" => PredefinedDictionaryType::DICT_4X4_100,
        "DICT_4X4_250" => PredefinedDictionaryType::DICT_4X4_250,
        "DICT_4X4_1000" => PredefinedDictionaryType::DICT_4X4_1000,
        "DICT_5X5_50" => PredefinedDictionaryType::DICT_5X5_50,
        "DICT_5X5_100" => PredefinedDictionaryType::DICT_5X5_100,
        "DICT_5X5_250" => PredefinedDictionaryType::DICT_5X5_250,
        "DICT_5X5_1000" => PredefinedDictionaryType::DICT_5X5_1000,
        "DICT_6X6_50" => PredefinedDictionaryType::DICT_6X6_50,
        "DICT_6X6_100" => PredefinedDictionaryType::DICT_6X6_100,
        "DICT_6X6_250" => PredefinedDictionaryType::DICT_6X6_250,
        "DICT_6X6_1000" => PredefinedDictionaryType::DICT_6X6_1000,
        _ => bail!("Unknown dictionary: {}", name),
    };
    objdetect::get_predefined_dictionary(dict_type).context("Failed to get predefined dictionary")
}

// --- マーカー検出 ---

/// OpenCVのArUco検出器
pub struct ArucoMarkerDetector {
    detector: ArucoDetector,
}

impl ArucoMarkerDetector {
    pub fn new(dictionary_name: &str) -> Result<Self> {
        let dict = parse_dictionary(dictionary_name)?;
        let params = DetectorParameters::default()?;
        let refine = RefineParameters::new(10.0, 3.0, true)?;
        let detector = ArucoDetector::new(&dict, &params, refine).context("Failed to create ArucoDetector")?;
        Ok(Self { detector })
    }
}

/// BGR8 のカラーフレームを Mat (CV_8UC3) に変換
fn to_mat(image: &ColorFrame) -> Result<Mat> {
    let expected = (image.width * image.height * 3) as usize;
    if image.data.len() != expected {
        bail!(
            "Color frame size mismatch: {} bytes for {}x{}",
            image.data.len(),
            image.width,
            image.height
        );
    }
    let flat = Mat::from_slice(&image.data)?;
    let mat = flat.reshape(3, image.height as i32)?.try_clone()?;
    Ok(mat)
}

impl MarkerDetector for ArucoMarkerDetector {
    fn detect(&mut self, image: &ColorFrame) -> Result<Vec<MarkerObservation>> {
        let mat = to_mat(image)?;
        let mut corners: Vector<Vector<Point2f>> = Vector::new();
        let mut ids: Vector<i32> = Vector::new();
        self.detector
            .detect_markers_def(&mat, &mut corners, &mut ids)
            .context("detect_markers failed")?;

        let mut observations = Vec::with_capacity(ids.len());
        for (id, quad) in ids.iter().zip(corners.iter()) {
            if id < 0 || quad.len() != 4 {
                continue;
            }
            let mut pts = [(0.0f32, 0.0f32); 4];
            for (slot, p) in pts.iter_mut().zip(quad.iter()) {
                *slot = (p.x, p.y);
            }
            observations.push(MarkerObservation::new(id as u32, pts));
        }
        debug!(count = observations.len(), "aruco markers detected");
        Ok(observations)
    }
}

// --- マーカー画像生成 ---

/// 各IDのマーカー画像を `marker_<id>.png` として書き出す
pub fn generate_marker_images(
    dictionary_name: &str,
    ids: &[u32],
    side_pixels: i32,
    output_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let dict = parse_dictionary(dictionary_name)?;
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let mut written = Vec::with_capacity(ids.len());
    for &id in ids {
        let mut img = Mat::default();
        objdetect::generate_image_marker(&dict, id as i32, side_pixels, &mut img, 1)
            .with_context(|| format!("Failed to generate marker {}", id))?;

        let path = output_dir.join(format!("marker_{}.png", id));
        let path_str = path.to_string_lossy().to_string();
        if !imgcodecs::imwrite(&path_str, &img, &Vector::new())? {
            bail!("Failed to write {}", path.display());
        }
        written.push(path);
    }
    Ok(written)
}
