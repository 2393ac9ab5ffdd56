use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, warn};

use super::depth::DepthLocalizer;
use super::record::TrackingRecord;
use super::tracks::{TrackManager, TrackStore};
use crate::calibration::CoordinateTransformer;
use crate::camera::{DepthFrame, FrameSource, Intrinsics};
use crate::config::Config;
use crate::error::CaptureError;
use crate::pose::{Detection, PoseDetector};

/// ライブ追跡セッション
///
/// フレーム取得 → 検出 → トラック更新 → 深度計測 → 座標変換 を1スレッドで順に行う。
/// トラック状態はこのセッションだけが所有する。
pub struct TrackingSession {
    manager: TrackManager,
    localizer: DepthLocalizer,
    transformer: CoordinateTransformer,
    store: TrackStore,
    min_bbox_size: f32,
    frame_timeout: Duration,
    max_stalled_frames: u32,
    stalled: u32,
    intrinsics: Option<Intrinsics>,
}

impl TrackingSession {
    pub fn new(config: &Config, transformer: CoordinateTransformer) -> Self {
        Self {
            manager: TrackManager::from_config(&config.tracking, &config.depth),
            localizer: DepthLocalizer::from_config(&config.tracking, &config.depth),
            transformer,
            store: TrackStore::new(),
            min_bbox_size: config.tracking.min_bbox_size,
            frame_timeout: config.capture.frame_timeout(),
            max_stalled_frames: config.capture.max_stalled_frames.max(1),
            stalled: 0,
            intrinsics: None,
        }
    }

    pub fn tracks(&self) -> &TrackStore {
        &self.store
    }

    pub fn transformer(&self) -> &CoordinateTransformer {
        &self.transformer
    }

    /// トラック状態を破棄する（パイプライン再起動時）
    pub fn reset(&mut self) {
        self.store.clear();
        self.stalled = 0;
    }

    /// 次のフレームを処理して出力レコードを返す
    ///
    /// フレームが揃わなければ空のレコード列。タイムアウトが
    /// `max_stalled_frames` 回続いたら `CaptureError::Stalled`。
    pub fn process_frame(
        &mut self,
        source: &mut dyn FrameSource,
        detector: &mut dyn PoseDetector,
    ) -> Result<Vec<TrackingRecord>> {
        let Some(pair) = source.wait_for_frames(self.frame_timeout)? else {
            self.stalled += 1;
            if self.stalled >= self.max_stalled_frames {
                return Err(CaptureError::Stalled { frames: self.stalled }.into());
            }
            warn!(stalled = self.stalled, "frame pair not ready; skipping frame");
            return Ok(Vec::new());
        };
        self.stalled = 0;

        let intrinsics = match self.intrinsics {
            Some(intrinsics) => intrinsics,
            None => {
                let intrinsics = source.intrinsics().context("Failed to query intrinsics")?;
                self.intrinsics = Some(intrinsics);
                intrinsics
            }
        };

        let detections = detector.detect(&pair.color).context("Detection failed")?;
        Ok(self.process_detections(&detections, &pair.depth, &intrinsics))
    }

    /// 検出結果と深度フレームからレコードを作る（ID昇順）
    ///
    /// キーポイント欠落・小さすぎるBBoxのトラックはこのフレームだけ出力しない。
    pub fn process_detections(
        &mut self,
        detections: &[Detection],
        depth: &DepthFrame,
        intrinsics: &Intrinsics,
    ) -> Vec<TrackingRecord> {
        let active = self.manager.update(&mut self.store, detections);
        let transform = self.transformer.snapshot();
        let mut records = Vec::with_capacity(active.len());

        for (id, detection) in &active {
            let bbox = detection.bbox.clamped(depth.width, depth.height);
            if bbox.width() < self.min_bbox_size || bbox.height() < self.min_bbox_size {
                debug!(track_id = id, "bounding box too small; skipping");
                continue;
            }
            let Some(pose) = detection.keypoints.as_ref() else {
                debug!(track_id = id, "missing keypoints; skipping");
                continue;
            };
            let Some(track) = self.store.get_mut(*id) else {
                continue;
            };

            let position = self
                .localizer
                .localize(track, pose, &bbox, depth, intrinsics)
                .map(|p| transform.apply(&p))
                .map(|p| [p.x, p.y, p.z]);

            records.push(TrackingRecord {
                id: *id,
                position,
                bbox: bbox.to_pixels(),
            });
        }

        records
    }
}
