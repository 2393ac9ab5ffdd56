use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use std::time::Duration;
use tracing::{info, warn};

use super::collector::{CorrespondenceCollector, MarkerDetector};
use super::estimator::{check_spread, estimate_similarity, fit_residual};
use super::store::CalibrationStore;
use super::transform::CalibrationTransform;
use crate::camera::{FramePair, FrameSource, Intrinsics, StreamProfile};
use crate::config::Config;
use crate::error::{CalibrationError, CaptureError};

/// キャリブレーション手順の状態
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationState {
    Idle,
    AwaitingOperatorPlacement,
    FrameCaptured,
    MarkersDetected,
    TransformComputed,
    Persisted,
    Aborted(CalibrationError),
}

/// マーカー設置完了をオペレーターから受け取る
pub trait OperatorPrompt {
    fn await_placement(&mut self) -> Result<()>;
}

/// 標準入力でEnterを待つ
pub struct StdinPrompt;

impl OperatorPrompt for StdinPrompt {
    fn await_placement(&mut self) -> Result<()> {
        print!("Place the markers at their known positions and press Enter...");
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .context("Failed to read operator input")?;
        Ok(())
    }
}

/// 1回の試行の結果
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationOutcome {
    /// 保存済みの変換
    Completed(CalibrationTransform),
    /// 保存ファイルは変更していない
    Aborted(CalibrationError),
}

/// 設置待ち → 1フレーム取得 → マーカー検出 → 推定 → 保存
pub struct CalibrationProcedure {
    collector: CorrespondenceCollector,
    min_spread: f64,
    profile: StreamProfile,
    frame_timeout: Duration,
    max_attempts: u32,
    state: CalibrationState,
    history: Vec<CalibrationState>,
}

impl CalibrationProcedure {
    pub fn new(
        collector: CorrespondenceCollector,
        min_spread: f64,
        profile: StreamProfile,
        frame_timeout: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            collector,
            min_spread,
            profile,
            frame_timeout,
            max_attempts: max_attempts.max(1),
            state: CalibrationState::Idle,
            history: vec![CalibrationState::Idle],
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            CorrespondenceCollector::from_config(&config.tracking, &config.depth, &config.calibration),
            config.calibration.min_spread,
            config.capture.stream_profile(),
            config.capture.frame_timeout(),
            config.capture.max_stalled_frames,
        )
    }

    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    /// 直近の `run` で通過した状態（Idle から。成功時は Idle で終わる）
    pub fn transitions(&self) -> &[CalibrationState] {
        &self.history
    }

    fn enter(&mut self, state: CalibrationState) {
        self.history.push(state.clone());
        self.state = state;
    }

    fn abort(&mut self, error: CalibrationError) -> CalibrationOutcome {
        warn!("calibration aborted: {}", error);
        self.enter(CalibrationState::Aborted(error.clone()));
        CalibrationOutcome::Aborted(error)
    }

    /// 1回分の手順を実行する
    ///
    /// マーカー不足・対応点不足・縮退は `Ok(Aborted)`。デバイスやI/Oの
    /// 失敗は `Err` で返し、状態は Idle に戻る。どちらの場合も保存済みの
    /// 変換は変更しない。
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        markers: &mut dyn MarkerDetector,
        operator: &mut dyn OperatorPrompt,
        store: &CalibrationStore,
    ) -> Result<CalibrationOutcome> {
        self.state = CalibrationState::Idle;
        self.history = vec![CalibrationState::Idle];

        let result = self.run_steps(source, markers, operator, store);
        if result.is_err() {
            self.enter(CalibrationState::Idle);
        }
        result
    }

    fn run_steps(
        &mut self,
        source: &mut dyn FrameSource,
        markers: &mut dyn MarkerDetector,
        operator: &mut dyn OperatorPrompt,
        store: &CalibrationStore,
    ) -> Result<CalibrationOutcome> {
        self.enter(CalibrationState::AwaitingOperatorPlacement);
        operator.await_placement()?;

        source
            .start(&self.profile)
            .context("Failed to start camera for calibration")?;
        let captured = self.capture(source);
        let stopped = source.stop().context("Failed to stop camera after calibration");
        let (frames, intrinsics) = captured?;
        stopped?;
        self.enter(CalibrationState::FrameCaptured);

        let observations = markers.detect(&frames.color).context("Marker detection failed")?;
        info!(count = observations.len(), "markers detected");
        self.enter(CalibrationState::MarkersDetected);

        let correspondences = match self.collector.collect(&frames, &intrinsics, &observations) {
            Ok(c) => c,
            Err(e) => return Ok(self.abort(e)),
        };

        let sensor_points: Vec<_> = correspondences.iter().map(|c| c.sensor).collect();
        if let Err(e) = check_spread(&sensor_points, self.min_spread) {
            return Ok(self.abort(e));
        }
        let transform = match estimate_similarity(&correspondences) {
            Ok(t) => t,
            Err(e) => return Ok(self.abort(e)),
        };
        info!(
            scale = transform.scale,
            residual = fit_residual(&transform, &correspondences),
            markers = correspondences.len(),
            "similarity transform estimated"
        );
        self.enter(CalibrationState::TransformComputed);

        store.save(&transform)?;
        info!(path = %store.path().display(), "calibration saved");
        self.enter(CalibrationState::Persisted);
        self.enter(CalibrationState::Idle);

        Ok(CalibrationOutcome::Completed(transform))
    }

    fn capture(&self, source: &mut dyn FrameSource) -> Result<(FramePair, Intrinsics)> {
        let intrinsics = source.intrinsics().context("Failed to query intrinsics")?;
        for attempt in 1..=self.max_attempts {
            if let Some(frames) = source.wait_for_frames(self.frame_timeout)? {
                return Ok((frames, intrinsics));
            }
            warn!(attempt, "frame pair not ready for calibration");
        }
        Err(CaptureError::Stalled {
            frames: self.max_attempts,
        }
        .into())
    }
}
