use thiserror::Error;

/// キャリブレーションを中断する理由。いずれの場合も保存済みの変換は変更しない。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalibrationError {
    #[error("only {found} markers detected (need at least 3)")]
    InsufficientMarkers { found: usize },
    #[error("only {found} valid correspondences (need at least 3)")]
    InsufficientCorrespondences { found: usize },
    #[error("correspondence points are coincident or collinear")]
    DegenerateCorrespondences,
}

/// キャプチャデバイス側の致命的エラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("no frame pair received for {frames} consecutive waits")]
    Stalled { frames: u32 },
}
