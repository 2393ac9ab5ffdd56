/// EMAベースの深度平滑化フィルタ
///
/// state ← α·sample + (1−α)·state。最初のサンプルで初期化する。
#[derive(Debug, Clone, PartialEq)]
pub struct DepthSmoother {
    alpha: f32,
    state: Option<f32>,
}

impl DepthSmoother {
    pub fn new(alpha: f32) -> Self {
        Self { alpha, state: None }
    }

    pub fn apply(&mut self, sample: f32) -> f32 {
        let next = match self.state {
            Some(prev) => self.alpha * sample + (1.0 - self.alpha) * prev,
            None => sample,
        };
        self.state = Some(next);
        next
    }

    /// 現在の平滑化済み深度。未初期化ならNone
    pub fn current(&self) -> Option<f32> {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = None;
    }
}
