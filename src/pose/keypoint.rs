/// COCO 17 キーポイントのインデックス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum KeypointIndex {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl KeypointIndex {
    pub const COUNT: usize = 17;

    pub fn from_index(index: usize) -> Option<Self> {
        use KeypointIndex::*;
        const ALL: [KeypointIndex; KeypointIndex::COUNT] = [
            Nose, LeftEye, RightEye, LeftEar, RightEar,
            LeftShoulder, RightShoulder, LeftElbow, RightElbow,
            LeftWrist, RightWrist, LeftHip, RightHip,
            LeftKnee, RightKnee, LeftAnkle, RightAnkle,
        ];
        ALL.get(index).copied()
    }
}

/// 単一キーポイント（ピクセル座標）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// 信頼度スコア (0.0〜1.0)
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    /// 信頼度が閾値を超えているか（閾値ちょうどは不採用）
    pub fn exceeds(&self, threshold: f32) -> bool {
        self.confidence > threshold
    }

    pub fn position(&self) -> (f32, f32) {
        (self.x, self.y)
    }
}

/// 17キーポイントからなる姿勢
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    pub keypoints: [Keypoint; KeypointIndex::COUNT],
}

impl Pose {
    pub fn new(keypoints: [Keypoint; KeypointIndex::COUNT]) -> Self {
        Self { keypoints }
    }

    /// 検出器出力の (x, y, confidence) 列から構築。17点ちょうどでなければNone
    pub fn from_slice(points: &[(f32, f32, f32)]) -> Option<Self> {
        if points.len() != KeypointIndex::COUNT {
            return None;
        }
        let mut keypoints = [Keypoint::default(); KeypointIndex::COUNT];
        for (kp, &(x, y, c)) in keypoints.iter_mut().zip(points) {
            if !(x.is_finite() && y.is_finite() && c.is_finite()) {
                return None;
            }
            *kp = Keypoint::new(x, y, c);
        }
        Some(Self::new(keypoints))
    }

    pub fn get(&self, index: KeypointIndex) -> &Keypoint {
        &self.keypoints[index as usize]
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            keypoints: [Keypoint::default(); KeypointIndex::COUNT],
        }
    }
}
