use anyhow::Result;
use std::collections::VecDeque;
use std::fs;
use std::time::Duration;

use floor_tracker::app::{Command, Controller, Response};
use floor_tracker::calibration::{CalibrationOutcome, MarkerDetector, MarkerObservation, OperatorPrompt};
use floor_tracker::camera::{ColorFrame, DepthFrame, FramePair, FrameSource, Intrinsics, StreamProfile};
use floor_tracker::config::{Config, MarkerTargetConfig};
use floor_tracker::error::CalibrationError;
use floor_tracker::pose::{BBox, Detection, Keypoint, KeypointIndex, Pose, PoseDetector};

const W: u32 = 640;
const H: u32 = 480;

/// マーカー0,1,2 の中心ピクセルと生深度
const MARKERS: [(u32, u32, u16); 3] = [(320, 240, 2000), (440, 240, 2000), (320, 360, 2500)];

struct SceneSource {
    frames: VecDeque<FramePair>,
}

impl FrameSource for SceneSource {
    fn start(&mut self, _profile: &StreamProfile) -> Result<()> {
        Ok(())
    }
    fn stop(&mut self) -> Result<()> {
        Ok(())
    }
    fn intrinsics(&self) -> Result<Intrinsics> {
        Ok(Intrinsics::pinhole(W, H, 600.0, 600.0, 320.0, 240.0))
    }
    fn wait_for_frames(&mut self, _timeout: Duration) -> Result<Option<FramePair>> {
        Ok(self.frames.pop_front())
    }
}

struct OnePerson;

impl PoseDetector for OnePerson {
    fn detect(&mut self, _image: &ColorFrame) -> Result<Vec<Detection>> {
        let mut pose = Pose::default();
        pose.keypoints[KeypointIndex::LeftAnkle as usize] = Keypoint::new(315.0, 240.0, 0.9);
        pose.keypoints[KeypointIndex::RightAnkle as usize] = Keypoint::new(325.0, 240.0, 0.9);
        Ok(vec![Detection {
            track_id: Some(7),
            bbox: BBox::new(280.0, 0.0, 360.0, 250.0),
            class_id: 0,
            confidence: 0.95,
            keypoints: Some(pose),
        }])
    }
}

/// 呼び出しごとに用意した検出結果を順に返す
struct ScriptedMarkers {
    rounds: VecDeque<Vec<MarkerObservation>>,
}

impl MarkerDetector for ScriptedMarkers {
    fn detect(&mut self, _image: &ColorFrame) -> Result<Vec<MarkerObservation>> {
        Ok(self.rounds.pop_front().unwrap_or_default())
    }
}

struct Ready;

impl OperatorPrompt for Ready {
    fn await_placement(&mut self) -> Result<()> {
        Ok(())
    }
}

fn scene() -> FramePair {
    let mut depth = DepthFrame::filled(W, H, 0, 0.001);
    for &(px, py, raw) in &MARKERS {
        for y in py - 10..=py + 10 {
            for x in px - 10..=px + 10 {
                depth.set_raw(x, y, raw);
            }
        }
    }
    FramePair { depth, color: ColorFrame::blank(W, H) }
}

fn marker(id: u32) -> MarkerObservation {
    let (x, y, _) = MARKERS[id as usize];
    let (x, y) = (x as f32, y as f32);
    MarkerObservation::new(id, [(x - 8.0, y - 8.0), (x + 8.0, y - 8.0), (x + 8.0, y + 8.0), (x - 8.0, y + 8.0)])
}

/// センサ点に s=2, R=I, t=(1,0,0) を掛けた位置をターゲットとして設定
fn config(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.calibration.output_path = dir.path().join("calibration.json").to_string_lossy().to_string();
    config.calibration.markers = vec![
        MarkerTargetConfig { id: 0, position: [1.0, 0.0, 4.0] },
        MarkerTargetConfig { id: 1, position: [1.8, 0.0, 4.0] },
        MarkerTargetConfig { id: 2, position: [1.0, 1.0, 5.0] },
    ];
    config
}

fn controller(config: &Config, frames: usize, rounds: Vec<Vec<MarkerObservation>>) -> Controller {
    Controller::new(
        config,
        Box::new(SceneSource { frames: (0..frames).map(|_| scene()).collect() }),
        Box::new(OnePerson),
        Box::new(ScriptedMarkers { rounds: rounds.into() }),
        Box::new(Ready),
    )
    .unwrap()
}

#[test]
fn calibrate_then_track_in_target_frame() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let mut app = controller(&config, 3, vec![vec![marker(2), marker(0), marker(1)]]);

    // 未キャリブレーションではカメラ座標のまま
    let Response::Records(before) = app.handle(Command::ProcessFrame).unwrap() else {
        panic!("expected records");
    };
    let p = before[0].position.unwrap();
    assert!(p[0].abs() < 1e-3 && (p[2] - 2.0).abs() < 1e-3);

    let Response::Calibration(CalibrationOutcome::Completed(t)) = app.handle(Command::Calibrate).unwrap() else {
        panic!("expected completed calibration");
    };
    assert!((t.scale - 2.0).abs() < 1e-4);
    assert!(t.is_proper_rotation(1e-6));

    let Response::Records(after) = app.handle(Command::ProcessFrame).unwrap() else {
        panic!("expected records");
    };
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].id, 7);
    let p = after[0].position.unwrap();
    assert!((p[0] - 1.0).abs() < 1e-3);
    assert!(p[1].abs() < 1e-3);
    assert!((p[2] - 4.0).abs() < 1e-3);
}

#[test]
fn aborted_calibration_keeps_stored_transform() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let mut app = controller(
        &config,
        2,
        vec![vec![marker(0), marker(1), marker(2)], vec![marker(0), marker(1)]],
    );

    assert!(matches!(
        app.handle(Command::Calibrate).unwrap(),
        Response::Calibration(CalibrationOutcome::Completed(_))
    ));
    let saved = fs::read(app.store().path()).unwrap();

    assert_eq!(
        app.handle(Command::Calibrate).unwrap(),
        Response::Calibration(CalibrationOutcome::Aborted(CalibrationError::InsufficientMarkers { found: 2 }))
    );
    assert_eq!(fs::read(app.store().path()).unwrap(), saved);
}

#[test]
fn stored_calibration_is_loaded_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    {
        let mut first = controller(&config, 1, vec![vec![marker(0), marker(1), marker(2)]]);
        first.handle(Command::Calibrate).unwrap();
        first.handle(Command::Shutdown).unwrap();
    }

    let second = controller(&config, 0, Vec::new());
    let t = second.session().transformer().snapshot();
    assert!((t.scale - 2.0).abs() < 1e-4);
}
