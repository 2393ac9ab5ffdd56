use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::calibration::{
    CalibrationOutcome, CalibrationProcedure, CalibrationStore, CoordinateTransformer, MarkerDetector,
    OperatorPrompt,
};
use crate::camera::{FrameSource, StreamProfile};
use crate::config::Config;
use crate::pose::PoseDetector;
use crate::tracker::{TrackingRecord, TrackingSession};

/// コントローラへの操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// 1フレーム追跡
    ProcessFrame,
    /// 追跡を止めてキャリブレーションを1回実行
    Calibrate,
    /// 保存済みの変換を読み直す
    ReloadCalibration,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Records(Vec<TrackingRecord>),
    Calibration(CalibrationOutcome),
    Reloaded,
    Stopped,
}

/// 追跡とキャリブレーションを切り替えるメインループの本体
///
/// カメラは追跡中だけ動かし、キャリブレーション中は手順側が起動・停止する。
pub struct Controller {
    source: Box<dyn FrameSource>,
    detector: Box<dyn PoseDetector>,
    markers: Box<dyn MarkerDetector>,
    operator: Box<dyn OperatorPrompt>,
    session: TrackingSession,
    procedure: CalibrationProcedure,
    store: CalibrationStore,
    profile: StreamProfile,
    running: bool,
}

impl Controller {
    /// 保存済みの変換を読み込み、カメラを起動する
    pub fn new(
        config: &Config,
        source: Box<dyn FrameSource>,
        detector: Box<dyn PoseDetector>,
        markers: Box<dyn MarkerDetector>,
        operator: Box<dyn OperatorPrompt>,
    ) -> Result<Self> {
        let store = CalibrationStore::new(&config.calibration.output_path);
        let transformer = CoordinateTransformer::identity();
        transformer.reload(&store)?;

        let mut controller = Self {
            source,
            detector,
            markers,
            operator,
            session: TrackingSession::new(config, transformer),
            procedure: CalibrationProcedure::from_config(config),
            store,
            profile: config.capture.stream_profile(),
            running: false,
        };
        controller.start()?;
        Ok(controller)
    }

    pub fn session(&self) -> &TrackingSession {
        &self.session
    }

    pub fn store(&self) -> &CalibrationStore {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    fn start(&mut self) -> Result<()> {
        if !self.running {
            self.source.start(&self.profile).context("Failed to start camera")?;
            self.running = true;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.running {
            self.running = false;
            self.source.stop().context("Failed to stop camera")?;
        }
        Ok(())
    }

    pub fn handle(&mut self, command: Command) -> Result<Response> {
        match command {
            Command::ProcessFrame => {
                self.start()?;
                let records = self
                    .session
                    .process_frame(self.source.as_mut(), self.detector.as_mut())?;
                Ok(Response::Records(records))
            }
            Command::Calibrate => {
                self.stop()?;
                let outcome = self.procedure.run(
                    self.source.as_mut(),
                    self.markers.as_mut(),
                    self.operator.as_mut(),
                    &self.store,
                );
                self.session.reset();
                // 失敗時もカメラは追跡用に戻す
                self.start()?;
                let outcome = outcome?;

                match &outcome {
                    CalibrationOutcome::Completed(_) => self.session.transformer().reload(&self.store)?,
                    CalibrationOutcome::Aborted(e) => warn!("keeping previous calibration: {}", e),
                }
                Ok(Response::Calibration(outcome))
            }
            Command::ReloadCalibration => {
                self.session.transformer().reload(&self.store)?;
                Ok(Response::Reloaded)
            }
            Command::Shutdown => {
                self.stop()?;
                info!("tracking stopped");
                Ok(Response::Stopped)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::MarkerObservation;
    use crate::camera::{ColorFrame, DepthFrame, FramePair, Intrinsics};
    use crate::pose::Detection;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::time::Duration;

    #[derive(Default)]
    struct SourceLog {
        starts: u32,
        stops: u32,
        running: bool,
        profile: Option<StreamProfile>,
    }

    struct SharedSource {
        log: Rc<RefCell<SourceLog>>,
        frames: VecDeque<FramePair>,
    }

    impl FrameSource for SharedSource {
        fn start(&mut self, profile: &StreamProfile) -> Result<()> {
            let mut log = self.log.borrow_mut();
            log.starts += 1;
            log.running = true;
            log.profile = Some(*profile);
            Ok(())
        }
        fn stop(&mut self) -> Result<()> {
            let mut log = self.log.borrow_mut();
            log.stops += 1;
            log.running = false;
            Ok(())
        }
        fn intrinsics(&self) -> Result<Intrinsics> {
            Ok(Intrinsics::pinhole(64, 48, 50.0, 50.0, 32.0, 24.0))
        }
        fn wait_for_frames(&mut self, _timeout: Duration) -> Result<Option<FramePair>> {
            Ok(self.frames.pop_front())
        }
    }

    struct NoPeople;

    impl PoseDetector for NoPeople {
        fn detect(&mut self, _image: &ColorFrame) -> Result<Vec<Detection>> {
            Ok(Vec::new())
        }
    }

    struct NoMarkers;

    impl MarkerDetector for NoMarkers {
        fn detect(&mut self, _image: &ColorFrame) -> Result<Vec<MarkerObservation>> {
            Ok(Vec::new())
        }
    }

    struct Ready;

    impl OperatorPrompt for Ready {
        fn await_placement(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn controller(dir: &tempfile::TempDir, frames: usize) -> (Controller, Rc<RefCell<SourceLog>>) {
        let mut config = Config::default();
        config.calibration.output_path = dir.path().join("calibration.json").to_string_lossy().to_string();
        let log = Rc::new(RefCell::new(SourceLog::default()));
        let pair = FramePair {
            depth: DepthFrame::filled(64, 48, 2000, 0.001),
            color: ColorFrame::blank(64, 48),
        };
        let source = SharedSource {
            log: log.clone(),
            frames: std::iter::repeat(pair).take(frames).collect(),
        };
        let controller = Controller::new(
            &config,
            Box::new(source),
            Box::new(NoPeople),
            Box::new(NoMarkers),
            Box::new(Ready),
        )
        .unwrap();
        (controller, log)
    }

    #[test]
    fn test_new_starts_camera() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, log) = controller(&dir, 0);
        assert!(controller.is_running());
        assert!(log.borrow().running);
        assert_eq!(log.borrow().starts, 1);
        assert_eq!(
            log.borrow().profile,
            Some(StreamProfile { width: 1280, height: 720, fps: 30 })
        );
    }

    #[test]
    fn test_aborted_calibration_restarts_tracking() {
        let dir = tempfile::tempdir().unwrap();
        let (mut controller, log) = controller(&dir, 2);

        let response = controller.handle(Command::Calibrate).unwrap();
        assert!(matches!(
            response,
            Response::Calibration(CalibrationOutcome::Aborted(_))
        ));
        assert!(controller.is_running());
        assert!(log.borrow().running);
        assert!(!controller.store().path().exists());

        assert_eq!(controller.handle(Command::ProcessFrame).unwrap(), Response::Records(Vec::new()));
    }

    #[test]
    fn test_stalled_calibration_still_restarts_camera() {
        let dir = tempfile::tempdir().unwrap();
        let (mut controller, log) = controller(&dir, 0);
        assert!(controller.handle(Command::Calibrate).is_err());
        assert!(controller.is_running());
        assert!(log.borrow().running);
    }

    #[test]
    fn test_shutdown_stops_camera() {
        let dir = tempfile::tempdir().unwrap();
        let (mut controller, log) = controller(&dir, 0);
        assert_eq!(controller.handle(Command::Shutdown).unwrap(), Response::Stopped);
        assert!(!log.borrow().running);
        assert_eq!(controller.handle(Command::ReloadCalibration).unwrap(), Response::Reloaded);
    }
}
