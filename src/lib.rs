pub mod app;
pub mod calibration;
pub mod camera;
pub mod config;
pub mod error;
pub mod pose;
pub mod tracker;

/// ビルド時の git describe（取得できなければパッケージバージョン）
pub const VERSION: &str = env!("GIT_VERSION");
