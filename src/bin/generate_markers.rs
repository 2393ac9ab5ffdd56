use anyhow::Result;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use floor_tracker::calibration::generate_marker_images;
use floor_tracker::config::Config;

const CONFIG_PATH: &str = "config.toml";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load_or_default(CONFIG_PATH);
    let cal = &config.calibration;
    let ids: Vec<u32> = cal.markers.iter().map(|m| m.id).collect();

    let paths = generate_marker_images(
        &cal.dictionary,
        &ids,
        cal.marker_image_size,
        Path::new(&cal.marker_output_dir),
    )?;

    for (marker, path) in cal.markers.iter().zip(&paths) {
        println!(
            "保存: {}  (設置位置 [{}, {}, {}])",
            path.display(),
            marker.position[0],
            marker.position[1],
            marker.position[2]
        );
    }
    println!("  辞書: {}", cal.dictionary);
    println!("  サイズ: {}px", cal.marker_image_size);
    Ok(())
}
