use anyhow::Result;
use tracing_subscriber::EnvFilter;

use floor_tracker::calibration::CalibrationStore;
use floor_tracker::config::Config;

const CONFIG_PATH: &str = "config.toml";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("floor-tracker {}", floor_tracker::VERSION);

    let config = Config::load_or_default(CONFIG_PATH);
    let store = CalibrationStore::new(&config.calibration.output_path);

    let Some(t) = store.load()? else {
        println!("No calibration at {} (identity transform in use)", store.path().display());
        return Ok(());
    };

    let r = &t.rotation;
    println!("Calibration: {}", store.path().display());
    println!("  scale: {:.6}", t.scale);
    println!("  rotation:");
    for row in 0..3 {
        println!("    [{:>10.6} {:>10.6} {:>10.6}]", r[(row, 0)], r[(row, 1)], r[(row, 2)]);
    }
    println!(
        "  translation: [{:.4}, {:.4}, {:.4}]",
        t.translation.x, t.translation.y, t.translation.z
    );
    println!("  det(R): {:.9}", r.determinant());
    println!("  |R·Rᵀ - I|max: {:.3e}", (r * r.transpose() - nalgebra::Matrix3::identity()).amax());

    println!();
    println!("Marker targets:");
    for marker in &config.calibration.markers {
        println!(
            "  id {:>3}: [{:.3}, {:.3}, {:.3}]",
            marker.id, marker.position[0], marker.position[1], marker.position[2]
        );
    }

    Ok(())
}
