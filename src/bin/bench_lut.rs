use anyhow::Result;
use image::GrayImage;
use std::time::Instant;

use hull_tracker::camera::load_cameras;
use hull_tracker::config::Config;
use hull_tracker::voxel::{VoxelGrid, FOREGROUND};

const CONFIG_PATH: &str = "config.toml";

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let config = Config::load_or_default(CONFIG_PATH);
    let cameras = load_cameras(&config.scene)?;

    let start = Instant::now();
    let mut grid = VoxelGrid::new(&cameras, &config.grid)?;
    let build = start.elapsed();
    let entries: usize = (0..grid.num_views())
        .filter_map(|view| grid.lookup_table(view))
        .map(|table| table.len())
        .sum();
    println!(
        "Lookup tables: {} voxels, {} entries, {:.1}ms",
        grid.num_voxels(),
        entries,
        build.as_secs_f64() * 1000.0
    );

    // 全画素前景 = 最悪ケース
    let masks: Vec<GrayImage> = cameras
        .iter()
        .map(|c| GrayImage::from_pixel(c.width(), c.height(), image::Luma([FOREGROUND])))
        .collect();

    let iterations = 20;
    let start = Instant::now();
    for _ in 0..iterations {
        grid.update_voxels(&masks)?;
    }
    let avg_ms = start.elapsed().as_secs_f64() * 1000.0 / iterations as f64;
    println!(
        "update_voxels: {:.2}ms/frame = {:.1} FPS ({} visible)",
        avg_ms,
        1000.0 / avg_ms,
        grid.visible_indices().len()
    );

    Ok(())
}
