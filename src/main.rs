use anyhow::{ensure, Context, Result};
use image::{GrayImage, RgbImage};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use hull_tracker::camera::ImageSequence;
use hull_tracker::config::Config;
use hull_tracker::pipeline::{FrameOutput, HullTracker};
use hull_tracker::render::{render_top_view, SceneFrame};
use hull_tracker::tracker::Person;

const CONFIG_PATH: &str = "config.toml";

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| CONFIG_PATH.to_string());
    let config = Config::load_or_default(&config_path);
    info!("Hull Tracker ({})", env!("GIT_VERSION"));
    info!(
        "Grid: num={} size={} step={}, histogram bins={}",
        config.grid.grid_num, config.grid.grid_size, config.grid.voxel_step, config.histogram.num_bins
    );

    let mut tracker = HullTracker::from_config(&config)?;

    let mut frame_seqs = open_sequences(&config.input.frame_dirs)?;
    ensure!(
        frame_seqs.len() == tracker.cameras().len(),
        "{} frame directories for {} cameras",
        frame_seqs.len(),
        tracker.cameras().len()
    );
    let mut mask_seqs = match &config.input.mask_dirs {
        Some(dirs) => {
            let seqs = open_sequences(dirs)?;
            ensure!(
                seqs.len() == tracker.cameras().len(),
                "{} mask directories for {} cameras",
                seqs.len(),
                tracker.cameras().len()
            );
            Some(seqs)
        }
        None => None,
    };

    let output_dir = match &config.output.dir {
        Some(dir) => {
            fs::create_dir_all(dir).with_context(|| format!("Failed to create output directory {}", dir))?;
            Some(PathBuf::from(dir))
        }
        None => None,
    };

    let started = Instant::now();
    let mut frame_index = 0usize;
    loop {
        if config.input.max_frames.is_some_and(|max| frame_index >= max) {
            break;
        }
        let frames = match next_frames(&mut frame_seqs)? {
            Some(frames) => frames,
            None => break,
        };
        let masks = match mask_seqs.as_mut() {
            Some(seqs) => match next_masks(seqs)? {
                Some(masks) => Some(masks),
                None => break,
            },
            None => None,
        };

        let frame_start = Instant::now();
        let output = tracker.process_frame(&frames, masks)?;
        let elapsed_ms = frame_start.elapsed().as_secs_f64() * 1000.0;

        for person in Person::ALL {
            let p = output.result.position(person);
            info!(
                "Frame {}: person {:?} at ({:.0}, {:.0}) from {} intersections",
                frame_index,
                person,
                p.x,
                p.y,
                output.result.intersections[person.index()]
            );
        }
        info!(
            "Frame {}: {} visible voxels, {:.1}ms",
            frame_index,
            tracker.grid().visible_indices().len(),
            elapsed_ms
        );

        if let Some(dir) = &output_dir {
            write_outputs(dir, frame_index, &tracker, &output, &config)?;
        }
        frame_index += 1;
    }

    let total = started.elapsed().as_secs_f64();
    if frame_index > 0 {
        info!(
            "Processed {} frames in {:.1}s ({:.1} FPS)",
            frame_index,
            total,
            frame_index as f64 / total.max(1e-9)
        );
    } else {
        info!("No frames processed");
    }
    Ok(())
}

fn open_sequences(dirs: &[String]) -> Result<Vec<ImageSequence>> {
    dirs.iter().map(ImageSequence::open).collect()
}

/// 全カメラの次フレーム。どれか1つでも終われば `None`
fn next_frames(seqs: &mut [ImageSequence]) -> Result<Option<Vec<RgbImage>>> {
    let mut frames = Vec::with_capacity(seqs.len());
    for seq in seqs.iter_mut() {
        match seq.next_rgb()? {
            Some(frame) => frames.push(frame),
            None => return Ok(None),
        }
    }
    Ok(Some(frames))
}

fn next_masks(seqs: &mut [ImageSequence]) -> Result<Option<Vec<GrayImage>>> {
    let mut masks = Vec::with_capacity(seqs.len());
    for seq in seqs.iter_mut() {
        match seq.next_luma()? {
            Some(mask) => masks.push(mask),
            None => return Ok(None),
        }
    }
    Ok(Some(masks))
}

fn write_outputs(dir: &Path, frame_index: usize, tracker: &HullTracker, output: &FrameOutput, config: &Config) -> Result<()> {
    let out = &config.output;
    if out.write_scene_json || out.write_top_view {
        let scene = SceneFrame::capture(frame_index, tracker.grid(), tracker.localizer(), &config.render);

        if out.write_scene_json {
            let path = dir.join(format!("scene_{:05}.json", frame_index));
            let json = serde_json::to_string(&scene)?;
            fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        }
        if out.write_top_view {
            let path = dir.join(format!("top_{:05}.png", frame_index));
            render_top_view(&scene, config.render.top_view_size, config.render.top_view_extent)
                .save(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
    }

    if out.write_foregrounds {
        for (view, image) in output.foregrounds.iter().enumerate() {
            let path = dir.join(format!("foreground{}_{:05}.png", view, frame_index));
            image
                .save(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
    }
    Ok(())
}
