use anyhow::{bail, ensure, Result};
use image::{GrayImage, RgbImage};
use log::{debug, info};
use std::sync::Arc;

use crate::camera::{load_cameras, CameraModel};
use crate::config::Config;
use crate::segmentation::{extract_foreground, BackgroundModel};
use crate::tracker::{PersonLocalizer, TrackResult};
use crate::voxel::VoxelGrid;

/// 1フレーム処理の結果
pub struct FrameOutput {
    /// カメラごとの前景マスク
    pub masks: Vec<GrayImage>,
    /// 推定列の縦線を描いた前景画像
    pub foregrounds: Vec<RgbImage>,
    pub result: TrackResult,
    /// ラベリングしたボクセル数 [A, B, 重複]
    pub label_counts: [usize; 3],
}

/// マスク取得 → ボクセル更新 → 人物推定 → ラベリング をまとめて回す
pub struct HullTracker {
    cameras: Vec<Arc<CameraModel>>,
    grid: VoxelGrid,
    localizer: PersonLocalizer,
    backgrounds: Option<Vec<BackgroundModel>>,
}

impl HullTracker {
    pub fn new(
        cameras: Vec<Arc<CameraModel>>,
        grid: VoxelGrid,
        localizer: PersonLocalizer,
        backgrounds: Option<Vec<BackgroundModel>>,
    ) -> Result<Self> {
        ensure!(
            grid.num_views() == cameras.len() && localizer.num_views() == cameras.len(),
            "Grid has {} views and localizer {}, but {} cameras were given",
            grid.num_views(),
            localizer.num_views(),
            cameras.len()
        );
        if let Some(bgs) = &backgrounds {
            ensure!(
                bgs.len() == cameras.len(),
                "Expected {} background images, got {}",
                cameras.len(),
                bgs.len()
            );
            for (i, (bg, camera)) in bgs.iter().zip(&cameras).enumerate() {
                ensure!(
                    bg.dimensions() == camera.view_size(),
                    "Background {} is {:?}, camera view is {:?}",
                    i,
                    bg.dimensions(),
                    camera.view_size()
                );
            }
        }

        Ok(Self { cameras, grid, localizer, backgrounds })
    }

    /// キャリブレーション・参照画像・背景画像を読み込んで構築
    ///
    /// `input.mask_dirs` が指定されていれば背景画像は読まない。
    pub fn from_config(config: &Config) -> Result<Self> {
        let cameras = load_cameras(&config.scene)?;
        info!("Loaded {} cameras", cameras.len());

        let grid = VoxelGrid::new(&cameras, &config.grid)?;
        let localizer = PersonLocalizer::from_config(cameras.clone(), &config.histogram, &config.tracker)?;

        let backgrounds = if config.input.mask_dirs.is_some() {
            None
        } else {
            let models = config
                .segmentation
                .background_images
                .iter()
                .map(|path| BackgroundModel::from_file(path, &config.segmentation))
                .collect::<Result<Vec<_>>>()?;
            Some(models)
        };

        Self::new(cameras, grid, localizer, backgrounds)
    }

    /// 1フレーム分を処理する
    ///
    /// `masks` が `None` なら背景差分でマスクを作る。可視ボクセルはグリッドに残る。
    pub fn process_frame(&mut self, frames: &[RgbImage], masks: Option<Vec<GrayImage>>) -> Result<FrameOutput> {
        ensure!(
            frames.len() == self.cameras.len(),
            "Expected {} frames, got {}",
            self.cameras.len(),
            frames.len()
        );

        let masks = match (masks, &self.backgrounds) {
            (Some(masks), _) => masks,
            (None, Some(backgrounds)) => backgrounds
                .iter()
                .zip(frames)
                .map(|(bg, frame)| bg.foreground_mask(frame))
                .collect::<Result<Vec<_>>>()?,
            (None, None) => bail!("No foreground masks given and no background images loaded"),
        };

        self.grid.update_voxels(&masks)?;

        let mut foregrounds = frames
            .iter()
            .zip(&masks)
            .map(|(frame, mask)| extract_foreground(frame, mask))
            .collect::<Result<Vec<_>>>()?;

        let result = self.localizer.track_persons(&foregrounds)?;
        let label_counts = self.localizer.label_voxels(&mut self.grid);
        for (view, image) in foregrounds.iter_mut().enumerate() {
            self.localizer.label_foreground(view, image)?;
        }

        debug!(
            "{} visible voxels, labelled {:?}",
            self.grid.visible_indices().len(),
            label_counts
        );

        Ok(FrameOutput { masks, foregrounds, result, label_counts })
    }

    pub fn cameras(&self) -> &[Arc<CameraModel>] {
        &self.cameras
    }

    pub fn grid(&self) -> &VoxelGrid {
        &self.grid
    }

    pub fn localizer(&self) -> &PersonLocalizer {
        &self.localizer
    }

    pub fn has_backgrounds(&self) -> bool {
        self.backgrounds.is_some()
    }
}
