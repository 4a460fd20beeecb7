use anyhow::{ensure, Result};
use image::GrayImage;
use log::{debug, info};
use nalgebra::Point3;
use std::sync::Arc;
use std::time::Instant;

use crate::camera::CameraModel;
use crate::config::GridConfig;
use crate::voxel::lookup::{project_chunk, LookupTable};

/// 前景判定する画素値
pub const FOREGROUND: u8 = 255;
/// 毎フレーム全ボクセルに塗り直す既定色
pub const VOXEL_GRAY: [f32; 3] = [150.0, 150.0, 150.0];
/// 進捗ログの分割数 (10%刻み)
const PROGRESS_STEPS: usize = 10;

/// 格子点1つ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Voxel {
    x: i32,
    y: i32,
    z: i32,
    /// RGB (0-255)
    pub color: [f32; 3],
    /// 担当ビュー。カメラ台数なら全ビュー
    pub view: usize,
    visible_count: u32,
}

impl Voxel {
    fn new(x: i32, y: i32, z: i32, view: usize) -> Self {
        Self { x, y, z, color: VOXEL_GRAY, view, visible_count: 0 }
    }

    pub fn x(&self) -> i32 { self.x }
    pub fn y(&self) -> i32 { self.y }
    pub fn z(&self) -> i32 { self.z }

    pub fn position(&self) -> Point3<f32> {
        Point3::new(self.x as f32, self.y as f32, self.z as f32)
    }

    /// 今フレームで前景に投影されたカメラ数
    pub fn visible_count(&self) -> u32 {
        self.visible_count
    }
}

/// ボクセル格子による視体積交差 (visual hull)
///
/// 構築時にカメラごとの `LookupTable` を作り、フレームごとに前景マスクで投票する。
/// 全カメラで前景に投影されたボクセルだけが可視になる。
pub struct VoxelGrid {
    config: GridConfig,
    voxels: Vec<Voxel>,
    tables: Vec<LookupTable>,
    view_sizes: Vec<(u32, u32)>,
    visible: Vec<usize>,
    corners: [Point3<f32>; 8],
}

impl VoxelGrid {
    pub fn new(cameras: &[Arc<CameraModel>], config: &GridConfig) -> Result<Self> {
        ensure!(!cameras.is_empty(), "VoxelGrid needs at least one camera");
        ensure!(
            config.grid_num > 0 && config.grid_size > 0 && config.voxel_step > 0,
            "Invalid grid configuration: {:?}",
            config
        );

        let num_views = cameras.len();
        let half = config.grid_num * config.grid_size;
        let (x_lo, x_hi) = (-half, half);
        let (y_lo, y_hi) = (-half, half);
        let (z_lo, z_hi) = (0, 2 * half - half / 2);
        let step = config.voxel_step as usize;

        let mut voxels = Vec::new();
        for x in (x_lo..x_hi).step_by(step) {
            for y in (y_lo..y_hi).step_by(step) {
                for z in (z_lo..z_hi).step_by(step) {
                    voxels.push(Voxel::new(x, y, z, num_views));
                }
            }
        }
        ensure!(!voxels.is_empty(), "Grid configuration produces no voxels: {:?}", config);

        let (xl, xr, yl, yr, zl, zr) = (x_lo as f32, x_hi as f32, y_lo as f32, y_hi as f32, z_lo as f32, z_hi as f32);
        let corners = [
            Point3::new(xl, yl, zl),
            Point3::new(xl, yr, zl),
            Point3::new(xr, yr, zl),
            Point3::new(xr, yl, zl),
            Point3::new(xl, yl, zr),
            Point3::new(xl, yr, zr),
            Point3::new(xr, yr, zr),
            Point3::new(xr, yl, zr),
        ];

        info!(
            "Building lookup tables: {} voxels x {} cameras (x:[{},{}) y:[{},{}) z:[{},{}) step {})",
            voxels.len(), num_views, x_lo, x_hi, y_lo, y_hi, z_lo, z_hi, step
        );
        let start = Instant::now();
        let tables = build_tables(cameras, &voxels);
        info!("Lookup tables built in {:.2}s", start.elapsed().as_secs_f64());
        for (i, table) in tables.iter().enumerate() {
            debug!("  camera {}: {} pixel/voxel entries", i, table.len());
        }

        Ok(Self {
            config: config.clone(),
            voxels,
            tables,
            view_sizes: cameras.iter().map(|c| c.view_size()).collect(),
            visible: Vec::new(),
            corners,
        })
    }

    /// 前景マスクで可視ボクセルを更新する
    ///
    /// マスクはカメラと同数・同サイズであること。不一致ならエラーで、格子は変更しない。
    pub fn update_voxels(&mut self, masks: &[GrayImage]) -> Result<()> {
        ensure!(
            masks.len() == self.tables.len(),
            "Expected {} foreground masks, got {}",
            self.tables.len(),
            masks.len()
        );
        for (i, (mask, &size)) in masks.iter().zip(&self.view_sizes).enumerate() {
            ensure!(
                mask.dimensions() == size,
                "Mask {} is {:?}, camera view is {:?}",
                i,
                mask.dimensions(),
                size
            );
        }

        for voxel in self.voxels.iter_mut() {
            voxel.visible_count = 0;
        }
        self.visible.clear();

        let num_views = self.tables.len() as u32;
        for (mask, table) in masks.iter().zip(&self.tables) {
            for (pixel, value) in mask.as_raw().iter().enumerate() {
                if *value != FOREGROUND {
                    continue;
                }
                for &index in table.voxels_at_index(pixel) {
                    let voxel = &mut self.voxels[index as usize];
                    voxel.color = VOXEL_GRAY;
                    voxel.visible_count += 1;
                    if voxel.visible_count == num_views {
                        self.visible.push(index as usize);
                    }
                }
            }
        }

        debug!("Visible voxels: {}/{}", self.visible.len(), self.voxels.len());
        Ok(())
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn voxels(&self) -> &[Voxel] {
        &self.voxels
    }

    pub fn num_voxels(&self) -> usize {
        self.voxels.len()
    }

    pub fn num_views(&self) -> usize {
        self.tables.len()
    }

    /// 今フレームの可視ボクセル番号 (カメラ → 画素 → 表の順)
    pub fn visible_indices(&self) -> &[usize] {
        &self.visible
    }

    pub fn visible_voxels(&self) -> impl Iterator<Item = &Voxel> + '_ {
        self.visible.iter().map(move |&i| &self.voxels[i])
    }

    /// 可視ボクセルを番号順に可変で辿る (ラベリング用)
    pub fn visible_voxels_mut(&mut self) -> impl Iterator<Item = &mut Voxel> + '_ {
        let num_views = self.tables.len() as u32;
        self.voxels.iter_mut().filter(move |v| v.visible_count == num_views)
    }

    pub fn lookup_table(&self, view: usize) -> Option<&LookupTable> {
        self.tables.get(view)
    }

    /// 下面4点 → 上面4点
    pub fn volume_corners(&self) -> &[Point3<f32>; 8] {
        &self.corners
    }
}

/// 10% ずつボクセルを投影し、カメラごとの表にまとめる
fn build_tables(cameras: &[Arc<CameraModel>], voxels: &[Voxel]) -> Vec<LookupTable> {
    let points: Vec<Point3<f32>> = voxels.iter().map(|v| v.position()).collect();
    let chunk_len = points.len().div_ceil(PROGRESS_STEPS).max(1);
    let chunks = points.len().div_ceil(chunk_len);

    let mut pairs: Vec<Vec<(u32, u32)>> = vec![Vec::new(); cameras.len()];
    for (step, chunk) in points.chunks(chunk_len).enumerate() {
        let base = step * chunk_len;
        for (camera, list) in cameras.iter().zip(pairs.iter_mut()) {
            list.extend(project_chunk(camera, chunk, base));
        }
        info!("Building lookup tables... {}%", (step + 1) * 100 / chunks);
    }

    cameras
        .iter()
        .zip(&pairs)
        .map(|(camera, list)| LookupTable::from_pairs(camera.width(), camera.height(), list))
        .collect()
}
