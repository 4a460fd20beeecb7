use anyhow::{ensure, Result};
use image::RgbImage;
use imageproc::drawing::draw_line_segment_mut;
use nalgebra::Point2;

use crate::tracker::{Person, PersonLocalizer};
use crate::voxel::VoxelGrid;

/// 2人のボックスが重なった位置のボクセル色
pub const CONFLICT_COLOR: [f32; 3] = [255.0, 0.0, 0.0];

/// `center` を中心とする半幅 `half_x` x `half_y` の矩形の内側か (境界は含まない)
pub fn in_box(x: f32, y: f32, center: &Point2<f32>, half_x: f32, half_y: f32) -> bool {
    (x - center.x).abs() < half_x && (y - center.y).abs() < half_y
}

/// 可視ボクセルを人物ごとのボックスで色分けする
///
/// 両方のボックスに入るボクセルは `CONFLICT_COLOR`。位置が `None` の人物は塗らない。
/// 戻り値は塗ったボクセル数 [A, B, 重複]。
pub fn label_voxels_around(grid: &mut VoxelGrid, positions: [Option<Point2<f32>>; 2], half_x: f32, half_y: f32) -> [usize; 3] {
    let mut counts = [0usize; 3];
    for voxel in grid.visible_voxels_mut() {
        let (x, y) = (voxel.x() as f32, voxel.y() as f32);
        let inside = |p: Option<Point2<f32>>| p.map(|c| in_box(x, y, &c, half_x, half_y)).unwrap_or(false);

        match (inside(positions[0]), inside(positions[1])) {
            (true, true) => {
                voxel.color = CONFLICT_COLOR;
                counts[2] += 1;
            }
            (true, false) => {
                voxel.color = Person::A.voxel_color();
                counts[0] += 1;
            }
            (false, true) => {
                voxel.color = Person::B.voxel_color();
                counts[1] += 1;
            }
            (false, false) => {}
        }
    }
    counts
}

impl PersonLocalizer {
    /// 前景画像に各人物の推定列を縦線で描く
    pub fn label_foreground(&self, view: usize, image: &mut RgbImage) -> Result<()> {
        ensure!(view < self.num_views(), "View {} out of range ({} cameras)", view, self.num_views());

        let bottom = image.height() as f32;
        for person in Person::ALL {
            if let Some(column) = self.peak_column(view, person) {
                draw_line_segment_mut(image, (column, 0.0), (column, bottom), person.marker_color());
            }
        }
        Ok(())
    }

    /// 直近の推定位置で可視ボクセルをラベリングする
    pub fn label_voxels(&self, grid: &mut VoxelGrid) -> [usize; 3] {
        let position = |person: Person| {
            if self.is_located(person) {
                Some(self.position(person).xy())
            } else {
                None
            }
        };
        let config = self.config();
        label_voxels_around(grid, [position(Person::A), position(Person::B)], config.box_half_x, config.box_half_y)
    }
}
