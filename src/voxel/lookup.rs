use nalgebra::Point3;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::camera::CameraModel;

/// 1台のカメラの画素 → ボクセル番号の対応表
///
/// 画素ごとの可変長リストを CSR 形式 (オフセット + 連結した番号列) で持つ。
/// 各画素のリストはボクセル番号の昇順。
#[derive(Debug, Clone, PartialEq)]
pub struct LookupTable {
    width: u32,
    height: u32,
    /// 長さ width*height+1。画素 p のリストは `entries[offsets[p]..offsets[p+1]]`
    offsets: Vec<u32>,
    entries: Vec<u32>,
}

impl LookupTable {
    /// (画素番号, ボクセル番号) の組から作る
    ///
    /// 画素番号は `y * width + x`。同じ画素内の順序は入力順を保つ。
    pub fn from_pairs(width: u32, height: u32, pairs: &[(u32, u32)]) -> Self {
        let pixel_count = (width * height) as usize;

        let mut offsets = vec![0u32; pixel_count + 1];
        for &(pixel, _) in pairs {
            offsets[pixel as usize + 1] += 1;
        }
        for i in 0..pixel_count {
            offsets[i + 1] += offsets[i];
        }

        let mut cursor: Vec<u32> = offsets[..pixel_count].to_vec();
        let mut entries = vec![0u32; pairs.len()];
        for &(pixel, voxel) in pairs {
            let slot = &mut cursor[pixel as usize];
            entries[*slot as usize] = voxel;
            *slot += 1;
        }

        Self { width, height, offsets, entries }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// 画素 (x, y) に投影されるボクセル番号
    pub fn voxels_at(&self, x: u32, y: u32) -> &[u32] {
        if x >= self.width || y >= self.height {
            return &[];
        }
        self.voxels_at_index((y * self.width + x) as usize)
    }

    pub(crate) fn voxels_at_index(&self, pixel: usize) -> &[u32] {
        let start = self.offsets[pixel] as usize;
        let end = self.offsets[pixel + 1] as usize;
        &self.entries[start..end]
    }

    /// 登録されている (画素, ボクセル) の総数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// ボクセル中心 `points[i]` (番号は `base + i`) を投影し、画像内に落ちたものを集める
pub(crate) fn project_chunk(camera: &CameraModel, points: &[Point3<f32>], base: usize) -> Vec<(u32, u32)> {
    let width = camera.width();
    let project = |(i, point): (usize, &Point3<f32>)| {
        let pixel = camera.project_on_view(point)?;
        if !camera.contains(&pixel) {
            return None;
        }
        let index = pixel.y as u32 * width + pixel.x as u32;
        Some((index, (base + i) as u32))
    };

    #[cfg(feature = "parallel")]
    {
        points.par_iter().enumerate().filter_map(project).collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        points.iter().enumerate().filter_map(project).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pairs_groups_by_pixel_keeping_order() {
        // 3x2 画像
        let pairs = [(4, 0), (1, 1), (4, 2), (0, 3), (4, 5), (1, 7)];
        let table = LookupTable::from_pairs(3, 2, &pairs);

        assert_eq!(table.len(), 6);
        assert_eq!(table.voxels_at(0, 0), &[3]);
        assert_eq!(table.voxels_at(1, 0), &[1, 7]);
        assert_eq!(table.voxels_at(1, 1), &[0, 2, 5]);
        assert!(table.voxels_at(2, 1).is_empty());
    }

    #[test]
    fn test_out_of_range_pixel_is_empty() {
        let table = LookupTable::from_pairs(2, 2, &[(3, 9)]);
        assert_eq!(table.voxels_at(1, 1), &[9]);
        assert!(table.voxels_at(2, 0).is_empty());
        assert!(table.voxels_at(0, 5).is_empty());
    }

    #[test]
    fn test_project_chunk_keeps_in_view_points_only() {
        let camera = crate::test_support::look_at_camera(0, [0.0, -3000.0, 0.0], [0.0, 0.0, 0.0], 500.0, 320, 240);
        let points = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(50_000.0, 0.0, 0.0),
            Point3::new(0.0, -6000.0, 0.0),
            Point3::new(33.0, 0.0, -33.0),
        ];
        let pairs = project_chunk(&camera, &points, 10);
        let voxels: Vec<u32> = pairs.iter().map(|&(_, v)| v).collect();
        assert_eq!(voxels, vec![10, 13]);
        // (33, -33) → (165.5, 125.5)
        assert_eq!(pairs[1].0, 125 * 320 + 165);
    }
}
