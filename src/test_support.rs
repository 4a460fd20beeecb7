//! テスト用の合成カメラ・画像

use image::{Rgb, RgbImage};
use nalgebra::{Matrix3, Vector3};
use std::sync::Arc;

use crate::calibration::{rotation_to_rvec, CameraCalibration};
use crate::camera::CameraModel;
use crate::config::GridConfig;

/// `eye` から `target` を向く歪みなしカメラのキャリブレーション
pub(crate) fn look_at_calibration(eye: [f64; 3], target: [f64; 3], focal: f64, width: u32, height: u32) -> CameraCalibration {
    let eye = Vector3::from(eye);
    let forward = (Vector3::from(target) - eye).normalize();
    // 真下/真上を向くときは +Y を上とする
    let up = if forward.z.abs() > 0.99 { Vector3::y() } else { Vector3::z() };
    let right = forward.cross(&up).normalize();
    let down = forward.cross(&right);

    let r = Matrix3::from_rows(&[right.transpose(), down.transpose(), forward.transpose()]);
    let t = -(r * eye);

    CameraCalibration {
        intrinsic_matrix: [
            focal, 0.0, width as f64 / 2.0,
            0.0, focal, height as f64 / 2.0,
            0.0, 0.0, 1.0,
        ],
        dist_coeffs: [0.0; 4],
        rvec: rotation_to_rvec(&r),
        tvec: [t.x, t.y, t.z],
    }
}

pub(crate) fn look_at_camera(index: usize, eye: [f64; 3], target: [f64; 3], focal: f64, width: u32, height: u32) -> CameraModel {
    let cal = look_at_calibration(eye, target, focal, width, height);
    CameraModel::new(index, width, height, &cal).unwrap()
}

/// 正面 (+Y側)・側面 (+X側)・真上の3台。遠方から見るのでほぼ正射影
pub(crate) fn orthogonal_rig() -> Vec<Arc<CameraModel>> {
    vec![
        Arc::new(look_at_camera(0, [0.0, 3000.0, 150.0], [0.0, 0.0, 150.0], 500.0, 320, 240)),
        Arc::new(look_at_camera(1, [3000.0, 0.0, 150.0], [0.0, 0.0, 150.0], 500.0, 320, 240)),
        Arc::new(look_at_camera(2, [0.0, 0.0, 3150.0], [0.0, 0.0, 150.0], 500.0, 320, 240)),
    ]
}

/// 高さ `height` の水平カメラを半径 `radius` の円周上、角度 `angles_deg` に並べる
pub(crate) fn ring_rig(angles_deg: &[f64], radius: f64, height: f64) -> Vec<Arc<CameraModel>> {
    angles_deg
        .iter()
        .enumerate()
        .map(|(i, deg)| {
            let a = deg.to_radians();
            let eye = [radius * a.cos(), radius * a.sin(), height];
            Arc::new(look_at_camera(i, eye, [0.0, 0.0, height], 500.0, 320, 240))
        })
        .collect()
}

/// X/Y ∈ [-200, 200)、Z ∈ [0, 300) の 8x8x6 格子
pub(crate) fn small_grid_config() -> GridConfig {
    GridConfig { grid_num: 2, grid_size: 100, voxel_step: 50 }
}

pub(crate) fn solid_rgb(width: u32, height: u32, color: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb(color))
}
