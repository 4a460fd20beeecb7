pub mod model;
pub mod sequence;

pub use model::CameraModel;
pub use sequence::ImageSequence;

use anyhow::{ensure, Result};
use std::sync::Arc;

use crate::config::SceneConfig;

/// 設定のキャリブレーションファイルから全カメラを読み込む
pub fn load_cameras(scene: &SceneConfig) -> Result<Vec<Arc<CameraModel>>> {
    ensure!(!scene.calibration_files.is_empty(), "No calibration files configured");

    scene
        .calibration_files
        .iter()
        .enumerate()
        .map(|(i, path)| {
            CameraModel::from_file(i, scene.view_width, scene.view_height, path).map(Arc::new)
        })
        .collect()
}
