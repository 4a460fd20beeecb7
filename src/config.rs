use anyhow::{Context, Result};
use log::warn;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub scene: SceneConfig,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub histogram: HistogramConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// カメラ構成
#[derive(Debug, Deserialize, Clone)]
pub struct SceneConfig {
    /// 各ビューの横解像度
    #[serde(default = "default_view_width")]
    pub view_width: u32,
    /// 各ビューの縦解像度
    #[serde(default = "default_view_height")]
    pub view_height: u32,
    /// カメラごとのキャリブレーションファイル (.ini / .json)
    #[serde(default = "default_calibration_files")]
    pub calibration_files: Vec<String>,
}

fn default_view_width() -> u32 { 644 }
fn default_view_height() -> u32 { 484 }
fn default_calibration_files() -> Vec<String> {
    ["f", "l", "r", "s"]
        .iter()
        .map(|name| format!("data/camparam_{}.ini", name))
        .collect()
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            view_width: default_view_width(),
            view_height: default_view_height(),
            calibration_files: default_calibration_files(),
        }
    }
}

/// ボクセル格子
///
/// X/Y は `[-grid_num*grid_size, grid_num*grid_size)`、
/// Z は `[0, 2*grid_num*grid_size - grid_num*grid_size/2)` を `voxel_step` 刻みで埋める。
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct GridConfig {
    #[serde(default = "default_grid_num")]
    pub grid_num: i32,
    /// 格子1マスの辺長 (mm)
    #[serde(default = "default_grid_size")]
    pub grid_size: i32,
    /// ボクセル間隔 (mm)
    #[serde(default = "default_voxel_step")]
    pub voxel_step: i32,
}

fn default_grid_num() -> i32 { 4 }
fn default_grid_size() -> i32 { 400 }
fn default_voxel_step() -> i32 { 50 }

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            grid_num: default_grid_num(),
            grid_size: default_grid_size(),
            voxel_step: default_voxel_step(),
        }
    }
}

/// カラーヒストグラム
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct HistogramConfig {
    #[serde(default = "default_num_bins")]
    pub num_bins: usize,
    /// この値以下の画素値は数えない
    #[serde(default = "default_color_low")]
    pub color_low: u8,
    /// この値以上の画素値は数えない
    #[serde(default = "default_color_high")]
    pub color_high: u8,
    /// 正規化後の各チャンネルの合計
    #[serde(default = "default_normalization")]
    pub normalization: f32,
}

fn default_num_bins() -> usize { 64 }
fn default_color_low() -> u8 { 5 }
fn default_color_high() -> u8 { 250 }
fn default_normalization() -> f32 { 1.0 }

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            num_bins: default_num_bins(),
            color_low: default_color_low(),
            color_high: default_color_high(),
            normalization: default_normalization(),
        }
    }
}

/// 人物位置推定・ラベリング
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TrackerConfig {
    /// 人物Aの参照画像
    #[serde(default = "default_person_a_image")]
    pub person_a_image: String,
    /// 人物Bの参照画像
    #[serde(default = "default_person_b_image")]
    pub person_b_image: String,
    /// ラベリング範囲の X 半幅 (mm)
    #[serde(default = "default_box_half_x")]
    pub box_half_x: f32,
    /// ラベリング範囲の Y 半幅 (mm)
    #[serde(default = "default_box_half_y")]
    pub box_half_y: f32,
    /// 表示用ボックスの高さ (mm)
    #[serde(default = "default_box_height")]
    pub box_height: f32,
    /// 表示用視線の長さ (mm)
    #[serde(default = "default_line_length")]
    pub line_length: f32,
}

fn default_person_a_image() -> String { "data/init-person1.jpg".to_string() }
fn default_person_b_image() -> String { "data/init-person2.jpg".to_string() }
fn default_box_half_x() -> f32 { 350.0 }
fn default_box_half_y() -> f32 { 750.0 }
fn default_box_height() -> f32 { 2000.0 }
fn default_line_length() -> f32 { 8000.0 }

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            person_a_image: default_person_a_image(),
            person_b_image: default_person_b_image(),
            box_half_x: default_box_half_x(),
            box_half_y: default_box_half_y(),
            box_height: default_box_height(),
            line_length: default_line_length(),
        }
    }
}

/// 背景差分 (HSV)
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SegmentationConfig {
    #[serde(default = "default_threshold_h")]
    pub threshold_h: u8,
    #[serde(default = "default_threshold_s")]
    pub threshold_s: u8,
    #[serde(default = "default_threshold_v")]
    pub threshold_v: u8,
    /// 十字カーネルでの膨張回数
    #[serde(default = "default_dilate_iterations")]
    pub dilate_iterations: u32,
    /// カメラごとの背景画像
    #[serde(default = "default_background_images")]
    pub background_images: Vec<String>,
}

fn default_threshold_h() -> u8 { 25 }
fn default_threshold_s() -> u8 { 40 }
fn default_threshold_v() -> u8 { 65 }
fn default_dilate_iterations() -> u32 { 2 }
fn default_background_images() -> Vec<String> {
    ["f", "l", "r", "s"]
        .iter()
        .map(|name| format!("data/background_{}.bmp", name))
        .collect()
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            threshold_h: default_threshold_h(),
            threshold_s: default_threshold_s(),
            threshold_v: default_threshold_v(),
            dilate_iterations: default_dilate_iterations(),
            background_images: default_background_images(),
        }
    }
}

/// 入力フレーム列
#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    /// カメラごとのフレーム画像ディレクトリ
    #[serde(default = "default_frame_dirs")]
    pub frame_dirs: Vec<String>,
    /// 前景マスクのディレクトリ。指定時は背景差分を行わない
    #[serde(default)]
    pub mask_dirs: Option<Vec<String>>,
    /// 処理する最大フレーム数
    #[serde(default)]
    pub max_frames: Option<usize>,
}

fn default_frame_dirs() -> Vec<String> {
    ["f", "l", "r", "s"]
        .iter()
        .map(|name| format!("data/video_{}", name))
        .collect()
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            frame_dirs: default_frame_dirs(),
            mask_dirs: None,
            max_frames: None,
        }
    }
}

/// 表示ストリームの切り替え
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RenderConfig {
    #[serde(default = "default_true")]
    pub show_floor: bool,
    #[serde(default = "default_true")]
    pub show_volume: bool,
    #[serde(default = "default_true")]
    pub show_cameras: bool,
    #[serde(default = "default_true")]
    pub show_origin: bool,
    #[serde(default = "default_true")]
    pub show_lines: bool,
    #[serde(default = "default_true")]
    pub show_boxes: bool,
    /// 上面図の一辺 (px)
    #[serde(default = "default_top_view_size")]
    pub top_view_size: u32,
    /// 上面図に映す範囲の半幅 (mm)
    #[serde(default = "default_top_view_extent")]
    pub top_view_extent: f32,
}

fn default_true() -> bool { true }
fn default_top_view_size() -> u32 { 800 }
fn default_top_view_extent() -> f32 { 5000.0 }

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            show_floor: true,
            show_volume: true,
            show_cameras: true,
            show_origin: true,
            show_lines: true,
            show_boxes: true,
            top_view_size: default_top_view_size(),
            top_view_extent: default_top_view_extent(),
        }
    }
}

/// 出力先
#[derive(Debug, Deserialize, Clone, Default)]
pub struct OutputConfig {
    /// 未指定なら何も書き出さない
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub write_scene_json: bool,
    #[serde(default)]
    pub write_top_view: bool,
    #[serde(default)]
    pub write_foregrounds: bool,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// 読めなければデフォルト値で続行
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("{:#}; using default configuration", e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scene_values() {
        let config = Config::default();
        assert_eq!(config.scene.view_width, 644);
        assert_eq!(config.scene.view_height, 484);
        assert_eq!(config.scene.calibration_files.len(), 4);
        assert_eq!(config.grid, GridConfig { grid_num: 4, grid_size: 400, voxel_step: 50 });
        assert_eq!(config.histogram.num_bins, 64);
        assert_eq!(config.segmentation.threshold_h, 25);
        assert!(config.output.dir.is_none());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [grid]
            voxel_step = 100

            [tracker]
            box_half_x = 500.0

            [input]
            frame_dirs = ["a", "b"]
            max_frames = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.grid.voxel_step, 100);
        assert_eq!(config.grid.grid_num, 4);
        assert_eq!(config.tracker.box_half_x, 500.0);
        assert_eq!(config.tracker.box_half_y, 750.0);
        assert_eq!(config.input.frame_dirs, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(config.input.max_frames, Some(10));
        assert!(config.input.mask_dirs.is_none());
        assert!(config.render.show_floor);
    }

    #[test]
    fn test_bundled_config_parses() {
        let config = Config::load(concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml")).unwrap();
        assert_eq!(config.scene.calibration_files.len(), 4);
        assert_eq!(config.grid, GridConfig::default());
        assert!(config.output.dir.is_none());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = Config::load_or_default("does/not/exist.toml");
        assert_eq!(config.grid, GridConfig::default());
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[grid\nvoxel_step = ").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
