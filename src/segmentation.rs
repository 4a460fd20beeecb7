use anyhow::{ensure, Context, Result};
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology::erode;
use palette::{FromColor, Hsv, Srgb};
use std::path::Path;

use crate::config::SegmentationConfig;
use crate::voxel::FOREGROUND;

/// 8bit HSV (H: 0-179, S/V: 0-255)
pub fn rgb_to_hsv(pixel: &Rgb<u8>) -> [u8; 3] {
    let [r, g, b] = pixel.0;
    let rgb: Srgb<f32> = Srgb::new(r, g, b).into_format();
    let hsv: Hsv = Hsv::from_color(rgb);

    let h = (hsv.hue.to_positive_degrees() / 2.0).round() as u32 % 180;
    let s = (hsv.saturation * 255.0).round().clamp(0.0, 255.0);
    let v = (hsv.value * 255.0).round().clamp(0.0, 255.0);
    [h as u8, s as u8, v as u8]
}

/// 色相差 (0-179 の環状)
fn hue_distance(a: u8, b: u8) -> u8 {
    let d = a.abs_diff(b);
    d.min(180u8.saturating_sub(d))
}

/// 背景画像との HSV 差分による前景抽出
pub struct BackgroundModel {
    width: u32,
    height: u32,
    hsv: Vec<[u8; 3]>,
    config: SegmentationConfig,
}

impl BackgroundModel {
    pub fn new(background: &RgbImage, config: &SegmentationConfig) -> Self {
        Self {
            width: background.width(),
            height: background.height(),
            hsv: background.pixels().map(rgb_to_hsv).collect(),
            config: config.clone(),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P, config: &SegmentationConfig) -> Result<Self> {
        let path = path.as_ref();
        let img = image::open(path)
            .with_context(|| format!("Failed to read background image {}", path.display()))?;
        Ok(Self::new(&img.into_rgb8(), config))
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// 背景との差分だけの二値マスク (モルフォロジー処理前)
    pub fn raw_mask(&self, frame: &RgbImage) -> Result<GrayImage> {
        ensure!(
            frame.dimensions() == self.dimensions(),
            "Frame is {:?}, background is {:?}",
            frame.dimensions(),
            self.dimensions()
        );

        let c = &self.config;
        let mut mask = GrayImage::new(self.width, self.height);
        for ((pixel, bg), out) in frame.pixels().zip(&self.hsv).zip(mask.pixels_mut()) {
            let [h, s, v] = rgb_to_hsv(pixel);
            let dh = hue_distance(h, bg[0]);
            let ds = s.abs_diff(bg[1]);
            let dv = v.abs_diff(bg[2]);
            if (dh > c.threshold_h && ds > c.threshold_s) || dv > c.threshold_v {
                *out = Luma([FOREGROUND]);
            }
        }
        Ok(mask)
    }

    /// 前景マスク (0 / 255)
    ///
    /// 差分のあと 3x3 収縮 → 5x5 十字膨張を `dilate_iterations` 回 → 3x3 収縮。
    pub fn foreground_mask(&self, frame: &RgbImage) -> Result<GrayImage> {
        let mut mask = erode(&self.raw_mask(frame)?, Norm::LInf, 1);
        for _ in 0..self.config.dilate_iterations {
            mask = dilate_cross(&mask, CROSS_RADIUS);
        }
        Ok(erode(&mask, Norm::LInf, 1))
    }
}

/// 十字膨張の腕の長さ (5x5)
const CROSS_RADIUS: u32 = 2;

/// 十字形 (縦横に `radius` 画素) の構造要素による二値膨張
pub fn dilate_cross(mask: &GrayImage, radius: u32) -> GrayImage {
    let (width, height) = mask.dimensions();
    let mut out = GrayImage::new(width, height);
    for (x, y, pixel) in mask.enumerate_pixels() {
        if pixel[0] == 0 {
            continue;
        }
        for xx in x.saturating_sub(radius)..=(x + radius).min(width - 1) {
            out.put_pixel(xx, y, Luma([FOREGROUND]));
        }
        for yy in y.saturating_sub(radius)..=(y + radius).min(height - 1) {
            out.put_pixel(x, yy, Luma([FOREGROUND]));
        }
    }
    out
}

/// マスクが非ゼロの画素だけ残し、他は黒にする
pub fn extract_foreground(frame: &RgbImage, mask: &GrayImage) -> Result<RgbImage> {
    ensure!(
        frame.dimensions() == mask.dimensions(),
        "Frame is {:?}, mask is {:?}",
        frame.dimensions(),
        mask.dimensions()
    );

    let mut out = RgbImage::new(frame.width(), frame.height());
    for ((src, m), dst) in frame.pixels().zip(mask.pixels()).zip(out.pixels_mut()) {
        if m[0] != 0 {
            *dst = *src;
        }
    }
    Ok(out)
}
