use anyhow::{ensure, Result};
use image::{GrayImage, RgbImage};

use crate::config::HistogramConfig;

/// 色チャンネル
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Red = 0,
    Green = 1,
    Blue = 2,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Red, Channel::Green, Channel::Blue];
}

/// RGB各チャンネルの固定ビン数ヒストグラム
///
/// 画素値 `v` は `low < v < high` のときだけ数える (黒つぶれ・白飛び除去)。
/// 画像から作るほか、`add_values` で列ヒストグラムのような派生ヒストグラムも作る。
#[derive(Debug, Clone, PartialEq)]
pub struct ColorHistogram {
    bins: [Vec<f32>; 3],
    low: u8,
    high: u8,
    normalization: f32,
}

impl ColorHistogram {
    pub fn new(num_bins: usize, low: u8, high: u8) -> Self {
        let num_bins = num_bins.max(1);
        Self {
            bins: [vec![0.0; num_bins], vec![0.0; num_bins], vec![0.0; num_bins]],
            low,
            high: high.max(low.saturating_add(1)),
            normalization: 1.0,
        }
    }

    pub fn from_config(config: &HistogramConfig) -> Self {
        let mut hist = Self::new(config.num_bins, config.color_low, config.color_high);
        hist.normalization = config.normalization;
        hist
    }

    pub fn num_bins(&self) -> usize {
        self.bins[0].len()
    }

    /// 画素値 → ビン番号。範囲外 (`<= low` / `>= high`) は `None`
    pub fn bin_of(&self, value: u8) -> Option<usize> {
        if value <= self.low || value >= self.high {
            return None;
        }
        let span = (self.high - self.low) as usize;
        let bin = (value - self.low) as usize * self.num_bins() / span;
        Some(bin.min(self.num_bins() - 1))
    }

    /// 画像 (とマスク) からヒストグラムを作り直して正規化する
    ///
    /// マスク指定時は非ゼロ画素のみ数える。
    pub fn create_color_histogram(&mut self, image: &RgbImage, mask: Option<&GrayImage>) -> Result<()> {
        if let Some(mask) = mask {
            ensure!(
                mask.dimensions() == image.dimensions(),
                "Histogram mask is {:?}, image is {:?}",
                mask.dimensions(),
                image.dimensions()
            );
        }

        self.reset();
        for (x, y, pixel) in image.enumerate_pixels() {
            if let Some(mask) = mask {
                if mask.get_pixel(x, y)[0] == 0 {
                    continue;
                }
            }
            for c in Channel::ALL {
                if let Some(bin) = self.bin_of(pixel[c as usize]) {
                    self.bins[c as usize][bin] += 1.0;
                }
            }
        }
        self.normalize(self.normalization);
        Ok(())
    }

    /// 外部から与えた重みをビンに加算
    pub fn add_values(&mut self, bin: usize, r: f32, g: f32, b: f32) {
        if bin >= self.num_bins() {
            return;
        }
        self.bins[0][bin] += r;
        self.bins[1][bin] += g;
        self.bins[2][bin] += b;
    }

    /// 各チャンネルの合計 (L1) を `factor` にする。全ゼロのチャンネルはそのまま
    pub fn normalize(&mut self, factor: f32) {
        for channel in self.bins.iter_mut() {
            let sum: f32 = channel.iter().sum();
            if sum <= 0.0 {
                continue;
            }
            let scale = factor / sum;
            channel.iter_mut().for_each(|v| *v *= scale);
        }
    }

    pub fn reset(&mut self) {
        for channel in self.bins.iter_mut() {
            channel.iter_mut().for_each(|v| *v = 0.0);
        }
    }

    /// 各チャンネルの最大ビン (同値なら先頭)
    pub fn peak_positions(&self) -> [usize; 3] {
        let peak = |values: &[f32]| {
            let mut best = 0;
            for (i, &v) in values.iter().enumerate() {
                if v > values[best] {
                    best = i;
                }
            }
            best
        };
        [peak(&self.bins[0]), peak(&self.bins[1]), peak(&self.bins[2])]
    }

    /// 最大ビン位置の平均 (切り捨て)
    ///
    /// 全ゼロのチャンネルは最大ビンを持たないので平均に含めない。全チャンネルが空なら 0。
    pub fn mean_peak_position(&self) -> usize {
        let peaks = self.peak_positions();
        let (sum, count) = Channel::ALL
            .iter()
            .filter(|&&c| self.channel_sum(c) > 0.0)
            .fold((0, 0), |(sum, count), &c| (sum + peaks[c as usize], count + 1));
        if count == 0 {
            0
        } else {
            sum / count
        }
    }

    pub fn channel(&self, channel: Channel) -> &[f32] {
        &self.bins[channel as usize]
    }

    pub fn channel_sum(&self, channel: Channel) -> f32 {
        self.bins[channel as usize].iter().sum()
    }

    /// ビンの値。範囲外のビンは 0
    pub fn r(&self, bin: usize) -> f32 { self.bins[0].get(bin).copied().unwrap_or(0.0) }
    pub fn g(&self, bin: usize) -> f32 { self.bins[1].get(bin).copied().unwrap_or(0.0) }
    pub fn b(&self, bin: usize) -> f32 { self.bins[2].get(bin).copied().unwrap_or(0.0) }

    /// 全ビンがゼロか
    pub fn is_empty(&self) -> bool {
        self.bins.iter().all(|c| c.iter().all(|&v| v == 0.0))
    }

    /// 画素値の重み (そのチャンネルのビンの値)。範囲外は 0
    pub fn weight(&self, channel: Channel, value: u8) -> f32 {
        self.bin_of(value).map(|bin| self.bins[channel as usize][bin]).unwrap_or(0.0)
    }
}
