pub mod label;
pub mod localizer;

pub use label::{label_voxels_around, CONFLICT_COLOR};
pub use localizer::{PersonLocalizer, TrackResult};

use image::Rgb;
use serde::Serialize;

/// 追跡対象の2人
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Person {
    A,
    B,
}

impl Person {
    pub const ALL: [Person; 2] = [Person::A, Person::B];

    pub fn index(self) -> usize {
        match self {
            Person::A => 0,
            Person::B => 1,
        }
    }

    /// 前景画像に引く縦線の色
    pub fn marker_color(self) -> Rgb<u8> {
        match self {
            Person::A => Rgb([0, 255, 0]),
            Person::B => Rgb([0, 0, 255]),
        }
    }

    /// ボクセル・表示用の色 (0-255)
    pub fn voxel_color(self) -> [f32; 3] {
        match self {
            Person::A => [0.0, 200.0, 0.0],
            Person::B => [0.0, 0.0, 200.0],
        }
    }
}
