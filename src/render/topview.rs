use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};

use crate::render::scene::{SceneFrame, Segment3};

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const PERSON_RADIUS: i32 = 8;
const VOXEL_RADIUS: i32 = 1;

/// 床面を真上から見た2D表示
///
/// 画像の上が +X、左が +Y。中心が原点で、`extent` (mm) が画像の半幅になる。
pub struct TopView {
    image: RgbImage,
    scale: f32,
    center: f32,
}

impl TopView {
    pub fn new(size: u32, extent: f32) -> Self {
        let size = size.max(1);
        let center = size as f32 / 2.0;
        Self {
            image: RgbImage::from_pixel(size, size, BACKGROUND),
            scale: if extent > 0.0 { center / extent } else { 1.0 },
            center,
        }
    }

    /// 床面座標 → 画像座標
    pub fn to_pixel(&self, x: f32, y: f32) -> (f32, f32) {
        (self.center - y * self.scale, self.center - x * self.scale)
    }

    pub fn draw_segment(&mut self, segment: &Segment3) {
        let from = self.to_pixel(segment.from[0], segment.from[1]);
        let to = self.to_pixel(segment.to[0], segment.to[1]);
        draw_line_segment_mut(&mut self.image, from, to, Rgb(segment.color));
    }

    fn draw_dot(&mut self, x: f32, y: f32, radius: i32, color: [u8; 3]) {
        let (u, v) = self.to_pixel(x, y);
        if !u.is_finite() || !v.is_finite() {
            return;
        }
        draw_filled_circle_mut(&mut self.image, (u.round() as i32, v.round() as i32), radius, Rgb(color));
    }

    /// 線分 → ボクセル → 人物の順に重ねる
    pub fn draw_scene(&mut self, scene: &SceneFrame) {
        for segment in &scene.segments {
            self.draw_segment(segment);
        }
        for voxel in &scene.voxels {
            self.draw_dot(voxel.position[0] as f32, voxel.position[1] as f32, VOXEL_RADIUS, voxel.color);
        }
        for marker in scene.persons.iter().filter(|m| m.located) {
            let color = crate::render::scene::to_rgb8(marker.person.voxel_color());
            self.draw_dot(marker.position[0], marker.position[1], PERSON_RADIUS, color);
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

pub fn render_top_view(scene: &SceneFrame, size: u32, extent: f32) -> RgbImage {
    let mut view = TopView::new(size, extent);
    view.draw_scene(scene);
    view.into_image()
}
