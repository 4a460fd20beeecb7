use nalgebra::{Point2, Point3};
use serde::Serialize;

use crate::camera::CameraModel;
use crate::config::RenderConfig;
use crate::tracker::{Person, PersonLocalizer};
use crate::voxel::VoxelGrid;

/// 床グリッド: 片側のマス数
pub const FLOOR_GRID_NUM: i32 = 4;
/// 床グリッド: 1マスの辺長 (mm)
pub const FLOOR_GRID_SIZE: f32 = 480.0;
/// 床グリッドをボクセルと重ならないよう少し浮かせる
pub const FLOOR_OFFSET_Z: f32 = 5.0;
/// 原点の座標軸の長さ (mm)
pub const AXIS_LENGTH: f32 = 500.0;

pub const FLOOR_COLOR: [u8; 3] = [160, 160, 160];
pub const VOLUME_COLOR: [u8; 3] = [255, 160, 0];
pub const CAMERA_COLOR: [u8; 3] = [0, 0, 0];

const FRUSTUM_EDGES: [(usize, usize); 8] = [(0, 1), (0, 2), (0, 3), (0, 4), (1, 2), (2, 3), (3, 4), (4, 1)];
const BOX_EDGES: [(usize, usize); 12] = [
    (0, 1), (1, 2), (2, 3), (3, 0),
    (4, 5), (5, 6), (6, 7), (7, 4),
    (0, 4), (1, 5), (2, 6), (3, 7),
];

/// 3D線分1本
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Segment3 {
    pub from: [f32; 3],
    pub to: [f32; 3],
    pub color: [u8; 3],
}

impl Segment3 {
    pub fn new(from: Point3<f32>, to: Point3<f32>, color: [u8; 3]) -> Self {
        Self { from: [from.x, from.y, from.z], to: [to.x, to.y, to.z], color }
    }
}

/// 可視ボクセル1つ (点群表示用)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VoxelPoint {
    pub position: [i32; 3],
    pub color: [u8; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PersonMarker {
    pub person: Person,
    pub position: [f32; 3],
    pub located: bool,
}

/// 1フレーム分の表示データ
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneFrame {
    pub frame_index: usize,
    pub persons: Vec<PersonMarker>,
    pub voxels: Vec<VoxelPoint>,
    pub segments: Vec<Segment3>,
}

impl SceneFrame {
    /// 設定で有効なストリームを集める
    pub fn capture(frame_index: usize, grid: &VoxelGrid, localizer: &PersonLocalizer, config: &RenderConfig) -> Self {
        let mut segments = Vec::new();
        if config.show_floor {
            segments.extend(floor_grid(FLOOR_GRID_NUM, FLOOR_GRID_SIZE, FLOOR_OFFSET_Z));
        }
        if config.show_volume {
            segments.extend(volume_edges(grid.volume_corners()));
        }
        if config.show_cameras {
            for camera in localizer.cameras() {
                segments.extend(camera_frustum(camera));
            }
        }
        if config.show_origin {
            segments.extend(origin_axes(AXIS_LENGTH));
        }

        let tracker = localizer.config();
        let mut persons = Vec::new();
        for person in Person::ALL {
            let position = localizer.position(person);
            let located = localizer.is_located(person);
            persons.push(PersonMarker { person, position: [position.x, position.y, position.z], located });

            if config.show_lines {
                segments.extend(person_lines(localizer, person, tracker.line_length));
            }
            if config.show_boxes && located {
                segments.extend(person_box(
                    &position.xy(),
                    tracker.box_half_x,
                    tracker.box_half_y,
                    tracker.box_height,
                    to_rgb8(person.voxel_color()),
                ));
            }
        }

        let voxels = grid
            .visible_voxels()
            .map(|v| VoxelPoint { position: [v.x(), v.y(), v.z()], color: to_rgb8(v.color) })
            .collect();

        Self { frame_index, persons, voxels, segments }
    }
}

pub fn to_rgb8(color: [f32; 3]) -> [u8; 3] {
    color.map(|c| c.clamp(0.0, 255.0).round() as u8)
}

/// 床の格子線 (X方向・Y方向それぞれ 2n+1 本)
pub fn floor_grid(n: i32, size: f32, z: f32) -> Vec<Segment3> {
    let half = n as f32 * size;
    let mut segments = Vec::new();
    for i in -n..=n {
        let t = i as f32 * size;
        segments.push(Segment3::new(Point3::new(t, -half, z), Point3::new(t, half, z), FLOOR_COLOR));
        segments.push(Segment3::new(Point3::new(-half, t, z), Point3::new(half, t, z), FLOOR_COLOR));
    }
    segments
}

/// 直方体の12辺 (下面4点 → 上面4点の順の頂点)
pub fn box_edges(corners: &[Point3<f32>; 8], color: [u8; 3]) -> Vec<Segment3> {
    BOX_EDGES
        .iter()
        .map(|&(a, b)| Segment3::new(corners[a], corners[b], color))
        .collect()
}

pub fn volume_edges(corners: &[Point3<f32>; 8]) -> Vec<Segment3> {
    box_edges(corners, VOLUME_COLOR)
}

/// カメラ中心から画像四隅への4辺と、画像面の4辺
pub fn camera_frustum(camera: &CameraModel) -> Vec<Segment3> {
    let c = camera.corners();
    FRUSTUM_EDGES
        .iter()
        .map(|&(a, b)| Segment3::new(c[a], c[b], CAMERA_COLOR))
        .collect()
}

pub fn origin_axes(length: f32) -> Vec<Segment3> {
    let o = Point3::origin();
    vec![
        Segment3::new(o, Point3::new(length, 0.0, 0.0), [255, 0, 0]),
        Segment3::new(o, Point3::new(0.0, length, 0.0), [0, 255, 0]),
        Segment3::new(o, Point3::new(0.0, 0.0, length), [0, 0, 255]),
    ]
}

/// カメラ直下の床から、推定した視線方向へ `length` だけ伸ばした線
pub fn person_lines(localizer: &PersonLocalizer, person: Person, length: f32) -> Vec<Segment3> {
    let color = to_rgb8(person.voxel_color());
    let mut segments = Vec::new();
    for view in 0..localizer.num_views() {
        let line = match localizer.line(view, person) {
            Some(l) => l,
            None => continue,
        };
        let dir = line.direction();
        if dir.norm() == 0.0 {
            continue;
        }
        let from = Point3::new(line.origin.x, line.origin.y, 0.0);
        let to = Point3::new(line.origin.x + dir.x * length, line.origin.y + dir.y * length, 0.0);
        segments.push(Segment3::new(from, to, color));
    }
    segments
}

/// 人物位置を囲む直方体 (床から `height` まで)
pub fn person_box(center: &Point2<f32>, half_x: f32, half_y: f32, height: f32, color: [u8; 3]) -> Vec<Segment3> {
    let (xl, xr) = (center.x - half_x, center.x + half_x);
    let (yl, yr) = (center.y - half_y, center.y + half_y);
    let corners = [
        Point3::new(xl, yl, 0.0),
        Point3::new(xl, yr, 0.0),
        Point3::new(xr, yr, 0.0),
        Point3::new(xr, yl, 0.0),
        Point3::new(xl, yl, height),
        Point3::new(xl, yr, height),
        Point3::new(xr, yr, height),
        Point3::new(xr, yl, height),
    ];
    box_edges(&corners, color)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HistogramConfig, TrackerConfig};
    use crate::test_support::{look_at_camera, ring_rig, small_grid_config, solid_rgb};
    use image::{GrayImage, Luma, Rgb, RgbImage};

    #[test]
    fn test_floor_grid_lines() {
        let segments = floor_grid(FLOOR_GRID_NUM, FLOOR_GRID_SIZE, FLOOR_OFFSET_Z);
        assert_eq!(segments.len(), 2 * 9);
        assert!(segments.iter().all(|s| s.from[2] == 5.0 && s.to[2] == 5.0));
        assert_eq!(segments[0].from, [-1920.0, -1920.0, 5.0]);
        assert_eq!(segments[0].to, [-1920.0, 1920.0, 5.0]);
    }

    #[test]
    fn test_person_box_extent() {
        let segments = person_box(&Point2::new(100.0, -200.0), 350.0, 750.0, 2000.0, [0, 200, 0]);
        assert_eq!(segments.len(), 12);
        let xs: Vec<f32> = segments.iter().flat_map(|s| [s.from[0], s.to[0]]).collect();
        let ys: Vec<f32> = segments.iter().flat_map(|s| [s.from[1], s.to[1]]).collect();
        let zs: Vec<f32> = segments.iter().flat_map(|s| [s.from[2], s.to[2]]).collect();
        assert_eq!(xs.iter().cloned().fold(f32::MAX, f32::min), -250.0);
        assert_eq!(xs.iter().cloned().fold(f32::MIN, f32::max), 450.0);
        assert_eq!(ys.iter().cloned().fold(f32::MAX, f32::min), -950.0);
        assert_eq!(ys.iter().cloned().fold(f32::MIN, f32::max), 550.0);
        assert_eq!(zs.iter().cloned().fold(f32::MIN, f32::max), 2000.0);
    }

    #[test]
    fn test_camera_frustum_starts_at_center() {
        let camera = look_at_camera(0, [0.0, -3000.0, 1000.0], [0.0, 0.0, 1000.0], 500.0, 320, 240);
        let segments = camera_frustum(&camera);
        assert_eq!(segments.len(), 8);
        let p = camera.position();
        for s in &segments[..4] {
            assert_eq!(s.from, [p.x, p.y, p.z]);
        }
    }

    #[test]
    fn test_capture_collects_enabled_streams() {
        let cameras = ring_rig(&[0.0, 60.0, 120.0], 4000.0, 1000.0);
        let mut grid = VoxelGrid::new(&cameras, &small_grid_config()).unwrap();
        let masks: Vec<GrayImage> = cameras.iter().map(|c| GrayImage::from_pixel(c.width(), c.height(), Luma([255]))).collect();
        grid.update_voxels(&masks).unwrap();

        let red = [200, 40, 40];
        let mut loc = PersonLocalizer::new(
            &solid_rgb(4, 4, red),
            &solid_rgb(4, 4, [40, 120, 200]),
            cameras.clone(),
            &HistogramConfig::default(),
            &TrackerConfig::default(),
        )
        .unwrap();
        let frames: Vec<RgbImage> = cameras
            .iter()
            .map(|_| {
                let mut img = RgbImage::new(320, 240);
                for y in 0..240 {
                    for x in 150..170 {
                        img.put_pixel(x, y, Rgb(red));
                    }
                }
                img
            })
            .collect();
        loc.track_persons(&frames).unwrap();
        loc.label_voxels(&mut grid);

        let config = RenderConfig::default();
        let scene = SceneFrame::capture(7, &grid, &loc, &config);
        assert_eq!(scene.frame_index, 7);
        assert_eq!(scene.voxels.len(), grid.visible_voxels().count());
        assert!(!scene.voxels.is_empty());
        assert!(scene.persons[0].located);
        assert!(!scene.persons[1].located);
        // 床 18 + 体積 12 + カメラ 3x8 + 軸 3 + 視線 3 + Aのボックス 12
        assert_eq!(scene.segments.len(), 18 + 12 + 24 + 3 + 3 + 12);
        assert!(scene.voxels.iter().any(|v| v.color == [0, 200, 0]));

        let bare = RenderConfig {
            show_floor: false,
            show_volume: false,
            show_cameras: false,
            show_origin: false,
            show_lines: false,
            show_boxes: false,
            ..RenderConfig::default()
        };
        let scene = SceneFrame::capture(7, &grid, &loc, &bare);
        assert!(scene.segments.is_empty());

        let json = serde_json::to_value(&scene).unwrap();
        assert_eq!(json["frame_index"], 7);
        assert_eq!(json["persons"][0]["person"], "A");
    }

    #[test]
    fn test_person_lines_point_toward_estimate() {
        let cameras = ring_rig(&[0.0, 60.0, 120.0], 4000.0, 1000.0);
        let red = [200, 40, 40];
        let mut loc = PersonLocalizer::new(
            &solid_rgb(4, 4, red),
            &solid_rgb(4, 4, [40, 120, 200]),
            cameras.clone(),
            &HistogramConfig::default(),
            &TrackerConfig::default(),
        )
        .unwrap();
        let frames: Vec<RgbImage> = cameras
            .iter()
            .map(|_| {
                let mut img = RgbImage::new(320, 240);
                for y in 0..240 {
                    img.put_pixel(160, y, Rgb(red));
                }
                img
            })
            .collect();
        loc.track_persons(&frames).unwrap();

        let lines = person_lines(&loc, Person::A, 8000.0);
        assert_eq!(lines.len(), 3);
        for (s, camera) in lines.iter().zip(&cameras) {
            let p = camera.position();
            assert_eq!(s.from, [p.x, p.y, 0.0]);
            let len = ((s.to[0] - s.from[0]).powi(2) + (s.to[1] - s.from[1]).powi(2)).sqrt();
            assert!((len - 8000.0).abs() < 0.5, "length {}", len);
            // 中央の列 → ほぼ原点を通る (終点は反対側 4000mm 先)
            let mid = [(s.from[0] + s.to[0]) / 2.0, (s.from[1] + s.to[1]) / 2.0];
            assert!(mid[0].abs() < 60.0 && mid[1].abs() < 60.0, "midpoint {:?}", mid);
        }
        assert!(person_lines(&loc, Person::B, 8000.0).is_empty());
    }
}
