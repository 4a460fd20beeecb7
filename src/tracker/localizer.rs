use anyhow::{ensure, Context, Result};
use image::RgbImage;
use log::{debug, warn};
use nalgebra::{Point2, Point3};
use serde::Serialize;
use std::sync::Arc;

use crate::camera::CameraModel;
use crate::config::{HistogramConfig, TrackerConfig};
use crate::histogram::{Channel, ColorHistogram};
use crate::tracker::Person;
use crate::triangulation::{find_available_intersections, mean_point, Line2D};

/// 1フレーム分の推定結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackResult {
    /// 床面上の位置 (Z=0)。交点がなければ原点
    pub positions: [[f32; 3]; 2],
    /// 位置推定に使えた交点の数
    pub intersections: [usize; 2],
    /// ビューごとの推定列 (px)。その人物の画素がなければ `None`
    pub peak_columns: Vec<[Option<f32>; 2]>,
}

impl TrackResult {
    pub fn position(&self, person: Person) -> Point3<f32> {
        Point3::from(self.positions[person.index()])
    }

    /// 交点が1つ以上得られたか
    pub fn is_located(&self, person: Person) -> bool {
        self.intersections[person.index()] > 0
    }
}

/// 色ヒストグラムの逆投影と視線の交差による2人の位置推定
///
/// ビューごとに、各画素の色が参照ヒストグラムでどれだけの重みを持つかを
/// 画像の列ごとに積算し (列ヒストグラム)、その最大列を人物の水平位置とする。
/// 最大列を仮の深度へ逆投影し、カメラ中心からの視線を床面に落とした直線を
/// ビュー間で交差させて床面位置を求める。
pub struct PersonLocalizer {
    cameras: Vec<Arc<CameraModel>>,
    histogram: HistogramConfig,
    config: TrackerConfig,
    references: [ColorHistogram; 2],
    column_histograms: Vec<[ColorHistogram; 2]>,
    peak_columns: Vec<[Option<f32>; 2]>,
    back_projected: Vec<[Option<Point3<f32>>; 2]>,
    lines: Vec<[Option<Line2D>; 2]>,
    positions: [Point3<f32>; 2],
    intersections: [usize; 2],
}

impl PersonLocalizer {
    /// 2人の参照画像から構築
    ///
    /// 参照画像から色が1つも数えられない (全画素が黒つぶれ・白飛び) 場合はエラー。
    pub fn new(
        reference_a: &RgbImage,
        reference_b: &RgbImage,
        cameras: Vec<Arc<CameraModel>>,
        histogram: &HistogramConfig,
        config: &TrackerConfig,
    ) -> Result<Self> {
        ensure!(!cameras.is_empty(), "PersonLocalizer needs at least one camera");
        ensure!(histogram.num_bins > 0, "Histogram needs at least one bin");

        let mut references = [ColorHistogram::from_config(histogram), ColorHistogram::from_config(histogram)];
        for (person, (reference, image)) in Person::ALL.iter().zip(references.iter_mut().zip([reference_a, reference_b])) {
            reference.create_color_histogram(image, None)?;
            ensure!(
                !reference.is_empty(),
                "Reference image for person {:?} has no usable colors",
                person
            );
        }

        let n = cameras.len();
        let column = ColorHistogram::from_config(histogram);
        Ok(Self {
            cameras,
            histogram: histogram.clone(),
            config: config.clone(),
            references,
            column_histograms: vec![[column.clone(), column]; n],
            peak_columns: vec![[None; 2]; n],
            back_projected: vec![[None; 2]; n],
            lines: vec![[None; 2]; n],
            positions: [Point3::origin(); 2],
            intersections: [0; 2],
        })
    }

    /// 設定の参照画像パスから構築
    pub fn from_config(cameras: Vec<Arc<CameraModel>>, histogram: &HistogramConfig, config: &TrackerConfig) -> Result<Self> {
        let load = |path: &str| -> Result<RgbImage> {
            let img = image::open(path).with_context(|| format!("Failed to read reference image {}", path))?;
            Ok(img.into_rgb8())
        };
        let a = load(&config.person_a_image)?;
        let b = load(&config.person_b_image)?;
        Self::new(&a, &b, cameras, histogram, config)
    }

    /// 前景画像 (カメラ順) から2人の床面位置を推定する
    pub fn track_persons(&mut self, foregrounds: &[RgbImage]) -> Result<TrackResult> {
        ensure!(
            foregrounds.len() == self.cameras.len(),
            "Expected {} foreground images, got {}",
            self.cameras.len(),
            foregrounds.len()
        );
        for (i, (image, camera)) in foregrounds.iter().zip(&self.cameras).enumerate() {
            ensure!(
                image.dimensions() == camera.view_size(),
                "Foreground {} is {:?}, camera view is {:?}",
                i,
                image.dimensions(),
                camera.view_size()
            );
        }

        for view in 0..self.cameras.len() {
            self.accumulate_columns(view, &foregrounds[view]);
            self.locate_in_view(view);
        }

        for person in Person::ALL {
            let k = person.index();
            let lines: Vec<Option<Line2D>> = self.lines.iter().map(|l| l[k]).collect();
            let points = find_available_intersections(&lines);
            self.intersections[k] = points.len();
            self.positions[k] = match mean_point(&points) {
                Some(p) => Point3::new(p.x, p.y, 0.0),
                None => {
                    warn!("Person {:?}: no usable line intersections this frame", person);
                    Point3::origin()
                }
            };
            debug!("Person {:?}: {:?} from {} intersections", person, self.positions[k], points.len());
        }

        Ok(self.result())
    }

    /// 列ヒストグラムを作り直す
    fn accumulate_columns(&mut self, view: usize, image: &RgbImage) {
        let width = image.width() as usize;
        let num_bins = self.histogram.num_bins;
        let (low, high) = (self.histogram.color_low, self.histogram.color_high);

        let [hist_a, hist_b] = &mut self.column_histograms[view];
        hist_a.reset();
        hist_b.reset();

        for (x, _, pixel) in image.enumerate_pixels() {
            let [r, g, b] = pixel.0;
            let near_black = r <= low && g <= low && b <= low;
            let near_white = r >= high && g >= high && b >= high;
            if near_black || near_white {
                continue;
            }

            let bin = (x as usize * num_bins / width).min(num_bins - 1);
            for (reference, column) in self.references.iter().zip([&mut *hist_a, &mut *hist_b]) {
                let wr = reference.weight(Channel::Red, r);
                let wg = reference.weight(Channel::Green, g);
                let wb = reference.weight(Channel::Blue, b);
                if wr > 0.0 || wg > 0.0 || wb > 0.0 {
                    column.add_values(bin, wr, wg, wb);
                }
            }
        }

        hist_a.normalize(self.histogram.normalization);
        hist_b.normalize(self.histogram.normalization);
    }

    /// 最大列 → 逆投影 → 床面上の視線
    fn locate_in_view(&mut self, view: usize) {
        let camera = &self.cameras[view];
        let width = camera.width() as f32;
        let num_bins = self.histogram.num_bins as f32;

        for person in Person::ALL {
            let k = person.index();
            let hist = &self.column_histograms[view][k];
            if hist.is_empty() {
                self.peak_columns[view][k] = None;
                self.back_projected[view][k] = None;
                self.lines[view][k] = None;
                continue;
            }

            // ビンの中央の列
            let bin = hist.mean_peak_position() as f32;
            let column = (bin + 0.5) * width / num_bins;
            let point = camera.point2d_to_world3d(&Point2::new(column, camera.py() as f32));

            self.peak_columns[view][k] = Some(column);
            self.back_projected[view][k] = Some(point);
            self.lines[view][k] = Some(Line2D::from_3d(&camera.position(), &point));
        }
    }

    fn result(&self) -> TrackResult {
        let p = |k: usize| [self.positions[k].x, self.positions[k].y, self.positions[k].z];
        TrackResult {
            positions: [p(0), p(1)],
            intersections: self.intersections,
            peak_columns: self.peak_columns.clone(),
        }
    }

    pub fn cameras(&self) -> &[Arc<CameraModel>] {
        &self.cameras
    }

    pub fn num_views(&self) -> usize {
        self.cameras.len()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// 直近フレームの床面位置
    pub fn position(&self, person: Person) -> Point3<f32> {
        self.positions[person.index()]
    }

    pub fn is_located(&self, person: Person) -> bool {
        self.intersections[person.index()] > 0
    }

    pub fn peak_column(&self, view: usize, person: Person) -> Option<f32> {
        self.peak_columns.get(view)?[person.index()]
    }

    pub fn back_projected(&self, view: usize, person: Person) -> Option<Point3<f32>> {
        self.back_projected.get(view)?[person.index()]
    }

    pub fn line(&self, view: usize, person: Person) -> Option<Line2D> {
        self.lines.get(view)?[person.index()]
    }

    pub fn column_histogram(&self, view: usize, person: Person) -> Option<&ColorHistogram> {
        self.column_histograms.get(view).map(|h| &h[person.index()])
    }

    pub fn reference_histogram(&self, person: Person) -> &ColorHistogram {
        &self.references[person.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ring_rig, solid_rgb};
    use image::Rgb;

    const RED: [u8; 3] = [200, 40, 40];
    const BLUE: [u8; 3] = [40, 120, 200];

    fn localizer(cameras: Vec<Arc<CameraModel>>, histogram: &HistogramConfig) -> PersonLocalizer {
        PersonLocalizer::new(
            &solid_rgb(32, 32, RED),
            &solid_rgb(32, 32, BLUE),
            cameras,
            histogram,
            &TrackerConfig::default(),
        )
        .unwrap()
    }

    fn paint_columns(image: &mut RgbImage, columns: std::ops::Range<u32>, color: [u8; 3]) {
        for x in columns {
            for y in 0..image.height() {
                image.put_pixel(x, y, Rgb(color));
            }
        }
    }

    #[test]
    fn test_red_and_blue_regions_localize_in_each_view() {
        let cameras = ring_rig(&[0.0, 60.0, 120.0, 240.0], 4000.0, 1000.0);
        let mut loc = localizer(cameras.clone(), &HistogramConfig::default());

        let frames: Vec<RgbImage> = cameras
            .iter()
            .map(|_| {
                let mut img = RgbImage::new(320, 240);
                paint_columns(&mut img, 40..80, RED);
                paint_columns(&mut img, 220..260, BLUE);
                img
            })
            .collect();

        let result = loc.track_persons(&frames).unwrap();
        assert_eq!(result.peak_columns.len(), 4);
        for (view, [a, b]) in result.peak_columns.iter().enumerate() {
            let a = a.unwrap();
            let b = b.unwrap();
            assert!((40.0..80.0).contains(&a), "view {}: person A column {}", view, a);
            assert!((220.0..260.0).contains(&b), "view {}: person B column {}", view, b);
        }
        // 64 ビン、幅 320 → 5px/ビン。先頭ビン 8 の中央
        assert_eq!(loc.peak_column(0, Person::A), Some(42.5));
        assert_eq!(loc.peak_column(0, Person::B), Some(222.5));
    }

    #[test]
    fn test_ground_position_from_projected_columns() {
        let cameras = ring_rig(&[0.0, 60.0, 120.0, 240.0], 4000.0, 1000.0);
        // 1列 = 1ビン
        let histogram = HistogramConfig { num_bins: 320, ..HistogramConfig::default() };
        let mut loc = localizer(cameras.clone(), &histogram);

        let person_a = Point3::new(200.0, -150.0, 1000.0);
        let person_b = Point3::new(-300.0, 250.0, 1000.0);

        let frames: Vec<RgbImage> = cameras
            .iter()
            .map(|camera| {
                let mut img = RgbImage::new(320, 240);
                let ua = camera.project_on_view(&person_a).unwrap().x as u32;
                let ub = camera.project_on_view(&person_b).unwrap().x as u32;
                paint_columns(&mut img, ua..ua + 1, RED);
                paint_columns(&mut img, ub..ub + 1, BLUE);
                img
            })
            .collect();

        let result = loc.track_persons(&frames).unwrap();
        assert_eq!(result.intersections, [3, 3]);

        for (person, truth) in [(Person::A, person_a), (Person::B, person_b)] {
            let p = result.position(person);
            assert!((p.x - truth.x).abs() < 30.0, "{:?} x: expected {}, got {}", person, truth.x, p.x);
            assert!((p.y - truth.y).abs() < 30.0, "{:?} y: expected {}, got {}", person, truth.y, p.y);
            assert_eq!(p.z, 0.0);
            assert!(result.is_located(person));
        }
    }

    #[test]
    fn test_line_starts_at_camera_position() {
        let cameras = ring_rig(&[0.0, 90.0, 180.0], 4000.0, 1000.0);
        let mut loc = localizer(cameras.clone(), &HistogramConfig::default());
        let frames: Vec<RgbImage> = (0..3)
            .map(|_| {
                let mut img = RgbImage::new(320, 240);
                paint_columns(&mut img, 150..170, RED);
                img
            })
            .collect();
        loc.track_persons(&frames).unwrap();

        let line = loc.line(1, Person::A).unwrap();
        let camera = cameras[1].position();
        assert_eq!(line.origin, Point2::new(camera.x, camera.y));
        let point = loc.back_projected(1, Person::A).unwrap();
        assert_eq!(line.target, Point2::new(point.x, point.y));
        // 主点の高さで逆投影するので水平カメラなら同じ高さ
        assert!((point.z - 1000.0).abs() < 0.5, "z: {}", point.z);
    }

    #[test]
    fn test_absent_person_is_not_located() {
        let cameras = ring_rig(&[0.0, 60.0, 120.0], 4000.0, 1000.0);
        let mut loc = localizer(cameras, &HistogramConfig::default());
        let frames: Vec<RgbImage> = (0..3)
            .map(|_| {
                let mut img = RgbImage::new(320, 240);
                paint_columns(&mut img, 100..120, RED);
                img
            })
            .collect();

        let result = loc.track_persons(&frames).unwrap();
        assert!(result.is_located(Person::A));
        assert!(!result.is_located(Person::B));
        assert_eq!(result.position(Person::B), Point3::origin());
        assert!(result.peak_columns.iter().all(|c| c[1].is_none()));
        assert!(loc.line(0, Person::B).is_none());
    }

    #[test]
    fn test_filtered_pixels_do_not_vote() {
        let cameras = ring_rig(&[0.0, 60.0, 120.0], 4000.0, 1000.0);
        let mut loc = localizer(cameras, &HistogramConfig::default());

        // 左端は near-white (参照Aと同じ赤成分を持っていても除外される), 右側に本物の赤
        let frames: Vec<RgbImage> = (0..3)
            .map(|_| {
                let mut img = RgbImage::new(320, 240);
                paint_columns(&mut img, 0..60, [250, 250, 250]);
                paint_columns(&mut img, 60..120, [5, 5, 5]);
                paint_columns(&mut img, 200..205, RED);
                img
            })
            .collect();

        loc.track_persons(&frames).unwrap();
        let hist = loc.column_histogram(0, Person::A).unwrap();
        assert!(hist.channel(Channel::Red)[..24].iter().all(|&v| v == 0.0));
        assert_eq!(loc.peak_column(0, Person::A), Some(202.5));
    }

    #[test]
    fn test_partial_channel_match_stays_on_region() {
        // 参照Aと赤だけ一致し、緑・青は重みを持たない
        let cameras = ring_rig(&[0.0, 60.0, 120.0], 4000.0, 1000.0);
        let mut loc = localizer(cameras, &HistogramConfig::default());
        let frames: Vec<RgbImage> = (0..3)
            .map(|_| {
                let mut img = RgbImage::new(320, 240);
                paint_columns(&mut img, 200..210, [200, 100, 100]);
                img
            })
            .collect();

        loc.track_persons(&frames).unwrap();
        let hist = loc.column_histogram(0, Person::A).unwrap();
        assert_eq!(hist.channel_sum(Channel::Green), 0.0);
        assert_eq!(hist.channel_sum(Channel::Blue), 0.0);
        for view in 0..3 {
            let column = loc.peak_column(view, Person::A).unwrap();
            assert!((200.0..210.0).contains(&column), "view {}: column {}", view, column);
        }
        assert_eq!(loc.peak_column(0, Person::A), Some(202.5));
        assert!(loc.peak_column(0, Person::B).is_none());
    }

    #[test]
    fn test_column_histograms_are_normalized() {
        let cameras = ring_rig(&[0.0, 60.0, 120.0], 4000.0, 1000.0);
        let mut loc = localizer(cameras, &HistogramConfig::default());
        let frames: Vec<RgbImage> = (0..3)
            .map(|i| {
                let mut img = RgbImage::new(320, 240);
                paint_columns(&mut img, 10 * i..10 * i + 50, RED);
                paint_columns(&mut img, 200..300, BLUE);
                img
            })
            .collect();
        loc.track_persons(&frames).unwrap();

        for view in 0..3 {
            for person in Person::ALL {
                let hist = loc.column_histogram(view, person).unwrap();
                for c in Channel::ALL {
                    let sum = hist.channel_sum(c);
                    assert!((sum - 1.0).abs() < 1e-4, "view {} {:?} {:?}: {}", view, person, c, sum);
                }
            }
        }
    }

    #[test]
    fn test_input_mismatch_is_error() {
        let cameras = ring_rig(&[0.0, 60.0, 120.0], 4000.0, 1000.0);
        let mut loc = localizer(cameras, &HistogramConfig::default());

        let two = vec![RgbImage::new(320, 240), RgbImage::new(320, 240)];
        assert!(loc.track_persons(&two).is_err());

        let wrong_size = vec![RgbImage::new(320, 240), RgbImage::new(320, 240), RgbImage::new(321, 240)];
        assert!(loc.track_persons(&wrong_size).is_err());
    }

    #[test]
    fn test_unusable_reference_is_error() {
        let cameras = ring_rig(&[0.0, 60.0, 120.0], 4000.0, 1000.0);
        let black = solid_rgb(8, 8, [0, 0, 0]);
        let result = PersonLocalizer::new(
            &solid_rgb(8, 8, RED),
            &black,
            cameras,
            &HistogramConfig::default(),
            &TrackerConfig::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_from_config_missing_reference_image() {
        let cameras = ring_rig(&[0.0, 60.0, 120.0], 4000.0, 1000.0);
        let config = TrackerConfig {
            person_a_image: "missing/a.jpg".to_string(),
            ..TrackerConfig::default()
        };
        assert!(PersonLocalizer::from_config(cameras, &HistogramConfig::default(), &config).is_err());
    }
}
