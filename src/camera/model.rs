use anyhow::{bail, ensure, Context, Result};
use nalgebra::{Matrix3, Matrix4, Point2, Point3, Vector3, Vector4};
use std::path::Path;

use crate::calibration::{load_calibration, rodrigues, CameraCalibration};

/// `corners()` の並び
pub const CORNER_CENTER: usize = 0;
pub const CORNER_TOP_LEFT: usize = 1;
pub const CORNER_TOP_RIGHT: usize = 2;
pub const CORNER_BOTTOM_RIGHT: usize = 3;
pub const CORNER_BOTTOM_LEFT: usize = 4;
pub const CORNER_PRINCIPAL: usize = 5;
pub const CORNER_COUNT: usize = 6;

/// カメラ前方とみなす最小深度
const MIN_DEPTH: f64 = 1e-6;

/// 1台のキャリブレーション済みカメラ
///
/// 構築後は不変。`VoxelGrid` と `PersonLocalizer` から `Arc` で共有する。
#[derive(Debug, Clone)]
pub struct CameraModel {
    index: usize,
    width: u32,
    height: u32,
    fx: f64,
    fy: f64,
    px: f64,
    py: f64,
    /// [k1, k2, p1, p2]
    dist_coeffs: [f64; 4],
    rvec: [f64; 3],
    rotation: Matrix3<f64>,
    translation: Vector3<f64>,
    /// world → camera `[R|t; 0 0 0 1]`
    extrinsic: Matrix4<f64>,
    /// camera → world
    inverse_extrinsic: Matrix4<f64>,
    position: Point3<f32>,
    corners: [Point3<f32>; CORNER_COUNT],
}

impl CameraModel {
    /// キャリブレーション値からカメラを構築
    ///
    /// 焦点距離や解像度が正でない、または値が有限でない場合はエラー。
    pub fn new(index: usize, width: u32, height: u32, cal: &CameraCalibration) -> Result<Self> {
        ensure!(width > 0 && height > 0, "Camera {}: view size must be positive ({}x{})", index, width, height);
        ensure!(cal.is_finite(), "Camera {}: calibration contains non-finite values", index);
        ensure!(
            cal.fx() > 0.0 && cal.fy() > 0.0,
            "Camera {}: degenerate focal length (fx={}, fy={})",
            index,
            cal.fx(),
            cal.fy()
        );

        let rotation = rodrigues(&cal.rvec);
        let translation = Vector3::new(cal.tvec[0], cal.tvec[1], cal.tvec[2]);

        let mut extrinsic = Matrix4::identity();
        extrinsic.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
        extrinsic.fixed_view_mut::<3, 1>(0, 3).copy_from(&translation);

        let inverse_extrinsic = match extrinsic.try_inverse() {
            Some(m) => m,
            None => bail!("Camera {}: extrinsic matrix is singular", index),
        };

        // カメラ中心 C = -R^T t
        let center = -(rotation.transpose() * translation);
        let position = Point3::new(center.x as f32, center.y as f32, center.z as f32);

        let mut model = Self {
            index,
            width,
            height,
            fx: cal.fx(),
            fy: cal.fy(),
            px: cal.px(),
            py: cal.py(),
            dist_coeffs: cal.dist_coeffs,
            rvec: cal.rvec,
            rotation,
            translation,
            extrinsic,
            inverse_extrinsic,
            position,
            corners: [position; CORNER_COUNT],
        };

        let w = width as f64;
        let h = height as f64;
        let (px, py) = (model.px, model.py);
        let corners = [
            position,
            model.camera_to_world(-px, -py),
            model.camera_to_world(w - px, -py),
            model.camera_to_world(w - px, h - py),
            model.camera_to_world(-px, h - py),
            model.camera_to_world(0.0, 0.0),
        ];
        model.corners = corners;

        Ok(model)
    }

    /// ファイルから読み込んで構築
    pub fn from_file<P: AsRef<Path>>(index: usize, width: u32, height: u32, path: P) -> Result<Self> {
        let path = path.as_ref();
        let cal = load_calibration(path)?;
        Self::new(index, width, height, &cal)
            .with_context(|| format!("Invalid calibration in {}", path.display()))
    }

    /// 3D点を歪みモデル込みで画像に投影 (サブピクセル)
    ///
    /// カメラの背後 (z <= 0) にある点は `None`。
    pub fn project_point(&self, point: &Point3<f32>) -> Option<Point2<f32>> {
        let world = Vector4::new(point.x as f64, point.y as f64, point.z as f64, 1.0);
        let cam = self.extrinsic * world;
        if cam.z <= MIN_DEPTH {
            return None;
        }

        let x = cam.x / cam.z;
        let y = cam.y / cam.z;
        let [k1, k2, p1, p2] = self.dist_coeffs;

        let r2 = x * x + y * y;
        let radial = 1.0 + k1 * r2 + k2 * r2 * r2;
        let xd = x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
        let yd = y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;

        let u = self.fx * xd + self.px;
        let v = self.fy * yd + self.py;
        if !u.is_finite() || !v.is_finite() {
            return None;
        }
        Some(Point2::new(u as f32, v as f32))
    }

    /// 3D点を整数ピクセルに投影
    ///
    /// 画像外の座標も返すので、呼び出し側で範囲チェックすること。
    pub fn project_on_view(&self, point: &Point3<f32>) -> Option<Point2<i32>> {
        let p = self.project_point(point)?;
        Some(Point2::new(p.x.floor() as i32, p.y.floor() as i32))
    }

    /// 画素を仮の深度 `(fx+fy)/2` の平面上へ逆投影
    ///
    /// 真の3D位置ではなく、カメラ中心からその画素を通る視線上の一点。
    pub fn point2d_to_world3d(&self, pixel: &Point2<f32>) -> Point3<f32> {
        self.camera_to_world(pixel.x as f64 - self.px, pixel.y as f64 - self.py)
    }

    fn camera_to_world(&self, x: f64, y: f64) -> Point3<f32> {
        let cam = Vector4::new(x, y, self.nominal_depth(), 1.0);
        let world = self.inverse_extrinsic * cam;
        Point3::new(world.x as f32, world.y as f32, world.z as f32)
    }

    /// 画素が画像内か
    pub fn contains(&self, pixel: &Point2<i32>) -> bool {
        pixel.x >= 0 && pixel.y >= 0 && (pixel.x as u32) < self.width && (pixel.y as u32) < self.height
    }

    pub fn index(&self) -> usize { self.index }
    pub fn view_size(&self) -> (u32, u32) { (self.width, self.height) }
    pub fn width(&self) -> u32 { self.width }
    pub fn height(&self) -> u32 { self.height }
    pub fn fx(&self) -> f64 { self.fx }
    pub fn fy(&self) -> f64 { self.fy }
    pub fn px(&self) -> f64 { self.px }
    pub fn py(&self) -> f64 { self.py }
    pub fn dist_coeffs(&self) -> &[f64; 4] { &self.dist_coeffs }
    pub fn rvec(&self) -> &[f64; 3] { &self.rvec }

    /// 逆投影に使う仮の深度
    pub fn nominal_depth(&self) -> f64 {
        (self.fx + self.fy) / 2.0
    }

    pub fn rotation(&self) -> &Matrix3<f64> { &self.rotation }
    pub fn translation(&self) -> &Vector3<f64> { &self.translation }
    pub fn extrinsic(&self) -> &Matrix4<f64> { &self.extrinsic }
    pub fn inverse_extrinsic(&self) -> &Matrix4<f64> { &self.inverse_extrinsic }

    /// ワールド座標でのカメラ中心
    pub fn position(&self) -> Point3<f32> { self.position }

    /// カメラ中心、画像四隅 (左上から時計回り)、主点の順
    pub fn corners(&self) -> &[Point3<f32>; CORNER_COUNT] { &self.corners }
}
