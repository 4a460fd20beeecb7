use nalgebra::{Point2, Point3};

/// 平行とみなす行列式の閾値
const PARALLEL_EPSILON: f64 = 1e-6;

/// 交点を取る直線の組。4本目以降のビューは組ませない
pub const INTERSECTION_PAIRS: [(usize, usize); 3] = [(0, 1), (0, 2), (1, 2)];

/// 2点で定まる無限直線
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line2D {
    pub origin: Point2<f32>,
    pub target: Point2<f32>,
}

impl Line2D {
    pub fn new(origin: Point2<f32>, target: Point2<f32>) -> Self {
        Self { origin, target }
    }

    /// 3D点のXYだけを使う (床面への射影)
    pub fn from_3d(origin: &Point3<f32>, target: &Point3<f32>) -> Self {
        Self::new(origin.xy(), target.xy())
    }

    /// 単位方向ベクトル。2点が一致する場合はゼロ
    pub fn direction(&self) -> nalgebra::Vector2<f32> {
        let d = self.target - self.origin;
        let n = d.norm();
        if n > 0.0 {
            d / n
        } else {
            d
        }
    }
}

/// 2直線の交点 (行列式による閉形式)
///
/// mm 単位の座標では積が 1e7 を超えるので f64 で計算する。
/// 平行・退化した直線や非有限の結果は `None`。
pub fn find_intersection(l1: &Line2D, l2: &Line2D) -> Option<Point2<f32>> {
    let (x1, y1) = (l1.origin.x as f64, l1.origin.y as f64);
    let (x2, y2) = (l1.target.x as f64, l1.target.y as f64);
    let (x3, y3) = (l2.origin.x as f64, l2.origin.y as f64);
    let (x4, y4) = (l2.target.x as f64, l2.target.y as f64);

    let denom = (x1 - x2) * (y3 - y4) - (y1 - y2) * (x3 - x4);
    // 直線の長さに対する相対値で判定
    let scale = ((x1 - x2).hypot(y1 - y2) * (x3 - x4).hypot(y3 - y4)).max(f64::MIN_POSITIVE);
    if denom.abs() <= PARALLEL_EPSILON * scale {
        return None;
    }

    let a = x1 * y2 - y1 * x2;
    let b = x3 * y4 - y3 * x4;
    let x = ((a * (x3 - x4) - (x1 - x2) * b) / denom) as f32;
    let y = ((a * (y3 - y4) - (y1 - y2) * b) / denom) as f32;

    if x.is_finite() && y.is_finite() {
        Some(Point2::new(x, y))
    } else {
        None
    }
}

/// 固定の組 (`INTERSECTION_PAIRS`) の交点を集める
///
/// 存在しない直線を含む組と、平行な組は除外する。
pub fn find_intersections(lines: &[Line2D]) -> Vec<Point2<f32>> {
    let available: Vec<Option<Line2D>> = lines.iter().copied().map(Some).collect();
    find_available_intersections(&available)
}

/// `find_intersections` の欠損あり版。`None` のビューを含む組は飛ばす
pub fn find_available_intersections(lines: &[Option<Line2D>]) -> Vec<Point2<f32>> {
    let line = |i: usize| lines.get(i).copied().flatten();
    INTERSECTION_PAIRS
        .iter()
        .filter_map(|&(i, j)| find_intersection(&line(i)?, &line(j)?))
        .collect()
}

/// 交点の平均。交点がなければ原点
pub fn find_mean_intersection(lines: &[Line2D]) -> Point2<f32> {
    mean_point(&find_intersections(lines)).unwrap_or_else(Point2::origin)
}

pub fn mean_point(points: &[Point2<f32>]) -> Option<Point2<f32>> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f32;
    let (sx, sy) = points.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Some(Point2::new(sx / n, sy / n))
}
