use anyhow::{bail, Context, Result};
use nalgebra::{Matrix3, Rotation3, UnitQuaternion};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// テキスト形式のキャリブレーションに含まれる値の数 (K 9 + 歪み 4 + rvec 3 + tvec 3)
pub const CALIBRATION_VALUE_COUNT: usize = 19;

/// 単一カメラのキャリブレーション値
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraCalibration {
    /// 内部パラメータ行列 K (row-major 3x3)
    pub intrinsic_matrix: [f64; 9],
    /// 歪み係数 [k1, k2, p1, p2]
    pub dist_coeffs: [f64; 4],
    /// 回転ベクトル (Rodrigues)
    pub rvec: [f64; 3],
    /// 並進ベクトル
    pub tvec: [f64; 3],
}

impl CameraCalibration {
    pub fn fx(&self) -> f64 { self.intrinsic_matrix[0] }
    pub fn fy(&self) -> f64 { self.intrinsic_matrix[4] }
    pub fn px(&self) -> f64 { self.intrinsic_matrix[2] }
    pub fn py(&self) -> f64 { self.intrinsic_matrix[5] }

    pub fn is_finite(&self) -> bool {
        self.intrinsic_matrix
            .iter()
            .chain(&self.dist_coeffs)
            .chain(&self.rvec)
            .chain(&self.tvec)
            .all(|v| v.is_finite())
    }
}

// --- Parse / Save / Load ---

/// 空白区切りのキャリブレーション値を読む
///
/// 順序: K (9, row-major) → 歪み係数 (4) → 回転ベクトル (3) → 並進ベクトル (3)。
/// 20個目以降の値は無視する。
pub fn parse_calibration(text: &str) -> Result<CameraCalibration> {
    let mut values = [0.0f64; CALIBRATION_VALUE_COUNT];
    let mut tokens = text.split_whitespace();

    for (i, slot) in values.iter_mut().enumerate() {
        let token = match tokens.next() {
            Some(t) => t,
            None => bail!(
                "Calibration has {} values, expected {}",
                i,
                CALIBRATION_VALUE_COUNT
            ),
        };
        *slot = token
            .parse()
            .with_context(|| format!("Calibration value #{} is not a number: {:?}", i + 1, token))?;
    }

    let mut intrinsic_matrix = [0.0; 9];
    let mut dist_coeffs = [0.0; 4];
    let mut rvec = [0.0; 3];
    let mut tvec = [0.0; 3];
    intrinsic_matrix.copy_from_slice(&values[0..9]);
    dist_coeffs.copy_from_slice(&values[9..13]);
    rvec.copy_from_slice(&values[13..16]);
    tvec.copy_from_slice(&values[16..19]);

    Ok(CameraCalibration { intrinsic_matrix, dist_coeffs, rvec, tvec })
}

/// `.json` ならJSON、それ以外は空白区切りテキストとして読む
pub fn load_calibration<P: AsRef<Path>>(path: P) -> Result<CameraCalibration> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read calibration file {}", path.display()))?;

    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let cal = if is_json {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse calibration JSON {}", path.display()))?
    } else {
        parse_calibration(&content)
            .with_context(|| format!("Malformed calibration file {}", path.display()))?
    };
    Ok(cal)
}

pub fn save_calibration<P: AsRef<Path>>(path: P, cal: &CameraCalibration) -> Result<()> {
    let json = serde_json::to_string_pretty(cal)?;
    fs::write(path, json).context("Failed to write calibration file")?;
    Ok(())
}

// --- Rodrigues ---

/// 回転ベクトル → 回転行列
pub fn rodrigues(rvec: &[f64; 3]) -> Matrix3<f64> {
    let theta = (rvec[0] * rvec[0] + rvec[1] * rvec[1] + rvec[2] * rvec[2]).sqrt();
    if theta < 1e-10 {
        return Matrix3::identity();
    }

    let kx = rvec[0] / theta;
    let ky = rvec[1] / theta;
    let kz = rvec[2] / theta;
    let ct = theta.cos();
    let st = theta.sin();
    let vt = 1.0 - ct;

    Matrix3::new(
        ct + kx * kx * vt,      kx * ky * vt - kz * st, kx * kz * vt + ky * st,
        ky * kx * vt + kz * st, ct + ky * ky * vt,      ky * kz * vt - kx * st,
        kz * kx * vt - ky * st, kz * ky * vt + kx * st, ct + kz * kz * vt,
    )
}

/// 回転行列 → 回転ベクトル
///
/// 180度回転でも軸が失われないよう四元数を経由する。
pub fn rotation_to_rvec(r: &Matrix3<f64>) -> [f64; 3] {
    let rotation = Rotation3::from_matrix_unchecked(*r);
    let v = UnitQuaternion::from_rotation_matrix(&rotation).scaled_axis();
    [v.x, v.y, v.z]
}
