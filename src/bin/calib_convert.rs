use anyhow::{bail, Result};
use std::path::PathBuf;

use hull_tracker::calibration::{load_calibration, save_calibration};

/// 空白区切りのキャリブレーションファイルを JSON に変換する
///
/// 使い方: calib_convert <input.ini> [output.json]
fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        let program = args.first().map(String::as_str).unwrap_or("calib_convert");
        bail!("Usage: {} <input> [output.json]", program);
    }

    let input = PathBuf::from(&args[1]);
    let output = match args.get(2) {
        Some(path) => PathBuf::from(path),
        None => input.with_extension("json"),
    };

    let cal = load_calibration(&input)?;
    save_calibration(&output, &cal)?;

    println!("{} -> {}", input.display(), output.display());
    println!("  f = ({:.2}, {:.2}), c = ({:.2}, {:.2})", cal.fx(), cal.fy(), cal.px(), cal.py());
    println!("  rvec = {:?}", cal.rvec);
    println!("  tvec = {:?}", cal.tvec);
    Ok(())
}
