use anyhow::{bail, Context, Result};
use image::{GrayImage, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// 連番画像ファイルを1フレームずつ読むフレームソース
///
/// ディレクトリ内の画像をファイル名順に返す。最後まで読んだら `Ok(None)`。
pub struct ImageSequence {
    dir: PathBuf,
    files: Vec<PathBuf>,
    position: usize,
}

impl ImageSequence {
    /// ディレクトリを開く。画像が1枚もなければエラー
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let entries = fs::read_dir(&dir)
            .with_context(|| format!("Failed to open frame directory {}", dir.display()))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
                .unwrap_or(false);
            if is_image && path.is_file() {
                files.push(path);
            }
        }

        if files.is_empty() {
            bail!("No image files in {}", dir.display());
        }
        files.sort();

        Ok(Self { dir, files, position: 0 })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 総フレーム数
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// 次に読むフレーム番号
    pub fn position(&self) -> usize {
        self.position
    }

    fn next_path(&mut self) -> Option<PathBuf> {
        let path = self.files.get(self.position)?.clone();
        self.position += 1;
        Some(path)
    }

    /// 次のフレームをRGBで読む
    pub fn next_rgb(&mut self) -> Result<Option<RgbImage>> {
        let path = match self.next_path() {
            Some(p) => p,
            None => return Ok(None),
        };
        let img = image::open(&path)
            .with_context(|| format!("Failed to read frame {}", path.display()))?;
        Ok(Some(img.into_rgb8()))
    }

    /// 次のフレームをグレースケールで読む (前景マスク用)
    pub fn next_luma(&mut self) -> Result<Option<GrayImage>> {
        let path = match self.next_path() {
            Some(p) => p,
            None => return Ok(None),
        };
        let img = image::open(&path)
            .with_context(|| format!("Failed to read mask {}", path.display()))?;
        Ok(Some(img.into_luma8()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn test_sequence_reads_in_name_order_then_ends() {
        let dir = tempfile::tempdir().unwrap();
        for (name, value) in [("frame_002.png", 20u8), ("frame_000.png", 0), ("frame_001.png", 10)] {
            RgbImage::from_pixel(4, 3, Rgb([value, value, value]))
                .save(dir.path().join(name))
                .unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "not a frame").unwrap();

        let mut seq = ImageSequence::open(dir.path()).unwrap();
        assert_eq!(seq.len(), 3);

        for expected in [0u8, 10, 20] {
            let frame = seq.next_rgb().unwrap().unwrap();
            assert_eq!(frame.dimensions(), (4, 3));
            assert_eq!(frame.get_pixel(0, 0)[0], expected);
        }
        assert!(seq.next_rgb().unwrap().is_none());
        assert!(seq.next_rgb().unwrap().is_none());
        assert_eq!(seq.position(), 3);
    }

    #[test]
    fn test_sequence_reads_masks_as_luma() {
        let dir = tempfile::tempdir().unwrap();
        GrayImage::from_pixel(5, 5, Luma([255])).save(dir.path().join("m0.png")).unwrap();

        let mut seq = ImageSequence::open(dir.path()).unwrap();
        let mask = seq.next_luma().unwrap().unwrap();
        assert_eq!(mask.get_pixel(2, 2)[0], 255);
        assert!(seq.next_luma().unwrap().is_none());
    }

    #[test]
    fn test_sequence_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ImageSequence::open(dir.path()).is_err());
        assert!(ImageSequence::open(dir.path().join("missing")).is_err());
    }
}
