//! Local images as frames, for assembling a PDF without a browser.

use std::fs;
use std::path::{Path, PathBuf};

use image::ImageError;
use thiserror::Error;
use tracing::{debug, warn};

use crate::driver::RawImage;
use crate::frames::{DedupPolicy, EmptySequence, Frame, FrameStore, OrderedFrames};
use crate::pdf::SkippedFrame;

#[derive(Debug, Error)]
pub enum ImageLoadError {
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to load image: {0}")]
    Load(#[from] ImageError),
    #[error(transparent)]
    Empty(#[from] EmptySequence),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImageLoadOptions {
    /// Collapse neighbouring images that look the same.
    pub dedup: bool,
    pub policy: DedupPolicy,
}

#[derive(Debug)]
pub struct LoadedImages {
    pub frames: OrderedFrames,
    pub inputs: u32,
    pub duplicates: u32,
    /// Inputs that could not be decoded, by position in the input list.
    pub skipped: Vec<SkippedFrame>,
}

pub fn load_image(path: &Path) -> Result<RawImage, ImageLoadError> {
    if !path.exists() {
        return Err(ImageLoadError::NotFound(path.display().to_string()));
    }
    let data = fs::read(path).map_err(|source| ImageLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(RawImage::from_encoded(data)?)
}

/// Load `paths` in order. Missing files fail the whole load; files that exist
/// but do not decode are skipped and reported.
pub fn load_images(
    paths: &[PathBuf],
    options: ImageLoadOptions,
) -> Result<LoadedImages, ImageLoadError> {
    let mut store = FrameStore::new(options.policy);
    let mut kept = Vec::with_capacity(paths.len());
    let mut skipped = Vec::new();

    for (idx, path) in paths.iter().enumerate() {
        let sequence = idx as u32;
        let frame = match load_image(path).and_then(|raw| {
            Frame::new(sequence, raw, 0, &options.policy).map_err(ImageLoadError::from)
        }) {
            Ok(frame) => frame,
            Err(err @ (ImageLoadError::NotFound(_) | ImageLoadError::Read { .. })) => {
                return Err(err)
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping undecodable image");
                skipped.push(SkippedFrame {
                    sequence,
                    reason: format!("{}: {err}", path.display()),
                });
                continue;
            }
        };
        debug!(path = %path.display(), sequence, "loaded image");
        if options.dedup {
            store.add(frame);
        } else {
            kept.push(frame);
        }
    }

    let duplicates = store.duplicates();
    let frames = if options.dedup {
        store.finalize()?
    } else {
        OrderedFrames::from_frames(kept)?
    };

    Ok(LoadedImages {
        frames,
        inputs: paths.len() as u32,
        duplicates,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use tempfile::TempDir;

    fn write_png(dir: &Path, name: &str, shade: u8, bar: u32) -> PathBuf {
        let mut img = RgbaImage::from_pixel(32, 24, Rgba([shade, shade, shade, 255]));
        for y in 0..24 {
            for x in bar..bar + 3 {
                img.put_pixel(x, y, Rgba([0, 0, 0, 255]));
            }
        }
        let path = dir.join(name);
        img.save(&path).expect("write png");
        path
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = load_image(Path::new("/nonexistent/path/image.png"));
        assert!(matches!(result.unwrap_err(), ImageLoadError::NotFound(_)));
    }

    #[test]
    fn keeps_duplicates_without_dedup() {
        let dir = TempDir::new().expect("tempdir");
        let a = write_png(dir.path(), "a.png", 240, 4);
        let b = write_png(dir.path(), "b.png", 240, 4);
        let loaded = load_images(&[a, b], ImageLoadOptions::default()).unwrap();
        assert_eq!(loaded.frames.len(), 2);
        assert_eq!(loaded.duplicates, 0);
    }

    #[test]
    fn dedup_collapses_neighbours() {
        let dir = TempDir::new().expect("tempdir");
        let a = write_png(dir.path(), "a.png", 240, 4);
        let b = write_png(dir.path(), "b.png", 240, 4);
        let c = write_png(dir.path(), "c.png", 240, 20);
        let loaded = load_images(
            &[a, b, c],
            ImageLoadOptions {
                dedup: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(loaded.frames.len(), 2);
        assert_eq!(loaded.duplicates, 1);
        assert_eq!(loaded.inputs, 3);
    }

    #[test]
    fn undecodable_file_is_skipped() {
        let dir = TempDir::new().expect("tempdir");
        let good = write_png(dir.path(), "good.png", 200, 8);
        let bad = dir.path().join("notes.png");
        fs::write(&bad, b"not an image").unwrap();
        let loaded = load_images(&[bad, good], ImageLoadOptions::default()).unwrap();
        assert_eq!(loaded.frames.len(), 1);
        assert_eq!(loaded.skipped.len(), 1);
        assert_eq!(loaded.skipped[0].sequence, 0);
    }

    #[test]
    fn nothing_decodable_is_empty() {
        let dir = TempDir::new().expect("tempdir");
        let bad = dir.path().join("a.png");
        fs::write(&bad, b"garbage").unwrap();
        let err = load_images(&[bad], ImageLoadOptions::default()).unwrap_err();
        assert!(matches!(err, ImageLoadError::Empty(_)));
    }
}
