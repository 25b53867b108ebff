use std::io::Cursor;

use image::{DynamicImage, GenericImageView, ImageError, ImageOutputFormat, RgbaImage};

/// A PNG-encoded capture of the visible region.
///
/// Frames stay encoded between capture and assembly; a long document held as
/// decoded RGBA would not fit in memory.
#[derive(Clone, PartialEq, Eq)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for RawImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl RawImage {
    /// Wrap encoded bytes, reading dimensions from the image header.
    pub fn from_encoded(data: Vec<u8>) -> Result<Self, ImageError> {
        let (width, height) = image::io::Reader::new(Cursor::new(&data))
            .with_guessed_format()
            .map_err(ImageError::IoError)?
            .into_dimensions()?;
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn from_rgba(img: &RgbaImage) -> Result<Self, ImageError> {
        Self::from_dynamic(&DynamicImage::ImageRgba8(img.clone()))
    }

    pub fn from_dynamic(img: &DynamicImage) -> Result<Self, ImageError> {
        let (width, height) = img.dimensions();
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageOutputFormat::Png)?;
        Ok(Self {
            width,
            height,
            data: buf.into_inner(),
        })
    }

    pub fn decode(&self) -> Result<DynamicImage, ImageError> {
        image::load_from_memory(&self.data)
    }

    /// True when both buffers decode to the same pixels.
    pub fn same_pixels(&self, other: &RawImage) -> bool {
        if self.width != other.width || self.height != other.height {
            return false;
        }
        if self.data == other.data {
            return true;
        }
        match (self.decode(), other.decode()) {
            (Ok(a), Ok(b)) => a.to_rgba8().as_raw() == b.to_rgba8().as_raw(),
            _ => false,
        }
    }
}
