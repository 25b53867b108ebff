//! Ordered frames to a single PDF, one page per frame.
//!
//! Each frame becomes an image XObject drawn over the whole page. Page size is
//! the frame's pixel size converted at the configured DPI, so the aspect ratio
//! of every capture is preserved. The document is written to a temporary file
//! next to the destination and renamed into place only once complete.

use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream, StringFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::frames::{Frame, OrderedFrames};

pub const DEFAULT_DPI: f32 = 96.0;
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

const POINTS_PER_INCH: f32 = 72.0;

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("output path {} is not writable: {source}", path.display())]
    Unwritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write PDF: {0}")]
    Write(String),
    #[error("none of the {0} frames could be decoded")]
    NoDecodableFrames(usize),
    #[error("assembly cancelled")]
    Cancelled,
}

/// How frame pixels are stored inside the PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ImageEncoding {
    /// Lossless zlib, level 0-9.
    Flate { level: u32 },
    /// Controlled loss, quality 1-100.
    Jpeg { quality: u8 },
}

impl Default for ImageEncoding {
    fn default() -> Self {
        ImageEncoding::Flate {
            level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PdfOptions {
    pub dpi: f32,
    pub encoding: ImageEncoding,
    pub title: Option<String>,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            dpi: DEFAULT_DPI,
            encoding: ImageEncoding::default(),
            title: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedFrame {
    pub sequence: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssemblyReport {
    pub path: PathBuf,
    pub pages: u32,
    pub bytes: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedFrame>,
}

struct EncodedImage {
    width: u32,
    height: u32,
    filter: &'static str,
    data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct PdfAssembler {
    options: PdfOptions,
}

impl PdfAssembler {
    pub fn new(options: PdfOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PdfOptions {
        &self.options
    }

    /// Assemble `frames` into `output`.
    ///
    /// `on_page` receives the number of pages assembled so far. Cancellation
    /// is checked between pages and once more before the final rename; a
    /// cancelled run leaves nothing behind.
    pub fn assemble(
        &self,
        frames: &OrderedFrames,
        output: &Path,
        cancel: &CancellationToken,
        mut on_page: impl FnMut(u32),
    ) -> Result<AssemblyReport, AssemblyError> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids: Vec<Object> = Vec::with_capacity(frames.len());
        let mut skipped = Vec::new();

        for frame in frames {
            if cancel.is_cancelled() {
                return Err(AssemblyError::Cancelled);
            }

            let encoded = match self.encode_frame(frame) {
                Ok(encoded) => encoded,
                Err(reason) => {
                    warn!(sequence = frame.sequence, %reason, "skipping undecodable frame");
                    skipped.push(SkippedFrame {
                        sequence: frame.sequence,
                        reason,
                    });
                    continue;
                }
            };

            let page_id = self.add_page(&mut doc, pages_id, encoded)?;
            kids.push(page_id.into());
            on_page(kids.len() as u32);
        }

        if kids.is_empty() {
            return Err(AssemblyError::NoDecodableFrames(frames.len()));
        }

        let page_count = kids.len() as u32;
        let pages = dictionary! {
            "Type" => "Pages",
            "Count" => Object::Integer(i64::from(page_count)),
            "Kids" => kids,
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut info = dictionary! {
            "Producer" => Object::string_literal(format!("folio {}", env!("CARGO_PKG_VERSION"))),
        };
        if let Some(title) = self.options.title.as_deref() {
            info.set("Title", text_string(title));
        }
        let info_id = doc.add_object(info);
        doc.trailer.set("Info", info_id);

        let bytes = write_atomically(&mut doc, output, cancel)?;
        info!(path = %output.display(), pages = page_count, bytes, "PDF written");

        Ok(AssemblyReport {
            path: output.to_path_buf(),
            pages: page_count,
            bytes,
            skipped,
        })
    }

    fn add_page(
        &self,
        doc: &mut Document,
        pages_id: lopdf::ObjectId,
        encoded: EncodedImage,
    ) -> Result<lopdf::ObjectId, AssemblyError> {
        let dpi = if self.options.dpi > 0.0 {
            self.options.dpi
        } else {
            DEFAULT_DPI
        };
        let width_pt = encoded.width as f32 * POINTS_PER_INCH / dpi;
        let height_pt = encoded.height as f32 * POINTS_PER_INCH / dpi;

        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => Object::Integer(i64::from(encoded.width)),
                "Height" => Object::Integer(i64::from(encoded.height)),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => Object::Integer(8),
                "Filter" => encoded.filter,
            },
            encoded.data,
        ));

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Real(width_pt),
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Real(height_pt),
                        Object::Integer(0),
                        Object::Integer(0),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_bytes = content
            .encode()
            .map_err(|e| AssemblyError::Write(e.to_string()))?;
        let content_id = doc.add_object(Stream::new(lopdf::Dictionary::new(), content_bytes));

        Ok(doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(width_pt),
                Object::Real(height_pt),
            ],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! {
                    "Im0" => image_id,
                },
            },
        }))
    }

    fn encode_frame(&self, frame: &Frame) -> Result<EncodedImage, String> {
        let decoded = frame.image.decode().map_err(|e| e.to_string())?;
        let rgb = decoded.to_rgb8();
        let (width, height) = rgb.dimensions();
        if width == 0 || height == 0 {
            return Err("frame has no pixels".to_string());
        }

        match self.options.encoding {
            ImageEncoding::Flate { level } => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level.min(9)));
                encoder.write_all(rgb.as_raw()).map_err(|e| e.to_string())?;
                let data = encoder.finish().map_err(|e| e.to_string())?;
                Ok(EncodedImage {
                    width,
                    height,
                    filter: "FlateDecode",
                    data,
                })
            }
            ImageEncoding::Jpeg { quality } => {
                let mut data = Vec::new();
                JpegEncoder::new_with_quality(&mut data, quality.clamp(1, 100))
                    .encode(rgb.as_raw(), width, height, ColorType::Rgb8)
                    .map_err(|e| e.to_string())?;
                Ok(EncodedImage {
                    width,
                    height,
                    filter: "DCTDecode",
                    data,
                })
            }
        }
    }
}

fn write_atomically(
    doc: &mut Document,
    output: &Path,
    cancel: &CancellationToken,
) -> Result<u64, AssemblyError> {
    let unwritable = |source: io::Error| AssemblyError::Unwritable {
        path: output.to_path_buf(),
        source,
    };
    let dir = output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut builder = tempfile::Builder::new();
    builder.prefix(".folio-").suffix(".pdf.part");
    // Temp files default to 0600; the finished PDF gets ordinary file
    // permissions, still filtered by the umask.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o644));
    }
    // Dropping the temp file on any early return removes it.
    let mut tmp = builder.tempfile_in(dir).map_err(unwritable)?;
    debug!(temp = %tmp.path().display(), "writing PDF to temporary file");

    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        doc.save_to(&mut writer)
            .map_err(|e| AssemblyError::Write(e.to_string()))?;
        writer.flush().map_err(unwritable)?;
    }
    tmp.as_file().sync_all().map_err(unwritable)?;

    if cancel.is_cancelled() {
        return Err(AssemblyError::Cancelled);
    }

    let bytes = tmp.as_file().metadata().map(|m| m.len()).unwrap_or(0);
    tmp.persist(output).map_err(|e| unwritable(e.error))?;
    Ok(bytes)
}

/// PDF text string: literal for ASCII, UTF-16BE with BOM otherwise.
fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::string_literal(text);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}
