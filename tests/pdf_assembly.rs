use std::path::Path;

use folio_lib::driver::RawImage;
use folio_lib::frames::{DedupPolicy, Frame, FrameStore, OrderedFrames};
use folio_lib::pdf::{AssemblyError, PdfAssembler, PdfOptions};
use image::{Rgba, RgbaImage};
use lopdf::Document;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn frame(sequence: u32, width: u32, height: u32) -> Frame {
    let mut img = RgbaImage::from_pixel(width, height, Rgba([250, 250, 245, 255]));
    let bar = (sequence * 7) % width.saturating_sub(3).max(1);
    for y in 0..height {
        for x in bar..(bar + 3).min(width) {
            img.put_pixel(x, y, Rgba([10, 10, 10, 255]));
        }
    }
    Frame::new(sequence, RawImage::from_rgba(&img).unwrap(), 0, &DedupPolicy::strict()).unwrap()
}

fn ordered(frames: Vec<Frame>) -> OrderedFrames {
    let mut store = FrameStore::new(DedupPolicy::strict());
    for f in frames {
        store.add(f);
    }
    store.finalize().unwrap()
}

fn page_sizes(path: &Path) -> Vec<(f32, f32)> {
    let doc = Document::load(path).expect("load pdf");
    doc.get_pages()
        .into_values()
        .map(|id| {
            let media = doc
                .get_dictionary(id)
                .unwrap()
                .get(b"MediaBox")
                .unwrap()
                .as_array()
                .unwrap()
                .clone();
            (
                media[2].as_float().unwrap(),
                media[3].as_float().unwrap(),
            )
        })
        .collect()
}

#[test]
fn pages_keep_each_frame_aspect_ratio() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("mixed.pdf");
    let frames = ordered(vec![frame(0, 120, 80), frame(1, 80, 120), frame(2, 100, 100)]);

    let report = PdfAssembler::default()
        .assemble(&frames, &out, &CancellationToken::new(), |_| {})
        .expect("assemble");

    assert_eq!(report.pages, 3);
    assert!(report.bytes > 0);
    let sizes = page_sizes(&out);
    let expected = [(120.0, 80.0), (80.0, 120.0), (100.0, 100.0)];
    for ((w, h), (pw, ph)) in sizes.iter().zip(expected) {
        assert!(((w / h) - (pw / ph)).abs() < 1e-3, "page {w}x{h} vs {pw}x{ph}");
    }
}

#[test]
fn higher_dpi_shrinks_pages() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("dense.pdf");
    let options = PdfOptions {
        dpi: 144.0,
        ..PdfOptions::default()
    };
    PdfAssembler::new(options)
        .assemble(&ordered(vec![frame(0, 288, 144)]), &out, &CancellationToken::new(), |_| {})
        .unwrap();
    assert_eq!(page_sizes(&out), vec![(144.0, 72.0)]);
}

#[test]
fn progress_callback_counts_pages() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("count.pdf");
    let mut seen = Vec::new();
    PdfAssembler::default()
        .assemble(
            &ordered(vec![frame(0, 40, 30), frame(1, 40, 30)]),
            &out,
            &CancellationToken::new(),
            |pages| seen.push(pages),
        )
        .unwrap();
    assert_eq!(seen, vec![1, 2]);
}

#[test]
fn undecodable_frame_is_skipped_and_reported() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("partial.pdf");
    let good = frame(0, 40, 30);
    let broken = Frame::from_parts(
        1,
        RawImage {
            width: 40,
            height: 30,
            data: b"\x89PNG truncated".to_vec(),
        },
        0,
        frame(1, 40, 30).hash,
    );
    let frames = OrderedFrames::from_frames(vec![good, broken]).unwrap();

    let report = PdfAssembler::default()
        .assemble(&frames, &out, &CancellationToken::new(), |_| {})
        .unwrap();
    assert_eq!(report.pages, 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].sequence, 1);
}

#[test]
fn missing_directory_is_unwritable() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("no/such/dir/doc.pdf");
    let err = PdfAssembler::default()
        .assemble(&ordered(vec![frame(0, 20, 20)]), &out, &CancellationToken::new(), |_| {})
        .unwrap_err();
    assert!(matches!(err, AssemblyError::Unwritable { .. }), "got {err:?}");
    assert!(!out.exists());
}

#[test]
fn existing_file_is_replaced_only_on_success() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("doc.pdf");
    std::fs::write(&out, b"previous").unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = PdfAssembler::default()
        .assemble(&ordered(vec![frame(0, 20, 20)]), &out, &cancel, |_| {})
        .unwrap_err();
    assert!(matches!(err, AssemblyError::Cancelled));
    assert_eq!(std::fs::read(&out).unwrap(), b"previous");
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1, "no temp file left");

    PdfAssembler::default()
        .assemble(&ordered(vec![frame(0, 20, 20)]), &out, &CancellationToken::new(), |_| {})
        .unwrap();
    assert!(std::fs::read(&out).unwrap().starts_with(b"%PDF"));
}
