use folio_lib::FolioOutput;
use image::RgbaImage;
use std::process::Command;
use tempfile::TempDir;

fn write_image(path: &std::path::Path, color: [u8; 4], bar: u32) {
    let mut img = RgbaImage::from_pixel(24, 16, image::Rgba(color));
    for y in 0..16 {
        for x in bar..bar + 3 {
            img.put_pixel(x, y, image::Rgba([0, 0, 0, 255]));
        }
    }
    img.save(path).expect("write image");
}

fn folio() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_folio"));
    // Keep a developer's central config out of the test run.
    cmd.env("HOME", env!("CARGO_TARGET_TMPDIR"));
    cmd
}

#[test]
fn assemble_exit_code_succeeds_and_writes_pdf() {
    let dir = TempDir::new().expect("tempdir");
    let a = dir.path().join("a.png");
    let b = dir.path().join("b.png");
    let out = dir.path().join("out/book.pdf");
    write_image(&a, [240, 240, 240, 255], 2);
    write_image(&b, [240, 240, 240, 255], 14);

    let output = folio()
        .args([
            "assemble",
            a.to_str().unwrap(),
            b.to_str().unwrap(),
            "--output",
            out.to_str().unwrap(),
        ])
        .output()
        .expect("run folio");

    assert_eq!(output.status.code(), Some(0));
    assert!(out.exists());
    let body: FolioOutput = serde_json::from_slice(&output.stdout).expect("json output");
    match body {
        FolioOutput::Assembled(out) => {
            assert_eq!(out.report.pages, 2);
            assert_eq!(out.inputs, 2);
        }
        other => panic!("expected assembled output, got {other:?}"),
    }
}

#[test]
fn assemble_dedup_drops_repeated_image() {
    let dir = TempDir::new().expect("tempdir");
    let a = dir.path().join("a.png");
    let b = dir.path().join("b.png");
    let out = dir.path().join("dedup.pdf");
    write_image(&a, [200, 220, 240, 255], 5);
    write_image(&b, [200, 220, 240, 255], 5);

    let output = folio()
        .args([
            "assemble",
            a.to_str().unwrap(),
            b.to_str().unwrap(),
            "--output",
            out.to_str().unwrap(),
            "--dedup",
        ])
        .output()
        .expect("run folio");

    assert_eq!(output.status.code(), Some(0));
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["status"], "assembled");
    assert_eq!(value["pages"], 1);
    assert_eq!(value["duplicates"], 1);
}

#[test]
fn assemble_missing_image_is_fatal() {
    let dir = TempDir::new().expect("tempdir");
    let out = dir.path().join("never.pdf");

    let output = folio()
        .args([
            "assemble",
            dir.path().join("missing.png").to_str().unwrap(),
            "--output",
            out.to_str().unwrap(),
        ])
        .output()
        .expect("run folio");

    assert_eq!(output.status.code(), Some(2));
    assert!(!out.exists());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["status"], "error");
    assert_eq!(value["kind"], "config");
}

#[test]
fn capture_invalid_url_exits_with_config_error() {
    let dir = TempDir::new().expect("tempdir");
    let output = folio()
        .args([
            "capture",
            "not a url",
            "--output-dir",
            dir.path().to_str().unwrap(),
        ])
        .output()
        .expect("run folio");

    assert_eq!(output.status.code(), Some(2));
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["status"], "error");
    assert_eq!(value["kind"], "config");
    assert!(value["message"].as_str().unwrap_or_default().contains("Invalid URL"));
}

#[test]
fn capture_rejects_unsupported_scheme() {
    let output = folio()
        .args(["capture", "ftp://example.com/doc.pdf"])
        .output()
        .expect("run folio");

    assert_eq!(output.status.code(), Some(2));
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(value["message"]
        .as_str()
        .unwrap_or_default()
        .contains("Unsupported URL scheme"));
}

#[test]
fn invalid_config_file_is_reported() {
    let dir = TempDir::new().expect("tempdir");
    let cfg = dir.path().join("folio.toml");
    std::fs::write(&cfg, "[pagination]\noverlap = 0.8\n").expect("write config");

    let output = folio()
        .args([
            "--config",
            cfg.to_str().unwrap(),
            "capture",
            "https://example.com/doc",
        ])
        .output()
        .expect("run folio");

    assert_eq!(output.status.code(), Some(2));
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["kind"], "config");
    assert!(value["message"].as_str().unwrap_or_default().contains("overlap"));
}

#[test]
fn capture_viewport_flag_is_validated() {
    let output = folio()
        .args(["capture", "https://example.com/doc", "--viewport", "0x100"])
        .output()
        .expect("run folio");

    // Rejected by clap before any browser is launched.
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("between 1 and"));
}
