use std::path::PathBuf;

use epigimp::io::{self, ExportOptions, PROJECT_MAGIC, PROJECT_VERSION};
use epigimp::{BlendMode, Canvas, FileError, Layer};
use image::Rgba;
use serde_json::json;

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("epigimp-it-{}-{name}", uuid::Uuid::new_v4()))
}

fn two_layer_canvas() -> Canvas {
    let mut canvas = Canvas::new((50, 50), Rgba([255, 255, 255, 255]));
    let top = canvas.add_layer(Some("ink"), Some(Rgba([0, 0, 0, 0])));
    top.put_pixel(10, 20, Rgba([1, 2, 3, 4]));
    top.put_pixel(49, 49, Rgba([200, 100, 0, 255]));
    top.opacity = 0.25;
    top.visible = false;
    top.blend_mode = BlendMode::Screen;
    top.position = (-3, 7);
    canvas
}

#[test]
fn save_and_reload_two_layers() {
    let mut canvas = two_layer_canvas();
    canvas
        .set_metadata(json!({ "title": "Round trip", "author": "tests" }).as_object().unwrap().clone())
        .unwrap();
    let path = temp_path("doc.epigimp");

    let written = io::save_project(&mut canvas, &path).unwrap();
    assert_eq!(written, path);
    assert_eq!(canvas.project_path(), Some(path.as_path()));

    let loaded = io::load_project(&path).unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded.shape(), (50, 50));
    assert_eq!(loaded.metadata.title.as_deref(), Some("Round trip"));
    for (a, b) in canvas.layers().iter().zip(loaded.layers()) {
        assert_eq!(a.name, b.name);
        assert_eq!(a.visible, b.visible);
        assert_eq!(a.opacity, b.opacity);
        assert_eq!(a.blend_mode, b.blend_mode);
        assert_eq!(a.position, b.position);
        assert_eq!(a.pixels(), b.pixels());
    }
    assert_eq!(loaded.active_layer_index(), Some(1));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn extension_is_appended() {
    let mut canvas = Canvas::new((2, 2), Rgba([0, 0, 0, 255]));
    let path = temp_path("picture.png");
    let written = io::save_project(&mut canvas, &path).unwrap();
    assert!(written.to_string_lossy().ends_with("picture.png.epigimp"));
    assert!(io::open_path(&written).is_ok());
    let _ = std::fs::remove_file(&written);
}

#[test]
fn bad_magic_is_rejected() {
    let err = io::decode_project(&b"NOTAPROJ\x01\0\0\0"[..]).unwrap_err();
    assert!(matches!(err, FileError::InvalidFormat(_)), "{err}");
}

#[test]
fn future_version_is_rejected() {
    let mut bytes = PROJECT_MAGIC.to_vec();
    bytes.extend_from_slice(&(PROJECT_VERSION + 1).to_le_bytes());
    let err = io::decode_project(&bytes[..]).unwrap_err();
    assert!(matches!(err, FileError::UnsupportedVersion(2)));
}

#[test]
fn truncated_file_names_the_section() {
    let canvas = two_layer_canvas();
    let mut bytes = Vec::new();
    io::encode_project(&io::build_project(&canvas), &mut bytes).unwrap();
    bytes.truncate(bytes.len() - 10);
    let err = io::decode_project(&bytes[..]).unwrap_err();
    assert!(matches!(err, FileError::Truncated("pixel payload")), "{err}");
}

#[test]
fn unsupported_import_extension() {
    let err = io::open_path(&temp_path("notes.txt")).unwrap_err();
    assert!(matches!(err, FileError::UnsupportedFormat(ref ext) if ext == "txt"), "{err}");
}

#[test]
fn import_then_export_flattens() {
    let png = temp_path("in.png");
    image::RgbaImage::from_pixel(3, 2, Rgba([0, 128, 255, 255])).save(&png).unwrap();

    let mut canvas = io::open_path(&png).unwrap();
    assert_eq!(canvas.shape(), (2, 3));
    assert_eq!(canvas.metadata.original_format.as_deref(), Some(".png"));

    let mut overlay = Layer::new("red".into(), 3, 2, Rgba([255, 0, 0, 255]));
    overlay.position = (2, 0);
    canvas.add_layer_from_buffer(overlay);

    let out = temp_path("out.png");
    io::export_image(&canvas, &out, &ExportOptions::default()).unwrap();
    let back = image::open(&out).unwrap().into_rgba8();
    assert_eq!(back.get_pixel(0, 0), &Rgba([0, 128, 255, 255]));
    assert_eq!(back.get_pixel(2, 1), &Rgba([255, 0, 0, 255]));

    let _ = std::fs::remove_file(&png);
    let _ = std::fs::remove_file(&out);
}

#[test]
fn background_save_reports_completion() {
    let canvas = two_layer_canvas();
    let path = temp_path("bg.epigimp");
    let rx = io::save_in_background(io::build_project(&canvas), path.clone());
    let result = rx.recv().unwrap();
    assert_eq!(result.unwrap(), path);
    assert_eq!(io::load_project(&path).unwrap().len(), 2);
    let _ = std::fs::remove_file(&path);
}
