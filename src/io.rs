// ============================================================================
// FILE I/O: .epigimp projects, image import, flattened export
// ============================================================================

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use image::codecs::bmp::BmpEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageError, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::canvas::{Canvas, DEFAULT_SHAPE};
use crate::error::{FileError, Result};
use crate::layer::{BlendMode, Layer};
use crate::metadata::Metadata;

// ============================================================================
// EPIGIMP PROJECT FILE FORMAT
// ============================================================================
//
//   magic        8 bytes  "EPIGIMP\0"
//   version      u32 LE   1
//   meta_len     u32 LE   + UTF-8 JSON document metadata
//   layer_count  u32 LE
//   per layer:
//     info_len   u32 LE   + UTF-8 JSON {name, visible, opacity, blend_mode, position}
//     data_len   u32 LE   + pixel payload:
//       header_len u32 LE + UTF-8 JSON {shape: [h, w, c], dtype}
//       raw row-major samples

pub const PROJECT_MAGIC: &[u8; 8] = b"EPIGIMP\0";
pub const PROJECT_VERSION: u32 = 1;
pub const PROJECT_EXTENSION: &str = "epigimp";

/// Maximum supported canvas dimension in pixels (per axis).
/// Prevents memory exhaustion from crafted project files.
pub const MAX_CANVAS_DIM: u32 = 32_768;
/// Maximum number of layers in a project file.
pub const MAX_LAYERS: u32 = 4096;

/// Extensions accepted by [`import_image`].
pub const IMPORT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// Per-layer JSON record.
#[derive(Debug, Serialize, Deserialize)]
struct LayerInfo {
    #[serde(default = "default_layer_name")]
    name: String,
    #[serde(default = "default_true")]
    visible: bool,
    #[serde(default = "default_opacity")]
    opacity: f32,
    #[serde(default = "default_blend_mode")]
    blend_mode: String,
    #[serde(default)]
    position: (i32, i32),
}

fn default_layer_name() -> String {
    "Layer".to_string()
}

fn default_true() -> bool {
    true
}

fn default_opacity() -> f32 {
    1.0
}

fn default_blend_mode() -> String {
    BlendMode::Normal.name().to_string()
}

/// Header of a pixel payload. `shape` is `[h, w]` or `[h, w, c]`.
#[derive(Debug, Serialize, Deserialize)]
struct PixelHeader {
    shape: Vec<u32>,
    dtype: String,
}

/// Snapshot of a document's persistent state.
///
/// Building one copies everything out of the [`Canvas`], so it can be moved
/// to a background thread for writing while editing continues.
#[derive(Clone, Debug)]
pub struct ProjectFile {
    pub metadata: Metadata,
    pub layers: Vec<Layer>,
}

impl ProjectFile {
    /// Document shape: metadata width/height when both are recorded,
    /// otherwise the first layer's dimensions.
    pub fn shape(&self) -> (u32, u32) {
        match (self.metadata.height, self.metadata.width) {
            (Some(h), Some(w)) => (h, w),
            _ => self
                .layers
                .first()
                .map(Layer::dimensions)
                .unwrap_or(DEFAULT_SHAPE),
        }
    }

    pub fn into_canvas(self) -> Canvas {
        let shape = self.shape();
        Canvas::from_parts(shape, self.layers, self.metadata)
    }
}

/// Copy a document's metadata and layers for saving.
///
/// The copied metadata gets a fresh modification timestamp and the current
/// document size, so every save path records both.
pub fn build_project(canvas: &Canvas) -> ProjectFile {
    let mut metadata = canvas.metadata.clone();
    metadata.touch_datetime();
    metadata.width = Some(canvas.width());
    metadata.height = Some(canvas.height());
    ProjectFile {
        metadata,
        layers: canvas.layers().to_vec(),
    }
}

// ---------------------------------------------------------------------------
//  Writing
// ---------------------------------------------------------------------------

fn section_len(len: usize, section: &str) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| FileError::InvalidFormat(format!("{section} exceeds 4 GiB")))
}

fn write_section<W: Write>(w: &mut W, bytes: &[u8], section: &str) -> Result<()> {
    w.write_all(&section_len(bytes.len(), section)?.to_le_bytes())?;
    w.write_all(bytes)?;
    Ok(())
}

fn encode_pixels(layer: &Layer) -> Result<Vec<u8>> {
    let header = PixelHeader {
        shape: vec![layer.height(), layer.width(), 4],
        dtype: "uint8".to_string(),
    };
    let header = serde_json::to_vec(&header)?;
    let mut out = Vec::with_capacity(4 + header.len() + layer.pixels().len());
    write_section(&mut out, &header, "pixel header")?;
    out.extend_from_slice(layer.pixels());
    Ok(out)
}

/// Serialize a project into any writer.
pub fn encode_project<W: Write>(project: &ProjectFile, mut w: W) -> Result<()> {
    w.write_all(PROJECT_MAGIC)?;
    w.write_all(&PROJECT_VERSION.to_le_bytes())?;
    write_section(&mut w, &project.metadata.to_json_bytes()?, "metadata")?;
    w.write_all(&section_len(project.layers.len(), "layer count")?.to_le_bytes())?;

    for layer in &project.layers {
        let info = LayerInfo {
            name: layer.name.clone(),
            visible: layer.visible,
            opacity: layer.opacity,
            blend_mode: layer.blend_mode.name().to_string(),
            position: layer.position,
        };
        write_section(&mut w, &serde_json::to_vec(&info)?, "layer info")?;
        write_section(&mut w, &encode_pixels(layer)?, "pixel payload")?;
    }
    w.flush()?;
    Ok(())
}

/// Serialize + write a pre-built project to disk.
/// Safe to call on a background thread.
pub fn write_project(project: &ProjectFile, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    encode_project(project, BufWriter::new(file))
}

/// `path` with `.epigimp` appended unless it already ends that way.
pub fn with_project_extension(path: &Path) -> PathBuf {
    let has_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(PROJECT_EXTENSION));
    if has_ext {
        path.to_path_buf()
    } else {
        let mut s = path.as_os_str().to_owned();
        s.push(".");
        s.push(PROJECT_EXTENSION);
        PathBuf::from(s)
    }
}

/// Save a document as a project file and remember the path on it.
///
/// The document's metadata takes the refreshed timestamp and size that
/// went into the file. Returns the path actually written.
pub fn save_project(canvas: &mut Canvas, path: &Path) -> Result<PathBuf> {
    let path = with_project_extension(path);
    let project = build_project(canvas);
    canvas.metadata = project.metadata.clone();
    write_project(&project, &path)?;
    canvas.set_project_path(&path);
    log::info!("Saved project {} ({} layers)", path.display(), project.layers.len());
    Ok(path)
}

/// Write `project` on the rayon pool; the receiver yields the outcome once.
pub fn save_in_background(project: ProjectFile, path: PathBuf) -> mpsc::Receiver<Result<PathBuf>> {
    let (tx, rx) = mpsc::channel();
    rayon::spawn(move || {
        let result = write_project(&project, &path).map(|()| path);
        match &result {
            Ok(p) => log::info!("Background save finished: {}", p.display()),
            Err(e) => log::error!("Background save failed: {e}"),
        }
        // Receiver may be gone if the caller stopped waiting.
        let _ = tx.send(result);
    });
    rx
}

// ---------------------------------------------------------------------------
//  Reading
// ---------------------------------------------------------------------------

fn read_exact_or<R: Read>(r: &mut R, buf: &mut [u8], section: &'static str) -> Result<()> {
    r.read_exact(buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => FileError::Truncated(section),
        _ => FileError::Io(e),
    })
}

fn read_u32<R: Read>(r: &mut R, section: &'static str) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_exact_or(r, &mut buf, section)?;
    Ok(u32::from_le_bytes(buf))
}

/// Read a length-prefixed block without trusting the length for allocation.
fn read_section<R: Read>(r: &mut R, section: &'static str) -> Result<Vec<u8>> {
    let len = read_u32(r, section)? as u64;
    let mut buf = Vec::new();
    r.by_ref().take(len).read_to_end(&mut buf)?;
    if buf.len() as u64 != len {
        return Err(FileError::Truncated(section));
    }
    Ok(buf)
}

/// Bytes per sample for the dtype names numpy writes.
fn dtype_width(dtype: &str) -> Result<usize> {
    match dtype {
        "uint8" | "|u1" | "u1" => Ok(1),
        "uint16" | "<u2" => Ok(2),
        other => Err(FileError::UnsupportedDtype(other.to_string())),
    }
}

fn decode_pixels(name: String, payload: &[u8]) -> Result<Layer> {
    if payload.len() < 4 {
        return Err(FileError::Truncated("pixel header"));
    }
    let (len_bytes, rest) = payload.split_at(4);
    let header_len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
    if rest.len() < header_len {
        return Err(FileError::Truncated("pixel header"));
    }
    let (header, raw) = rest.split_at(header_len);
    let header: PixelHeader = serde_json::from_slice(header)
        .map_err(|e| FileError::InvalidFormat(format!("pixel header of '{name}': {e}")))?;

    let (h, w, c) = match header.shape[..] {
        [h, w] => (h, w, 1),
        [h, w, c] => (h, w, c),
        _ => {
            return Err(FileError::InvalidFormat(format!(
                "layer '{name}' has shape {:?}",
                header.shape
            )));
        }
    };
    if w > MAX_CANVAS_DIM || h > MAX_CANVAS_DIM {
        return Err(FileError::InvalidFormat(format!(
            "layer '{name}' is {w}×{h}, limit is {MAX_CANVAS_DIM}"
        )));
    }
    if !matches!(c, 1 | 3 | 4) {
        return Err(FileError::InvalidFormat(format!("layer '{name}' has {c} channels")));
    }

    let sample_bytes = dtype_width(&header.dtype)?;
    let expected = w as usize * h as usize * c as usize * sample_bytes;
    if raw.len() != expected {
        return Err(FileError::InvalidFormat(format!(
            "layer '{name}' holds {} bytes, shape needs {expected}",
            raw.len()
        )));
    }

    let samples: Vec<u8>;
    let data = if sample_bytes == 2 {
        samples = raw
            .chunks_exact(2)
            .map(|b| ((u16::from_le_bytes([b[0], b[1]]) as u32 + 128) / 257) as u8)
            .collect();
        &samples[..]
    } else {
        raw
    };

    Layer::from_raw(name, w, h, c as u8, data)
        .ok_or_else(|| FileError::InvalidFormat("pixel payload does not match its shape".into()))
}

/// Parse a project from any reader.
pub fn decode_project<R: Read>(mut r: R) -> Result<ProjectFile> {
    let mut magic = [0u8; 8];
    read_exact_or(&mut r, &mut magic, "magic")?;
    if &magic != PROJECT_MAGIC {
        return Err(FileError::InvalidFormat("not an EpiGimp project (bad magic)".into()));
    }

    let version = read_u32(&mut r, "version")?;
    if version != PROJECT_VERSION {
        return Err(FileError::UnsupportedVersion(version));
    }

    let metadata = read_section(&mut r, "metadata")?;
    let metadata: Metadata = serde_json::from_slice(&metadata)
        .map_err(|e| FileError::InvalidFormat(format!("metadata: {e}")))?;

    let count = read_u32(&mut r, "layer count")?;
    if count > MAX_LAYERS {
        return Err(FileError::InvalidFormat(format!(
            "{count} layers exceeds the limit of {MAX_LAYERS}"
        )));
    }

    let mut layers = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let info = read_section(&mut r, "layer info")?;
        let info: LayerInfo = serde_json::from_slice(&info)
            .map_err(|e| FileError::InvalidFormat(format!("layer info: {e}")))?;
        let payload = read_section(&mut r, "pixel payload")?;

        let mut layer = decode_pixels(info.name, &payload)?;
        layer.visible = info.visible;
        layer.set_opacity(info.opacity);
        layer.blend_mode = BlendMode::from_name(&info.blend_mode);
        layer.position = info.position;
        layers.push(layer);
    }

    Ok(ProjectFile { metadata, layers })
}

/// Load a project file into a new document.
pub fn load_project(path: &Path) -> Result<Canvas> {
    let file = File::open(path)?;
    let project = decode_project(BufReader::new(file))?;
    log::info!("Loaded project {} ({} layers)", path.display(), project.layers.len());

    let mut canvas = project.into_canvas();
    canvas.set_project_path(path);
    Ok(canvas)
}

// ============================================================================
// IMAGE IMPORT
// ============================================================================

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Decode a plain image into a single-layer document named after the file.
pub fn import_image(path: &Path) -> Result<Canvas> {
    let ext = extension_of(path);
    if !IMPORT_EXTENSIONS.contains(&ext.as_str()) {
        return Err(FileError::UnsupportedFormat(ext));
    }

    let img = image::open(path)
        .map_err(|source| FileError::Decode {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgba8();

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Background")
        .to_string();
    let layer = Layer::from_rgba_image(name, img);

    let mut canvas = Canvas::from_layer(layer);
    canvas.metadata.created_from = Some(path.display().to_string());
    canvas.metadata.original_format = Some(format!(".{ext}"));
    log::info!(
        "Imported {} ({}×{})",
        path.display(),
        canvas.width(),
        canvas.height()
    );
    Ok(canvas)
}

/// Open either a project or a plain image, by extension.
pub fn open_path(path: &Path) -> Result<Canvas> {
    if extension_of(path) == PROJECT_EXTENSION {
        load_project(path)
    } else {
        import_image(path)
    }
}

// ============================================================================
// FLATTENED EXPORT
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Png,
    Jpeg,
    Bmp,
    Tiff,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Jpeg => "jpg",
            ExportFormat::Bmp => "bmp",
            ExportFormat::Tiff => "tiff",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(ExportFormat::Png),
            "jpg" | "jpeg" => Some(ExportFormat::Jpeg),
            "bmp" => Some(ExportFormat::Bmp),
            "tif" | "tiff" => Some(ExportFormat::Tiff),
            _ => None,
        }
    }

    /// Whether the encoder keeps an alpha channel.
    pub fn supports_alpha(&self) -> bool {
        !matches!(self, ExportFormat::Jpeg)
    }
}

/// Compression options for TIFF format
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TiffCompression {
    #[default]
    None,
    Lzw,
    Deflate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExportOptions {
    /// 1..=100
    pub jpeg_quality: u8,
    pub tiff_compression: TiffCompression,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            jpeg_quality: 90,
            tiff_compression: TiffCompression::None,
        }
    }
}

/// Drop alpha by compositing over white: `rgb_out = 255·(1−a) + rgb·a`.
pub fn flatten_onto_white(image: &RgbaImage) -> RgbImage {
    let mut out = RgbImage::new(image.width(), image.height());
    for (dst, src) in out.pixels_mut().zip(image.pixels()) {
        let a = src[3] as f32 / 255.0;
        for c in 0..3 {
            dst[c] = (255.0 * (1.0 - a) + src[c] as f32 * a).round() as u8;
        }
    }
    out
}

/// Encode and write an image to a file.
/// This is a standalone function (no `&mut self`) so it can be called from
/// background threads via `rayon::spawn`.
pub fn encode_and_write(
    image: &RgbaImage,
    path: &Path,
    format: ExportFormat,
    options: &ExportOptions,
) -> std::result::Result<(), ImageError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    match format {
        ExportFormat::Png => {
            let encoder = PngEncoder::new(&mut writer);
            #[allow(deprecated)]
            encoder.encode(image.as_raw(), image.width(), image.height(), ColorType::Rgba8)?;
        }
        ExportFormat::Jpeg => {
            let rgb_image = flatten_onto_white(image);
            let quality = options.jpeg_quality.clamp(1, 100);
            let mut encoder = JpegEncoder::new_with_quality(&mut writer, quality);
            encoder.encode(
                rgb_image.as_raw(),
                rgb_image.width(),
                rgb_image.height(),
                ColorType::Rgb8,
            )?;
        }
        ExportFormat::Bmp => {
            let mut encoder = BmpEncoder::new(&mut writer);
            encoder.encode(image.as_raw(), image.width(), image.height(), ColorType::Rgba8)?;
        }
        ExportFormat::Tiff => {
            let err_map = |e: tiff::TiffError| {
                ImageError::IoError(std::io::Error::other(format!("TIFF encode error: {}", e)))
            };
            let mut tiff_enc = tiff::encoder::TiffEncoder::new(&mut writer).map_err(err_map)?;
            match options.tiff_compression {
                TiffCompression::None => {
                    tiff_enc
                        .write_image::<tiff::encoder::colortype::RGBA8>(
                            image.width(),
                            image.height(),
                            image.as_raw(),
                        )
                        .map_err(err_map)?;
                }
                TiffCompression::Lzw => {
                    tiff_enc
                        .write_image_with_compression::<tiff::encoder::colortype::RGBA8, _>(
                            image.width(),
                            image.height(),
                            tiff::encoder::compression::Lzw,
                            image.as_raw(),
                        )
                        .map_err(err_map)?;
                }
                TiffCompression::Deflate => {
                    tiff_enc
                        .write_image_with_compression::<tiff::encoder::colortype::RGBA8, _>(
                            image.width(),
                            image.height(),
                            tiff::encoder::compression::Deflate::default(),
                            image.as_raw(),
                        )
                        .map_err(err_map)?;
                }
            }
        }
    }

    writer.flush()?;
    Ok(())
}

/// Flatten the document and write it in the format named by the extension.
pub fn export_image(canvas: &Canvas, path: &Path, options: &ExportOptions) -> Result<()> {
    let ext = extension_of(path);
    let format = ExportFormat::from_extension(&ext).ok_or(FileError::UnsupportedFormat(ext))?;
    let flat = canvas.composite();
    encode_and_write(&flat, path, format, options)?;
    log::info!("Exported {} as {:?}", path.display(), format);
    Ok(())
}
