// ============================================================================
// EpiGimp CLI: headless batch processing via command-line arguments
// ============================================================================
//
// Usage examples:
//   EpiGimp -i photo.png --rotate 90 -o rotated.png
//   EpiGimp -i photo.jpg -o out.epigimp                (format inferred from output ext)
//   EpiGimp -i "shots/*.jpg" --temperature 6500:3500 --output-dir warm/ -f png
//   EpiGimp -i project.epigimp -o flat.jpg -q 85
//   EpiGimp -i a.png b.png --info
//   EpiGimp --new 1024x768 -o blank.epigimp          (size/fill from settings when omitted)
//
// No window is opened. Files are processed one after another on the current
// thread; per-pixel passes still use rayon internally.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::canvas::Canvas;
use crate::io::{self, ExportFormat, ExportOptions, TiffCompression, MAX_CANVAS_DIM};
use crate::ops::adjustments::adjust_temperature;
use crate::settings::EditorSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// EpiGimp headless image processor.
///
/// Convert between image formats and `.epigimp` projects, applying simple
/// whole-document edits on the way.
#[derive(Parser, Debug)]
#[command(
    name = "EpiGimp",
    about = "EpiGimp headless batch image processor",
    long_about = "Apply flips, rotations and colour-temperature shifts to images and\n\
                  convert between PNG, JPEG, BMP, TIFF and EpiGimp project files\n\
                  without opening the GUI.\n\n\
                  Example:\n  \
                  EpiGimp -i photo.png --rotate 90 -o rotated.png\n  \
                  EpiGimp -i \"*.jpg\" --temperature 6500:4000 --output-dir out/ -f png"
)]
pub struct CliArgs {
    /// Input file(s). Glob patterns accepted (e.g. "*.png", "shots/*.jpg").
    /// Project files keep all layers; images load as a single layer.
    #[arg(short, long, num_args = 1..)]
    pub input: Vec<String>,

    /// Start from a blank document instead of an input file, optionally sized
    /// WIDTHxHEIGHT. Size and background default to the saved new-image settings.
    #[arg(long, value_name = "WxH", num_args = 0..=1, conflicts_with_all = ["input", "output_dir"])]
    pub new: Option<Option<String>>,

    /// Output file path. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing.
    /// Files are written here with the original stem and the target format's extension.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Output format: png, jpeg, bmp, tiff, epigimp.
    /// When omitted, the format is inferred from --output's extension, defaulting to png.
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// JPEG quality (1-100). Defaults to the saved export settings.
    #[arg(short, long, value_name = "1-100")]
    pub quality: Option<u8>,

    /// TIFF compression mode: none, lzw, deflate. Defaults to the saved export settings.
    #[arg(long, value_name = "MODE")]
    pub tiff_compression: Option<String>,

    /// Mirror every layer left to right.
    #[arg(long)]
    pub flip_h: bool,

    /// Mirror every layer top to bottom.
    #[arg(long)]
    pub flip_v: bool,

    /// Rotate the whole document clockwise: 90, 180 or 270 degrees.
    #[arg(long, value_name = "DEGREES")]
    pub rotate: Option<u32>,

    /// Shift colour temperature on every layer, e.g. "6500:3500" or "6500:9000:0.5".
    #[arg(long, value_name = "FROM:TO[:OPACITY]")]
    pub temperature: Option<String>,

    /// Print document size, layers and metadata. Nothing is written unless an
    /// output, output directory or format is also given.
    #[arg(long)]
    pub info: bool,

    /// Echo warnings to stderr and print per-file timing.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    /// `true` when there is batch work to do; otherwise `main` prints help.
    pub fn has_inputs(&self) -> bool {
        !self.input.is_empty() || self.new.is_some()
    }
}

/// Where a processed document goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Image(ExportFormat),
    Project,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Image(f) => f.extension(),
            OutputFormat::Project => io::PROJECT_EXTENSION,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower == io::PROJECT_EXTENSION {
            return Some(OutputFormat::Project);
        }
        ExportFormat::from_extension(&lower).map(OutputFormat::Image)
    }
}

/// Parsed `--temperature` argument.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TemperatureShift {
    pub from: f32,
    pub to: f32,
    pub opacity: f32,
}

impl std::str::FromStr for TemperatureShift {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(format!("expected FROM:TO[:OPACITY], got '{s}'"));
        }
        let num = |p: &str| -> Result<f32, String> {
            p.trim().parse::<f32>().map_err(|_| format!("'{p}' is not a number"))
        };
        let opacity = match parts.get(2) {
            Some(p) => num(p)?,
            None => 1.0,
        };
        Ok(Self { from: num(parts[0])?, to: num(parts[1])?, opacity })
    }
}

/// Everything `run_one` needs, resolved once from the arguments.
struct Job {
    format: OutputFormat,
    export: ExportOptions,
    flip_h: bool,
    flip_v: bool,
    rotate: u32,
    temperature: Option<TemperatureShift>,
    info: bool,
    write: bool,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs, settings: &EditorSettings) -> ExitCode {
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() && args.new.is_none() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.output.is_some() && args.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    let format = match parse_format(args.format.as_deref(), args.output.as_deref()) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut export = settings.export.to_options();
    if let Some(q) = args.quality {
        export.jpeg_quality = q.clamp(1, 100);
    }
    if let Some(mode) = args.tiff_compression.as_deref() {
        export.tiff_compression = match parse_tiff_compression(mode) {
            Some(c) => c,
            None => {
                eprintln!("error: unknown TIFF compression '{mode}' (none, lzw, deflate)");
                return ExitCode::FAILURE;
            }
        };
    }

    let rotate = args.rotate.unwrap_or(0);
    if !matches!(rotate, 0 | 90 | 180 | 270) {
        eprintln!("error: --rotate accepts 90, 180 or 270, got {rotate}");
        return ExitCode::FAILURE;
    }

    let temperature = match args.temperature.as_deref().map(str::parse::<TemperatureShift>) {
        None => None,
        Some(Ok(t)) => Some(t),
        Some(Err(e)) => {
            eprintln!("error: --temperature: {e}");
            return ExitCode::FAILURE;
        }
    };

    let write = !args.info || args.output.is_some() || args.output_dir.is_some() || args.format.is_some();
    let job = Job {
        format,
        export,
        flip_h: args.flip_h,
        flip_v: args.flip_v,
        rotate,
        temperature,
        info: args.info,
        write,
    };

    if let Some(size) = &args.new {
        return run_new(size.as_deref(), args.output.as_deref(), settings, &job);
    }

    if let Some(dir) = &args.output_dir
        && job.write
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("error: could not create output directory '{}': {}", dir.display(), e);
        return ExitCode::FAILURE;
    }

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }
        let file_start = Instant::now();

        let output_path = if job.write {
            match build_output_path(input_path, args.output.as_deref(), args.output_dir.as_deref(), job.format) {
                Some(p) => Some(p),
                None => {
                    eprintln!("  error: cannot determine output path for '{}'.", input_path.display());
                    any_failure = true;
                    continue;
                }
            }
        } else {
            None
        };

        match run_one(input_path, output_path.as_deref(), &job) {
            Ok(written) => {
                if let Some(path) = written
                    && (args.verbose || multi)
                {
                    println!(
                        "  → {} ({:.0}ms)",
                        path.display(),
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                log::error!("{}: {e}", input_path.display());
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Per-file processing pipeline
// ============================================================================

/// `--new`: build a blank document from the new-image settings, then edit and save it.
fn run_new(size: Option<&str>, output: Option<&Path>, settings: &EditorSettings, job: &Job) -> ExitCode {
    let mut prefs = settings.new_image;
    if let Some(size) = size {
        match parse_size(size) {
            Some((width, height)) => {
                prefs.width = width;
                prefs.height = height;
            }
            None => {
                eprintln!("error: --new expects WIDTHxHEIGHT (1-{MAX_CANVAS_DIM} each), got '{size}'");
                return ExitCode::FAILURE;
            }
        }
    }
    if job.write && output.is_none() {
        eprintln!("error: --new needs --output to know where to write");
        return ExitCode::FAILURE;
    }

    let canvas = Canvas::from_settings(&prefs);
    log::info!("New document {}x{}", canvas.width(), canvas.height());
    let output = if job.write { output } else { None };
    match process(canvas, output, job) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("--new: {e}");
            eprintln!("  error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_one(input: &Path, output: Option<&Path>, job: &Job) -> Result<Option<PathBuf>, String> {
    // -- Step 1: Load ----------------------------------------------------
    let canvas = io::open_path(input).map_err(|e| format!("load failed: {}", e))?;
    process(canvas, output, job)
}

/// Edit a loaded document, optionally print it, and write it to `output`.
fn process(mut canvas: Canvas, output: Option<&Path>, job: &Job) -> Result<Option<PathBuf>, String> {
    // -- Step 2: Edit ----------------------------------------------------
    apply_edits(&mut canvas, job);

    if job.info {
        print_info(&canvas);
    }

    // -- Step 3: Save ----------------------------------------------------
    let Some(output) = output else {
        return Ok(None);
    };
    let written = match job.format {
        OutputFormat::Project => {
            io::save_project(&mut canvas, output).map_err(|e| format!("project save failed: {}", e))?
        }
        OutputFormat::Image(format) => {
            let flat = canvas.composite();
            io::encode_and_write(&flat, output, format, &job.export)
                .map_err(|e| format!("save failed: {}", e))?;
            output.to_path_buf()
        }
    };
    Ok(Some(written))
}

fn apply_edits(canvas: &mut Canvas, job: &Job) {
    if job.flip_h {
        canvas.flip_horizontal();
    }
    if job.flip_v {
        canvas.flip_vertical();
    }
    match job.rotate {
        90 => canvas.rotate_90_clockwise(),
        180 => canvas.rotate_180(),
        270 => canvas.rotate_90_counterclockwise(),
        _ => {}
    }
    if let Some(t) = job.temperature {
        for idx in 0..canvas.len() {
            adjust_temperature(canvas, idx, t.from, t.to, t.opacity);
        }
    }
}

fn print_info(canvas: &Canvas) {
    let (h, w) = canvas.shape();
    println!("  size: {w} x {h}, {} layer(s)", canvas.len());
    for (i, layer) in canvas.layers().iter().enumerate() {
        let active = if Some(i) == canvas.active_layer_index() { "*" } else { " " };
        println!(
            "  {active}[{i}] {:<20} {}x{} at ({}, {}) opacity {:.2} {}{}",
            layer.name,
            layer.width(),
            layer.height(),
            layer.position.0,
            layer.position.1,
            layer.opacity,
            layer.blend_mode.name(),
            if layer.visible { "" } else { " (hidden)" },
        );
    }
    let meta = &canvas.metadata;
    for (key, value) in [
        ("title", &meta.title),
        ("author", &meta.author),
        ("datetime", &meta.datetime),
        ("created_from", &meta.created_from),
        ("original_format", &meta.original_format),
    ] {
        if let Some(v) = value {
            println!("  {key}: {v}");
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    log::warn!("pattern '{}' matched no files", pattern);
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

/// Choose the output format from `--format` or infer it from the output
/// file extension. Defaults to PNG when neither is known.
fn parse_format(format_arg: Option<&str>, output: Option<&Path>) -> Result<OutputFormat, String> {
    if let Some(f) = format_arg {
        return OutputFormat::from_name(f).ok_or_else(|| format!("unsupported output format '{f}'"));
    }

    if let Some(ext) = output.and_then(|o| o.extension()).and_then(|e| e.to_str()) {
        return Ok(OutputFormat::from_name(ext).unwrap_or(OutputFormat::Image(ExportFormat::Png)));
    }

    Ok(OutputFormat::Image(ExportFormat::Png))
}

/// "WIDTHxHEIGHT", each side within `1..=MAX_CANVAS_DIM`.
fn parse_size(s: &str) -> Option<(u32, u32)> {
    let (w, h) = s.trim().split_once(['x', 'X'])?;
    let w: u32 = w.trim().parse().ok()?;
    let h: u32 = h.trim().parse().ok()?;
    let valid = 1..=MAX_CANVAS_DIM;
    (valid.contains(&w) && valid.contains(&h)).then_some((w, h))
}

fn parse_tiff_compression(mode: &str) -> Option<TiffCompression> {
    match mode.to_ascii_lowercase().as_str() {
        "none" => Some(TiffCompression::None),
        "lzw" => Some(TiffCompression::Lzw),
        "deflate" => Some(TiffCompression::Deflate),
        _ => None,
    }
}

/// Compute the output path for a single input file.
///
/// Priority:
/// 1. `--output` (explicit path, used for single-file input)
/// 2. `--output-dir` (batch directory, derives filename from input stem)
/// 3. Fallback: same directory as input, same stem, new extension
///    (appends `_out` to stem if it would collide with the input path)
fn build_output_path(
    input: &Path,
    output: Option<&Path>,
    output_dir: Option<&Path>,
    format: OutputFormat,
) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }

    let ext = format.extension();
    let stem = input.file_stem()?.to_string_lossy().into_owned();

    if let Some(dir) = output_dir {
        return Some(dir.join(format!("{}.{}", stem, ext)));
    }

    let parent = input.parent().unwrap_or(Path::new("."));
    let candidate = parent.join(format!("{}.{}", stem, ext));

    // Never overwrite the input
    if candidate == input {
        Some(parent.join(format!("{}_out.{}", stem, ext)))
    } else {
        Some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temperature_argument_parses() {
        let t: TemperatureShift = "6500:3500".parse().unwrap();
        assert_eq!(t, TemperatureShift { from: 6500.0, to: 3500.0, opacity: 1.0 });
        let t: TemperatureShift = "6500:9000:0.5".parse().unwrap();
        assert_eq!(t.opacity, 0.5);
        assert!("6500".parse::<TemperatureShift>().is_err());
        assert!("a:b".parse::<TemperatureShift>().is_err());
    }

    #[test]
    fn format_from_flag_or_extension() {
        assert_eq!(
            parse_format(Some("epigimp"), None),
            Ok(OutputFormat::Project)
        );
        assert_eq!(
            parse_format(None, Some(Path::new("out.JPG"))),
            Ok(OutputFormat::Image(ExportFormat::Jpeg))
        );
        assert_eq!(
            parse_format(None, Some(Path::new("out.xyz"))),
            Ok(OutputFormat::Image(ExportFormat::Png))
        );
        assert!(parse_format(Some("gif"), None).is_err());
    }

    #[test]
    fn output_path_never_overwrites_input() {
        let png = OutputFormat::Image(ExportFormat::Png);
        assert_eq!(
            build_output_path(Path::new("dir/a.png"), None, None, png),
            Some(PathBuf::from("dir/a_out.png"))
        );
        assert_eq!(
            build_output_path(Path::new("dir/a.png"), None, Some(Path::new("out")), OutputFormat::Project),
            Some(PathBuf::from("out/a.epigimp"))
        );
        assert_eq!(
            build_output_path(Path::new("a.png"), Some(Path::new("b.bmp")), None, png),
            Some(PathBuf::from("b.bmp"))
        );
    }

    #[test]
    fn tiff_modes() {
        assert_eq!(parse_tiff_compression("LZW"), Some(TiffCompression::Lzw));
        assert_eq!(parse_tiff_compression("zip"), None);
    }

    #[test]
    fn rotate_and_flip_edits() {
        let mut canvas = Canvas::new((2, 3), image::Rgba([255, 255, 255, 255]));
        let job = Job {
            format: OutputFormat::Project,
            export: ExportOptions::default(),
            flip_h: true,
            flip_v: false,
            rotate: 90,
            temperature: None,
            info: false,
            write: false,
        };
        apply_edits(&mut canvas, &job);
        assert_eq!(canvas.shape(), (3, 2));
    }

    #[test]
    fn size_argument_parses() {
        assert_eq!(parse_size("640x480"), Some((640, 480)));
        assert_eq!(parse_size(" 12 X 7 "), Some((12, 7)));
        assert_eq!(parse_size("0x10"), None);
        assert_eq!(parse_size("10"), None);
        assert_eq!(parse_size("99999x1"), None);
    }

    #[test]
    fn new_document_uses_saved_preferences() {
        let dir = std::env::temp_dir().join(format!("epigimp-cli-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut settings = EditorSettings::default();
        settings.new_image.width = 6;
        settings.new_image.height = 3;
        settings.new_image.background = crate::settings::BackgroundFill::Custom([9, 8, 7, 255]);

        let out = dir.join("blank.epigimp");
        let args = CliArgs::parse_from(["EpiGimp", "--new", "-o", out.to_str().unwrap()]);
        assert!(args.has_inputs());
        let _ = run(args, &settings);
        let loaded = io::load_project(&out).unwrap();
        assert_eq!(loaded.shape(), (3, 6));
        assert_eq!(loaded.layer(0).unwrap().get_pixel(5, 2), Some(image::Rgba([9, 8, 7, 255])));

        let sized = dir.join("sized.epigimp");
        let args = CliArgs::parse_from(["EpiGimp", "--new", "5x4", "--rotate", "90", "-o", sized.to_str().unwrap()]);
        let _ = run(args, &settings);
        assert_eq!(io::load_project(&sized).unwrap().shape(), (5, 4));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn end_to_end_conversion() {
        let dir = std::env::temp_dir().join(format!("epigimp-cli-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let input = dir.join("in.png");
        image::RgbaImage::from_pixel(4, 2, image::Rgba([10, 20, 30, 255]))
            .save(&input)
            .unwrap();

        let args = CliArgs::parse_from([
            "EpiGimp",
            "-i",
            input.to_str().unwrap(),
            "--rotate",
            "90",
            "-f",
            "epigimp",
        ]);
        let _ = run(args, &EditorSettings::default());

        let loaded = io::load_project(&dir.join("in.epigimp")).unwrap();
        assert_eq!(loaded.shape(), (4, 2));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
