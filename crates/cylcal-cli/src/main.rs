//! Command line calibration pipeline.
//!
//! Consumes a rig description and a directory of per-image corner maps
//! (string-keyed JSON, as produced by an external charuco detector), runs the
//! full pipeline, and writes the calibration report.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};

use cylcal_core::io::load_point2_map;
use cylcal_core::{CylinderRig, Detection, ImageSize};
use cylcal_pipeline::{summary_text, CalibrationReport, CalibrationSession, RefineMode, SessionConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    PerImage,
    Joint,
}

impl From<Mode> for RefineMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::PerImage => RefineMode::PerImage,
            Mode::Joint => RefineMode::Joint,
        }
    }
}

/// Cylindrical rig camera calibration.
#[derive(Debug, Parser)]
#[command(author, version, about = "Cylindrical charuco rig calibration pipeline")]
struct Args {
    /// JSON file with the rig parameters (CylinderRig).
    #[arg(long)]
    rig: PathBuf,

    /// Directory of per-image corner-map JSON files.
    #[arg(long)]
    detections: PathBuf,

    /// Image dimensions as WIDTHxHEIGHT, e.g. 1280x960.
    #[arg(long, value_parser = parse_image_size)]
    image_size: ImageSize,

    /// Distortion refinement policy.
    #[arg(long, value_enum, default_value = "per-image")]
    mode: Mode,

    /// Optional JSON SessionConfig; defaults are used if omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Report output path; printed to stdout if omitted.
    #[arg(long)]
    output: Option<PathBuf>,
}

fn parse_image_size(s: &str) -> Result<ImageSize, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
    let width = w.parse().map_err(|_| format!("bad width '{w}'"))?;
    let height = h.parse().map_err(|_| format!("bad height '{h}'"))?;
    Ok(ImageSize { width, height })
}

fn load_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

/// Detection files in the directory, sorted by file name for a stable
/// image order.
fn detection_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    if files.is_empty() {
        bail!("no .json detection files in {}", dir.display());
    }
    Ok(files)
}

fn run(args: &Args) -> Result<CalibrationReport> {
    let rig: CylinderRig = load_json_file(&args.rig)?;
    let mut config = match &args.config {
        Some(path) => load_json_file::<SessionConfig>(path)?,
        None => SessionConfig::default(),
    };
    config.mode = args.mode.into();

    let mut session = CalibrationSession::new(rig, args.image_size, config);
    for path in detection_files(&args.detections)? {
        let corners =
            load_point2_map(&path).with_context(|| format!("loading {}", path.display()))?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        session.add_image(name, Detection::new(corners));
    }

    session.calibrate_intrinsics()?;
    session.refine_distortion()?;
    let report = session.finalize()?;
    log::info!("\n{}", summary_text(&session));
    Ok(report)
}

fn try_main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let report = run(&args)?;
    match &args.output {
        Some(path) => {
            report
                .save(path)
                .with_context(|| format!("writing {}", path.display()))?;
            log::info!("report written to {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
