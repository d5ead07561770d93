//! pano-batch: CLI batch driver for panorama stitching.
//!
//! Stitches one folder of overlapping photos into a panorama, or — with
//! `--batch-json` — a whole set of folders in one invocation. Images are
//! taken in filename order, which must follow the capture order along
//! the panorama.
//!
//! A failed folder never aborts the batch: its error is reported and the
//! remaining folders still run. The process exits non-zero only when no
//! folder produced a panorama.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin pano-batch -- [OPTIONS] <INPUT_DIR>
//! cargo run --release --bin pano-batch -- --batch-json jobs.json
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use pano_pipeline::{RgbImage, StitchConfig, Stitcher};

/// Image extensions accepted as stitching input, compared
/// case-insensitively.
const INPUT_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Batch panorama stitcher.
///
/// Stitches the images of a folder (in filename order) into a single
/// panorama, with configurable pipeline parameters.
#[derive(Parser)]
#[command(name = "pano-batch", version)]
struct Cli {
    /// Folder of overlapping input images (ignored with --batch-json).
    input_dir: Option<PathBuf>,

    /// Output image path for single-folder mode.
    #[arg(long, short, default_value = "panorama.png")]
    output: PathBuf,

    /// JSON file mapping input folders to output paths, e.g.
    /// {"trip/day1": "day1.png", "trip/day2": "day2.png"}.
    #[arg(long)]
    batch_json: Option<PathBuf>,

    /// Lowe ratio test threshold.
    #[arg(long, default_value_t = StitchConfig::DEFAULT_RATIO_THRESHOLD)]
    ratio_threshold: f32,

    /// Minimum good matches per adjacent pair.
    #[arg(long, default_value_t = StitchConfig::DEFAULT_MIN_GOOD_MATCHES)]
    min_good_matches: usize,

    /// RANSAC inlier threshold in pixels.
    #[arg(long, default_value_t = StitchConfig::DEFAULT_RANSAC_THRESHOLD)]
    ransac_threshold: f64,

    /// RANSAC iteration cap.
    #[arg(long, default_value_t = StitchConfig::DEFAULT_RANSAC_MAX_ITERATIONS)]
    ransac_max_iterations: usize,

    /// Minimum registration confidence (inliers / matches).
    #[arg(long, default_value_t = StitchConfig::DEFAULT_MIN_CONFIDENCE)]
    min_confidence: f64,

    /// Maximum keypoints retained per image.
    #[arg(long, default_value_t = StitchConfig::DEFAULT_MAX_FEATURES)]
    max_features: usize,

    /// Scale-space pyramid depth.
    #[arg(long, default_value_t = StitchConfig::DEFAULT_PYRAMID_LEVELS, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    pyramid_levels: usize,

    /// Gaussian sigma applied before each pyramid downsample.
    #[arg(long, default_value_t = StitchConfig::DEFAULT_PYRAMID_SIGMA)]
    pyramid_sigma: f32,

    /// Harris corner response k parameter.
    #[arg(long, default_value_t = StitchConfig::DEFAULT_HARRIS_K)]
    harris_k: f64,

    /// Absolute corner response floor.
    #[arg(long, default_value_t = StitchConfig::DEFAULT_RESPONSE_FLOOR)]
    response_floor: f64,

    /// Relative corner response threshold.
    #[arg(long, default_value_t = StitchConfig::DEFAULT_RESPONSE_RELATIVE)]
    response_relative: f64,

    /// Full stitch config as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    /// The JSON must be a valid `StitchConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,
}

/// Build a [`StitchConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored. Otherwise, a config is
/// assembled from the individual flags.
fn config_from_cli(cli: &Cli) -> Result<StitchConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(StitchConfig {
        ratio_threshold: cli.ratio_threshold,
        min_good_matches: cli.min_good_matches,
        ransac_threshold: cli.ransac_threshold,
        ransac_max_iterations: cli.ransac_max_iterations,
        min_confidence: cli.min_confidence,
        max_features: cli.max_features,
        pyramid_levels: cli.pyramid_levels,
        pyramid_sigma: cli.pyramid_sigma,
        harris_k: cli.harris_k,
        response_floor: cli.response_floor,
        response_relative: cli.response_relative,
    })
}

/// The (input folder, output path) jobs to run, in deterministic order.
fn jobs_from_cli(cli: &Cli) -> Result<Vec<(PathBuf, PathBuf)>, String> {
    if let Some(ref batch_path) = cli.batch_json {
        let json = std::fs::read_to_string(batch_path)
            .map_err(|e| format!("Error reading {}: {e}", batch_path.display()))?;
        let map: BTreeMap<PathBuf, PathBuf> = serde_json::from_str(&json)
            .map_err(|e| format!("Error parsing {}: {e}", batch_path.display()))?;
        if map.is_empty() {
            return Err(format!("{}: no jobs defined", batch_path.display()));
        }
        return Ok(map.into_iter().collect());
    }

    cli.input_dir.as_ref().map_or_else(
        || Err("missing input folder (or --batch-json)".to_owned()),
        |dir| Ok(vec![(dir.clone(), cli.output.clone())]),
    )
}

/// Image paths in `dir` with an accepted extension, in filename order.
fn image_paths(dir: &Path) -> Result<Vec<PathBuf>, String> {
    let entries =
        std::fs::read_dir(dir).map_err(|e| format!("Error reading {}: {e}", dir.display()))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    INPUT_EXTENSIONS
                        .iter()
                        .any(|accepted| ext.eq_ignore_ascii_case(accepted))
                })
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Decode every image in the folder, warning about and skipping files
/// that fail to decode.
fn load_images(paths: &[PathBuf]) -> Vec<RgbImage> {
    let mut images = Vec::with_capacity(paths.len());
    for path in paths {
        match image::open(path) {
            Ok(decoded) => images.push(decoded.to_rgb8()),
            Err(e) => eprintln!("Warning: skipping {}: {e}", path.display()),
        }
    }
    images
}

/// Stitch one folder and write the panorama to `output`.
fn stitch_folder(dir: &Path, output: &Path, config: &StitchConfig) -> Result<(), String> {
    let paths = image_paths(dir)?;
    eprintln!("{}: {} images", dir.display(), paths.len());

    let images = load_images(&paths);
    let matched = Stitcher::new(images, config.clone())
        .preprocess()
        .map_err(|e| e.to_string())?
        .extract_features()
        .match_features();

    for (pair, count) in matched.match_counts().iter().enumerate() {
        eprintln!("  pair {pair}: {count} good matches");
    }

    let result = matched
        .register()
        .map_err(|e| e.to_string())?
        .align()
        .map_err(|e| e.to_string())?
        .composite()
        .map_err(|e| e.to_string())?
        .crop()
        .into_result();

    for (pair, transform) in result.pairwise.iter().enumerate() {
        eprintln!(
            "  pair {pair}: {}/{} inliers, confidence {:.2}, residual {:.2}px",
            transform.inlier_count,
            transform.match_count,
            transform.confidence,
            transform.mean_residual,
        );
    }

    result
        .panorama
        .save(output)
        .map_err(|e| format!("Error writing {}: {e}", output.display()))?;
    eprintln!(
        "{}: panorama written to {} ({}x{})",
        dir.display(),
        output.display(),
        result.panorama.width(),
        result.panorama.height(),
    );
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let jobs = match jobs_from_cli(&cli) {
        Ok(jobs) => jobs,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let mut succeeded = 0_usize;
    let mut failed = 0_usize;
    for (dir, output) in &jobs {
        match stitch_folder(dir, output, &config) {
            Ok(()) => succeeded += 1,
            Err(msg) => {
                eprintln!("{}: {msg}", dir.display());
                failed += 1;
            }
        }
    }

    if jobs.len() > 1 {
        eprintln!("{succeeded} succeeded, {failed} failed");
    }

    if succeeded == 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn config_json_overrides_flags() {
        let cli = Cli::parse_from([
            "pano-batch",
            "photos",
            "--ratio-threshold",
            "0.9",
            "--config-json",
            r#"{
                "ratio_threshold": 0.5,
                "min_good_matches": 12,
                "ransac_threshold": 2.0,
                "ransac_max_iterations": 500,
                "min_confidence": 0.8,
                "max_features": 800,
                "pyramid_levels": 2,
                "pyramid_sigma": 1.0,
                "harris_k": 0.05,
                "response_floor": 0.001,
                "response_relative": 0.02
            }"#,
        ]);
        let config = config_from_cli(&cli).unwrap();
        assert!((config.ratio_threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.min_good_matches, 12);
    }

    #[test]
    fn flags_assemble_a_config() {
        let cli = Cli::parse_from(["pano-batch", "photos", "--min-good-matches", "25"]);
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.min_good_matches, 25);
        assert!(
            (config.ratio_threshold - StitchConfig::DEFAULT_RATIO_THRESHOLD).abs() < f32::EPSILON
        );
    }

    #[test]
    fn bad_config_json_is_an_error() {
        let cli = Cli::parse_from(["pano-batch", "photos", "--config-json", "{not json"]);
        assert!(config_from_cli(&cli).is_err());
    }

    #[test]
    fn missing_input_without_batch_json_is_an_error() {
        let cli = Cli::parse_from(["pano-batch"]);
        assert!(jobs_from_cli(&cli).is_err());
    }

    #[test]
    fn single_folder_mode_yields_one_job() {
        let cli = Cli::parse_from(["pano-batch", "photos", "--output", "out.png"]);
        let jobs = jobs_from_cli(&cli).unwrap();
        assert_eq!(
            jobs,
            vec![(PathBuf::from("photos"), PathBuf::from("out.png"))],
        );
    }
}
