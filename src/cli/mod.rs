//! Command-line interface for the LiDAR voxelization pipeline.

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::ProjectionType;
use crate::core::dataset::{DatasetIndex, Split};
use crate::core::loaders::{load_scan, ScanLabelLoader};
use crate::core::remap::{LabelSchema, RemapTable};
use crate::core::writers;
use crate::processors::evaluation::{self, ConfusionMatrix};
use crate::processors::voxelizer::{voxelize_file, VoxelDataset, Voxelizer};
use crate::visualization::{self, LabelPalette};
use crate::PipelineConfig;

#[derive(Parser)]
#[command(name = "lidar-pipeline")]
#[command(about = "LiDAR scan voxelization pipeline", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Override the projection (cartesian, polar, spherical)
    #[arg(long, global = true)]
    projection: Option<ProjectionType>,

    /// Override the dataset root directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Override the number of worker threads
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Override the augmentation seed
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Voxelize a single scan and print a summary
    Inspect {
        /// Input .bin scan file
        scan: PathBuf,
        /// Matching .label file
        #[arg(short, long)]
        labels: Option<PathBuf>,
        /// Export per-point grid indices and features to CSV
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Render a bird's-eye view of the voxel grid to PNG, plus a
        /// `<stem>_scan.png` scatter of the scan
        #[arg(long)]
        render: Option<PathBuf>,
        /// Pixels per voxel in the rendered view
        #[arg(long, default_value_t = 2)]
        cell_px: u32,
    },

    /// Voxelize a whole split in parallel
    Voxelize {
        /// Dataset split (train, valid, test)
        #[arg(short, long, default_value = "train")]
        split: Split,
        /// Limit number of scans to process
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Write voxel labels projected back to points as predictions
    Oracle {
        /// Output root for sequences/<NN>/predictions
        output_dir: PathBuf,
        /// Dataset split (must have labels)
        #[arg(short, long, default_value = "valid")]
        split: Split,
        /// Limit number of scans to process
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Score stored predictions against ground-truth labels
    Evaluate {
        /// Root containing sequences/<NN>/predictions
        predictions_dir: PathBuf,
        /// Dataset split (must have labels)
        #[arg(short, long, default_value = "valid")]
        split: Split,
        /// Limit number of scans to score
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Write the default configuration as YAML
    InitConfig {
        /// Output YAML path
        #[arg(default_value = "lidar-pipeline.yaml")]
        output: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Scatter renders are subsampled to at most this many points.
const MAX_SCATTER_POINTS: usize = 50_000;

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Create a progress bar over `len` scans
fn create_progress(len: usize, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap()
            .progress_chars("=> "),
    );
    pb.set_message(message.to_string());
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            format!("{}...", value.chars().take(36).collect::<String>())
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

/// Format a ratio as a percentage, or "n/a" for NaN.
fn percent(value: f64) -> String {
    if value.is_nan() {
        "n/a".to_string()
    } else {
        format!("{:.2}%", value * 100.0)
    }
}

/// Load the YAML config at `path`, or the defaults when no path is given.
fn load_config(path: Option<&Path>) -> Result<PipelineConfig, String> {
    let Some(path) = path else {
        return Ok(PipelineConfig::default());
    };
    let config = PipelineConfig::from_yaml(path)
        .map_err(|e| format!("Failed to load config from {}: {}", path.display(), e))?;
    info!("Loaded config from: {}", path.display());
    Ok(config)
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Load config; a malformed file is fatal rather than replaced by defaults
    let mut config = match load_config(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    // Command-line overrides
    if let Some(projection) = cli.projection {
        config.voxel.projection_type = projection;
    }
    if let Some(data_dir) = cli.data_dir {
        config.dataset.data_dir = data_dir;
    }
    if let Some(workers) = cli.workers {
        config.dataset.num_workers = workers;
    }
    if cli.seed.is_some() {
        config.dataset.seed = cli.seed;
    }

    // Dispatch to subcommands
    match cli.command {
        Commands::Inspect { scan, labels, csv, render, cell_px } => {
            cmd_inspect(&scan, labels.as_deref(), csv, render, cell_px, &config);
        }
        Commands::Voxelize { split, limit } => {
            cmd_voxelize(split, limit, &config);
        }
        Commands::Oracle { output_dir, split, limit } => {
            cmd_oracle(&output_dir, split, limit, &config);
        }
        Commands::Evaluate { predictions_dir, split, limit } => {
            cmd_evaluate(&predictions_dir, split, limit, &config);
        }
        Commands::InitConfig { output, force } => {
            cmd_init_config(&output, force, &config);
        }
    }
}

/// Load the label schema and its remap table, exiting on failure.
fn load_schema(config: &PipelineConfig) -> (LabelSchema, RemapTable) {
    let schema = match LabelSchema::from_yaml(&config.dataset.schema) {
        Ok(schema) => schema,
        Err(e) => {
            error!(
                "Failed to load label schema {}: {}",
                config.dataset.schema.display(),
                e
            );
            std::process::exit(1);
        }
    };
    match RemapTable::from_schema(&schema, config.voxel.ignore_label) {
        Ok(remap) => (schema, remap),
        Err(e) => {
            error!("Invalid label schema: {}", e);
            std::process::exit(1);
        }
    }
}

/// Open a dataset split, exiting on failure.
fn open_dataset(config: &PipelineConfig, split: Split, limit: Option<usize>) -> VoxelDataset {
    match VoxelDataset::open(config, split) {
        Ok(mut dataset) => {
            if let Some(limit) = limit {
                dataset.truncate(limit);
            }
            dataset
        }
        Err(e) => {
            error!("Failed to open {} split: {:#}", split, e);
            std::process::exit(1);
        }
    }
}

fn cmd_inspect(
    scan: &Path,
    labels: Option<&Path>,
    csv: Option<PathBuf>,
    render: Option<PathBuf>,
    cell_px: u32,
    config: &PipelineConfig,
) {
    let start = Instant::now();
    let (schema, remap) = load_schema(config);

    let voxelizer = match Voxelizer::new(config, remap.ignore_label()) {
        Ok(v) => v,
        Err(e) => {
            error!("Invalid voxel configuration: {}", e);
            std::process::exit(1);
        }
    };
    let loader = ScanLabelLoader::new(remap);

    let spinner = create_spinner("Voxelizing scan...");
    let sample = match voxelize_file(&voxelizer, &loader, scan, labels, config.dataset.seed) {
        Ok(sample) => sample,
        Err(e) => {
            spinner.finish_and_clear();
            error!("Failed to voxelize {}: {}", scan.display(), e);
            std::process::exit(1);
        }
    };
    spinner.finish_and_clear();

    let mut items = vec![
        ("Scan", scan.display().to_string()),
        ("Points", sample.len().to_string()),
        ("Projection", voxelizer.projection_type().to_string()),
        ("Grid size", format!("{:?}", voxelizer.grid_size())),
        ("Feature layout", format!("{:?}", sample.features.layout())),
        ("Occupied voxels", sample.occupied_voxels().to_string()),
    ];
    if let Some(bounds) = &sample.bounds {
        items.push(("Min volume", format!("{:.2?}", bounds.min_vol())));
        items.push(("Max volume", format!("{:.2?}", bounds.max_vol())));
    }
    if let Some(angle) = sample.augmentation.angle {
        items.push(("Rotation", format!("{:.1} deg", angle.to_degrees())));
    }

    if labels.is_some() {
        let mut matrix = ConfusionMatrix::new(loader.remap().num_classes(), sample.ignore_label);
        match matrix.add(&sample.voxel_label_per_point(), &sample.point_labels) {
            Ok(()) => items.push(("Voxel-label mIoU", percent(matrix.mean_iou()))),
            Err(e) => warn!("Could not score voxel labels: {}", e),
        }
    }

    if let Some(path) = csv {
        match writers::write_features_csv(&path, &sample) {
            Ok(()) => items.push(("Features CSV", path.display().to_string())),
            Err(e) => error!("Failed to write features: {}", e),
        }
    }

    if let Some(path) = render {
        let palette = LabelPalette::from_schema(&schema, loader.remap());
        match visualization::plot_voxel_bev(
            &path,
            &sample.voxel_labels,
            sample.ignore_label,
            &palette,
            cell_px,
        ) {
            Ok(()) => items.push(("Voxel view", path.display().to_string())),
            Err(e) => error!("Failed to render voxel view: {}", e),
        }

        // Sensor-frame scatter next to the BEV, colored by voxel label
        let scatter_path = path.with_file_name(format!(
            "{}_scan.png",
            path.file_stem().and_then(|s| s.to_str()).unwrap_or("render")
        ));
        let rendered = load_scan(scan).map_err(|e| e.to_string()).and_then(|raw| {
            visualization::plot_labeled_scan(
                &scatter_path,
                &raw.to_coords(),
                &sample.voxel_label_per_point(),
                sample.ignore_label,
                &palette,
                MAX_SCATTER_POINTS,
            )
            .map_err(|e| e.to_string())
        });
        match rendered {
            Ok(()) => items.push(("Scan view", scatter_path.display().to_string())),
            Err(e) => error!("Failed to render scan view: {}", e),
        }
    }

    items.push(("Duration", format!("{:.2?}", start.elapsed())));
    print_summary("Inspect Complete", &items);
}

fn cmd_voxelize(split: Split, limit: Option<usize>, config: &PipelineConfig) {
    let start = Instant::now();
    let dataset = open_dataset(config, split, limit);

    let pb = create_progress(dataset.len(), "Voxelizing");
    let results = dataset.par_map(|entry, sample| {
        pb.inc(1);
        match sample {
            Ok(sample) => Some((sample.len(), sample.occupied_voxels())),
            Err(e) => {
                error!(
                    "[{}/{}] Failed to voxelize: {}",
                    entry.sequence, entry.scan_id, e
                );
                None
            }
        }
    });
    pb.finish_and_clear();

    let results = match results {
        Ok(results) => results,
        Err(e) => {
            error!("Voxelization failed: {:#}", e);
            std::process::exit(1);
        }
    };

    let succeeded: Vec<(usize, usize)> = results.iter().flatten().copied().collect();
    let failed = results.len() - succeeded.len();
    let total_points: usize = succeeded.iter().map(|(p, _)| p).sum();
    let total_voxels: usize = succeeded.iter().map(|(_, v)| v).sum();
    let mean_voxels = if succeeded.is_empty() {
        0.0
    } else {
        total_voxels as f64 / succeeded.len() as f64
    };

    print_summary(
        "Voxelization Complete",
        &[
            ("Split", split.to_string()),
            ("Scans", dataset.len().to_string()),
            ("Failed", failed.to_string()),
            ("Points", total_points.to_string()),
            ("Mean occupied voxels", format!("{:.1}", mean_voxels)),
            ("Projection", dataset.voxelizer().projection_type().to_string()),
            ("Grid size", format!("{:?}", dataset.voxelizer().grid_size())),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );

    if failed > 0 {
        std::process::exit(1);
    }
}

fn cmd_oracle(output_dir: &Path, split: Split, limit: Option<usize>, config: &PipelineConfig) {
    let start = Instant::now();
    if !split.has_labels() {
        error!("The {} split has no labels to project", split);
        std::process::exit(1);
    }

    let dataset = open_dataset(config, split, limit);
    let remap = dataset.loader().remap();
    let num_classes = remap.num_classes();
    let ignore = remap.ignore_label();

    let pb = create_progress(dataset.len(), "Projecting voxel labels");
    let results = dataset.par_map(|entry, sample| {
        pb.inc(1);
        let sample = sample.map_err(|e| e.to_string())?;
        let predictions = sample.voxel_label_per_point();
        writers::write_predictions(output_dir, entry, &predictions, remap)
            .map_err(|e| e.to_string())?;

        let mut matrix = ConfusionMatrix::new(num_classes, ignore);
        matrix
            .add(&predictions, &sample.point_labels)
            .map_err(|e| e.to_string())?;
        Ok::<_, String>(matrix)
    });
    pb.finish_and_clear();

    let results = match results {
        Ok(results) => results,
        Err(e) => {
            error!("Oracle run failed: {:#}", e);
            std::process::exit(1);
        }
    };

    let mut total = ConfusionMatrix::new(num_classes, ignore);
    let mut failed = 0usize;
    for (entry, result) in dataset.index().entries().iter().zip(results) {
        match result.and_then(|m| total.merge(&m).map_err(|e| e.to_string())) {
            Ok(()) => {}
            Err(e) => {
                failed += 1;
                error!("[{}/{}] {}", entry.sequence, entry.scan_id, e);
            }
        }
    }

    print_summary(
        "Oracle Complete",
        &[
            ("Split", split.to_string()),
            ("Output directory", output_dir.display().to_string()),
            ("Scans written", (dataset.len() - failed).to_string()),
            ("Failed", failed.to_string()),
            ("Upper-bound mIoU", percent(total.mean_iou())),
            ("Point accuracy", percent(total.accuracy())),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );

    if failed > 0 {
        std::process::exit(1);
    }
}

fn cmd_evaluate(
    predictions_dir: &Path,
    split: Split,
    limit: Option<usize>,
    config: &PipelineConfig,
) {
    let start = Instant::now();
    if !split.has_labels() {
        error!("The {} split has no ground truth to score against", split);
        std::process::exit(1);
    }

    let (schema, remap) = load_schema(config);
    let mut index = match DatasetIndex::from_schema(&config.dataset.data_dir, &schema, split) {
        Ok(index) => index,
        Err(e) => {
            error!("Failed to index {} split: {}", split, e);
            std::process::exit(1);
        }
    };
    if let Some(limit) = limit {
        index.truncate(limit);
    }
    let loader = ScanLabelLoader::new(remap);

    let spinner = create_spinner(&format!("Scoring {} scans...", index.len()));
    let matrix = match evaluation::evaluate_predictions(&index, &loader, predictions_dir) {
        Ok(matrix) => matrix,
        Err(e) => {
            spinner.finish_and_clear();
            error!("Evaluation failed: {:#}", e);
            std::process::exit(1);
        }
    };
    spinner.finish_and_clear();

    let ignore = loader.remap().ignore_label();
    let names: Vec<String> = (0..matrix.num_classes())
        .map(|c| {
            schema
                .class_name(loader.remap(), c as u8)
                .map(str::to_string)
                .unwrap_or_else(|| format!("class {}", c))
        })
        .collect();
    let mut items: Vec<(&str, String)> = Vec::new();
    for (c, iou) in matrix.iou().into_iter().enumerate() {
        if c != ignore as usize {
            items.push((names[c].as_str(), percent(iou)));
        }
    }
    items.push(("mIoU", percent(matrix.mean_iou())));
    items.push(("Accuracy", percent(matrix.accuracy())));
    items.push(("Duration", format!("{:.2?}", start.elapsed())));

    print_summary(&format!("Evaluation ({} split)", split), &items);
}

fn cmd_init_config(output: &Path, force: bool, config: &PipelineConfig) {
    if output.exists() && !force {
        error!(
            "{} already exists (use --force to overwrite)",
            output.display()
        );
        std::process::exit(1);
    }

    match config.to_yaml(output) {
        Ok(()) => {
            print_summary(
                "Config Written",
                &[
                    ("Output", output.display().to_string()),
                    ("Projection", config.voxel.projection_type.to_string()),
                    ("Grid size", format!("{:?}", config.voxel.grid_size)),
                ],
            );
        }
        Err(e) => {
            error!("Failed to write config: {}", e);
            std::process::exit(1);
        }
    }
}
