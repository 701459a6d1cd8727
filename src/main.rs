//! imgclass CLI
//!
//! Entry point for dataset statistics, inference, evaluation and saliency
//! maps over a trained residual classifier.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use imgclass::backend::{backend_name, select_device, DefaultBackend, TrainingBackend};
use imgclass::dataset::{ImageFolderDataset, Mode};
use imgclass::inference::{InferInput, InferenceRunner, DEFAULT_RESULTS_FILE};
use imgclass::model::checkpoint::{self, load_run_config, CONFIG_FILE};
use imgclass::model::SaliencyMapper;
use imgclass::utils::format_number;
use imgclass::utils::logging::{init_logging, LogConfig};
use imgclass::{create_dataloader, evaluation, Config, Metrics};

/// Folder-indexed image classification with Burn
#[derive(Parser, Debug)]
#[command(name = "imgclass")]
#[command(version)]
#[command(about = "Image classification pipeline: inference, evaluation and saliency maps", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, default_value = "false", conflicts_with = "verbose")]
    quiet: bool,

    /// Configuration file (defaults to the config.json of the logging directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show dataset statistics for one split
    Stats {
        /// Split to index (train, val, test)
        #[arg(short, long, default_value = "train")]
        mode: String,
    },

    /// Predict the top-k classes of a folder of images
    Infer {
        /// Logging directory holding the weights
        #[arg(short, long)]
        logs: PathBuf,

        /// Folder of images to predict
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory for the results file
        #[arg(short, long, default_value = "results")]
        output_dir: PathBuf,

        /// Results file name
        #[arg(short, long, default_value = DEFAULT_RESULTS_FILE)]
        filename: String,

        /// Plain softmax, without temperature scaling
        #[arg(long, default_value = "false")]
        no_temperature: bool,
    },

    /// Evaluate a trained model on a labeled split
    Evaluate {
        /// Logging directory holding the weights
        #[arg(short, long)]
        logs: PathBuf,

        /// Split to evaluate (train, val, test)
        #[arg(short, long, default_value = "test")]
        mode: String,

        /// Write the report as JSON
        #[arg(short, long)]
        report: Option<PathBuf>,

        /// Also print the confusion matrix
        #[arg(long, default_value = "false")]
        confusion: bool,
    },

    /// Grad-CAM heatmap of one image
    Saliency {
        /// Logging directory holding the weights
        #[arg(short, long)]
        logs: PathBuf,

        /// Image to explain
        #[arg(short, long)]
        image: PathBuf,

        /// Output image path
        #[arg(short, long, default_value = "saliency.png")]
        output: PathBuf,

        /// Class to explain (defaults to the predicted one)
        #[arg(long)]
        class: Option<String>,
    },

    /// Write freshly initialised weights and the config to a logging directory
    InitWeights {
        /// Logging directory to create
        #[arg(short, long)]
        logs: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::default()
    };

    let _ = init_logging(&log_config);

    print_banner();

    match cli.command {
        Commands::Stats { mode } => {
            let config = load_config(cli.config.as_deref(), None)?;
            cmd_stats(&config, &mode)?;
        }

        Commands::Infer {
            logs,
            input,
            output_dir,
            filename,
            no_temperature,
        } => {
            let mut config = load_config(cli.config.as_deref(), Some(&logs))?;
            if no_temperature {
                config.infer.temperature_scaling = false;
            }
            cmd_infer(config, &logs, &input, &output_dir, &filename)?;
        }

        Commands::Evaluate {
            logs,
            mode,
            report,
            confusion,
        } => {
            let config = load_config(cli.config.as_deref(), Some(&logs))?;
            cmd_evaluate(&config, &logs, &mode, report.as_deref(), confusion)?;
        }

        Commands::Saliency {
            logs,
            image,
            output,
            class,
        } => {
            let config = load_config(cli.config.as_deref(), Some(&logs))?;
            cmd_saliency(&config, &logs, &image, &output, class.as_deref())?;
        }

        Commands::InitWeights { logs } => {
            let config = load_config(cli.config.as_deref(), None)?;
            cmd_init_weights(&config, &logs)?;
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 +--------------------------------------------------------------+
 |   imgclass - image classification with Burn + Rust           |
 |   inference | evaluation | Grad-CAM saliency                  |
 +--------------------------------------------------------------+
  "#
        .green()
    );
}

/// `--config` when given, otherwise the configuration stored with the weights
fn load_config(path: Option<&Path>, logs: Option<&Path>) -> Result<Config> {
    match (path, logs) {
        (Some(path), _) => Config::load(path).with_context(|| format!("loading {:?}", path)),
        (None, Some(logs)) => load_run_config(logs)
            .with_context(|| format!("loading {:?}", logs.join(CONFIG_FILE))),
        (None, None) => bail!("this command needs --config"),
    }
}

fn cmd_stats(config: &Config, mode: &str) -> Result<()> {
    let mode: Mode = mode.parse()?;
    info!("Computing dataset statistics for the {} split", mode);

    let dataset = ImageFolderDataset::new(config, mode, config.data.use_background)?;
    let stats = dataset.stats();

    println!("{}", "Dataset Statistics:".cyan().bold());
    println!("  Split folder:      {:?}", dataset.split_dir());
    println!("  Total samples:     {}", format_number(stats.total));
    println!("  Number of classes: {}", config.num_classes());
    println!();

    println!("{}", "Class Distribution:".cyan().bold());
    for (name, count) in &stats.per_label {
        let pct = 100.0 * *count as f64 / stats.total.max(1) as f64;
        println!("  {:30} {:>8} ({:>5.1}%)", name, format_number(*count), pct);
    }

    if !stats.per_background.is_empty() {
        println!();
        println!("{}", "Background Distribution:".cyan().bold());
        for (name, count) in &stats.per_background {
            let pct = 100.0 * *count as f64 / stats.total.max(1) as f64;
            println!("  {:30} {:>8} ({:>5.1}%)", name, format_number(*count), pct);
        }
    }

    Ok(())
}

fn cmd_infer(config: Config, logs: &Path, input: &Path, output_dir: &Path, filename: &str) -> Result<()> {
    let device = select_device(config.device_selector()?)?;

    println!("{}", "Inference Configuration:".cyan().bold());
    println!("  Input:   {:?}", input);
    println!("  Weights: {:?}", logs);
    println!("  Backend: {}", backend_name());
    println!();

    let mut runner = InferenceRunner::<DefaultBackend>::new(config, logs, &device);
    let output = runner.run(InferInput::Path(input.to_path_buf()), output_dir, filename)?;

    for (path, ranked) in output.paths.iter().zip(&output.predictions).take(10) {
        let name = path.file_name().unwrap_or_default().to_string_lossy();
        let top: Vec<String> = ranked
            .iter()
            .map(|p| format!("{} ({:.1}%)", p.class_name, p.confidence * 100.0))
            .collect();
        println!("  {} {}", name.yellow(), top.join(", "));
    }
    if output.paths.len() > 10 {
        println!("  ... {} more", output.paths.len() - 10);
    }

    println!();
    println!(
        "{} {} images, results in {:?}",
        "Done:".green().bold(),
        format_number(output.paths.len()),
        output.file
    );
    Ok(())
}

fn cmd_evaluate(config: &Config, logs: &Path, mode: &str, report: Option<&Path>, confusion: bool) -> Result<()> {
    let mode: Mode = mode.parse()?;
    let device = select_device(config.device_selector()?)?;

    let model = checkpoint::load_weights::<DefaultBackend>(config, logs, &device)?;
    let mut loader = create_dataloader::<DefaultBackend>(config, mode, config.data.use_background, &device)?;
    let mut metrics = Metrics::<DefaultBackend>::new(config.metrics_config(), &device)?;

    let progress = ProgressBar::new(loader.num_batches() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches ({eta})")
            .map(|style| style.progress_chars("=>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let result = evaluation::evaluate_with_progress(&model, &mut loader, &mut metrics, |done, _| {
        progress.set_position(done as u64)
    })?;
    progress.finish_with_message("Evaluation completed");

    println!();
    println!("{}", format!("Evaluation on {}:", mode).cyan().bold());
    print!("{}", result);

    if confusion {
        println!();
        println!("{}", result.confusion.display(Some(config.data.labels.as_slice())));
    }

    if let Some(path) = report {
        result.save(path)?;
        println!("  Report saved to {:?}", path);
    }
    Ok(())
}

fn cmd_saliency(config: &Config, logs: &Path, image: &Path, output: &Path, class: Option<&str>) -> Result<()> {
    let device = select_device(config.device_selector()?)?;
    let labels = config.labels();
    let target = class.map(|name| labels.label_index(name)).transpose()?;

    let mapper = SaliencyMapper::<TrainingBackend>::from_run(config, logs, &device)?;
    let map = mapper.map_file(image, target)?;
    map.save_overlay(output)?;

    let name = labels.label_name(map.class_index).unwrap_or("?");
    println!("{}", "Saliency Map:".cyan().bold());
    println!("  Image:     {:?}", image);
    println!(
        "  Class:     {} ({:.1}%)",
        name.yellow(),
        map.probabilities[map.class_index] * 100.0
    );
    println!("  Overlay:   {:?}", output);
    Ok(())
}

fn cmd_init_weights(config: &Config, logs: &Path) -> Result<()> {
    if checkpoint::weights_path(logs, &config.model.name).exists() {
        bail!("{:?} already holds weights for '{}'", logs, config.model.name);
    }
    let device = select_device(config.device_selector()?)?;
    let model = checkpoint::build_model::<DefaultBackend>(config, &device);
    let path = checkpoint::save_run(config, &model, logs)?;

    println!(
        "{} {} parameters written to {:?}",
        "Initialised:".green().bold(),
        format_number(burn::module::Module::num_params(&model)),
        path
    );
    Ok(())
}
