use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use edgesight::{
    decode, Annotator, AppConfig, HubProvider, ModelManager, Pipeline, RunRequest, RuntimeConfig,
};
use image::RgbImage;
use log::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML settings file. Missing keys keep their defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Force a fresh download of the model files
    #[arg(short, long, global = true)]
    fresh: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify an image, optionally detecting objects first
    Run(RunArgs),
    /// Classify an image with every configured classifier
    Compare(CompareArgs),
    /// List configured models and resolutions
    Models,
}

#[derive(Args)]
struct RunArgs {
    /// Image to analyze (jpg, jpeg or png)
    #[arg(short, long)]
    image: PathBuf,

    /// Classifier name, identifier or name prefix (e.g. "fast")
    #[arg(short, long)]
    model: Option<String>,

    /// Resolution label or edge length (e.g. 160)
    #[arg(short, long)]
    resolution: Option<String>,

    /// Run object detection before classifying
    #[arg(short, long)]
    detect: bool,

    /// Detection confidence threshold
    #[arg(short, long)]
    threshold: Option<f32>,

    /// Where to save the annotated detection image
    #[arg(long)]
    annotated_out: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct CompareArgs {
    /// Image to analyze (jpg, jpeg or png)
    #[arg(short, long)]
    image: PathBuf,

    /// Resolution label or edge length (e.g. 160)
    #[arg(short, long)]
    resolution: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => AppConfig::default(),
    };

    match cli.command {
        Command::Models => {
            list_models(&config);
            Ok(())
        }
        Command::Run(args) => run(config, cli.fresh, args).await,
        Command::Compare(args) => compare(config, cli.fresh, args).await,
    }
}

fn list_models(config: &AppConfig) {
    println!("Classifiers:");
    for model in &config.classifiers {
        println!("  {} ({}){}", model.name, model.identifier, mirror_note(config, &model.identifier));
    }
    println!("Detector:");
    println!(
        "  {} (threshold {}){}",
        config.detector,
        config.detection_threshold,
        mirror_note(config, &config.detector)
    );
    println!("Resolutions:");
    for resolution in &config.resolutions {
        println!("  {} -> {}", resolution.label, resolution.size);
    }
}

fn mirror_note(config: &AppConfig, identifier: &str) -> String {
    config
        .mirrors
        .get(identifier)
        .map(|repo| format!(" [ONNX from {}]", repo))
        .unwrap_or_default()
}

async fn run(config: AppConfig, fresh: bool, args: RunArgs) -> anyhow::Result<()> {
    // Reject unusable uploads before touching any model.
    let image = load_image(&args.image)?;
    let target_size = select_resolution(&config, args.resolution.as_deref())?;

    let model = match &args.model {
        Some(name) => config
            .find_classifier(name)
            .with_context(|| format!("Unknown model '{}'", name))?,
        None => config.default_classifier().context("No classifier configured")?,
    };

    let manager = build_manager(&config)?;
    ensure_models(&manager, &[model.identifier.as_str()], fresh).await?;
    if args.detect {
        ensure_models(&manager, &[config.detector.as_str()], fresh).await?;
    }

    let request = RunRequest {
        model: Some(model.identifier.clone()),
        target_size,
        detect: args.detect,
        threshold: args.threshold,
    };
    let pipeline = build_pipeline(manager, config)?;
    let report = pipeline.run(&image, &request)?;

    if let (Some(path), Some(detection)) = (&args.annotated_out, &report.detection) {
        detection
            .annotated_image
            .save(path)
            .with_context(|| format!("Failed to save annotated image to {}", path.display()))?;
        info!("Annotated image written to {}", path.display());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report);
    }
    Ok(())
}

async fn compare(config: AppConfig, fresh: bool, args: CompareArgs) -> anyhow::Result<()> {
    let image = load_image(&args.image)?;
    let target_size = match select_resolution(&config, args.resolution.as_deref())? {
        Some(size) => size,
        None => config.default_resolution().context("No resolution configured")?,
    };

    let manager = build_manager(&config)?;
    let identifiers: Vec<&str> = config.classifiers.iter().map(|m| m.identifier.as_str()).collect();
    ensure_models(&manager, &identifiers, fresh).await?;

    let pipeline = build_pipeline(manager, config)?;
    let entries = pipeline.compare(&image, target_size)?;

    println!("Comparison at {} x {}:", target_size, target_size);
    for entry in &entries {
        match entry.classification.best() {
            Some(best) => println!(
                "  {}: {} ({:.2}%) in {:.2} ms",
                entry.model_name,
                best.label,
                best.score * 100.0,
                entry.classification.inference_time_ms
            ),
            None => println!("  {}: no prediction", entry.model_name),
        }
    }
    Ok(())
}

fn load_image(path: &Path) -> anyhow::Result<RgbImage> {
    decode::decode_file(path).with_context(|| format!("Cannot use image {}", path.display()))
}

fn select_resolution(config: &AppConfig, selector: Option<&str>) -> anyhow::Result<Option<u32>> {
    match selector {
        None => Ok(None),
        Some(selector) => match config.resolution(selector) {
            Some(size) => Ok(Some(size)),
            None => bail!(
                "Unknown resolution '{}', expected one of: {}",
                selector,
                config
                    .resolutions
                    .iter()
                    .map(|r| r.size.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        },
    }
}

fn build_manager(config: &AppConfig) -> anyhow::Result<ModelManager> {
    let manager = match &config.cache_dir {
        Some(dir) => ModelManager::new(dir),
        None => ModelManager::new_default(),
    }
    .context("Failed to create model cache directory")?;
    Ok(manager.configured(config))
}

async fn ensure_models(manager: &ModelManager, identifiers: &[&str], fresh: bool) -> anyhow::Result<()> {
    for identifier in identifiers {
        if fresh {
            info!("Fresh download requested - removing any existing files for {}", identifier);
            manager.remove_download(identifier)?;
        }
        manager
            .ensure_model_downloaded(identifier)
            .await
            .with_context(|| format!("Model '{}' unavailable", identifier))?;
    }
    Ok(())
}

fn build_pipeline(manager: ModelManager, config: AppConfig) -> anyhow::Result<Pipeline<HubProvider>> {
    let annotator = Annotator::from_config(&config)?;
    let provider = HubProvider::new(manager, RuntimeConfig::from(&config.runtime));
    Ok(Pipeline::with_annotator(provider, config, annotator))
}
