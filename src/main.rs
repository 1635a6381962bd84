use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use sweeprs::config::AppConfig;
use sweeprs::{
    AnalysisCacheManager, BestShotSelector, BlurDetectionConfig, BlurDetector, Manifest,
    ManifestExtractor, PhotoFilteringService, PhotoGroup, PhotoGrouper, ProgressFn,
    QualityScorer, ScanSettings,
};

#[derive(Parser, Debug)]
#[command(name = "sweeprs", version, about = "Group similar photos and pick the best shot")]
struct Cli {
    /// Config file (default: `<data dir>/Sweeprs/config.json`)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Group the assets listed in a manifest
    Group {
        /// JSON manifest of assets and their precomputed measurements
        #[arg(short, long, value_name = "FILE")]
        manifest: PathBuf,
        /// Print groups as JSON
        #[arg(long)]
        json: bool,
        /// Skip best shot selection
        #[arg(long)]
        no_best_shot: bool,
        /// Override the similarity threshold (0-1)
        #[arg(long, value_name = "X")]
        threshold: Option<f32>,
        /// Do not read or write the analysis cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Show what the scan settings would exclude
    Filter {
        #[arg(short, long, value_name = "FILE")]
        manifest: PathBuf,
        #[arg(long)]
        no_videos: bool,
        #[arg(long)]
        no_screenshots: bool,
        #[arg(long)]
        no_selfies: bool,
    },

    /// Inspect or maintain the analysis cache
    Cache {
        #[command(subcommand)]
        command: CacheCmd,
    },

    /// Show or create the config file
    Config {
        #[command(subcommand)]
        command: ConfigCmd,
    },
}

#[derive(Subcommand, Debug)]
enum CacheCmd {
    /// Entry counts and age range
    Stats,
    /// Remove entries older than N days
    Prune {
        /// Defaults to `cache_ttl_days` from the config
        #[arg(long)]
        days: Option<i64>,
    },
    /// Remove every entry
    Clear,
    /// Remove one photo's entry
    Remove { photo_id: String },
}

#[derive(Subcommand, Debug)]
enum ConfigCmd {
    /// Print the effective config
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config_path = match cli.config {
        Some(path) => path,
        None => AppConfig::default_path()?,
    };
    let config = AppConfig::load(&config_path)?;

    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(config.parallel_workers)
        .build_global()
    {
        log::debug!("Using existing rayon pool: {}", e);
    }

    match cli.command {
        Commands::Group {
            manifest,
            json,
            no_best_shot,
            threshold,
            no_cache,
        } => run_group(&config, &manifest, json, no_best_shot, threshold, no_cache).await?,

        Commands::Filter {
            manifest,
            no_videos,
            no_screenshots,
            no_selfies,
        } => {
            let manifest = read_manifest(&manifest)?;
            let settings = ScanSettings {
                include_videos: config.scan.include_videos && !no_videos,
                include_screenshots: config.scan.include_screenshots && !no_screenshots,
                include_selfies: config.scan.include_selfies && !no_selfies,
            };
            let service = PhotoFilteringService::new();
            if let Some(error) = service.validate_settings(&settings) {
                return Err(error.into());
            }
            let (_, stats) = service.filter_with_stats(&manifest.descriptors(), &settings);
            println!("Original:    {}", stats.original_count);
            println!("Kept:        {}", stats.filtered_count);
            println!("Videos:      -{}", stats.excluded_video_count);
            println!("Screenshots: -{}", stats.excluded_screenshot_count);
            println!("Selfies:     -{}", stats.excluded_selfie_count);
            println!("Rate:        {:.1}%", stats.filtering_rate * 100.0);
        }

        Commands::Cache { command } => {
            let cache = open_cache(&config)?;
            match command {
                CacheCmd::Stats => {
                    let stats = cache.stats()?;
                    println!("Entries:      {}", stats.entries);
                    println!("With blur:    {}", stats.with_blur);
                    println!("With faces:   {}", stats.with_faces);
                    println!("With quality: {}", stats.with_quality);
                    if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
                        println!("Oldest:       {}", oldest.to_rfc3339());
                        println!("Newest:       {}", newest.to_rfc3339());
                    }
                }
                CacheCmd::Prune { days } => {
                    let days = days.unwrap_or(config.cache_ttl_days);
                    let removed = cache.prune_older_than(days)?;
                    cache.flush()?;
                    println!(
                        "Removed {} entr{} older than {} days.",
                        removed,
                        plural_y(removed),
                        days
                    );
                }
                CacheCmd::Clear => {
                    let count = cache.size()?;
                    cache.clear()?;
                    cache.flush()?;
                    println!("Cleared {} entr{}.", count, plural_y(count));
                }
                CacheCmd::Remove { photo_id } => {
                    cache.remove(&photo_id)?;
                    cache.flush()?;
                    println!("Removed {}.", photo_id);
                }
            }
        }

        Commands::Config { command } => match command {
            ConfigCmd::Show => {
                println!("# {}", config_path.display());
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            ConfigCmd::Init { force } => {
                if config_path.exists() && !force {
                    println!(
                        "Config already exists at {} (use --force to overwrite)",
                        config_path.display()
                    );
                } else {
                    AppConfig::default().save(&config_path)?;
                    println!("Wrote default config to {}", config_path.display());
                }
            }
        },
    }

    Ok(())
}

async fn run_group(
    config: &AppConfig,
    manifest_path: &Path,
    json: bool,
    no_best_shot: bool,
    threshold: Option<f32>,
    no_cache: bool,
) -> Result<()> {
    let manifest = read_manifest(manifest_path)?;
    let (assets, warning) = PhotoFilteringService::new()
        .filter_with_validation(&manifest.descriptors(), &config.scan)?;
    if warning.is_some() {
        println!("Nothing to group after applying scan settings.");
        return Ok(());
    }

    let mut options = config.grouping.clone();
    if let Some(threshold) = threshold {
        options.similarity_threshold = threshold;
    }
    if no_best_shot {
        options.auto_select_best_shot = false;
    }

    let mut grouper = PhotoGrouper::new(Arc::new(ManifestExtractor::new(&manifest)))
        .with_blur_detector(BlurDetector::new(BlurDetectionConfig::preset(config.blur_preset)))
        .with_selector(BestShotSelector::new(QualityScorer::with_preset(config.quality_preset)));
    if config.cache_enabled && !no_cache {
        grouper = grouper.with_cache(Arc::new(open_cache(config)?));
    }

    let token = grouper.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupt received, stopping after the current batch");
            token.cancel();
        }
    });

    let bar = ProgressBar::new(1000);
    bar.set_style(ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent}%",
    )?);
    let bar_handle = bar.clone();
    let progress: Box<ProgressFn> =
        Box::new(move |p| bar_handle.set_position((p * 1000.0).round() as u64));

    let start = Instant::now();
    let result = grouper
        .run_with_summary(&assets, &options, Some(progress.as_ref()))
        .await;
    bar.finish_and_clear();
    let (groups, summary) = result.context("Grouping did not complete")?;

    if json {
        let output = serde_json::json!({ "groups": groups, "summary": summary });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if groups.is_empty() {
        println!("No groups found.");
    } else {
        println!("Found {} group(s):", groups.len());
        for (i, group) in groups.iter().enumerate() {
            print_group(i, group);
        }
    }
    println!(
        "{} of {} assets grouped, {} reclaimable ({:.2?})",
        summary.grouped_photo_count,
        summary.total_assets,
        format_bytes(summary.reclaimable_bytes),
        start.elapsed()
    );
    Ok(())
}

fn read_manifest(path: &Path) -> Result<Manifest> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    Manifest::from_json(&raw)
        .with_context(|| format!("Failed to parse manifest {}", path.display()))
}

fn open_cache(config: &AppConfig) -> Result<AnalysisCacheManager> {
    let path = config.resolved_cache_path()?;
    log::debug!("Opening {:?} cache at {}", config.cache_backend, path.display());
    AnalysisCacheManager::open(config.cache_backend, &path)
        .with_context(|| format!("Failed to open cache at {}", path.display()))
}

fn print_group(index: usize, group: &PhotoGroup) {
    println!(" Group {} ({}, {}):", index + 1, group.group_type, format_bytes(group.total_size()));
    for (i, id) in group.photo_ids.iter().enumerate() {
        let marker = if group.best_shot_index == Some(i) { "★" } else { "▶" };
        println!("   {} {}", marker, id);
    }
}

fn plural_y(count: usize) -> &'static str {
    if count == 1 { "y" } else { "ies" }
}

fn format_bytes(bytes: i64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes.max(0) as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes.max(0), UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
