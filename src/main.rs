use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;
use std::path::PathBuf;

use docs_builder::{BuildConfig, BuildStats, DocsBuilder};

#[derive(Parser)]
#[command(name = "docs-builder", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// More output (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the documentation site
    Build(BuildArgs),
    /// Remove the output directory and the build cache
    Clean(CleanArgs),
}

#[derive(Args)]
struct BuildArgs {
    /// Directory containing the .rst sources
    source: PathBuf,

    /// Output directory (defaults to SOURCE/output)
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long)]
    cache_dir: Option<PathBuf>,

    #[arg(long)]
    images_dir: Option<PathBuf>,

    /// Prefix of published image URLs
    #[arg(long)]
    images_public_prefix: Option<String>,

    /// Version substituted into API and documentation URLs
    #[arg(long = "version", value_name = "VERSION")]
    target_version: Option<String>,

    #[arg(long)]
    theme: Option<String>,

    /// Only build this subdirectory of SOURCE
    #[arg(long)]
    subdir: Option<String>,

    /// Glob of paths to skip; may be repeated
    #[arg(long = "exclude", value_name = "GLOB")]
    exclude: Vec<String>,

    /// Rebuild every document
    #[arg(long)]
    no_cache: bool,

    /// Do not write .json files
    #[arg(long)]
    no_json: bool,

    /// Number of parallel jobs
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Configuration file (defaults to docs-builder.{yaml,yml,toml} in SOURCE)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct CleanArgs {
    source: PathBuf,

    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Build(args) => {
            let stats = build(args).await?;
            print_summary(&stats);
            if stats.has_errors() {
                std::process::exit(1);
            }
        }
        Commands::Clean(args) => {
            let mut config = BuildConfig::new();
            config.set_content_dir(&args.source)?;
            if let Some(output) = &args.output {
                config.set_output_dir(output)?;
            }
            DocsBuilder::new(config)?.clean().await?;
        }
    }
    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, _) => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn load_config(args: &BuildArgs) -> Result<BuildConfig> {
    let file = args
        .config
        .clone()
        .or_else(|| BuildConfig::discover_file(&args.source));
    match file {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            BuildConfig::from_file(&path)
                .with_context(|| format!("Failed to load {}", path.display()))
        }
        None => Ok(BuildConfig::new()),
    }
}

async fn build(args: BuildArgs) -> Result<BuildStats> {
    let mut config = load_config(&args)?;

    config.set_content_dir(&args.source)?;
    if let Some(output) = &args.output {
        config.set_output_dir(output)?;
    }
    if let Some(cache_dir) = &args.cache_dir {
        config.set_cache_dir(cache_dir)?;
    }
    if let Some(images_dir) = &args.images_dir {
        config.set_images_dir(images_dir)?;
    }
    if let Some(prefix) = args.images_public_prefix {
        config.set_images_public_prefix(prefix);
    }
    if let Some(version) = args.target_version {
        config.set_version(version);
    }
    if let Some(theme) = args.theme {
        config.set_theme(theme);
    }
    if let Some(subdir) = &args.subdir {
        config.set_subdirectory_to_build(subdir);
    }
    if !args.exclude.is_empty() {
        config.set_excluded_paths(args.exclude);
    }
    if args.no_cache {
        config.disable_build_cache();
    }
    if args.no_json {
        config.disable_json_output();
    }
    if let Some(jobs) = args.jobs {
        config.set_parallel_jobs(jobs);
    }

    let builder = DocsBuilder::new(config)?;
    builder.build().await
}

fn print_summary(stats: &BuildStats) {
    for warning in &stats.warning_details {
        eprintln!("WARNING: {}", warning);
    }
    for error in &stats.error_details {
        eprintln!("ERROR: {}", error);
    }
    println!(
        "Built {} documents ({} unchanged, {} removed, {} images) in {:.2?}: {} warnings, {} errors",
        stats.files_processed,
        stats.files_skipped,
        stats.files_removed,
        stats.images_published,
        stats.build_time,
        stats.warnings,
        stats.errors
    );
}
