use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use image::{DynamicImage, RgbImage};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use filmstrip::config::default_config_path;
use filmstrip::decode::{FfmpegSource, ScratchPool, VideoMetadataSource};
use filmstrip::export::print::{print_to_file, ScaleMode};
use filmstrip::state::indexer::index_directory;
use filmstrip::{
    Catalog, CatalogSource, FeedAdapter, FeedChange, FeedConfig, FeedListener, LibraryLoader, Raster, Renderer,
    Visual, WorkerPool,
};

#[derive(Parser)]
#[command(name = "filmstrip")]
#[command(version, about = "Chronological photo and video filmstrip over a local media catalog")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (JSON)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Import photos and videos under a directory into the catalog
    Index {
        /// Directory to import (defaults to the storage directory)
        dir: Option<PathBuf>,

        /// Drop catalog rows whose file is gone before importing
        #[arg(long)]
        prune: bool,
    },

    /// Load the feed and print it in display order
    List,

    /// Render every feed item and save it as a PNG
    Thumbs {
        /// Output directory
        #[arg(long)]
        out: PathBuf,

        /// Requested display width
        #[arg(long, default_value_t = 256, allow_negative_numbers = true)]
        width: i32,

        /// Requested display height
        #[arg(long, default_value_t = 256, allow_negative_numbers = true)]
        height: i32,
    },

    /// Render one feed item and print it to a single-page PDF
    Print {
        /// Position of the item in the feed
        #[arg(long)]
        index: usize,

        /// Output PDF file
        #[arg(long)]
        out: PathBuf,

        /// Show the whole image instead of filling the page
        #[arg(long)]
        fit: bool,
    },
}

/// Logs feed notifications
struct LogListener;

impl FeedListener for LogListener {
    fn on_feed_changed(&mut self, change: &FeedChange) {
        match change {
            FeedChange::Reset => info!("feed loaded"),
            FeedChange::Delta(report) => info!(
                updated = report.updated().len(),
                removed = report.removed().len(),
                "feed updated"
            ),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "filmstrip=debug" } else { "filmstrip=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = cli.config.unwrap_or_else(default_config_path);
    let mut config = FeedConfig::load(&config_path)
        .with_context(|| format!("cannot load config from {}", config_path.display()))?;
    config.apply_env();
    config.validate()?;

    // Make sure the catalog and its schema exist before anything reads it
    let db_path = config.database_path.clone();
    tokio::task::spawn_blocking(move || Catalog::open(db_path).map(drop)).await??;

    match cli.command {
        Commands::Index { dir, prune } => index(&config, dir, prune).await,
        Commands::List => list(&config).await,
        Commands::Thumbs { out, width, height } => thumbs(&config, &out, width, height).await,
        Commands::Print { index, out, fit } => print(&config, index, &out, fit).await,
    }
}

/// Import runs on a blocking thread with its own connection
async fn index(config: &FeedConfig, dir: Option<PathBuf>, prune: bool) -> Result<()> {
    let dir = dir.unwrap_or_else(|| config.storage_dir.clone());
    let db_path = config.database_path.clone();

    let result = tokio::task::spawn_blocking(move || {
        let catalog = Catalog::open(&db_path)?;
        if prune {
            catalog.prune_missing()?;
        }
        index_directory(&catalog, &dir)
    })
    .await??;

    println!(
        "imported {}, skipped {}, failed {}",
        result.imported, result.skipped, result.failed
    );
    Ok(())
}

fn build_feed(config: &FeedConfig) -> FeedAdapter<()> {
    let videos: Arc<dyn VideoMetadataSource> =
        Arc::new(FfmpegSource::new(&config.ffprobe_path, &config.ffmpeg_path));
    let loader = LibraryLoader::new(
        Arc::new(CatalogSource::new(&config.database_path)),
        Arc::clone(&videos),
        config.storage_prefix(),
    );
    let renderer = Renderer::new(
        Arc::new(ScratchPool::new(config.scratch_buffers)),
        videos,
        config.video_frame_time(),
    );
    let pool = WorkerPool::current(config.max_workers);

    let mut feed = FeedAdapter::new(Arc::new(loader), renderer, pool, config.default_decode_size);
    feed.set_listener(LogListener);
    feed
}

async fn load(config: &FeedConfig) -> FeedAdapter<()> {
    let mut feed = build_feed(config);
    feed.request_load();
    feed.settle().await;
    feed
}

fn placeholder() -> Raster {
    Arc::new(DynamicImage::ImageRgb8(RgbImage::new(1, 1)))
}

async fn list(config: &FeedConfig) -> Result<()> {
    let feed = load(config).await;
    for (index, record) in feed.iter().enumerate() {
        println!("{index:>5}  {record}");
    }
    println!("{} items", feed.item_count());
    Ok(())
}

async fn thumbs(config: &FeedConfig, out: &Path, width: i32, height: i32) -> Result<()> {
    std::fs::create_dir_all(out).with_context(|| format!("cannot create {}", out.display()))?;

    let mut feed = load(config).await;
    feed.suggest_size(width, height);

    let views: Vec<_> = (0..feed.item_count())
        .filter_map(|index| feed.render_view(index, placeholder()))
        .collect();
    feed.settle().await;

    let mut saved = 0;
    for view in &views {
        let Visual::Decoded(raster) = view.visual() else {
            warn!(id = view.record().id(), "no thumbnail");
            continue;
        };
        let path = out.join(format!("{}.png", view.record().id()));
        match raster.save(&path) {
            Ok(()) => saved += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "cannot save thumbnail"),
        }
    }

    println!("saved {saved} of {} thumbnails to {}", views.len(), out.display());
    Ok(())
}

async fn print(config: &FeedConfig, index: usize, out: &Path, fit: bool) -> Result<()> {
    let mut feed = load(config).await;
    let Some(view) = feed.render_view(index, placeholder()) else {
        bail!("no item at index {index} (feed has {})", feed.item_count());
    };
    feed.settle().await;

    let Visual::Decoded(raster) = view.visual() else {
        bail!("item {index} could not be decoded");
    };

    let mut job = config.print.job();
    if fit {
        job.mode = ScaleMode::Fit;
    }
    let out = out.to_path_buf();
    let raster = (*raster).clone();
    tokio::task::spawn_blocking(move || print_to_file(&out, raster, &job)).await??;
    Ok(())
}
