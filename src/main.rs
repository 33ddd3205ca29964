//! # CLI entry point
//!
//! A thin `clap`-derived consumer of the library's public API: resolve the
//! worker portfolio once, then run `optimize`/`optimize_replace` over the
//! given paths and print a one-line summary per file. Flag parsing,
//! config-file loading, and progress UI are deliberately minimal here; the
//! batch CLI with its full flag surface is out of scope.

use anyhow::{Context, Result};
use clap::Parser;
use image_optim::{Config, ImageOptim, ParallelDriver};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "image-optim")]
#[command(about = "Lossless raster image optimization")]
struct Args {
    /// Image files to optimize.
    paths: Vec<PathBuf>,

    /// Replace each input in place instead of leaving it untouched.
    #[arg(long)]
    replace: bool,

    /// Number of images to process concurrently (default: available CPUs).
    #[arg(short, long)]
    workers: Option<usize>,

    /// Report what would be done without writing anything.
    #[arg(long)]
    dry_run: bool,

    /// Verbose (debug-level) logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("warning: logging was already initialized");
    }

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    if args.paths.is_empty() {
        anyhow::bail!("no input paths given");
    }

    let mut config = Config::default();
    if let Some(workers) = args.workers {
        config.pool_size = workers;
    }

    let engine = ImageOptim::new(&config)
        .await
        .context("failed to initialize the worker portfolio")?;
    info!("resolved {} worker(s)", engine.worker_count());

    let driver = ParallelDriver::new(Arc::new(engine), config.pool_size);

    let results = if args.dry_run {
        driver.optimize_images(args.paths).await
    } else if args.replace {
        driver.optimize_images_replace(args.paths).await
    } else {
        driver.optimize_images(args.paths).await
    };

    for (path, result) in results {
        match result {
            Some(optimized) => {
                let after = optimized.size().await.unwrap_or(optimized.original_size);
                println!(
                    "{}: {} -> {} bytes",
                    path.display(),
                    optimized.original_size,
                    after
                );
            }
            None => {
                println!("{}: no improvement", path.display());
            }
        }
    }
    // Images that simply couldn't be optimized still count as success;
    // only a construction-time configuration error reaches this far as `Err`.
    Ok(ExitCode::SUCCESS)
}
