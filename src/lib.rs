//! # image-optim
//!
//! A lossless raster-image optimization engine. Drives a portfolio of
//! external optimizer binaries (jpegoptim, jpegtran, pngcrush, optipng,
//! advpng, pngquant, gifsicle, svgo, cwebp) and, per image, keeps the
//! shortest output any of them produced.
//!
//! ## Architecture
//! - `format`: magic-byte image format sniffing
//! - `path`: temp-file allocation, attribute-preserving copy, atomic replace
//! - `resolver`: locates and version-probes optimizer binaries on disk
//! - `config`: option schema and global/local/inline layer composition
//! - `worker`: the uniform `Worker` trait and the built-in worker portfolio
//! - `handler`: the per-image double-buffer state machine
//! - `engine`: selects and runs workers for one image; the core public API
//! - `driver`: bounded-concurrency batch processing across many images
//! - `error`: the single `OptimizeError` type every public signature returns
//!
//! ## Usage
//! ```no_run
//! # async fn run() -> image_optim::error::Result<()> {
//! if let Some(result) = image_optim::optimize_image("photo.png").await? {
//!     println!("saved {} bytes", result.original_size - result.size().await?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod format;
pub mod handler;
pub mod path;
pub mod resolver;
pub mod utils;
pub mod worker;

pub use config::Config;
pub use driver::{CancelToken, ParallelDriver};
pub use engine::ImageOptim;
pub use error::{OptimizeError, Result};
pub use format::Format;
pub use path::{ImagePath, OptimizedPath};

use std::path::{Path, PathBuf};
use std::sync::Arc;

static DEFAULT_ENGINE: tokio::sync::OnceCell<Arc<ImageOptim>> = tokio::sync::OnceCell::const_new();

/// Lazily build (once per process) the engine backing the free-function
/// convenience API, using default configuration. Mirrors the resolver's own
/// singleton shape; there is deliberately no `reset` here since, unlike the
/// binary cache, rebuilding the engine mid-process has no legitimate use
/// outside tests, which should construct an `ImageOptim` directly instead.
async fn default_engine() -> Result<Arc<ImageOptim>> {
    let engine = DEFAULT_ENGINE
        .get_or_try_init(|| async { ImageOptim::new(&Config::default()).await.map(Arc::new) })
        .await?;
    Ok(engine.clone())
}

/// `optimize_image(path)`: run the default worker portfolio over `path`.
/// Never modifies the input; returns `None` if no worker produced a
/// strictly smaller, valid result.
pub async fn optimize_image(path: impl AsRef<Path>) -> Result<Option<OptimizedPath>> {
    default_engine().await?.optimize(path).await
}

/// `optimize_image_replace(path)`: as `optimize_image`, then atomically
/// overwrites `path` with the result.
pub async fn optimize_image_replace(path: impl AsRef<Path>) -> Result<Option<OptimizedPath>> {
    default_engine().await?.optimize_replace(path).await
}

/// `optimize_image_data(bytes)`: as `optimize_image`, operating on an
/// in-memory blob instead of a file on disk.
pub async fn optimize_image_data(bytes: &[u8]) -> Result<Option<Vec<u8>>> {
    default_engine().await?.optimize_data(bytes).await
}

/// `optimize_images(paths)`: batch variant of `optimize_image` with bounded
/// concurrency (pool size defaults to the available CPU count). Returns
/// `(path, result)` pairs in input order. For completion-order, per-result
/// callbacks, construct a `ParallelDriver` directly and call
/// `optimize_images_with`.
pub async fn optimize_images(paths: Vec<PathBuf>) -> Result<Vec<(PathBuf, Option<OptimizedPath>)>> {
    let engine = default_engine().await?;
    let driver = ParallelDriver::new(engine, num_cpus::get().max(1));
    Ok(driver.optimize_images(paths).await)
}

/// `optimize_images_replace(paths)`: batch variant of `optimize_image_replace`.
pub async fn optimize_images_replace(
    paths: Vec<PathBuf>,
) -> Result<Vec<(PathBuf, Option<OptimizedPath>)>> {
    let engine = default_engine().await?;
    let driver = ParallelDriver::new(engine, num_cpus::get().max(1));
    Ok(driver.optimize_images_replace(paths).await)
}

/// `optimize_images_data(blobs)`: batch variant of `optimize_image_data`.
/// Results are paired with the input's position in `blobs`.
pub async fn optimize_images_data(blobs: Vec<Vec<u8>>) -> Result<Vec<(usize, Option<Vec<u8>>)>> {
    let engine = default_engine().await?;
    let driver = ParallelDriver::new(engine, num_cpus::get().max(1));
    Ok(driver.optimize_images_data(blobs).await)
}
