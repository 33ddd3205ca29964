//! # Parallel Driver
//!
//! A bounded worker pool that applies `ImageOptim` to a sequence of inputs.
//! Concurrency is image-parallel: each image's own worker pipeline still
//! runs strictly sequentially inside the engine.
//!
//! Batch operations with an optional per-completion callback don't map
//! cleanly onto a single Rust signature, so each batch operation is split
//! into a plain variant (returns `(input, result)` pairs in input order)
//! and a `_with` variant (invokes a callback per completion, in completion
//! order, and returns its return values); see DESIGN.md for this naming
//! decision.

use crate::engine::ImageOptim;
use crate::error::{OptimizeError, Result};
use crate::path::OptimizedPath;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cooperative cancellation flag shared between a driver and whoever holds
/// a clone of it. Checked between images, never mid-optimization.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Applies an `ImageOptim` across many inputs with bounded concurrency.
pub struct ParallelDriver {
    engine: Arc<ImageOptim>,
    pool_size: usize,
    cancel: CancelToken,
}

impl ParallelDriver {
    pub fn new(engine: Arc<ImageOptim>, pool_size: usize) -> Self {
        Self {
            engine,
            pool_size: pool_size.max(1),
            cancel: CancelToken::new(),
        }
    }

    /// A handle the caller can use to request cancellation from elsewhere
    /// (a signal handler, a UI cancel button) while a batch is in flight.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// `optimize_images(paths)`: runs `optimize` over every path with bounded
    /// concurrency and returns `(path, result)` pairs in input order.
    pub async fn optimize_images(&self, paths: Vec<PathBuf>) -> Vec<(PathBuf, Option<OptimizedPath>)> {
        let mut indexed = self.run_indexed(paths, |engine, path| {
            let path = path.clone();
            async move { engine.optimize(&path).await }
        })
        .await;
        indexed.sort_by_key(|(idx, _, _)| *idx);
        indexed
            .into_iter()
            .map(|(_, path, result)| (path, result.ok().flatten()))
            .collect()
    }

    /// `optimize_images(paths, fn)`: invokes `callback(path, result)` once
    /// per completed input, in completion order (not input order; see
    /// DESIGN.md for why completion order was chosen), and returns the
    /// collected callback return values in that same order.
    pub async fn optimize_images_with<F, T>(&self, paths: Vec<PathBuf>, callback: F) -> Vec<T>
    where
        F: Fn(PathBuf, Option<OptimizedPath>) -> T + Send + Sync + 'static,
        T: Send + 'static,
    {
        let callback = Arc::new(callback);
        self.run_with_callback(paths, callback, |engine, path| {
            let path = path.clone();
            async move { engine.optimize(&path).await }
        })
        .await
    }

    /// `optimize_images_replace(paths)`: as `optimize_images`, but each
    /// successful result has already been written back to its original path
    /// (via `optimize_replace`).
    pub async fn optimize_images_replace(
        &self,
        paths: Vec<PathBuf>,
    ) -> Vec<(PathBuf, Option<OptimizedPath>)> {
        let mut indexed = self.run_indexed(paths, |engine, path| {
            let path = path.clone();
            async move { engine.optimize_replace(&path).await }
        })
        .await;
        indexed.sort_by_key(|(idx, _, _)| *idx);
        indexed
            .into_iter()
            .map(|(_, path, result)| (path, result.ok().flatten()))
            .collect()
    }

    pub async fn optimize_images_replace_with<F, T>(&self, paths: Vec<PathBuf>, callback: F) -> Vec<T>
    where
        F: Fn(PathBuf, Option<OptimizedPath>) -> T + Send + Sync + 'static,
        T: Send + 'static,
    {
        let callback = Arc::new(callback);
        self.run_with_callback(paths, callback, |engine, path| {
            let path = path.clone();
            async move { engine.optimize_replace(&path).await }
        })
        .await
    }

    /// `optimize_images_data(blobs)`: as `optimize_images`, but operating on
    /// in-memory byte blobs instead of paths.
    pub async fn optimize_images_data(&self, blobs: Vec<Vec<u8>>) -> Vec<(usize, Option<Vec<u8>>)> {
        let mut indexed = self.run_indexed(blobs, |engine, blob| {
            let blob = blob.clone();
            async move { engine.optimize_data(&blob).await }
        })
        .await;
        indexed.sort_by_key(|(idx, _, _)| *idx);
        indexed
            .into_iter()
            .map(|(idx, _blob, result)| (idx, result.ok().flatten()))
            .collect()
    }

    pub async fn optimize_images_data_with<F, T>(&self, blobs: Vec<Vec<u8>>, callback: F) -> Vec<T>
    where
        F: Fn(usize, Option<Vec<u8>>) -> T + Send + Sync + 'static,
        T: Send + 'static,
    {
        let indexed: Vec<(usize, Vec<u8>)> = blobs.into_iter().enumerate().collect();
        let adapted = Arc::new(move |item: (usize, Vec<u8>), result: Option<Vec<u8>>| {
            callback(item.0, result)
        });
        self.run_with_callback(indexed, adapted, |engine, (_idx, blob)| {
            let blob = blob.clone();
            async move { engine.optimize_data(&blob).await }
        })
        .await
    }

    /// Shared bounded-concurrency runner for the plain (input-order) batch
    /// variants. Returns `(original_index, input, result)` in whatever order
    /// each future completes; callers re-sort by index to restore input
    /// order. Backpressure comes for free from `buffer_unordered`, which
    /// only polls `pool_size` underlying futures at a time rather than
    /// draining `inputs` eagerly.
    async fn run_indexed<I, R, Op, Fut>(
        &self,
        inputs: Vec<I>,
        op: Op,
    ) -> Vec<(usize, I, Result<Option<R>>)>
    where
        I: Clone + Send + 'static,
        R: Send + 'static,
        Op: Fn(Arc<ImageOptim>, &I) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Option<R>>> + Send,
    {
        let op = Arc::new(op);
        let engine = self.engine.clone();
        let cancel = self.cancel.clone();

        stream::iter(inputs.into_iter().enumerate())
            .map(move |(idx, input)| {
                let op = op.clone();
                let engine = engine.clone();
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return (idx, input, Err(OptimizeError::Cancelled));
                    }
                    let result = op(engine, &input).await;
                    (idx, input, result)
                }
            })
            .buffer_unordered(self.pool_size)
            .collect()
            .await
    }

    /// Shared bounded-concurrency runner for the `_with` (completion-order,
    /// callback-driven) batch variants.
    async fn run_with_callback<I, R, Op, Fut, F, T>(
        &self,
        inputs: Vec<I>,
        callback: Arc<F>,
        op: Op,
    ) -> Vec<T>
    where
        I: Clone + Send + 'static,
        R: Send + 'static,
        Op: Fn(Arc<ImageOptim>, &I) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Option<R>>> + Send,
        F: Fn(I, Option<R>) -> T + Send + Sync + 'static,
        T: Send + 'static,
    {
        let op = Arc::new(op);
        let engine = self.engine.clone();
        let cancel = self.cancel.clone();

        stream::iter(inputs.into_iter())
            .map(move |input| {
                let op = op.clone();
                let engine = engine.clone();
                let cancel = cancel.clone();
                let callback = callback.clone();
                async move {
                    if cancel.is_cancelled() {
                        return callback(input, None);
                    }
                    let result = op(engine, &input).await.ok().flatten();
                    callback(input, result)
                }
            })
            .buffer_unordered(self.pool_size)
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Format;
    use crate::worker::{Registry, Worker};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    struct ShrinkOnceWorker {
        formats: HashSet<Format>,
    }

    #[async_trait]
    impl Worker for ShrinkOnceWorker {
        fn bin_sym(&self) -> &'static str {
            "shrink-once-test-worker"
        }
        fn image_formats(&self) -> &HashSet<Format> {
            &self.formats
        }
        fn run_order(&self) -> i32 {
            10
        }
        fn used_bins(&self) -> &HashSet<&'static str> {
            static EMPTY: std::sync::OnceLock<HashSet<&str>> = std::sync::OnceLock::new();
            EMPTY.get_or_init(HashSet::new)
        }
        fn options(&self) -> &crate::config::WorkerOptions {
            static EMPTY: std::sync::OnceLock<crate::config::WorkerOptions> = std::sync::OnceLock::new();
            EMPTY.get_or_init(crate::config::WorkerOptions::new)
        }
        async fn optimize(&self, src: &Path, dst: &Path) -> bool {
            let Ok(bytes) = tokio::fs::read(src).await else {
                return false;
            };
            if bytes.len() < 2 {
                return false;
            }
            tokio::fs::write(dst, &bytes[..bytes.len() - 1]).await.is_ok()
        }
    }

    fn png_bytes(len: usize) -> Vec<u8> {
        let mut bytes = vec![0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
        bytes.resize(len.max(bytes.len()), 0x42);
        bytes
    }

    async fn test_driver() -> ParallelDriver {
        let worker: Arc<dyn Worker> = Arc::new(ShrinkOnceWorker {
            formats: [Format::Png].into_iter().collect(),
        });
        let registry = Registry::from_workers_for_test(vec![worker]);
        let engine = ImageOptim::from_registry_for_test(registry);
        ParallelDriver::new(Arc::new(engine), 4)
    }

    #[tokio::test]
    async fn optimize_images_preserves_input_order() {
        let dir = TempDir::new().unwrap();
        let mut paths = Vec::new();
        for i in 0..5 {
            let path = dir.path().join(format!("{i}.png"));
            tokio::fs::write(&path, png_bytes(32)).await.unwrap();
            paths.push(path);
        }

        let driver = test_driver().await;
        let results = driver.optimize_images(paths.clone()).await;
        assert_eq!(results.len(), paths.len());
        for (expected, (actual_path, result)) in paths.iter().zip(results.iter()) {
            assert_eq!(expected, actual_path);
            assert!(result.is_some());
        }
    }

    #[tokio::test]
    async fn optimize_images_with_invokes_callback_once_per_input() {
        let dir = TempDir::new().unwrap();
        let mut paths = Vec::new();
        for i in 0..6 {
            let path = dir.path().join(format!("{i}.png"));
            tokio::fs::write(&path, png_bytes(32)).await.unwrap();
            paths.push(path);
        }

        let driver = test_driver().await;
        let call_count = Arc::new(AtomicUsize::new(0));
        let counter = call_count.clone();
        let outcomes = driver
            .optimize_images_with(paths.clone(), move |_path, result| {
                counter.fetch_add(1, Ordering::SeqCst);
                result.is_some()
            })
            .await;

        assert_eq!(call_count.load(Ordering::SeqCst), paths.len());
        assert_eq!(outcomes.len(), paths.len());
        assert!(outcomes.iter().all(|ok| *ok));
    }

    #[tokio::test]
    async fn cancelled_driver_skips_unstarted_work() {
        let driver = test_driver().await;
        driver.cancel_token().cancel();

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.png");
        tokio::fs::write(&path, png_bytes(32)).await.unwrap();

        let results = driver.optimize_images(vec![path]).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].1.is_none());
    }
}
