//! # Per-Image Optimization State Machine
//!
//! `Handler` alternates between (at most) two temp files while a sequence of
//! workers runs against one image, tracking the most recent successful
//! result and releasing every temp file it owns on `cleanup`.

use crate::error::Result;
use crate::path::ImagePath;

/// Per-image state. `dst` is lazily allocated on the first `process` call and
/// whenever the previous one was consumed by a success; `result` is the
/// most recent temp file whose bytes are a successful optimization, and is
/// never equal to the current `dst`.
pub struct Handler {
    original: ImagePath,
    src: ImagePath,
    dst: Option<ImagePath>,
    result: Option<ImagePath>,
    /// Every temp file this handler has ever allocated, for cleanup.
    owned: Vec<ImagePath>,
}

impl Handler {
    pub fn new(original: ImagePath) -> Self {
        Self {
            src: original.clone(),
            original,
            dst: None,
            result: None,
            owned: Vec::new(),
        }
    }

    /// Run one worker. Ensures `dst` is allocated, invokes `worker_fn(src,
    /// dst)`, and on success advances the state:
    /// - first success (`src == original`): `src` becomes the just-written
    ///   `dst`, and a fresh `dst` will be allocated next call.
    /// - subsequent success: `src` and `dst` swap, so the worker that ran
    ///   before last writes into the buffer that is about to be overwritten.
    ///
    /// A failed call leaves `src`/`result` untouched and keeps `dst`
    /// allocated for reuse by the next worker.
    pub async fn process<F, Fut>(&mut self, worker_fn: F) -> Result<()>
    where
        F: FnOnce(std::path::PathBuf, std::path::PathBuf) -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        if self.dst.is_none() {
            let fresh = self.original.temp_path()?;
            self.owned.push(fresh.clone());
            self.dst = Some(fresh);
        }
        let dst = self.dst.clone().expect("just allocated above");

        let succeeded = worker_fn(self.src.path().to_path_buf(), dst.path().to_path_buf()).await;
        if !succeeded {
            return Ok(());
        }

        self.result = Some(dst.clone());
        if self.src == self.original {
            self.src = dst;
            self.dst = None;
        } else {
            std::mem::swap(&mut self.src, self.dst.as_mut().expect("dst is Some"));
        }
        Ok(())
    }

    /// The latest successful result, if any.
    pub fn result(&self) -> Option<&ImagePath> {
        self.result.as_ref()
    }

    /// Unlink every owned temp file except `result`, which is left for the
    /// caller to consume or rename. Idempotent and safe to call even if no
    /// worker ever ran.
    pub async fn cleanup(&mut self) -> Result<()> {
        for temp in self.owned.drain(..) {
            if self.result.as_ref() != Some(&temp) {
                temp.unlink().await?;
            }
        }
        Ok(())
    }
}
