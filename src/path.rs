//! # Path Utilities
//!
//! `ImagePath` is an immutable reference to a location on disk (the
//! underlying file may change; the path value itself does not). It centralizes
//! the three filesystem primitives the rest of the engine needs: fresh
//! collision-free temp-file allocation next to a target, attribute-preserving
//! copy, and atomic in-place replacement.
//!
//! `OptimizedPath` pairs a result `ImagePath` with the size it started from,
//! matching the public API's return type: `original_size` is frozen at
//! construction so callers can report savings even after the original has
//! been overwritten.

use crate::error::{OptimizeError, Result};
use crate::format::{format_of, Format};
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;

/// An absolute filesystem path to an image, with lazily-probed, cached format.
#[derive(Debug, Clone)]
pub struct ImagePath {
    path: PathBuf,
    format: std::sync::Arc<OnceCell<Option<Format>>>,
}

impl ImagePath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            format: std::sync::Arc::new(OnceCell::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lazy, cached format probe. Subsequent calls reuse the first result even
    /// if the underlying file has since changed; callers that mutate a file
    /// in place and need a fresh probe should construct a new `ImagePath`.
    pub async fn format(&self) -> Option<Format> {
        *self
            .format
            .get_or_init(|| async { format_of(&self.path).await })
            .await
    }

    pub async fn size(&self) -> Result<u64> {
        Ok(tokio::fs::metadata(&self.path).await?.len())
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::metadata(&self.path).await.is_ok()
    }

    /// Allocate a fresh, not-yet-occupied sibling path (same directory, same
    /// extension as `self`) suitable for a worker to write into. Collision
    /// safety is delegated to `tempfile`'s atomic create-exclusive allocation,
    /// so concurrent allocators targeting the same directory never observe
    /// each other's names.
    pub fn temp_path(&self) -> Result<ImagePath> {
        self.temp_path_in(self.path.parent().unwrap_or_else(|| Path::new(".")))
    }

    pub fn temp_path_in(&self, dir: &Path) -> Result<ImagePath> {
        let ext = self.path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let stem = self
            .path
            .file_stem()
            .and_then(|e| e.to_str())
            .unwrap_or("image-optim");
        let suffix = if ext.is_empty() {
            String::new()
        } else {
            format!(".{ext}")
        };
        let named = tempfile::Builder::new()
            .prefix(&format!(".image-optim-{stem}-"))
            .suffix(&suffix)
            .tempfile_in(dir)?;
        // Keep the reserved, now-empty file on disk; the caller (the Handler)
        // owns it from here and is responsible for unlinking it on cleanup.
        let path = named.into_temp_path().keep().map_err(|e| e.error)?;
        Ok(ImagePath::new(path))
    }

    /// Copy bytes and, best-effort, attributes (mode, mtime) to `dst`. Not
    /// atomic: a reader of `dst` mid-copy may observe a partial file.
    pub async fn copy(&self, dst: &ImagePath) -> Result<()> {
        tokio::fs::copy(&self.path, &dst.path).await?;
        if let Ok(src_meta) = tokio::fs::metadata(&self.path).await {
            if let Ok(mtime) = src_meta.modified() {
                let ft = filetime::FileTime::from_system_time(mtime);
                let dst_path = dst.path.clone();
                let _ = tokio::task::spawn_blocking(move || filetime::set_file_mtime(&dst_path, ft))
                    .await;
            }
        }
        Ok(())
    }

    /// Atomically replace `target`'s contents with `self`'s bytes, preserving
    /// `target`'s directory, ownership and mode where the OS allows.
    ///
    /// Implementation: (a) materialize a temp file in `target`'s directory
    /// initialized from `target` (so it inherits `target`'s attributes), (b)
    /// overwrite the temp's contents with `self`'s bytes without touching the
    /// attributes set in step (a), (c) rename temp over `target`. Because the
    /// temp file is created in `target`'s own directory, the final rename is
    /// always same-filesystem and therefore atomic.
    pub async fn replace(&self, target: &ImagePath) -> Result<()> {
        let dir = target.path.parent().unwrap_or_else(|| Path::new("."));
        let staging = tempfile::Builder::new()
            .prefix(".image-optim-replace-")
            .tempfile_in(dir)?;
        let staging_path = staging.path().to_path_buf();
        drop(staging);

        tokio::fs::copy(&target.path, &staging_path).await?;
        let bytes = tokio::fs::read(&self.path).await?;
        tokio::fs::write(&staging_path, &bytes).await?;

        match tokio::fs::rename(&staging_path, &target.path).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = tokio::fs::remove_file(&staging_path).await;
                Err(OptimizeError::Io(e))
            }
        }
    }

    /// Remove the file this path points at, ignoring "already gone".
    pub async fn unlink(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OptimizeError::Io(e)),
        }
    }
}

impl PartialEq for ImagePath {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

/// A file path annotated with its pre-optimization size and a reference to
/// the path it was optimized from. Invariant: `size() <= original_size`,
/// enforced by construction; the engine never builds one where they're
/// equal (see `engine::ImageOptim::optimize`).
#[derive(Debug, Clone)]
pub struct OptimizedPath {
    pub path: ImagePath,
    pub original: PathBuf,
    pub original_size: u64,
}

impl OptimizedPath {
    pub async fn size(&self) -> Result<u64> {
        self.path.size().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn temp_path_is_sibling_with_same_extension() {
        let dir = TempDir::new().unwrap();
        let original = ImagePath::new(dir.path().join("photo.jpg"));
        let temp = original.temp_path().unwrap();
        assert_eq!(temp.path().parent(), Some(dir.path()));
        assert_eq!(temp.path().extension().unwrap(), "jpg");
        assert!(temp.exists().await);
    }

    #[tokio::test]
    async fn concurrent_temp_path_allocations_never_collide() {
        let dir = TempDir::new().unwrap();
        let original = ImagePath::new(dir.path().join("photo.png"));
        let mut seen = std::collections::HashSet::new();
        for _ in 0..64 {
            let t = original.temp_path().unwrap();
            assert!(seen.insert(t.path().to_path_buf()));
        }
    }

    #[tokio::test]
    async fn replace_preserves_target_directory_and_mode() {
        let dir = TempDir::new().unwrap();
        let target_path = dir.path().join("original.png");
        tokio::fs::write(&target_path, b"original bytes").await.unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&target_path, std::fs::Permissions::from_mode(0o640))
                .await
                .unwrap();
        }

        let new_path = dir.path().join("optimized.png");
        tokio::fs::write(&new_path, b"smaller").await.unwrap();

        let target = ImagePath::new(&target_path);
        let new_content = ImagePath::new(&new_path);
        new_content.replace(&target).await.unwrap();

        let bytes = tokio::fs::read(&target_path).await.unwrap();
        assert_eq!(bytes, b"smaller");
        assert_eq!(target_path.parent(), Some(dir.path()));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = tokio::fs::metadata(&target_path).await.unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o640);
        }
    }

    #[tokio::test]
    async fn copy_duplicates_bytes_non_atomically() {
        let dir = TempDir::new().unwrap();
        let src_path = dir.path().join("a.png");
        tokio::fs::write(&src_path, b"hello").await.unwrap();
        let dst_path = dir.path().join("b.png");

        let src = ImagePath::new(&src_path);
        let dst = ImagePath::new(&dst_path);
        src.copy(&dst).await.unwrap();

        assert_eq!(tokio::fs::read(&dst_path).await.unwrap(), b"hello");
    }
}
