//! # Worker Registry & Instances
//!
//! The uniform `Worker` interface every concrete optimizer binary adapter
//! implements, plus the `Registry` that discovers, resolves, and orders
//! them.
//!
//! Concrete worker classes live one per format family in sibling modules
//! (`jpeg`, `png`, `gif`, `svg`, `webp`); this module owns the trait, the
//! shared "spawn a binary and check the result" helper, and the static
//! discovery list whose order is the tie-break for workers sharing a
//! `run_order`.

pub mod gif;
pub mod jpeg;
pub mod png;
pub mod svg;
pub mod webp;

use crate::config::{Config, OptionDefinition, WorkerOptions};
use crate::error::{OptimizeError, Result};
use crate::format::Format;
use crate::resolver::BinaryResolver;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// A stateless adapter around one external image-optimization binary. Thread
/// safe: concurrent `optimize` calls on distinct `(src, dst)` pairs must not
/// interfere, which holds here because nothing but the immutable resolved
/// binary path and normalized options is shared.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Stable identifier; also the binary name used by the resolver.
    fn bin_sym(&self) -> &'static str;
    /// Constant for the worker's lifetime, fixed at construction.
    fn image_formats(&self) -> &HashSet<Format>;
    /// Lower runs earlier; ties broken by discovery order.
    fn run_order(&self) -> i32;
    fn used_bins(&self) -> &HashSet<&'static str>;
    fn options(&self) -> &WorkerOptions;
    /// Invoke the binary with the configured options. Returns `true` iff
    /// `dst` now contains a valid, strictly-smaller image than `src`. Never
    /// unwinds on an internal error: a spawn failure, nonzero exit, or
    /// timeout is caught and reported as `false`.
    async fn optimize(&self, src: &Path, dst: &Path) -> bool;
}

/// Per-worker timeout, overridable per class; `None` means unbounded.
pub const DEFAULT_TIMEOUT: Option<Duration> = None;

/// Run `cmd`, enforcing `timeout` if set, and report whether it exited
/// successfully. Any spawn failure, nonzero exit, or timeout is logged and
/// folded into a `false` return; the uniform contract never panics or
/// propagates a worker's internal error.
pub(crate) async fn run_to_completion(
    mut cmd: Command,
    bin_sym: &str,
    timeout: Option<Duration>,
) -> bool {
    let spawn = cmd.output();
    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, spawn).await {
            Ok(result) => result,
            Err(_) => {
                warn!("worker {bin_sym} timed out after {:?}", limit);
                return false;
            }
        },
        None => spawn.await,
    };

    match outcome {
        Ok(output) if output.status.success() => true,
        Ok(output) => {
            debug!(
                "worker {bin_sym} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
            false
        }
        Err(e) => {
            warn!("worker {bin_sym} failed to spawn: {}", e);
            false
        }
    }
}

/// `dst` is a successful result only if it exists and is strictly smaller
/// than `src` (or, per a worker's own looser criterion, see each class); this
/// is the baseline check every worker in this crate applies after its binary
/// reports success.
pub(crate) async fn dst_is_smaller(src: &Path, dst: &Path) -> bool {
    let (src_len, dst_len) = tokio::join!(tokio::fs::metadata(src), tokio::fs::metadata(dst));
    match (src_len, dst_len) {
        (Ok(s), Ok(d)) => d.len() < s.len(),
        _ => false,
    }
}

/// A declared worker class: everything the registry needs to resolve its
/// binary and build an instance, independent of any one worker's actual
/// runtime options.
pub struct WorkerClass {
    pub bin_sym: &'static str,
    pub version_arg: &'static str,
    pub minimum_version: semver::Version,
    pub image_formats: &'static [Format],
    pub run_order: i32,
    pub option_definitions: &'static [OptionDefinition],
    pub build: fn(Arc<crate::resolver::ResolvedBin>, WorkerOptions) -> Arc<dyn Worker>,
}

/// Declaration order of the built-in portfolio; this is also the tie-break
/// order for workers sharing a `run_order`.
fn built_in_classes() -> Vec<WorkerClass> {
    vec![
        jpeg::jpegoptim_class(),
        jpeg::jpegtran_class(),
        png::pngcrush_class(),
        png::optipng_class(),
        png::advpng_class(),
        png::pngquant_class(),
        gif::gifsicle_class(),
        svg::svgo_class(),
        webp::cwebp_class(),
    ]
}

/// The enumerated, resolved set of workers available this process, in
/// discovery order. Workers whose binary didn't resolve are simply absent,
/// after a one-time warning.
pub struct Registry {
    workers: Vec<Arc<dyn Worker>>,
}

impl Registry {
    /// Resolve every enabled worker class against `config`, skipping (and
    /// warning about) any whose binary is missing or too old, unless the
    /// caller explicitly force-enabled exactly that worker, in which case
    /// the resolution failure is promoted to a fatal configuration error.
    pub async fn discover(config: &Config, resolver: &BinaryResolver) -> Result<Self> {
        let classes = built_in_classes();
        let known: HashSet<&str> = classes.iter().map(|c| c.bin_sym).collect();
        let merged = config.merged_worker_configs(&known)?;

        let mut workers = Vec::with_capacity(classes.len());
        for class in classes {
            let raw = merged.get(class.bin_sym);
            let explicitly_enabled = matches!(raw.and_then(|r| r.enabled), Some(true));
            let disabled = matches!(raw.and_then(|r| r.enabled), Some(false));
            if disabled {
                continue;
            }

            let empty = std::collections::HashMap::new();
            let raw_options = raw.map(|r| &r.options).unwrap_or(&empty);
            let options = crate::config::build_options(class.option_definitions, raw_options)?;

            match resolver
                .resolve_at_least(class.bin_sym, class.version_arg, &class.minimum_version)
                .await
            {
                Ok(bin) => {
                    workers.push((class.build)(Arc::new(bin), options));
                }
                Err(e) if explicitly_enabled => {
                    return Err(e);
                }
                Err(e) => {
                    warn!("skipping worker {}: {}", class.bin_sym, e);
                }
            }
        }

        Ok(Self { workers })
    }

    /// Workers applicable to `format`, sorted by `(run_order, discovery
    /// index)` ascending. `sort_by_key` is stable, so workers
    /// that tie on `run_order` keep the relative order they had in the
    /// (already discovery-ordered) `workers` vector.
    pub fn workers_for_format(&self, format: Format) -> Vec<Arc<dyn Worker>> {
        let mut applicable: Vec<Arc<dyn Worker>> = self
            .workers
            .iter()
            .filter(|w| w.image_formats().contains(&format))
            .cloned()
            .collect();
        applicable.sort_by_key(|w| w.run_order());
        applicable
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

#[cfg(test)]
impl Registry {
    /// Build a registry directly from a fixed worker list, bypassing
    /// discovery/resolution entirely. Used by other modules' tests (e.g. the
    /// engine) that want to exercise the pipeline against an in-process test
    /// double without any real binary on `PATH`.
    pub(crate) fn from_workers_for_test(workers: Vec<Arc<dyn Worker>>) -> Self {
        Self { workers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptionValue;
    use std::collections::HashMap;

    struct FakeWorker {
        bin_sym: &'static str,
        formats: HashSet<Format>,
        run_order: i32,
        used_bins: HashSet<&'static str>,
        options: WorkerOptions,
        always_succeeds: bool,
    }

    #[async_trait]
    impl Worker for FakeWorker {
        fn bin_sym(&self) -> &'static str {
            self.bin_sym
        }
        fn image_formats(&self) -> &HashSet<Format> {
            &self.formats
        }
        fn run_order(&self) -> i32 {
            self.run_order
        }
        fn used_bins(&self) -> &HashSet<&'static str> {
            &self.used_bins
        }
        fn options(&self) -> &WorkerOptions {
            &self.options
        }
        async fn optimize(&self, _src: &Path, dst: &Path) -> bool {
            if self.always_succeeds {
                tokio::fs::write(dst, b"x").await.is_ok()
            } else {
                false
            }
        }
    }

    fn fake(bin_sym: &'static str, run_order: i32) -> Arc<dyn Worker> {
        Arc::new(FakeWorker {
            bin_sym,
            formats: [Format::Png].into_iter().collect(),
            run_order,
            used_bins: [bin_sym].into_iter().collect(),
            options: WorkerOptions::new(),
            always_succeeds: true,
        })
    }

    #[test]
    fn workers_for_format_orders_by_run_order_then_discovery() {
        let registry = Registry {
            workers: vec![fake("c", 10), fake("a", 5), fake("b", 5)],
        };
        let ordered = registry.workers_for_format(Format::Png);
        let names: Vec<&str> = ordered.iter().map(|w| w.bin_sym()).collect();
        // "a" and "b" tie on run_order 5; "a" was discovered first so it
        // stays first. "c" has the higher run_order and comes last.
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn workers_for_format_excludes_other_formats() {
        let mut jpeg_only = FakeWorker {
            bin_sym: "only-jpeg",
            formats: [Format::Jpeg].into_iter().collect(),
            run_order: 1,
            used_bins: HashSet::new(),
            options: WorkerOptions::new(),
            always_succeeds: true,
        };
        jpeg_only.formats = [Format::Jpeg].into_iter().collect();
        let registry = Registry {
            workers: vec![Arc::new(jpeg_only)],
        };
        assert!(registry.workers_for_format(Format::Png).is_empty());
    }

    #[tokio::test]
    async fn unresolved_worker_is_skipped_not_fatal() {
        let resolver = BinaryResolver::new();
        // Default config never explicitly force-enables a worker, so a
        // missing binary (almost certainly the case for all of these in a
        // bare test sandbox) is skipped with a warning, not an error.
        let config = Config::default();
        let registry = Registry::discover(&config, &resolver).await;
        assert!(registry.is_ok());
    }

    #[tokio::test]
    async fn explicitly_enabled_missing_binary_is_fatal() {
        let resolver = BinaryResolver::new();
        let mut config = Config::default();
        config.inline.insert(
            "jpegoptim".to_string(),
            crate::config::WorkerConfigEntry::Options(HashMap::from([(
                "strip".to_string(),
                OptionValue::Bool(true),
            )])),
        );
        let err = Registry::discover(&config, &resolver).await.unwrap_err();
        assert!(matches!(
            err,
            OptimizeError::BinaryNotFound(_) | OptimizeError::BadVersion { .. }
        ));
    }
}
