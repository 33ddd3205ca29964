//! # Binary Resolver
//!
//! Locates a named optimizer executable, probes its version, and memoizes the
//! result for the lifetime of the process. Grounded on the teacher's
//! `ToolPathResolver` (`tool_resolver.rs`): a bundled/vendored directory is
//! checked first, falling back to a `PATH` search, except here `which`/`where`
//! semantics are implemented directly (splitting `PATH`, checking the
//! executable bit) rather than shelling out to an external `which` process,
//! so resolution itself has no process dependency.

use crate::error::{OptimizeError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::warn;

/// How a binary's location was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMethod {
    /// Found under the bundled/vendored directory (`IMAGE_OPTIM_BIN_DIR`).
    Bundled,
    /// Found by searching `PATH`.
    Path,
}

/// A successfully resolved binary: its absolute path, parsed version, and how
/// it was found.
#[derive(Debug, Clone)]
pub struct ResolvedBin {
    pub path: PathBuf,
    pub version: semver::Version,
    pub method: DetectionMethod,
}

/// Resolves binary names to paths and versions, caching both hits and misses
/// per process. Safe to share across threads/tasks: the cache is behind a
/// `tokio::sync::Mutex` and a miss is only ever computed once per name (the
/// second concurrent caller to probe the same uncached name pays the cost
/// too; correctness does not depend on exactly-once probing, only on never
/// serving a stale answer after `reset()`).
pub struct BinaryResolver {
    bundled_dir: Option<PathBuf>,
    cache: Mutex<HashMap<String, Option<ResolvedBin>>>,
}

impl BinaryResolver {
    pub fn new() -> Self {
        let bundled_dir = std::env::var_os("IMAGE_OPTIM_BIN_DIR")
            .map(PathBuf::from)
            .map(|base| base.join(std::env::consts::OS));
        Self {
            bundled_dir,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide singleton the engine uses by default.
    pub fn global() -> &'static BinaryResolver {
        static INSTANCE: OnceLock<BinaryResolver> = OnceLock::new();
        INSTANCE.get_or_init(BinaryResolver::new)
    }

    /// Clear the memoized cache. Intended for tests that need to simulate a
    /// binary appearing/disappearing between resolutions.
    pub async fn reset(&self) {
        self.cache.lock().await.clear();
    }

    /// Resolve `name`, probing its version with `version_arg` (e.g.
    /// `"--version"`) the first time it's seen.
    pub async fn resolve(&self, name: &str, version_arg: &str) -> Result<ResolvedBin> {
        {
            let cache = self.cache.lock().await;
            if let Some(hit) = cache.get(name) {
                return hit
                    .clone()
                    .ok_or_else(|| OptimizeError::BinaryNotFound(name.to_string()));
            }
        }

        let located = self.locate(name).await;
        let resolved = match located {
            Some((path, method)) => {
                let version = self.probe_version(&path, version_arg).await;
                Some(ResolvedBin { path, version, method })
            }
            None => None,
        };

        self.cache
            .lock()
            .await
            .insert(name.to_string(), resolved.clone());

        resolved.ok_or_else(|| OptimizeError::BinaryNotFound(name.to_string()))
    }

    /// Resolve and enforce a worker-declared minimum version in one call.
    pub async fn resolve_at_least(
        &self,
        name: &str,
        version_arg: &str,
        minimum: &semver::Version,
    ) -> Result<ResolvedBin> {
        let bin = self.resolve(name, version_arg).await?;
        if &bin.version < minimum {
            return Err(OptimizeError::BadVersion {
                name: name.to_string(),
                found: bin.version.to_string(),
                minimum: minimum.to_string(),
            });
        }
        Ok(bin)
    }

    async fn locate(&self, name: &str) -> Option<(PathBuf, DetectionMethod)> {
        if let Some(dir) = &self.bundled_dir {
            let candidate = dir.join(Self::exe_name(name));
            if Self::is_executable(&candidate).await {
                return Some((candidate, DetectionMethod::Bundled));
            }
        }
        self.search_path(name)
            .await
            .map(|p| (p, DetectionMethod::Path))
    }

    async fn search_path(&self, name: &str) -> Option<PathBuf> {
        let path_var = std::env::var_os("PATH")?;
        let exe = Self::exe_name(name);
        for dir in std::env::split_paths(&path_var) {
            let candidate = dir.join(&exe);
            if Self::is_executable(&candidate).await {
                return Some(candidate);
            }
        }
        None
    }

    fn exe_name(name: &str) -> String {
        if cfg!(windows) {
            format!("{name}.exe")
        } else {
            name.to_string()
        }
    }

    async fn is_executable(path: &Path) -> bool {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => {
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    meta.permissions().mode() & 0o111 != 0
                }
                #[cfg(not(unix))]
                {
                    true
                }
            }
            _ => false,
        }
    }

    async fn probe_version(&self, path: &Path, version_arg: &str) -> semver::Version {
        let output = Command::new(path).arg(version_arg).output().await;
        match output {
            Ok(out) => {
                let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
                combined.push(' ');
                combined.push_str(&String::from_utf8_lossy(&out.stderr));
                parse_version_token(&combined)
            }
            Err(e) => {
                warn!("failed to probe version of {}: {}", path.display(), e);
                semver::Version::new(0, 0, 0)
            }
        }
    }
}

impl Default for BinaryResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Scan free-form `--version` output for the first semver-shaped token,
/// normalizing `MAJOR`, `MAJOR.MINOR`, and `MAJOR.MINOR.PATCH` forms (most
/// optimizer binaries print only two components). A binary whose output has
/// no parseable version is treated as `0.0.0`, which fails any worker that
/// declares a nonzero minimum.
fn parse_version_token(output: &str) -> semver::Version {
    for token in output.split(|c: char| c.is_whitespace() || c == ',' || c == '(' || c == ')') {
        let cleaned = token.trim_start_matches(|c: char| !c.is_ascii_digit());
        if cleaned.is_empty() {
            continue;
        }
        let mut end = 0;
        let mut dots = 0;
        for (i, c) in cleaned.char_indices() {
            if c.is_ascii_digit() {
                end = i + c.len_utf8();
            } else if c == '.' && dots < 2 {
                dots += 1;
                end = i + 1;
            } else {
                break;
            }
        }
        let candidate = cleaned[..end].trim_end_matches('.');
        if candidate.is_empty() {
            continue;
        }
        if let Ok(v) = semver::Version::parse(&normalize_to_semver(candidate)) {
            return v;
        }
    }
    semver::Version::new(0, 0, 0)
}

fn normalize_to_semver(s: &str) -> String {
    let parts: Vec<&str> = s.split('.').collect();
    match parts.len() {
        1 => format!("{}.0.0", parts[0]),
        2 => format!("{}.{}.0", parts[0], parts[1]),
        _ => parts[..3].join("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_component_version() {
        let v = parse_version_token("jpegoptim 1.4.6\n");
        assert_eq!(v, semver::Version::new(1, 4, 6));
    }

    #[test]
    fn parses_version_with_v_prefix() {
        let v = parse_version_token("gifsicle version v1.93");
        assert_eq!(v, semver::Version::new(1, 93, 0));
    }

    #[test]
    fn unparseable_output_falls_back_to_zero() {
        let v = parse_version_token("no version information here");
        assert_eq!(v, semver::Version::new(0, 0, 0));
    }

    #[tokio::test]
    async fn missing_binary_is_not_found_and_cached() {
        let resolver = BinaryResolver::new();
        let name = "definitely-not-a-real-optimizer-binary";
        let err = resolver.resolve(name, "--version").await.unwrap_err();
        assert!(matches!(err, OptimizeError::BinaryNotFound(_)));
        // second call hits the cache, still an error
        let err = resolver.resolve(name, "--version").await.unwrap_err();
        assert!(matches!(err, OptimizeError::BinaryNotFound(_)));
    }

    #[tokio::test]
    async fn reset_clears_the_cache() {
        let resolver = BinaryResolver::new();
        let name = "definitely-not-a-real-optimizer-binary";
        let _ = resolver.resolve(name, "--version").await;
        resolver.reset().await;
        assert!(resolver.cache.lock().await.is_empty());
    }
}
