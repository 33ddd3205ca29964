//! # Configuration Schema & Composition
//!
//! Defines the option schema worker classes declare (`OptionDefinition`) and
//! the deep-merge composition of `defaults ← global ← local ← inline` layers
//! into a normalized per-worker configuration. Parsing an actual YAML/INI
//! file into a `ConfigLayer` is out of scope; the types and merge function
//! a parser would feed are real and tested here.
//!
//! ## Responsibilities:
//! - `OptionValue` / `OptionType` / `OptionDefinition`: the declarative schema
//!   a worker class uses to describe its recognized options
//! - `build_options`: validates a raw option map against a schema, filling in
//!   defaults and applying normalizers; unknown keys and type mismatches are
//!   fatal `OptimizeError::Configuration` errors
//! - `compose`: deep-merges `ConfigLayer`s (worker-scope booleans mean
//!   enable/disable with defaults; a nested map means enable with those
//!   options) into per-worker `RawWorkerConfig`
//! - `Config`: the top-level knobs the engine and driver read (worker layers,
//!   pool size, dry-run)

use crate::error::{OptimizeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A normalized option value. Untagged so a config file can write `true`,
/// `85`, `"baseline"`, or `[1, 2, 3]` directly without a wrapper tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<OptionValue>),
}

/// The declared type of an option, used to validate a raw `OptionValue`.
#[derive(Debug, Clone)]
pub enum OptionType {
    Bool,
    Int,
    IntRange(i64, i64),
    Float,
    String,
    Enum(&'static [&'static str]),
    Array,
}

/// One entry in a worker class's option schema.
#[derive(Clone)]
pub struct OptionDefinition {
    pub name: &'static str,
    pub default: OptionValue,
    pub kind: OptionType,
    pub description: &'static str,
    /// Applied to a value (default or user-supplied, post type-check) before
    /// it's stored in the worker's normalized option map.
    pub normalizer: Option<fn(OptionValue) -> OptionValue>,
}

impl std::fmt::Debug for OptionDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionDefinition")
            .field("name", &self.name)
            .field("default", &self.default)
            .field("kind", &self.kind)
            .finish()
    }
}

/// A worker's normalized, validated option map.
pub type WorkerOptions = HashMap<String, OptionValue>;

fn matches_kind(value: &OptionValue, kind: &OptionType) -> bool {
    match (value, kind) {
        (OptionValue::Bool(_), OptionType::Bool) => true,
        (OptionValue::Int(_), OptionType::Int) => true,
        (OptionValue::Int(i), OptionType::IntRange(lo, hi)) => i >= lo && i <= hi,
        (OptionValue::Float(_), OptionType::Float) => true,
        (OptionValue::Int(_), OptionType::Float) => true,
        (OptionValue::String(_), OptionType::String) => true,
        (OptionValue::String(s), OptionType::Enum(variants)) => variants.contains(&s.as_str()),
        (OptionValue::Array(_), OptionType::Array) => true,
        _ => false,
    }
}

/// Validate `raw` against `definitions`, filling in defaults for missing keys
/// and rejecting unknown keys or type mismatches as a fatal configuration
/// error (this is a construction-time check, never a per-call one).
pub fn build_options(
    definitions: &[OptionDefinition],
    raw: &HashMap<String, OptionValue>,
) -> Result<WorkerOptions> {
    let known: HashSet<&str> = definitions.iter().map(|d| d.name).collect();
    for key in raw.keys() {
        if !known.contains(key.as_str()) {
            return Err(OptimizeError::Configuration(format!(
                "unknown option: {key}"
            )));
        }
    }

    let mut options = WorkerOptions::with_capacity(definitions.len());
    for def in definitions {
        let mut value = raw.get(def.name).cloned().unwrap_or_else(|| def.default.clone());
        if !matches_kind(&value, &def.kind) {
            return Err(OptimizeError::Configuration(format!(
                "option {} has the wrong type",
                def.name
            )));
        }
        if let Some(normalize) = def.normalizer {
            value = normalize(value);
        }
        options.insert(def.name.to_string(), value);
    }
    Ok(options)
}

/// One worker-scope entry in a config layer: either an enable/disable flag
/// (using the worker's defaults), or a nested option map (which implies
/// enabled).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerConfigEntry {
    Enabled(bool),
    Options(HashMap<String, OptionValue>),
}

/// A layer of worker-scope configuration, e.g. parsed from a global config
/// file, a local `.image_optim.yml`, or passed inline by the caller.
pub type ConfigLayer = HashMap<String, WorkerConfigEntry>;

/// A worker's merged, not-yet-schema-validated configuration.
#[derive(Debug, Clone, Default)]
pub struct RawWorkerConfig {
    pub enabled: Option<bool>,
    pub options: HashMap<String, OptionValue>,
}

/// Deep-merge config layers in increasing precedence order (typically
/// `[global, local, inline]`) into per-worker raw configuration. `true`/
/// `false` set (or reset) the enabled flag using the worker's defaults for
/// options; a nested map sets enabled and deep-merges its keys over whatever
/// options an earlier layer already set. Any worker name not present in
/// `known_workers` is a fatal configuration error.
pub fn compose(
    known_workers: &HashSet<&str>,
    layers: &[&ConfigLayer],
) -> Result<HashMap<String, RawWorkerConfig>> {
    let mut merged: HashMap<String, RawWorkerConfig> = HashMap::new();
    for layer in layers {
        for (worker, entry) in layer.iter() {
            if !known_workers.contains(worker.as_str()) {
                return Err(OptimizeError::Configuration(format!(
                    "unknown worker: {worker}"
                )));
            }
            let slot = merged.entry(worker.clone()).or_default();
            match entry {
                WorkerConfigEntry::Enabled(enabled) => {
                    slot.enabled = Some(*enabled);
                }
                WorkerConfigEntry::Options(opts) => {
                    slot.enabled = Some(true);
                    for (key, value) in opts {
                        slot.options.insert(key.clone(), value.clone());
                    }
                }
            }
        }
    }
    Ok(merged)
}

/// Top-level engine configuration: worker-scope layers plus the ambient
/// knobs the CLI exposes. Whether a caller treats a run as a "dry run" is a
/// CLI-level choice of which API to call (`optimize` vs `optimize_replace`),
/// not an engine policy, so it has no field here.
#[derive(Debug, Clone)]
pub struct Config {
    pub global: ConfigLayer,
    pub local: ConfigLayer,
    pub inline: ConfigLayer,
    /// Bounded pool size for `optimize_many`/`optimize_images`.
    pub pool_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            global: ConfigLayer::new(),
            local: ConfigLayer::new(),
            inline: ConfigLayer::new(),
            pool_size: num_cpus::get().max(1),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(OptimizeError::Configuration(
                "pool_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Merge this config's layers, in precedence order, for a known worker
    /// name set (normally the registry's declared `bin_sym`s).
    pub fn merged_worker_configs(
        &self,
        known_workers: &HashSet<&str>,
    ) -> Result<HashMap<String, RawWorkerConfig>> {
        compose(known_workers, &[&self.global, &self.local, &self.inline])
    }
}
