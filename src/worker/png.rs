//! PNG worker classes. `pngcrush`, `optipng`, and `advpng` are lossless;
//! `pngquant` is lossy (palette quantization) and is gated behind an
//! `allow_lossy` option, default `false`, so lossy output is always opt-in.

use super::{dst_is_smaller, run_to_completion, Worker, WorkerClass, DEFAULT_TIMEOUT};
use crate::args;
use crate::config::{OptionDefinition, OptionType, OptionValue, WorkerOptions};
use crate::format::Format;
use crate::resolver::ResolvedBin;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::process::Command;

fn png_formats() -> &'static [Format] {
    &[Format::Png]
}

// --- pngcrush --------------------------------------------------------------

static PNGCRUSH_OPTIONS: &[OptionDefinition] = &[
    OptionDefinition {
        name: "brute",
        default: OptionValue::Bool(false),
        kind: OptionType::Bool,
        description: "try all 148 compression method combinations (slow, thorough)",
        normalizer: None,
    },
    OptionDefinition {
        name: "fix",
        default: OptionValue::Bool(true),
        kind: OptionType::Bool,
        description: "fix otherwise-fatal conditions such as bad CRCs",
        normalizer: None,
    },
];

pub struct PngcrushWorker {
    bin: Arc<ResolvedBin>,
    options: WorkerOptions,
    formats: HashSet<Format>,
    used_bins: HashSet<&'static str>,
}

#[async_trait]
impl Worker for PngcrushWorker {
    fn bin_sym(&self) -> &'static str {
        "pngcrush"
    }
    fn image_formats(&self) -> &HashSet<Format> {
        &self.formats
    }
    fn run_order(&self) -> i32 {
        10
    }
    fn used_bins(&self) -> &HashSet<&'static str> {
        &self.used_bins
    }
    fn options(&self) -> &WorkerOptions {
        &self.options
    }

    async fn optimize(&self, src: &Path, dst: &Path) -> bool {
        let mut cmd_args = args!["-q"];
        if matches!(self.options.get("brute"), Some(OptionValue::Bool(true))) {
            cmd_args.push("-brute".to_string());
        }
        if matches!(self.options.get("fix"), Some(OptionValue::Bool(true))) {
            cmd_args.push("-fix".to_string());
        }
        cmd_args.push(src.to_string_lossy().into_owned());
        cmd_args.push(dst.to_string_lossy().into_owned());

        let mut cmd = Command::new(&self.bin.path);
        cmd.args(&cmd_args);
        if run_to_completion(cmd, "pngcrush", DEFAULT_TIMEOUT).await {
            dst_is_smaller(src, dst).await
        } else {
            false
        }
    }
}

pub fn pngcrush_class() -> WorkerClass {
    WorkerClass {
        bin_sym: "pngcrush",
        version_arg: "-version",
        minimum_version: semver::Version::new(1, 7, 0),
        image_formats: png_formats(),
        run_order: 10,
        option_definitions: PNGCRUSH_OPTIONS,
        build: |bin, options| {
            Arc::new(PngcrushWorker {
                bin,
                options,
                formats: png_formats().iter().copied().collect(),
                used_bins: ["pngcrush"].into_iter().collect(),
            })
        },
    }
}

// --- optipng -----------------------------------------------------------

static OPTIPNG_OPTIONS: &[OptionDefinition] = &[OptionDefinition {
    name: "level",
    default: OptionValue::Int(6),
    kind: OptionType::IntRange(0, 7),
    description: "optimization level (0 fastest, 7 most thorough)",
    normalizer: None,
}];

pub struct OptipngWorker {
    bin: Arc<ResolvedBin>,
    options: WorkerOptions,
    formats: HashSet<Format>,
    used_bins: HashSet<&'static str>,
}

#[async_trait]
impl Worker for OptipngWorker {
    fn bin_sym(&self) -> &'static str {
        "optipng"
    }
    fn image_formats(&self) -> &HashSet<Format> {
        &self.formats
    }
    fn run_order(&self) -> i32 {
        20
    }
    fn used_bins(&self) -> &HashSet<&'static str> {
        &self.used_bins
    }
    fn options(&self) -> &WorkerOptions {
        &self.options
    }

    async fn optimize(&self, src: &Path, dst: &Path) -> bool {
        let level = match self.options.get("level") {
            Some(OptionValue::Int(l)) => *l,
            _ => 6,
        };

        let mut cmd = Command::new(&self.bin.path);
        cmd.args(args![
            format!("-o{level}"),
            "-quiet",
            "-out",
            dst.to_string_lossy(),
            src.to_string_lossy()
        ]);

        if run_to_completion(cmd, "optipng", DEFAULT_TIMEOUT).await {
            dst_is_smaller(src, dst).await
        } else {
            false
        }
    }
}

pub fn optipng_class() -> WorkerClass {
    WorkerClass {
        bin_sym: "optipng",
        version_arg: "--version",
        minimum_version: semver::Version::new(0, 6, 0),
        image_formats: png_formats(),
        run_order: 20,
        option_definitions: OPTIPNG_OPTIONS,
        build: |bin, options| {
            Arc::new(OptipngWorker {
                bin,
                options,
                formats: png_formats().iter().copied().collect(),
                used_bins: ["optipng"].into_iter().collect(),
            })
        },
    }
}

// --- advpng --------------------------------------------------------------

static ADVPNG_OPTIONS: &[OptionDefinition] = &[OptionDefinition {
    name: "shrink_level",
    default: OptionValue::Int(4),
    kind: OptionType::IntRange(1, 4),
    description: "deflate shrink level (4 is `--shrink-insane`)",
    normalizer: None,
}];

pub struct AdvpngWorker {
    bin: Arc<ResolvedBin>,
    options: WorkerOptions,
    formats: HashSet<Format>,
    used_bins: HashSet<&'static str>,
}

#[async_trait]
impl Worker for AdvpngWorker {
    fn bin_sym(&self) -> &'static str {
        "advpng"
    }
    fn image_formats(&self) -> &HashSet<Format> {
        &self.formats
    }
    fn run_order(&self) -> i32 {
        30
    }
    fn used_bins(&self) -> &HashSet<&'static str> {
        &self.used_bins
    }
    fn options(&self) -> &WorkerOptions {
        &self.options
    }

    async fn optimize(&self, src: &Path, dst: &Path) -> bool {
        // advpng compresses its argument in place; seed dst from src first.
        if tokio::fs::copy(src, dst).await.is_err() {
            return false;
        }

        let level = match self.options.get("shrink_level") {
            Some(OptionValue::Int(l)) => *l,
            _ => 4,
        };

        let mut cmd = Command::new(&self.bin.path);
        cmd.args(args!["-z", format!("-{level}"), "-q", dst.to_string_lossy()]);

        if run_to_completion(cmd, "advpng", DEFAULT_TIMEOUT).await {
            dst_is_smaller(src, dst).await
        } else {
            false
        }
    }
}

pub fn advpng_class() -> WorkerClass {
    WorkerClass {
        bin_sym: "advpng",
        version_arg: "--version",
        minimum_version: semver::Version::new(0, 0, 0),
        image_formats: png_formats(),
        run_order: 30,
        option_definitions: ADVPNG_OPTIONS,
        build: |bin, options| {
            Arc::new(AdvpngWorker {
                bin,
                options,
                formats: png_formats().iter().copied().collect(),
                used_bins: ["advpng"].into_iter().collect(),
            })
        },
    }
}

// --- pngquant (lossy, opt-in) ---------------------------------------------

static PNGQUANT_OPTIONS: &[OptionDefinition] = &[
    OptionDefinition {
        name: "allow_lossy",
        default: OptionValue::Bool(false),
        kind: OptionType::Bool,
        description: "opt into palette quantization, which is lossy",
        normalizer: None,
    },
    OptionDefinition {
        name: "quality_min",
        default: OptionValue::Int(65),
        kind: OptionType::IntRange(0, 100),
        description: "minimum acceptable quality; pngquant aborts below it",
        normalizer: None,
    },
    OptionDefinition {
        name: "quality_max",
        default: OptionValue::Int(80),
        kind: OptionType::IntRange(0, 100),
        description: "target quality ceiling",
        normalizer: None,
    },
];

pub struct PngquantWorker {
    bin: Arc<ResolvedBin>,
    options: WorkerOptions,
    formats: HashSet<Format>,
    used_bins: HashSet<&'static str>,
}

#[async_trait]
impl Worker for PngquantWorker {
    fn bin_sym(&self) -> &'static str {
        "pngquant"
    }
    fn image_formats(&self) -> &HashSet<Format> {
        &self.formats
    }
    fn run_order(&self) -> i32 {
        40
    }
    fn used_bins(&self) -> &HashSet<&'static str> {
        &self.used_bins
    }
    fn options(&self) -> &WorkerOptions {
        &self.options
    }

    async fn optimize(&self, src: &Path, dst: &Path) -> bool {
        if !matches!(self.options.get("allow_lossy"), Some(OptionValue::Bool(true))) {
            // Opted out: this worker never runs, so lossy output stays opt-in.
            return false;
        }

        let (min, max) = match (self.options.get("quality_min"), self.options.get("quality_max")) {
            (Some(OptionValue::Int(a)), Some(OptionValue::Int(b))) => (*a, *b),
            _ => (65, 80),
        };

        let mut cmd = Command::new(&self.bin.path);
        cmd.args(args![
            "--force",
            "--quality",
            format!("{min}-{max}"),
            "--output",
            dst.to_string_lossy(),
            src.to_string_lossy()
        ]);

        if run_to_completion(cmd, "pngquant", DEFAULT_TIMEOUT).await {
            dst_is_smaller(src, dst).await
        } else {
            false
        }
    }
}

pub fn pngquant_class() -> WorkerClass {
    WorkerClass {
        bin_sym: "pngquant",
        version_arg: "--version",
        minimum_version: semver::Version::new(2, 0, 0),
        image_formats: png_formats(),
        run_order: 40,
        option_definitions: PNGQUANT_OPTIONS,
        build: |bin, options| {
            Arc::new(PngquantWorker {
                bin,
                options,
                formats: png_formats().iter().copied().collect(),
                used_bins: ["pngquant"].into_iter().collect(),
            })
        },
    }
}
