//! JPEG worker classes: `jpegoptim` (in-place, strips metadata) and
//! `jpegtran` (lossless re-huffman/progressive re-encode via stdout).

use super::{dst_is_smaller, run_to_completion, Worker, WorkerClass, DEFAULT_TIMEOUT};
use crate::args;
use crate::config::{OptionDefinition, OptionType, OptionValue, WorkerOptions};
use crate::format::Format;
use crate::resolver::ResolvedBin;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

fn jpeg_formats() -> &'static [Format] {
    &[Format::Jpeg]
}

// --- jpegoptim ---------------------------------------------------------

static JPEGOPTIM_OPTIONS: &[OptionDefinition] = &[
    OptionDefinition {
        name: "strip_all",
        default: OptionValue::Bool(true),
        kind: OptionType::Bool,
        description: "strip all metadata markers (EXIF, IPTC, comments)",
        normalizer: None,
    },
    OptionDefinition {
        name: "progressive",
        default: OptionValue::Bool(true),
        kind: OptionType::Bool,
        description: "force progressive encoding",
        normalizer: None,
    },
];

pub struct JpegoptimWorker {
    bin: Arc<ResolvedBin>,
    options: WorkerOptions,
    formats: HashSet<Format>,
    used_bins: HashSet<&'static str>,
}

#[async_trait]
impl Worker for JpegoptimWorker {
    fn bin_sym(&self) -> &'static str {
        "jpegoptim"
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
        // jpegoptim rewrites its argument in place; seed dst from src first.
        if tokio::fs::copy(src, dst).await.is_err() {
            return false;
        }

        let mut cmd_args = args!["--quiet"];
        if matches!(self.options.get("strip_all"), Some(OptionValue::Bool(true))) {
            cmd_args.push("--strip-all".to_string());
        }
        if matches!(self.options.get("progressive"), Some(OptionValue::Bool(true))) {
            cmd_args.push("--all-progressive".to_string());
        }
        cmd_args.push(dst.to_string_lossy().into_owned());

        let mut cmd = Command::new(&self.bin.path);
        cmd.args(&cmd_args);
        if run_to_completion(cmd, "jpegoptim", DEFAULT_TIMEOUT).await {
            dst_is_smaller(src, dst).await
        } else {
            false
        }
    }
}

pub fn jpegoptim_class() -> WorkerClass {
    WorkerClass {
        bin_sym: "jpegoptim",
        version_arg: "--version",
        minimum_version: semver::Version::new(1, 4, 0),
        image_formats: jpeg_formats(),
        run_order: 10,
        option_definitions: JPEGOPTIM_OPTIONS,
        build: |bin, options| {
            Arc::new(JpegoptimWorker {
                bin,
                options,
                formats: jpeg_formats().iter().copied().collect(),
                used_bins: ["jpegoptim"].into_iter().collect(),
            })
        },
    }
}

// --- jpegtran ------------------------------------------------------------

static JPEGTRAN_OPTIONS: &[OptionDefinition] = &[
    OptionDefinition {
        name: "progressive",
        default: OptionValue::Bool(true),
        kind: OptionType::Bool,
        description: "write a progressive JPEG",
        normalizer: None,
    },
    OptionDefinition {
        name: "copy",
        default: OptionValue::String(String::new()),
        kind: OptionType::Enum(&["none", "comments", "all"]),
        description: "which metadata markers to copy through",
        normalizer: Some(|v| match v {
            OptionValue::String(s) if s.is_empty() => OptionValue::String("none".to_string()),
            other => other,
        }),
    },
];

pub struct JpegtranWorker {
    bin: Arc<ResolvedBin>,
    options: WorkerOptions,
    formats: HashSet<Format>,
    used_bins: HashSet<&'static str>,
}

#[async_trait]
impl Worker for JpegtranWorker {
    fn bin_sym(&self) -> &'static str {
        "jpegtran"
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
        let Ok(out_file) = std::fs::File::create(dst) else {
            return false;
        };

        let mut cmd_args = args!["-optimize"];
        if matches!(self.options.get("progressive"), Some(OptionValue::Bool(true))) {
            cmd_args.push("-progressive".to_string());
        }
        if let Some(OptionValue::String(copy)) = self.options.get("copy") {
            cmd_args.push("-copy".to_string());
            cmd_args.push(copy.clone());
        }
        cmd_args.push(src.to_string_lossy().into_owned());

        let mut cmd = Command::new(&self.bin.path);
        cmd.args(&cmd_args).stdout(Stdio::from(out_file));

        if run_to_completion(cmd, "jpegtran", DEFAULT_TIMEOUT).await {
            dst_is_smaller(src, dst).await
        } else {
            let _ = tokio::fs::remove_file(dst).await;
            false
        }
    }
}

pub fn jpegtran_class() -> WorkerClass {
    WorkerClass {
        bin_sym: "jpegtran",
        version_arg: "-version",
        minimum_version: semver::Version::new(0, 0, 0),
        image_formats: jpeg_formats(),
        run_order: 20,
        option_definitions: JPEGTRAN_OPTIONS,
        build: |bin, options| {
            Arc::new(JpegtranWorker {
                bin,
                options,
                formats: jpeg_formats().iter().copied().collect(),
                used_bins: ["jpegtran"].into_iter().collect(),
            })
        },
    }
}
