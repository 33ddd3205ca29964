//! GIF worker class: `gifsicle` with `--optimize` and LZW re-packing.

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

fn gif_formats() -> &'static [Format] {
    &[Format::Gif]
}

static GIFSICLE_OPTIONS: &[OptionDefinition] = &[
    OptionDefinition {
        name: "level",
        default: OptionValue::Int(3),
        kind: OptionType::IntRange(1, 3),
        description: "optimization level passed to --optimize=<level>",
        normalizer: None,
    },
    OptionDefinition {
        name: "interlace",
        default: OptionValue::Bool(false),
        kind: OptionType::Bool,
        description: "interlace the output",
        normalizer: None,
    },
];

pub struct GifsicleWorker {
    bin: Arc<ResolvedBin>,
    options: WorkerOptions,
    formats: HashSet<Format>,
    used_bins: HashSet<&'static str>,
}

#[async_trait]
impl Worker for GifsicleWorker {
    fn bin_sym(&self) -> &'static str {
        "gifsicle"
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
        let level = match self.options.get("level") {
            Some(OptionValue::Int(l)) => *l,
            _ => 3,
        };

        let mut cmd_args = args![format!("--optimize={level}"), "--no-warnings"];
        if matches!(self.options.get("interlace"), Some(OptionValue::Bool(true))) {
            cmd_args.push("--interlace".to_string());
        }
        cmd_args.push("--output".to_string());
        cmd_args.push(dst.to_string_lossy().into_owned());
        cmd_args.push(src.to_string_lossy().into_owned());

        let mut cmd = Command::new(&self.bin.path);
        cmd.args(&cmd_args);

        if run_to_completion(cmd, "gifsicle", DEFAULT_TIMEOUT).await {
            dst_is_smaller(src, dst).await
        } else {
            false
        }
    }
}

pub fn gifsicle_class() -> WorkerClass {
    WorkerClass {
        bin_sym: "gifsicle",
        version_arg: "--version",
        minimum_version: semver::Version::new(1, 71, 0),
        image_formats: gif_formats(),
        run_order: 10,
        option_definitions: GIFSICLE_OPTIONS,
        build: |bin, options| {
            Arc::new(GifsicleWorker {
                bin,
                options,
                formats: gif_formats().iter().copied().collect(),
                used_bins: ["gifsicle"].into_iter().collect(),
            })
        },
    }
}
