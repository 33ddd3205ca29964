//! SVG worker class: `svgo`, a Node-based SVG minifier invoked as a
//! subprocess like every other worker in this crate.

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

fn svg_formats() -> &'static [Format] {
    &[Format::Svg]
}

static SVGO_OPTIONS: &[OptionDefinition] = &[OptionDefinition {
    name: "pretty",
    default: OptionValue::Bool(false),
    kind: OptionType::Bool,
    description: "pretty-print the minified output (mostly useful for debugging)",
    normalizer: None,
}];

pub struct SvgoWorker {
    bin: Arc<ResolvedBin>,
    options: WorkerOptions,
    formats: HashSet<Format>,
    used_bins: HashSet<&'static str>,
}

#[async_trait]
impl Worker for SvgoWorker {
    fn bin_sym(&self) -> &'static str {
        "svgo"
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
        let mut cmd_args = args!["-i", src.to_string_lossy(), "-o", dst.to_string_lossy()];
        if matches!(self.options.get("pretty"), Some(OptionValue::Bool(true))) {
            cmd_args.push("--pretty".to_string());
        }

        let mut cmd = Command::new(&self.bin.path);
        cmd.args(&cmd_args);

        if run_to_completion(cmd, "svgo", DEFAULT_TIMEOUT).await {
            dst_is_smaller(src, dst).await
        } else {
            false
        }
    }
}

pub fn svgo_class() -> WorkerClass {
    WorkerClass {
        bin_sym: "svgo",
        version_arg: "--version",
        minimum_version: semver::Version::new(1, 0, 0),
        image_formats: svg_formats(),
        run_order: 10,
        option_definitions: SVGO_OPTIONS,
        build: |bin, options| {
            Arc::new(SvgoWorker {
                bin,
                options,
                formats: svg_formats().iter().copied().collect(),
                used_bins: ["svgo"].into_iter().collect(),
            })
        },
    }
}
