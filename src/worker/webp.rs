//! WebP worker class: `cwebp`, encoding losslessly by default; it never
//! produces a lossy output unless explicitly opted into.

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

fn webp_formats() -> &'static [Format] {
    &[Format::Webp]
}

static CWEBP_OPTIONS: &[OptionDefinition] = &[
    OptionDefinition {
        name: "allow_lossy",
        default: OptionValue::Bool(false),
        kind: OptionType::Bool,
        description: "opt into lossy re-encoding instead of -lossless",
        normalizer: None,
    },
    OptionDefinition {
        name: "quality",
        default: OptionValue::Int(90),
        kind: OptionType::IntRange(0, 100),
        description: "quality factor used only when allow_lossy is set",
        normalizer: None,
    },
    OptionDefinition {
        name: "method",
        default: OptionValue::Int(6),
        kind: OptionType::IntRange(0, 6),
        description: "compression effort (0 fastest, 6 slowest/smallest)",
        normalizer: None,
    },
];

pub struct CwebpWorker {
    bin: Arc<ResolvedBin>,
    options: WorkerOptions,
    formats: HashSet<Format>,
    used_bins: HashSet<&'static str>,
}

#[async_trait]
impl Worker for CwebpWorker {
    fn bin_sym(&self) -> &'static str {
        "cwebp"
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
        let method = match self.options.get("method") {
            Some(OptionValue::Int(m)) => *m,
            _ => 6,
        };
        let allow_lossy = matches!(self.options.get("allow_lossy"), Some(OptionValue::Bool(true)));

        let mut cmd_args = args!["-quiet", "-m", method.to_string()];
        if allow_lossy {
            let quality = match self.options.get("quality") {
                Some(OptionValue::Int(q)) => *q,
                _ => 90,
            };
            cmd_args.push("-q".to_string());
            cmd_args.push(quality.to_string());
        } else {
            cmd_args.push("-lossless".to_string());
        }
        cmd_args.push(src.to_string_lossy().into_owned());
        cmd_args.push("-o".to_string());
        cmd_args.push(dst.to_string_lossy().into_owned());

        let mut cmd = Command::new(&self.bin.path);
        cmd.args(&cmd_args);

        if run_to_completion(cmd, "cwebp", DEFAULT_TIMEOUT).await {
            dst_is_smaller(src, dst).await
        } else {
            false
        }
    }
}

pub fn cwebp_class() -> WorkerClass {
    WorkerClass {
        bin_sym: "cwebp",
        version_arg: "-version",
        minimum_version: semver::Version::new(0, 6, 0),
        image_formats: webp_formats(),
        run_order: 10,
        option_definitions: CWEBP_OPTIONS,
        build: |bin, options| {
            Arc::new(CwebpWorker {
                bin,
                options,
                formats: webp_formats().iter().copied().collect(),
                used_bins: ["cwebp"].into_iter().collect(),
            })
        },
    }
}
