//! # Error Types Module
//!
//! Defines the error taxonomy for the optimization engine.
//!
//! ## Responsibilities:
//! - Defines `OptimizeError`, the one typed error enum the library's public
//!   signatures expose
//! - Integrates with `thiserror` for automatic `From` conversions
//! - Keeps `anyhow` confined to the CLI boundary (`main.rs`), never leaking
//!   into library signatures
//!
//! ## Categories:
//! - `Configuration`: unknown worker, unknown option, bad option type. Fatal,
//!   raised eagerly from construction.
//! - `BinaryNotFound` / `BadVersion`: raised by the resolver. Non-fatal for
//!   batch use unless the worker was explicitly force-enabled.
//! - `FormatUnsupported`: input isn't a recognized image.
//! - `WorkerFailure`: a worker returned false, crashed, or timed out.
//! - `Io`: filesystem operation failed.
//! - `Cancelled`: cooperative shutdown signal observed by the driver.

/// Errors produced by the image-optim engine.
#[derive(thiserror::Error, Debug)]
pub enum OptimizeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("binary not found: {0}")]
    BinaryNotFound(String),

    #[error("binary {name} version {found} is too old (minimum {minimum})")]
    BadVersion {
        name: String,
        found: String,
        minimum: String,
    },

    #[error("unsupported image format: {0}")]
    FormatUnsupported(String),

    #[error("worker {worker} failed on {path}")]
    WorkerFailure { worker: String, path: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl OptimizeError {
    /// True for errors that the engine treats as "skip this worker/image and
    /// keep going" rather than aborting the whole batch.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            OptimizeError::BinaryNotFound(_)
                | OptimizeError::BadVersion { .. }
                | OptimizeError::FormatUnsupported(_)
                | OptimizeError::WorkerFailure { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, OptimizeError>;
