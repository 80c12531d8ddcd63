//! Configuration for the invoice pipeline.
//!
//! All behaviour is controlled through [`ProcessorConfig`], built via its
//! [`ProcessorConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share a config across concurrent invocations and to log the
//! exact settings a run used.

use crate::error::InvoiceError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for one [`crate::InvoiceProcessor`].
///
/// Built via [`ProcessorConfig::builder()`] or [`ProcessorConfig::default()`].
///
/// # Example
/// ```rust
/// use invoice2json::ProcessorConfig;
///
/// let config = ProcessorConfig::builder()
///     .confidence_threshold(0.35)
///     .inference_size(1280)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Minimum detection confidence for a region to be considered. Range: 0.0–1.0. Default: 0.20.
    ///
    /// 0.20 is deliberately permissive: a missed invoice is unrecoverable,
    /// while a false positive merely produces one extra OCR call whose
    /// garbage output the caller can discard.
    pub confidence_threshold: f32,

    /// Square inference size (pixels) handed to the detection collaborator. Default: 640.
    pub inference_size: u32,

    /// Installation root of the external rectification program. Default: `DocGeoNet`.
    ///
    /// The program is invoked with this directory as its working directory
    /// and with its model weights resolved under `model_pretrained/`.
    pub rectifier_dir: PathBuf,

    /// Interpreter used to run the rectification program. Default: `python3`.
    pub python_bin: String,

    /// Kill the rectification subprocess after this many seconds. Default: 300.
    ///
    /// The external program offers no liveness signal; without a deadline a
    /// stuck batch would block the invocation forever.
    pub rectify_timeout_secs: u64,

    /// Base directory for per-invocation workspaces. Default: the system
    /// temporary directory.
    ///
    /// Every invocation gets its own uniquely-named tree under this base;
    /// nothing outside that tree is ever written or removed.
    pub workspace_root: Option<PathBuf>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.20,
            inference_size: 640,
            rectifier_dir: PathBuf::from("DocGeoNet"),
            python_bin: "python3".to_string(),
            rectify_timeout_secs: 300,
            workspace_root: None,
        }
    }
}

impl ProcessorConfig {
    /// Create a new builder for `ProcessorConfig`.
    pub fn builder() -> ProcessorConfigBuilder {
        ProcessorConfigBuilder {
            config: Self::default(),
        }
    }

    /// Effective workspace base directory.
    pub fn workspace_base(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Builder for [`ProcessorConfig`].
#[derive(Debug)]
pub struct ProcessorConfigBuilder {
    config: ProcessorConfig,
}

impl ProcessorConfigBuilder {
    pub fn confidence_threshold(mut self, conf: f32) -> Self {
        self.config.confidence_threshold = conf;
        self
    }

    pub fn inference_size(mut self, px: u32) -> Self {
        self.config.inference_size = px.max(32);
        self
    }

    pub fn rectifier_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.rectifier_dir = dir.into();
        self
    }

    pub fn python_bin(mut self, bin: impl Into<String>) -> Self {
        self.config.python_bin = bin.into();
        self
    }

    pub fn rectify_timeout_secs(mut self, secs: u64) -> Self {
        self.config.rectify_timeout_secs = secs.max(1);
        self
    }

    pub fn workspace_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.workspace_root = Some(dir.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ProcessorConfig, InvoiceError> {
        let c = &self.config;
        if !(0.0..=1.0).contains(&c.confidence_threshold) {
            return Err(InvoiceError::InvalidConfig(format!(
                "confidence threshold must be 0.0–1.0, got {}",
                c.confidence_threshold
            )));
        }
        if c.python_bin.is_empty() {
            return Err(InvoiceError::InvalidConfig(
                "python_bin must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}
