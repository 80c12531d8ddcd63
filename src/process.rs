//! Pipeline orchestration: one input image → one [`ResultEnvelope`].
//!
//! [`InvoiceProcessor`] sequences the stages — validate, detect/crop,
//! rectify, extract — inside a workspace bracket: the invocation's
//! directory tree is acquired after validation succeeds and released on
//! every exit path (clean finish, zero-region short-circuit, fatal stage
//! error). Failures never escape as `Err`; every path produces a typed
//! envelope so overlapping callers can triage on `status` alone.
//!
//! The collaborator handles are injected `Arc`s loaded once and shared
//! across invocations; the processor itself holds no per-invocation state,
//! so one instance can serve any number of concurrent calls.

use crate::config::ProcessorConfig;
use crate::envelope::{unix_now, ResultEnvelope};
use crate::error::InvoiceError;
use crate::pipeline::detect::{self, Detector};
use crate::pipeline::extract::{self, ExtractionOutcome, TextExtractor};
use crate::pipeline::input;
use crate::pipeline::rectify::{self, DocGeoNetRectifier, Rectifier};
use crate::workspace::Workspace;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// The invoice-processing pipeline with its injected collaborators.
#[derive(Clone)]
pub struct InvoiceProcessor {
    detector: Arc<dyn Detector>,
    rectifier: Arc<dyn Rectifier>,
    extractor: Arc<dyn TextExtractor>,
    config: ProcessorConfig,
}

impl InvoiceProcessor {
    /// Build a processor with explicit collaborator handles.
    pub fn new(
        detector: Arc<dyn Detector>,
        rectifier: Arc<dyn Rectifier>,
        extractor: Arc<dyn TextExtractor>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            detector,
            rectifier,
            extractor,
            config,
        }
    }

    /// Build a processor that rectifies via the DocGeoNet subprocess
    /// configured in `config`, with caller-supplied detection and
    /// extraction collaborators.
    pub fn with_docgeonet(
        detector: Arc<dyn Detector>,
        extractor: Arc<dyn TextExtractor>,
        config: ProcessorConfig,
    ) -> Self {
        let rectifier = Arc::new(DocGeoNetRectifier::new(
            config.rectifier_dir.clone(),
            config.python_bin.clone(),
            Duration::from_secs(config.rectify_timeout_secs),
        ));
        Self::new(detector, rectifier, extractor, config)
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Process one invoice image from a filesystem path.
    ///
    /// Always returns an envelope; fatal failures surface as
    /// `status = "error"`, a clean run with no detected invoices as
    /// `status = "warning"`.
    pub async fn process_image(&self, image_path: &str) -> ResultEnvelope {
        let timestamp = unix_now();
        let process_id = make_process_id(timestamp, image_path);
        info!("processing {image_path} [{process_id}]");

        // Validation failures short-circuit before any workspace exists.
        let resolved = match input::resolve_path(image_path) {
            Ok(r) => r,
            Err(e) => return self.error_envelope(process_id, timestamp, Some(image_path), e),
        };

        let workspace = match Workspace::acquire(&self.config.workspace_base(), "invoice") {
            Ok(ws) => ws,
            Err(e) => {
                return self.error_envelope(
                    process_id,
                    timestamp,
                    Some(image_path),
                    InvoiceError::Workspace {
                        path: self.config.workspace_base(),
                        source: e,
                    },
                )
            }
        };

        // Everything stage-fatal funnels through here so the workspace is
        // released exactly once on every path.
        let result = self
            .run_stages(&workspace, resolved.path(), &process_id, timestamp, image_path)
            .await;
        workspace.release();

        match result {
            Ok(envelope) => envelope,
            Err(e) => self.error_envelope(process_id, timestamp, Some(image_path), e),
        }
    }

    /// Process an invoice image supplied as raw bytes.
    ///
    /// The payload is written to a managed temp file that is removed when
    /// processing completes, whatever the outcome.
    pub async fn process_bytes(&self, bytes: &[u8], filename: Option<&str>) -> ResultEnvelope {
        let timestamp = unix_now();

        let resolved = match input::resolve_bytes(bytes, filename) {
            Ok(r) => r,
            Err(e) => {
                let process_id = make_process_id(timestamp, "<bytes>");
                let mut env = self.error_envelope(process_id, timestamp, None, e);
                env.source_type = Some("bytes".into());
                return env;
            }
        };

        let path = resolved.path().to_string_lossy().into_owned();
        let mut envelope = self.process_image(&path).await;
        envelope.source_type = Some("bytes".into());
        envelope
    }

    /// Process an invoice image supplied as base64 text, with or without a
    /// `data:image/…;base64,` prefix.
    pub async fn process_base64(&self, payload: &str, filename: Option<&str>) -> ResultEnvelope {
        let timestamp = unix_now();

        let (bytes, name) = match input::decode_base64(payload, filename) {
            Ok(v) => v,
            Err(e) => {
                let process_id = make_process_id(timestamp, "<base64>");
                let mut env = self.error_envelope(process_id, timestamp, None, e);
                env.source_type = Some("base64".into());
                return env;
            }
        };

        let mut envelope = self.process_bytes(&bytes, Some(&name)).await;
        envelope.source_type = Some("base64".into());
        envelope
    }

    /// The workspace-bracketed stage sequence.
    async fn run_stages(
        &self,
        workspace: &Workspace,
        image_path: &std::path::Path,
        process_id: &str,
        timestamp: u64,
        input_ref: &str,
    ) -> Result<ResultEnvelope, InvoiceError> {
        let ws_err = |path: &std::path::Path, e: std::io::Error| InvoiceError::Workspace {
            path: path.to_path_buf(),
            source: e,
        };

        let crop_dir = workspace
            .subdir("cropped")
            .map_err(|e| ws_err(workspace.root(), e))?;
        let rectified_dir = workspace
            .subdir("rectified")
            .map_err(|e| ws_err(workspace.root(), e))?;

        // ── Stage 1: detect and crop ─────────────────────────────────────
        let (artifacts, detected_count) = detect::extract_regions(
            Arc::clone(&self.detector),
            image_path,
            &crop_dir,
            self.config.confidence_threshold,
            self.config.inference_size,
        )
        .await?;

        if artifacts.is_empty() {
            warn!("no usable invoice regions in {input_ref}");
            return Ok(ResultEnvelope::warning(
                process_id.to_string(),
                timestamp,
                Some(input_ref.to_string()),
            ));
        }
        let invoice_count = artifacts.len();

        // ── Stage 2: rectify the crop batch ──────────────────────────────
        // Rectification staging is its own uniquely-named workspace nested
        // under the invocation base, acquired and released per call.
        let rectified = rectify::rectify_crops(
            Arc::clone(&self.rectifier),
            &crop_dir,
            &rectified_dir,
            &self.config.workspace_base(),
        )
        .await?;

        // ── Stage 3: extract each artifact independently ─────────────────
        let mut outcomes: Vec<(String, ExtractionOutcome)> = Vec::with_capacity(rectified.len());
        for artifact in &rectified {
            let outcome = extract::extract_outcome(Arc::clone(&self.extractor), artifact).await;
            outcomes.push((artifact.to_string_lossy().into_owned(), outcome));
        }

        // ── Stage 4: assemble the envelope ───────────────────────────────
        let envelope = ResultEnvelope::from_outcomes(
            process_id.to_string(),
            timestamp,
            Some(input_ref.to_string()),
            invoice_count,
            detected_count,
            outcomes,
        );
        info!(
            "{process_id}: {} → {}/{} extracted",
            detected_count, envelope.success_count, envelope.results.len()
        );
        Ok(envelope)
    }

    fn error_envelope(
        &self,
        process_id: String,
        timestamp: u64,
        input_image: Option<&str>,
        error: InvoiceError,
    ) -> ResultEnvelope {
        warn!("[{process_id}] {error}");
        ResultEnvelope::error(
            process_id,
            timestamp,
            input_image.map(str::to_string),
            format!("processing failed: {error}"),
            Some(format!("{error:?}")),
        )
    }
}

/// Identifier unique enough to correlate logs and responses:
/// wall-clock seconds plus a stable hash of the input reference.
fn make_process_id(timestamp: u64, input_ref: &str) -> String {
    let mut hasher = DefaultHasher::new();
    input_ref.hash(&mut hasher);
    format!("process_{timestamp}_{}", hasher.finish() % 10_000)
}
