//! Error types for the invoice2json library.
//!
//! Fatal errors abort one invocation and are carried into the returned
//! envelope as `status = "error"`:
//!
//! * [`InvoiceError`] — the pipeline cannot produce any result for this
//!   input (missing file, undecodable image, detection collaborator failed,
//!   rectification program exited non-zero).
//!
//! Per-artifact OCR failures are **not** errors at this level. They are
//! recorded as [`crate::pipeline::extract::ExtractionOutcome::Failed`]
//! entries inside the envelope so one bad crop never costs the caller the
//! remaining crops.
//!
//! Workspace-removal failures are logged and swallowed (see
//! [`crate::workspace`]); they never override a pipeline result.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors produced by the invoice pipeline.
///
/// Every variant maps to an `error` envelope; none of them crosses the
/// public `process_*` boundary as a raw `Err`.
#[derive(Debug, Error)]
pub enum InvoiceError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input image was not found at the given path.
    #[error("image file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The input reference is empty or not a usable path.
    #[error("invalid input '{input}': {detail}")]
    InvalidInput { input: String, detail: String },

    /// The file exists but cannot be decoded as an image.
    #[error("'{path}' is not a decodable image: {detail}")]
    InvalidImage { path: PathBuf, detail: String },

    /// An embedded-encoding payload could not be decoded.
    #[error("base64 decode failed: {detail}")]
    Base64Decode { detail: String },

    // ── Stage errors ──────────────────────────────────────────────────────
    /// The detection collaborator itself failed. No partial region list is
    /// meaningful without detection, so this is fatal to the invocation.
    #[error("detection failed for '{path}': {detail}")]
    Detection { path: PathBuf, detail: String },

    /// The external rectification program exited non-zero, timed out, or
    /// could not be spawned. Rectification runs as one batch, so no
    /// per-crop recovery is possible.
    #[error("rectification failed: {detail}")]
    Rectification { detail: String },

    // ── Infrastructure errors ─────────────────────────────────────────────
    /// Could not allocate or populate an invocation workspace.
    #[error("workspace I/O failed at '{path}': {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (joined task panicked, etc.).
    #[error("internal error: {0}")]
    Internal(String),
}
