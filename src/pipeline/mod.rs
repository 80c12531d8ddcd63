//! Pipeline stages for invoice processing.
//!
//! Each submodule implements exactly one transformation step. Keeping
//! stages separate makes each independently testable and lets us swap a
//! collaborator (detector, rectifier, extractor) without touching the
//! others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ detect ──▶ rectify ──▶ extract
//! (path/bytes  (crop       (external    (per-artifact
//!  /base64)    regions)    batch)       OCR)
//! ```
//!
//! 1. [`input`]   — normalise a path, byte payload, or base64 payload to a
//!    readable image file
//! 2. [`detect`]  — run region detection, clamp boxes, write crop artifacts
//! 3. [`rectify`] — stage crops for the external rectification program and
//!    harvest its outputs
//! 4. [`extract`] — run text extraction per rectified artifact, isolating
//!    per-item failures

pub mod detect;
pub mod extract;
pub mod input;
pub mod rectify;
