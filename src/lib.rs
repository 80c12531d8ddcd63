//! # invoice2json
//!
//! Detect, rectify and OCR photographed invoices into structured JSON.
//!
//! ## Pipeline Overview
//!
//! ```text
//! image
//!  │
//!  ├─ 1. Input     path, raw bytes, or base64 payload → readable file
//!  ├─ 2. Detect    region detection, clamp boxes, write crop artifacts
//!  ├─ 3. Rectify   external batch program over a private staging pair
//!  ├─ 4. Extract   per-crop OCR with per-item failure isolation
//!  └─ 5. Envelope  uniform status/counts/results object
//! ```
//!
//! Every invocation runs inside its own uniquely-named workspace directory
//! that is reclaimed on every exit path, so any number of invocations can
//! overlap without sharing filesystem state. The three model stages are
//! injected collaborators ([`Detector`], [`Rectifier`], [`TextExtractor`]);
//! tests substitute fakes, the CLI wires in Python bridge scripts and the
//! DocGeoNet subprocess.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use invoice2json::{InvoiceProcessor, ProcessorConfig};
//! use invoice2json::bridge::{PyDetector, PyExtractor};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ProcessorConfig::default();
//!     let processor = InvoiceProcessor::with_docgeonet(
//!         Arc::new(PyDetector::new("python3", "bridge/detect.py", "best.pt")),
//!         Arc::new(PyExtractor::new("python3", "bridge/ocr.py", "donut_cord_v2")),
//!         config,
//!     );
//!     let envelope = processor.process_image("invoice.jpg").await;
//!     println!("{}", serde_json::to_string_pretty(&envelope).unwrap());
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `invoice2json` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod bridge;
pub mod config;
pub mod envelope;
pub mod error;
pub mod pipeline;
pub mod process;
pub mod workspace;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ProcessorConfig, ProcessorConfigBuilder};
pub use envelope::{ItemResult, ResultEnvelope, Status};
pub use error::InvoiceError;
pub use pipeline::detect::{CropArtifact, DetectedBox, Detector};
pub use pipeline::extract::{ExtractionOutcome, TextExtractor};
pub use pipeline::rectify::{DocGeoNetRectifier, Rectifier};
pub use process::InvoiceProcessor;
pub use workspace::Workspace;
