//! CLI binary for invoice2json.
//!
//! A thin shim over the library crate: maps CLI flags to
//! `ProcessorConfig`, wires in the Python bridge collaborators, and prints
//! envelopes as JSON. With an image argument it processes that one file;
//! without one it scans `--input-dir` and processes every image found.

use anyhow::{Context, Result};
use clap::Parser;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use invoice2json::bridge::{PyDetector, PyExtractor};
use invoice2json::{InvoiceProcessor, ProcessorConfig, ResultEnvelope, Status};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Process one invoice photo
  invoice2json scan.jpg

  # Pretty-printed output
  invoice2json --pretty scan.jpg

  # Batch mode over a directory (4 images at a time)
  invoice2json --input-dir scans/ --concurrency 4

  # Custom model locations
  invoice2json --detector-model runs/best.pt --ocr-model ./donut_cord_v2 scan.jpg

  # Lower the detection threshold for faint documents
  invoice2json --conf 0.10 scan.jpg

EXIT STATUS:
  0  every processed image ended success / partial_success / warning
  1  at least one image ended status = error

BRIDGE SCRIPTS:
  Detection and OCR run under Python. The bridge scripts receive
  --image/--model (plus --conf/--imgsz for detection) and print the model
  output on stdout: a JSON box array for detection, raw model output for
  OCR. Defaults: bridge/detect.py and bridge/ocr.py.
"#;

/// Detect, rectify and OCR invoice photographs into structured JSON.
#[derive(Parser, Debug)]
#[command(
    name = "invoice2json",
    version,
    about = "Detect, rectify and OCR invoice photographs into structured JSON",
    arg_required_else_help = false,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Invoice image to process. Omit to run batch mode over --input-dir.
    image: Option<PathBuf>,

    /// Directory scanned in batch mode for *.jpg / *.jpeg / *.png.
    #[arg(long, env = "INVOICE2JSON_INPUT_DIR", default_value = "test_images")]
    input_dir: PathBuf,

    /// Detection confidence threshold (0.0–1.0).
    #[arg(long, env = "INVOICE2JSON_CONF", default_value_t = 0.20)]
    conf: f32,

    /// Detection inference size in pixels.
    #[arg(long, env = "INVOICE2JSON_IMGSZ", default_value_t = 640)]
    imgsz: u32,

    /// DocGeoNet installation directory.
    #[arg(long, env = "INVOICE2JSON_RECTIFIER_DIR", default_value = "DocGeoNet")]
    rectifier_dir: PathBuf,

    /// Kill the rectification subprocess after this many seconds.
    #[arg(long, env = "INVOICE2JSON_RECTIFY_TIMEOUT", default_value_t = 300)]
    rectify_timeout: u64,

    /// Python interpreter for the rectifier and bridge scripts.
    #[arg(long, env = "INVOICE2JSON_PYTHON", default_value = "python3")]
    python: String,

    /// Detection bridge script.
    #[arg(long, env = "INVOICE2JSON_DETECTOR_SCRIPT", default_value = "bridge/detect.py")]
    detector_script: PathBuf,

    /// Detection model weights.
    #[arg(long, env = "INVOICE2JSON_DETECTOR_MODEL", default_value = "best.pt")]
    detector_model: PathBuf,

    /// OCR bridge script.
    #[arg(long, env = "INVOICE2JSON_OCR_SCRIPT", default_value = "bridge/ocr.py")]
    ocr_script: PathBuf,

    /// OCR model directory.
    #[arg(long, env = "INVOICE2JSON_OCR_MODEL", default_value = "donut_cord_v2")]
    ocr_model: PathBuf,

    /// Concurrent invocations in batch mode.
    #[arg(short, long, env = "INVOICE2JSON_CONCURRENCY", default_value_t = 2)]
    concurrency: usize,

    /// Pretty-print the JSON output.
    #[arg(long, env = "INVOICE2JSON_PRETTY")]
    pretty: bool,

    /// Disable the batch-mode progress bar.
    #[arg(long, env = "INVOICE2JSON_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "INVOICE2JSON_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the JSON result.
    #[arg(short, long, env = "INVOICE2JSON_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let processor = build_processor(&cli)?;

    let envelopes = match cli.image {
        Some(ref image) => {
            let path = image.to_string_lossy();
            vec![processor.process_image(&path).await]
        }
        None => run_batch(&cli, &processor).await?,
    };

    for envelope in &envelopes {
        let json = if cli.pretty {
            serde_json::to_string_pretty(envelope)
        } else {
            serde_json::to_string(envelope)
        }
        .context("failed to serialise envelope")?;
        println!("{json}");
    }

    if envelopes.iter().any(|e| e.status == Status::Error) {
        std::process::exit(1);
    }
    Ok(())
}

/// Map CLI args to a configured processor with bridge collaborators.
fn build_processor(cli: &Cli) -> Result<InvoiceProcessor> {
    let config = ProcessorConfig::builder()
        .confidence_threshold(cli.conf)
        .inference_size(cli.imgsz)
        .rectifier_dir(cli.rectifier_dir.clone())
        .python_bin(cli.python.clone())
        .rectify_timeout_secs(cli.rectify_timeout)
        .build()
        .context("invalid configuration")?;

    let detector = Arc::new(PyDetector::new(
        cli.python.clone(),
        cli.detector_script.clone(),
        cli.detector_model.clone(),
    ));
    let extractor = Arc::new(PyExtractor::new(
        cli.python.clone(),
        cli.ocr_script.clone(),
        cli.ocr_model.clone(),
    ));

    Ok(InvoiceProcessor::with_docgeonet(detector, extractor, config))
}

/// Batch mode: every image in `--input-dir`, sorted, processed concurrently.
async fn run_batch(cli: &Cli, processor: &InvoiceProcessor) -> Result<Vec<ResultEnvelope>> {
    let mut images: Vec<PathBuf> = std::fs::read_dir(&cli.input_dir)
        .with_context(|| format!("cannot read input dir '{}'", cli.input_dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        })
        .collect();
    images.sort();

    if images.is_empty() {
        anyhow::bail!("no images found in '{}'", cli.input_dir.display());
    }

    let bar = if cli.quiet || cli.no_progress {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(images.len() as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} [{bar:42.green/238}] {pos:>3}/{len} images  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        bar
    };

    // Indexed so output order matches the sorted file order even though
    // invocations complete out of order.
    let mut indexed: Vec<(usize, ResultEnvelope)> =
        stream::iter(images.iter().enumerate().map(|(i, image)| {
            let processor = processor.clone();
            let path = image.to_string_lossy().into_owned();
            let bar = bar.clone();
            async move {
                let envelope = processor.process_image(&path).await;
                bar.inc(1);
                (i, envelope)
            }
        }))
        .buffer_unordered(cli.concurrency.max(1))
        .collect()
        .await;
    bar.finish_and_clear();

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, e)| e).collect())
}
