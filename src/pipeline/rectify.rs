//! Geometric rectification via an external batch program.
//!
//! The rectification collaborator is a separate program that consumes a
//! directory of distorted crops and writes corrected images to another
//! directory. The adapter therefore works entirely in terms of a staging
//! contract:
//!
//! 1. acquire a fresh, uniquely-named staging workspace (`distorted`/`rec`)
//!    scoped to this call only — a shared staging pair would let two
//!    overlapping calls corrupt each other's inputs and outputs;
//! 2. copy every crop into `distorted`;
//! 3. run the collaborator once over the pair;
//! 4. on success, harvest every `*_rec.png` into the caller's output dir;
//! 5. release the staging workspace on every path, success or not.
//!
//! A non-zero exit is fatal for the invocation (the batch is atomic; no
//! per-crop recovery exists). A clean exit with zero matching outputs is
//! *not* an error — it yields an empty artifact list.

use crate::error::InvoiceError;
use crate::pipeline::detect::BoxError;
use crate::workspace::Workspace;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Filename marker the rectification program appends to its outputs.
pub const RECTIFIED_SUFFIX: &str = "_rec";

/// The "run batch over directory" capability of the rectification program.
///
/// Modelled as a trait rather than a direct invocation so the pipeline can
/// be tested against a fake that reads and writes the same directory
/// contract.
pub trait Rectifier: Send + Sync {
    /// Rectify every image in `distorted_dir`, writing `{stem}_rec.png`
    /// outputs into `rectified_dir`. Both paths are absolute.
    fn run_batch(&self, distorted_dir: &Path, rectified_dir: &Path) -> Result<(), BoxError>;
}

/// Does this filename match the collaborator's output convention?
fn is_rectified_output(path: &Path) -> bool {
    let stem_ok = path
        .file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.ends_with(RECTIFIED_SUFFIX));
    let ext_ok = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("png"));
    stem_ok && ext_ok
}

/// Rectify the crops in `crop_dir`, harvesting outputs into `output_dir`.
///
/// Staging lives under `staging_base` and is removed before this function
/// returns, whatever happened in between. Returns the harvested artifact
/// paths in stable sorted order.
pub async fn rectify_crops(
    rectifier: Arc<dyn Rectifier>,
    crop_dir: &Path,
    output_dir: &Path,
    staging_base: &Path,
) -> Result<Vec<PathBuf>, InvoiceError> {
    let crop_dir = crop_dir.to_path_buf();
    let output_dir = output_dir.to_path_buf();
    let staging_base = staging_base.to_path_buf();

    tokio::task::spawn_blocking(move || {
        rectify_crops_blocking(&*rectifier, &crop_dir, &output_dir, &staging_base)
    })
    .await
    .map_err(|e| InvoiceError::Internal(format!("rectification task panicked: {e}")))?
}

/// Blocking implementation of the staging protocol.
fn rectify_crops_blocking(
    rectifier: &dyn Rectifier,
    crop_dir: &Path,
    output_dir: &Path,
    staging_base: &Path,
) -> Result<Vec<PathBuf>, InvoiceError> {
    let staging =
        Workspace::acquire(staging_base, "rectify").map_err(|e| InvoiceError::Workspace {
            path: staging_base.to_path_buf(),
            source: e,
        })?;

    // Release runs on the error path too; `staging` is moved out of the
    // closure so `Drop` additionally covers panics inside the collaborator.
    let result = run_staged(rectifier, crop_dir, output_dir, &staging);
    staging.release();
    result
}

fn run_staged(
    rectifier: &dyn Rectifier,
    crop_dir: &Path,
    output_dir: &Path,
    staging: &Workspace,
) -> Result<Vec<PathBuf>, InvoiceError> {
    let ws_err = |path: &Path, e: std::io::Error| InvoiceError::Workspace {
        path: path.to_path_buf(),
        source: e,
    };

    let distorted = staging.subdir("distorted").map_err(|e| ws_err(staging.root(), e))?;
    let rec = staging.subdir("rec").map_err(|e| ws_err(staging.root(), e))?;

    // Copy every crop into the private staging input.
    let mut staged = 0usize;
    for entry in std::fs::read_dir(crop_dir).map_err(|e| ws_err(crop_dir, e))? {
        let entry = entry.map_err(|e| ws_err(crop_dir, e))?;
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            std::fs::copy(entry.path(), distorted.join(entry.file_name()))
                .map_err(|e| ws_err(&entry.path(), e))?;
            staged += 1;
        }
    }
    debug!("staged {staged} crops for rectification");

    rectifier
        .run_batch(&distorted, &rec)
        .map_err(|e| InvoiceError::Rectification {
            detail: e.to_string(),
        })?;

    // Harvest outputs matching the naming convention.
    std::fs::create_dir_all(output_dir).map_err(|e| ws_err(output_dir, e))?;
    let mut harvested = Vec::new();
    for entry in std::fs::read_dir(&rec).map_err(|e| ws_err(&rec, e))? {
        let entry = entry.map_err(|e| ws_err(&rec, e))?;
        let src = entry.path();
        if is_rectified_output(&src) {
            let dst = output_dir.join(entry.file_name());
            std::fs::copy(&src, &dst).map_err(|e| ws_err(&src, e))?;
            harvested.push(dst);
        }
    }
    harvested.sort();
    info!("{} images rectified → {}", harvested.len(), output_dir.display());

    Ok(harvested)
}

// ── DocGeoNet subprocess runner ──────────────────────────────────────────

/// Runs the DocGeoNet inference script as a subprocess.
///
/// Invocation matches the program's own CLI (including its misspelled
/// `--distorrted_path` flag): model weight paths and directory paths are
/// passed absolute, and the working directory is the installation root so
/// the script's relative imports resolve.
pub struct DocGeoNetRectifier {
    install_dir: PathBuf,
    python_bin: String,
    timeout: Duration,
}

impl DocGeoNetRectifier {
    pub fn new(install_dir: impl Into<PathBuf>, python_bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            install_dir: install_dir.into(),
            python_bin: python_bin.into(),
            timeout,
        }
    }
}

impl Rectifier for DocGeoNetRectifier {
    fn run_batch(&self, distorted_dir: &Path, rectified_dir: &Path) -> Result<(), BoxError> {
        let install = self
            .install_dir
            .canonicalize()
            .map_err(|e| format!("rectifier dir '{}': {e}", self.install_dir.display()))?;
        let weights = install.join("model_pretrained");

        let mut child = Command::new(&self.python_bin)
            .arg("inference.py")
            .arg("--seg_model_path")
            .arg(weights.join("preprocess.pth"))
            .arg("--rec_model_path")
            .arg(weights.join("DocGeoNet.pth"))
            .arg("--distorrted_path")
            .arg(distorted_dir)
            .arg("--save_path")
            .arg(rectified_dir)
            .current_dir(&install)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to spawn {}: {e}", self.python_bin))?;

        // Drain stderr on a helper thread; the child would otherwise block
        // on a full pipe while we wait for it.
        let stderr = child.stderr.take();
        let drain = std::thread::spawn(move || {
            use std::io::Read;
            let mut buf = String::new();
            if let Some(mut pipe) = stderr {
                pipe.read_to_string(&mut buf).ok();
            }
            buf
        });

        // Poll for exit with a hard deadline; the program offers no
        // cooperative cancellation.
        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        warn!("rectification exceeded {:?}, killing", self.timeout);
                        child.kill().ok();
                        child.wait().ok();
                        drain.join().ok();
                        return Err(format!(
                            "rectification timed out after {}s",
                            self.timeout.as_secs()
                        )
                        .into());
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => return Err(format!("wait on rectification failed: {e}").into()),
            }
        };

        let stderr_text = drain.join().unwrap_or_default();
        if !status.success() {
            return Err(format!(
                "rectification exited with {status}: {}",
                stderr_text.trim()
            )
            .into());
        }
        Ok(())
    }
}
