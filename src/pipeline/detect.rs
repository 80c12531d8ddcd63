//! Region detection and crop extraction.
//!
//! Wraps the detection collaborator: raw boxes come back in source-image
//! pixel coordinates but are not trusted — they are clamped against the
//! actual image bounds and degenerate (zero-area) boxes are dropped before
//! any crop is written. Crop artifacts are named
//! `crop_{stem}_{idx:02}.jpg` from the source stem and the raw detection
//! index, so the on-disk ordering is stable for a given detection output.
//!
//! Runs inside `spawn_blocking`: image decode, model inference, and crop
//! encoding are all CPU-bound.

use crate::error::InvoiceError;
use image::GenericImageView;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Boxed error type collaborators may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The detection collaborator: one inference call per source image.
///
/// Implementations must be safe to call from multiple invocations at once;
/// a handle that is not is expected to serialise internally.
pub trait Detector: Send + Sync {
    /// Detect candidate invoice regions in the image at `image_path`.
    ///
    /// Returned boxes may lie partially or fully outside the image; the
    /// adapter clamps them. A `conf`/`imgsz` pair is passed through to the
    /// underlying model.
    fn detect(&self, image_path: &Path, conf: f32, imgsz: u32) -> Result<Vec<DetectedBox>, BoxError>;
}

/// A raw detected region, as returned by the collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedBox {
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
    pub confidence: f32,
}

/// A crop file written into the invocation workspace.
#[derive(Debug, Clone)]
pub struct CropArtifact {
    pub path: PathBuf,
    pub region_index: usize,
    pub confidence: f32,
}

/// Clamp `v` into `[lo, hi]`.
fn clamp(v: i64, lo: i64, hi: i64) -> i64 {
    v.max(lo).min(hi)
}

/// A box clamped into image bounds, or `None` if clamping collapses it.
///
/// Coordinates are clamped into `[0, w-1] × [0, h-1]`; the upper bounds are
/// exclusive at crop time, so a clamped box must keep `x1 < x2 && y1 < y2`
/// to survive.
fn clamp_box(b: &DetectedBox, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let x1 = clamp(b.x1, 0, width as i64 - 1);
    let x2 = clamp(b.x2, 0, width as i64 - 1);
    let y1 = clamp(b.y1, 0, height as i64 - 1);
    let y2 = clamp(b.y2, 0, height as i64 - 1);
    if x1 < x2 && y1 < y2 {
        Some((x1 as u32, y1 as u32, x2 as u32, y2 as u32))
    } else {
        None
    }
}

/// Detect regions in `image_path` and write crop artifacts into `crop_dir`.
///
/// # Returns
/// `(artifacts, detected_count)` — the usable crops in detection-index
/// order, and the raw number of boxes the collaborator reported (which may
/// be larger when some boxes clamp to nothing).
///
/// # Errors
/// A collaborator failure is fatal ([`InvoiceError::Detection`]) — no
/// partial region list is meaningful without detection. An unreadable or
/// undecodable source image is [`InvoiceError::InvalidImage`].
pub async fn extract_regions(
    detector: Arc<dyn Detector>,
    image_path: &Path,
    crop_dir: &Path,
    conf: f32,
    imgsz: u32,
) -> Result<(Vec<CropArtifact>, usize), InvoiceError> {
    let image_path = image_path.to_path_buf();
    let crop_dir = crop_dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        extract_regions_blocking(&*detector, &image_path, &crop_dir, conf, imgsz)
    })
    .await
    .map_err(|e| InvoiceError::Internal(format!("detection task panicked: {e}")))?
}

/// Blocking implementation of detection + cropping.
fn extract_regions_blocking(
    detector: &dyn Detector,
    image_path: &Path,
    crop_dir: &Path,
    conf: f32,
    imgsz: u32,
) -> Result<(Vec<CropArtifact>, usize), InvoiceError> {
    let img = image::open(image_path).map_err(|e| InvoiceError::InvalidImage {
        path: image_path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let (width, height) = img.dimensions();

    let boxes = detector
        .detect(image_path, conf, imgsz)
        .map_err(|e| InvoiceError::Detection {
            path: image_path.to_path_buf(),
            detail: e.to_string(),
        })?;
    let detected_count = boxes.len();
    info!(
        "{}: {} invoices detected",
        image_path.file_name().unwrap_or_default().to_string_lossy(),
        detected_count
    );

    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());

    let mut artifacts = Vec::with_capacity(detected_count);
    for (idx, b) in boxes.iter().enumerate() {
        let Some((x1, y1, x2, y2)) = clamp_box(b, width, height) else {
            warn!("region {idx} clamps to zero area, dropped: {b:?}");
            continue;
        };

        let crop = img.crop_imm(x1, y1, x2 - x1, y2 - y1);
        let cpath = crop_dir.join(format!("crop_{stem}_{idx:02}.jpg"));
        crop.to_rgb8()
            .save(&cpath)
            .map_err(|e| InvoiceError::Workspace {
                path: cpath.clone(),
                source: std::io::Error::other(e),
            })?;
        debug!(
            "crop {idx}: ({x1},{y1})-({x2},{y2}) conf {:.2} → {}",
            b.confidence,
            cpath.display()
        );

        artifacts.push(CropArtifact {
            path: cpath,
            region_index: idx,
            confidence: b.confidence,
        });
    }

    Ok((artifacts, detected_count))
}
