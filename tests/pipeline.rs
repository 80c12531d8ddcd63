//! Integration tests for the invoice pipeline.
//!
//! All three model collaborators are replaced with fakes that honour the
//! same contracts (box lists, the rectifier's directory protocol, raw OCR
//! strings), so every test runs hermetically: no Python, no weights, no
//! network. Each test pins its workspaces to a private temp dir so leftover
//! directories are observable.

use invoice2json::pipeline::detect::{BoxError, DetectedBox, Detector};
use invoice2json::pipeline::rectify::Rectifier;
use invoice2json::{
    InvoiceProcessor, ProcessorConfig, ResultEnvelope, Status, TextExtractor,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ── Fake collaborators ───────────────────────────────────────────────────

/// Returns the same box list for every image.
struct FakeDetector {
    boxes: Vec<DetectedBox>,
}

impl FakeDetector {
    fn with_regions(n: usize) -> Self {
        // 40px-wide boxes side by side inside a 400x200 source image
        let boxes = (0..n)
            .map(|i| DetectedBox {
                x1: (i * 50) as i64,
                y1: 10,
                x2: (i * 50 + 40) as i64,
                y2: 180,
                confidence: 0.9,
            })
            .collect();
        Self { boxes }
    }
}

impl Detector for FakeDetector {
    fn detect(&self, _: &Path, _: f32, _: u32) -> Result<Vec<DetectedBox>, BoxError> {
        Ok(self.boxes.clone())
    }
}

struct FailingDetector;
impl Detector for FailingDetector {
    fn detect(&self, _: &Path, _: f32, _: u32) -> Result<Vec<DetectedBox>, BoxError> {
        Err("CUDA device lost".into())
    }
}

/// Honours the directory contract: each staged file yields `{stem}_rec.png`.
struct FakeRectifier;
impl Rectifier for FakeRectifier {
    fn run_batch(&self, distorted: &Path, rectified: &Path) -> Result<(), BoxError> {
        for entry in std::fs::read_dir(distorted)? {
            let entry = entry?;
            let stem = entry
                .path()
                .file_stem()
                .unwrap()
                .to_string_lossy()
                .into_owned();
            std::fs::copy(entry.path(), rectified.join(format!("{stem}_rec.png")))?;
        }
        Ok(())
    }
}

struct FailingRectifier;
impl Rectifier for FailingRectifier {
    fn run_batch(&self, _: &Path, _: &Path) -> Result<(), BoxError> {
        Err("inference.py exited with status 1".into())
    }
}

/// Keyed on the artifact filename: region 00 parses as JSON, region 01
/// errors, everything else returns free text.
struct ScriptedExtractor;
impl TextExtractor for ScriptedExtractor {
    fn extract(&self, image_path: &Path) -> Result<String, BoxError> {
        let name = image_path.file_name().unwrap().to_string_lossy();
        if name.contains("_01_") || name.ends_with("_01_rec.png") {
            Err("decoder produced no tokens".into())
        } else if name.contains("_00_") || name.ends_with("_00_rec.png") {
            Ok(r#"{"total": "10.00"}"#.to_string())
        } else {
            Ok("TOTAL 42.50".to_string())
        }
    }
}

struct JsonExtractor;
impl TextExtractor for JsonExtractor {
    fn extract(&self, image_path: &Path) -> Result<String, BoxError> {
        Ok(format!(
            r#"{{"source": "{}"}}"#,
            image_path.file_name().unwrap().to_string_lossy()
        ))
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn write_source_image(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    image::RgbImage::from_pixel(400, 200, image::Rgb([180, 180, 180]))
        .save(&path)
        .unwrap();
    path
}

fn processor(
    detector: Arc<dyn Detector>,
    rectifier: Arc<dyn Rectifier>,
    extractor: Arc<dyn TextExtractor>,
    workspace_root: &Path,
) -> InvoiceProcessor {
    let config = ProcessorConfig::builder()
        .workspace_root(workspace_root)
        .build()
        .unwrap();
    InvoiceProcessor::new(detector, rectifier, extractor, config)
}

/// Names of directories left under the workspace base.
fn leftover_dirs(base: &Path) -> Vec<String> {
    match std::fs::read_dir(base) {
        Ok(rd) => rd
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn result_paths(envelope: &ResultEnvelope) -> Vec<String> {
    envelope
        .results
        .iter()
        .map(|r| match r {
            invoice2json::ItemResult::Success { image_path, .. } => image_path.clone(),
            invoice2json::ItemResult::PartialSuccess { image_path, .. } => image_path.clone(),
            invoice2json::ItemResult::Error { image_path, .. } => image_path.clone(),
        })
        .collect()
}

// ── End-to-end scenarios ─────────────────────────────────────────────────

#[tokio::test]
async fn two_regions_one_extraction_fails_is_partial_success() {
    let src_dir = tempfile::tempdir().unwrap();
    let ws_dir = tempfile::tempdir().unwrap();
    let image = write_source_image(src_dir.path(), "scan.jpg");

    let p = processor(
        Arc::new(FakeDetector::with_regions(2)),
        Arc::new(FakeRectifier),
        Arc::new(ScriptedExtractor),
        ws_dir.path(),
    );
    let env = p.process_image(image.to_str().unwrap()).await;

    assert_eq!(env.status, Status::PartialSuccess);
    assert_eq!(env.invoice_count, 2);
    assert_eq!(env.success_count, 1);
    assert_eq!(env.error_count, 1);
    assert_eq!(env.results.len(), 2);
    assert_eq!(env.success_count + env.error_count, env.results.len());
    assert_eq!(env.input_image.as_deref(), Some(image.to_str().unwrap()));
    assert!(env.process_id.starts_with("process_"));

    match &env.results[0] {
        invoice2json::ItemResult::Success { ocr_data, .. } => {
            assert_eq!(ocr_data["total"], "10.00");
        }
        other => panic!("expected structured success first, got {other:?}"),
    }
    match &env.results[1] {
        invoice2json::ItemResult::Error { error, .. } => {
            assert!(error.contains("decoder produced no tokens"));
        }
        other => panic!("expected error second, got {other:?}"),
    }

    assert!(leftover_dirs(ws_dir.path()).is_empty(), "workspace leaked");
}

#[tokio::test]
async fn all_extractions_succeed_is_success() {
    let src_dir = tempfile::tempdir().unwrap();
    let ws_dir = tempfile::tempdir().unwrap();
    let image = write_source_image(src_dir.path(), "scan.jpg");

    let p = processor(
        Arc::new(FakeDetector::with_regions(3)),
        Arc::new(FakeRectifier),
        Arc::new(JsonExtractor),
        ws_dir.path(),
    );
    let env = p.process_image(image.to_str().unwrap()).await;

    assert_eq!(env.status, Status::Success);
    assert_eq!(env.invoice_count, 3);
    assert_eq!((env.success_count, env.error_count), (3, 0));
}

// ── Short-circuits and fatal stages ──────────────────────────────────────

#[tokio::test]
async fn zero_regions_is_warning_and_cleans_up() {
    let src_dir = tempfile::tempdir().unwrap();
    let ws_dir = tempfile::tempdir().unwrap();
    let image = write_source_image(src_dir.path(), "blank.jpg");

    let p = processor(
        Arc::new(FakeDetector::with_regions(0)),
        Arc::new(FakeRectifier),
        Arc::new(JsonExtractor),
        ws_dir.path(),
    );
    let env = p.process_image(image.to_str().unwrap()).await;

    assert_eq!(env.status, Status::Warning);
    assert_eq!(env.invoice_count, 0);
    assert!(env.results.is_empty());
    assert!(leftover_dirs(ws_dir.path()).is_empty(), "workspace leaked");
}

#[tokio::test]
async fn missing_input_is_error_with_no_workspace() {
    let ws_dir = tempfile::tempdir().unwrap();
    let p = processor(
        Arc::new(FakeDetector::with_regions(1)),
        Arc::new(FakeRectifier),
        Arc::new(JsonExtractor),
        ws_dir.path(),
    );

    let env = p.process_image("/no/such/image.jpg").await;
    assert_eq!(env.status, Status::Error);
    assert!(env.results.is_empty());
    // validation fails before any workspace is allocated
    assert!(leftover_dirs(ws_dir.path()).is_empty());
}

#[tokio::test]
async fn detection_failure_is_error_and_cleans_up() {
    let src_dir = tempfile::tempdir().unwrap();
    let ws_dir = tempfile::tempdir().unwrap();
    let image = write_source_image(src_dir.path(), "scan.jpg");

    let p = processor(
        Arc::new(FailingDetector),
        Arc::new(FakeRectifier),
        Arc::new(JsonExtractor),
        ws_dir.path(),
    );
    let env = p.process_image(image.to_str().unwrap()).await;

    assert_eq!(env.status, Status::Error);
    assert!(env.message.contains("CUDA device lost"));
    assert!(env.error_details.is_some());
    assert!(leftover_dirs(ws_dir.path()).is_empty(), "workspace leaked");
}

#[tokio::test]
async fn rectification_failure_is_error_and_cleans_up() {
    let src_dir = tempfile::tempdir().unwrap();
    let ws_dir = tempfile::tempdir().unwrap();
    let image = write_source_image(src_dir.path(), "scan.jpg");

    let p = processor(
        Arc::new(FakeDetector::with_regions(2)),
        Arc::new(FailingRectifier),
        Arc::new(JsonExtractor),
        ws_dir.path(),
    );
    let env = p.process_image(image.to_str().unwrap()).await;

    assert_eq!(env.status, Status::Error);
    assert!(env.message.contains("exited with status 1"));
    // both the invocation workspace and the rectification staging are gone
    assert!(leftover_dirs(ws_dir.path()).is_empty(), "workspace leaked");
}

#[tokio::test]
async fn all_extractions_failing_is_error_but_cleanup_still_runs() {
    struct AlwaysFails;
    impl TextExtractor for AlwaysFails {
        fn extract(&self, _: &Path) -> Result<String, BoxError> {
            Err("no tokens".into())
        }
    }

    let src_dir = tempfile::tempdir().unwrap();
    let ws_dir = tempfile::tempdir().unwrap();
    let image = write_source_image(src_dir.path(), "scan.jpg");

    let p = processor(
        Arc::new(FakeDetector::with_regions(3)),
        Arc::new(FakeRectifier),
        Arc::new(AlwaysFails),
        ws_dir.path(),
    );
    let env = p.process_image(image.to_str().unwrap()).await;

    assert_eq!(env.status, Status::Error);
    assert_eq!((env.success_count, env.error_count), (0, 3));
    assert_eq!(env.results.len(), 3);
    assert!(leftover_dirs(ws_dir.path()).is_empty(), "workspace leaked");
}

// ── Region clamping through the pipeline ─────────────────────────────────

#[tokio::test]
async fn out_of_bounds_regions_are_clamped_and_degenerate_ones_dropped() {
    struct WildDetector;
    impl Detector for WildDetector {
        fn detect(&self, _: &Path, _: f32, _: u32) -> Result<Vec<DetectedBox>, BoxError> {
            Ok(vec![
                // spills over every edge → clamped, survives
                DetectedBox { x1: -50, y1: -50, x2: 900, y2: 900, confidence: 0.8 },
                // entirely outside → collapses, dropped
                DetectedBox { x1: 500, y1: 10, x2: 600, y2: 90, confidence: 0.7 },
            ])
        }
    }

    let src_dir = tempfile::tempdir().unwrap();
    let ws_dir = tempfile::tempdir().unwrap();
    let image = write_source_image(src_dir.path(), "scan.jpg");

    let p = processor(
        Arc::new(WildDetector),
        Arc::new(FakeRectifier),
        Arc::new(JsonExtractor),
        ws_dir.path(),
    );
    let env = p.process_image(image.to_str().unwrap()).await;

    assert_eq!(env.status, Status::Success);
    // 2 detected, 1 usable
    assert_eq!(env.invoice_count, 1);
    assert_eq!(env.results.len(), 1);
    let paths = result_paths(&env);
    assert!(paths[0].ends_with("crop_scan_00_rec.png"), "got {}", paths[0]);
}

// ── Ordering determinism ─────────────────────────────────────────────────

#[tokio::test]
async fn rerun_yields_identical_artifact_names_in_identical_order() {
    let src_dir = tempfile::tempdir().unwrap();
    let image = write_source_image(src_dir.path(), "scan42.png");

    let run = || async {
        let ws_dir = tempfile::tempdir().unwrap();
        let p = processor(
            Arc::new(FakeDetector::with_regions(4)),
            Arc::new(FakeRectifier),
            Arc::new(JsonExtractor),
            ws_dir.path(),
        );
        let env = p.process_image(image.to_str().unwrap()).await;
        result_paths(&env)
            .iter()
            .map(|p| Path::new(p).file_name().unwrap().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
    };

    let first = run().await;
    let second = run().await;
    assert_eq!(
        first,
        vec![
            "crop_scan42_00_rec.png",
            "crop_scan42_01_rec.png",
            "crop_scan42_02_rec.png",
            "crop_scan42_03_rec.png",
        ]
    );
    assert_eq!(first, second);
}

// ── Concurrent isolation ─────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn fifty_concurrent_invocations_never_share_state() {
    let src_dir = tempfile::tempdir().unwrap();
    let ws_dir = tempfile::tempdir().unwrap();

    // Each invocation gets its own source image and its own expected
    // region count, so cross-contamination would show up in the counts.
    let inputs: Vec<(PathBuf, usize)> = (0..50)
        .map(|i| {
            let regions = i % 3 + 1;
            let image = write_source_image(src_dir.path(), &format!("scan{i:02}.png"));
            (image, regions)
        })
        .collect();

    let handles: Vec<_> = inputs
        .iter()
        .map(|(image, regions)| {
            let p = processor(
                Arc::new(FakeDetector::with_regions(*regions)),
                Arc::new(FakeRectifier),
                Arc::new(JsonExtractor),
                ws_dir.path(),
            );
            let path = image.to_string_lossy().into_owned();
            let expected = *regions;
            tokio::spawn(async move {
                let env = p.process_image(&path).await;
                (env, expected)
            })
        })
        .collect();

    let mut all_paths = std::collections::HashSet::new();
    for handle in handles {
        let (env, expected) = handle.await.unwrap();
        assert_eq!(env.status, Status::Success);
        assert_eq!(env.invoice_count, expected, "count cross-contamination");
        assert_eq!(env.results.len(), expected);
        for path in result_paths(&env) {
            assert!(all_paths.insert(path.clone()), "path collision: {path}");
        }
    }

    assert!(
        leftover_dirs(ws_dir.path()).is_empty(),
        "leaked workspaces: {:?}",
        leftover_dirs(ws_dir.path())
    );
}

// ── Payload front doors ──────────────────────────────────────────────────

fn png_payload() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(400, 200, image::Rgb([170, 170, 170]));
    let mut buf = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

#[tokio::test]
async fn bytes_payload_is_processed_and_tagged() {
    let ws_dir = tempfile::tempdir().unwrap();
    let p = processor(
        Arc::new(FakeDetector::with_regions(1)),
        Arc::new(FakeRectifier),
        Arc::new(JsonExtractor),
        ws_dir.path(),
    );

    let env = p.process_bytes(&png_payload(), Some("upload.png")).await;
    assert_eq!(env.status, Status::Success);
    assert_eq!(env.invoice_count, 1);
    assert_eq!(env.source_type.as_deref(), Some("bytes"));
    assert!(leftover_dirs(ws_dir.path()).is_empty());
}

#[tokio::test]
async fn base64_payload_with_data_uri_prefix_is_processed() {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    let ws_dir = tempfile::tempdir().unwrap();
    let p = processor(
        Arc::new(FakeDetector::with_regions(1)),
        Arc::new(FakeRectifier),
        Arc::new(JsonExtractor),
        ws_dir.path(),
    );

    let payload = format!("data:image/png;base64,{}", STANDARD.encode(png_payload()));
    let env = p.process_base64(&payload, None).await;
    assert_eq!(env.status, Status::Success);
    assert_eq!(env.source_type.as_deref(), Some("base64"));
}

#[tokio::test]
async fn malformed_base64_is_typed_error_envelope() {
    let ws_dir = tempfile::tempdir().unwrap();
    let p = processor(
        Arc::new(FakeDetector::with_regions(1)),
        Arc::new(FakeRectifier),
        Arc::new(JsonExtractor),
        ws_dir.path(),
    );

    let env = p.process_base64("%%% not base64 %%%", None).await;
    assert_eq!(env.status, Status::Error);
    assert_eq!(env.source_type.as_deref(), Some("base64"));
    assert!(env.results.is_empty());
}
