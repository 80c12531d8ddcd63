//! Python bridge collaborators.
//!
//! The detection and extraction models run under Python (ultralytics /
//! transformers). Rather than linking them, these bridges shell out to a
//! small script and parse its stdout — the same contract the CLI's
//! `--detector-script` / `--ocr-script` flags expose. The library accepts
//! any [`Detector`]/[`TextExtractor`]; these are merely the defaults the
//! binary wires in.
//!
//! Bridge protocol:
//! * detector script: `python3 <script> --image <path> --model <weights>
//!   --conf <f> --imgsz <n>` → stdout is a JSON array of
//!   `{"x1":…,"y1":…,"x2":…,"y2":…,"confidence":…}` objects.
//! * extractor script: `python3 <script> --image <path> --model <dir>` →
//!   stdout is the raw model output (JSON or free text).

use crate::pipeline::detect::{BoxError, DetectedBox, Detector};
use crate::pipeline::extract::TextExtractor;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Deserialize)]
struct BridgeBox {
    x1: i64,
    y1: i64,
    x2: i64,
    y2: i64,
    #[serde(default)]
    confidence: f32,
}

fn run_script(python_bin: &str, script: &Path, args: &[(&str, &str)]) -> Result<String, BoxError> {
    let mut cmd = Command::new(python_bin);
    cmd.arg(script);
    for (flag, value) in args {
        cmd.arg(flag).arg(value);
    }
    let output = cmd
        .output()
        .map_err(|e| format!("failed to invoke {}: {e}", script.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("{} failed: {}", script.display(), stderr.trim()).into());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// YOLO detection via a Python bridge script.
pub struct PyDetector {
    python_bin: String,
    script: PathBuf,
    model_path: PathBuf,
}

impl PyDetector {
    pub fn new(
        python_bin: impl Into<String>,
        script: impl Into<PathBuf>,
        model_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            python_bin: python_bin.into(),
            script: script.into(),
            model_path: model_path.into(),
        }
    }
}

impl Detector for PyDetector {
    fn detect(
        &self,
        image_path: &Path,
        conf: f32,
        imgsz: u32,
    ) -> Result<Vec<DetectedBox>, BoxError> {
        let stdout = run_script(
            &self.python_bin,
            &self.script,
            &[
                ("--image", &image_path.to_string_lossy()),
                ("--model", &self.model_path.to_string_lossy()),
                ("--conf", &conf.to_string()),
                ("--imgsz", &imgsz.to_string()),
            ],
        )?;

        let boxes: Vec<BridgeBox> = serde_json::from_str(&stdout)
            .map_err(|e| format!("detector bridge returned unparsable output: {e}"))?;
        Ok(boxes
            .into_iter()
            .map(|b| DetectedBox {
                x1: b.x1,
                y1: b.y1,
                x2: b.x2,
                y2: b.y2,
                confidence: b.confidence,
            })
            .collect())
    }
}

/// Donut OCR via a Python bridge script.
pub struct PyExtractor {
    python_bin: String,
    script: PathBuf,
    model_dir: PathBuf,
}

impl PyExtractor {
    pub fn new(
        python_bin: impl Into<String>,
        script: impl Into<PathBuf>,
        model_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            python_bin: python_bin.into(),
            script: script.into(),
            model_dir: model_dir.into(),
        }
    }
}

impl TextExtractor for PyExtractor {
    fn extract(&self, image_path: &Path) -> Result<String, BoxError> {
        let stdout = run_script(
            &self.python_bin,
            &self.script,
            &[
                ("--image", &image_path.to_string_lossy()),
                ("--model", &self.model_dir.to_string_lossy()),
            ],
        )?;
        Ok(stdout.trim().to_string())
    }
}
