//! Text extraction per rectified artifact.
//!
//! The extraction collaborator is called once per artifact — never batched —
//! so one failing image cannot affect its siblings. Whatever the
//! collaborator does (returns an error, or even panics inside its
//! inference call), the adapter converts it into a [`ExtractionOutcome`]
//! and the pipeline keeps going. This per-item isolation is the core
//! resilience property of the pipeline.

use crate::pipeline::detect::BoxError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// The text-extraction collaborator: one inference call per image.
pub trait TextExtractor: Send + Sync {
    /// Extract text/structure from the image; the returned string may or
    /// may not be JSON.
    fn extract(&self, image_path: &Path) -> Result<String, BoxError>;
}

/// Result of extraction for one rectified artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    /// Output parsed as JSON.
    Structured(serde_json::Value),
    /// Output was not valid JSON; raw text preserved.
    PartialText(String),
    /// The collaborator failed for this artifact.
    Failed(String),
}

/// Run extraction for one artifact, absorbing any collaborator failure.
///
/// Never returns an error: a collaborator `Err` — or a panic, which
/// surfaces here as the blocking task's join error — becomes
/// [`ExtractionOutcome::Failed`].
pub async fn extract_outcome(
    extractor: Arc<dyn TextExtractor>,
    artifact: &Path,
) -> ExtractionOutcome {
    let path: PathBuf = artifact.to_path_buf();
    debug!("starting OCR: {}", path.display());

    let joined =
        tokio::task::spawn_blocking(move || extractor.extract(&path).map_err(|e| e.to_string()))
            .await;

    let raw = match joined {
        Ok(Ok(raw)) => raw,
        Ok(Err(detail)) => {
            let msg = format!("OCR error: {detail}");
            warn!("{}: {msg}", artifact.display());
            return ExtractionOutcome::Failed(msg);
        }
        Err(join_err) => {
            let msg = format!("OCR error: extraction panicked: {join_err}");
            warn!("{}: {msg}", artifact.display());
            return ExtractionOutcome::Failed(msg);
        }
    };

    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(value) => ExtractionOutcome::Structured(value),
        Err(_) => ExtractionOutcome::PartialText(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedExtractor(&'static str);
    impl TextExtractor for FixedExtractor {
        fn extract(&self, _: &Path) -> Result<String, BoxError> {
            Ok(self.0.to_string())
        }
    }

    struct FailingExtractor;
    impl TextExtractor for FailingExtractor {
        fn extract(&self, _: &Path) -> Result<String, BoxError> {
            Err("inference OOM".into())
        }
    }

    struct PanickingExtractor;
    impl TextExtractor for PanickingExtractor {
        fn extract(&self, _: &Path) -> Result<String, BoxError> {
            panic!("model state corrupt")
        }
    }

    #[tokio::test]
    async fn json_output_is_structured() {
        let out = extract_outcome(
            Arc::new(FixedExtractor(r#"{"total": "10.00"}"#)),
            Path::new("a_rec.png"),
        )
        .await;
        assert_eq!(out, ExtractionOutcome::Structured(json!({"total": "10.00"})));
    }

    #[tokio::test]
    async fn non_json_output_falls_back_to_raw_text() {
        let out = extract_outcome(
            Arc::new(FixedExtractor("TOTAL: 10.00 TL")),
            Path::new("a_rec.png"),
        )
        .await;
        assert_eq!(out, ExtractionOutcome::PartialText("TOTAL: 10.00 TL".into()));
    }

    #[tokio::test]
    async fn collaborator_error_becomes_failed_outcome() {
        let out = extract_outcome(Arc::new(FailingExtractor), Path::new("a_rec.png")).await;
        match out {
            ExtractionOutcome::Failed(msg) => assert!(msg.contains("inference OOM")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn collaborator_panic_is_contained() {
        let out = extract_outcome(Arc::new(PanickingExtractor), Path::new("a_rec.png")).await;
        assert!(matches!(out, ExtractionOutcome::Failed(_)));
    }
}
