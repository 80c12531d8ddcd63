//! The uniform per-invocation result envelope.
//!
//! Every front door (CLI single-shot, CLI batch, file upload, base64
//! upload) receives the same shape. The `status` field is the single source
//! of truth for success/failure triage; `message` is human-readable only
//! and carries no contract.

use crate::pipeline::extract::ExtractionOutcome;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Overall invocation status.
///
/// | status            | meaning                                        |
/// |-------------------|------------------------------------------------|
/// | `success`         | every extraction succeeded (or nothing to do)  |
/// | `partial_success` | some extractions succeeded, some failed        |
/// | `warning`         | no invoice regions were detected               |
/// | `error`           | fatal stage failure, or every extraction failed|
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    PartialSuccess,
    Warning,
    Error,
}

/// One per-artifact entry in `results`.
///
/// Internally tagged on `status` so the serialised form is exactly
/// `{"image_path": …, "status": "success", "ocr_data": …}` and friends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemResult {
    /// The extractor produced parseable structured data.
    Success {
        image_path: String,
        ocr_data: serde_json::Value,
    },
    /// The extractor produced output that is not valid JSON; the raw text
    /// is preserved rather than discarded.
    PartialSuccess {
        image_path: String,
        ocr_text: String,
    },
    /// The extractor failed for this artifact only.
    Error { image_path: String, error: String },
}

/// The per-invocation output envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub status: Status,
    pub message: String,
    pub process_id: String,
    /// Unix seconds at invocation entry.
    pub timestamp: u64,
    pub input_image: Option<String>,
    /// Number of usable crop artifacts produced by detection.
    pub invoice_count: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub results: Vec<ItemResult>,
    /// Extended diagnostics for `error` envelopes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    /// `"bytes"` or `"base64"` when the input arrived as a payload rather
    /// than a path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
}

/// Current wall-clock time as unix seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Resolve the overall status from per-item tallies.
///
/// `error` only when nothing succeeded and at least one item failed;
/// `partial_success` when both occurred; zero regions is `warning`
/// (decided upstream, before any extraction runs); everything else —
/// including zero rectified artifacts after a clean rectification — is
/// `success`.
fn resolve_status(success_count: usize, error_count: usize) -> Status {
    if success_count == 0 && error_count > 0 {
        Status::Error
    } else if success_count > 0 && error_count > 0 {
        Status::PartialSuccess
    } else {
        Status::Success
    }
}

impl ResultEnvelope {
    /// Aggregate extraction outcomes into the final envelope.
    ///
    /// `outcomes` pairs each rectified artifact path with its extraction
    /// result, in the stable sorted order established at crop time.
    /// Invariant: `success_count + error_count == results.len()`.
    pub fn from_outcomes(
        process_id: String,
        timestamp: u64,
        input_image: Option<String>,
        invoice_count: usize,
        detected_count: usize,
        outcomes: Vec<(String, ExtractionOutcome)>,
    ) -> ResultEnvelope {
        let mut results = Vec::with_capacity(outcomes.len());
        let mut success_count = 0;
        let mut error_count = 0;

        for (image_path, outcome) in outcomes {
            match outcome {
                ExtractionOutcome::Structured(ocr_data) => {
                    success_count += 1;
                    results.push(ItemResult::Success {
                        image_path,
                        ocr_data,
                    });
                }
                ExtractionOutcome::PartialText(ocr_text) => {
                    success_count += 1;
                    results.push(ItemResult::PartialSuccess {
                        image_path,
                        ocr_text,
                    });
                }
                ExtractionOutcome::Failed(error) => {
                    error_count += 1;
                    results.push(ItemResult::Error { image_path, error });
                }
            }
        }

        ResultEnvelope {
            status: resolve_status(success_count, error_count),
            message: format!(
                "{detected_count} invoices detected, {success_count} succeeded, {error_count} failed"
            ),
            process_id,
            timestamp,
            input_image,
            invoice_count,
            success_count,
            error_count,
            results,
            error_details: None,
            source_type: None,
        }
    }

    /// Envelope for an invocation where detection found no regions.
    pub fn warning(
        process_id: String,
        timestamp: u64,
        input_image: Option<String>,
    ) -> ResultEnvelope {
        ResultEnvelope {
            status: Status::Warning,
            message: "no invoices detected".to_string(),
            process_id,
            timestamp,
            input_image,
            invoice_count: 0,
            success_count: 0,
            error_count: 0,
            results: Vec::new(),
            error_details: None,
            source_type: None,
        }
    }

    /// Envelope for a fatal invocation failure.
    pub fn error(
        process_id: String,
        timestamp: u64,
        input_image: Option<String>,
        message: String,
        error_details: Option<String>,
    ) -> ResultEnvelope {
        ResultEnvelope {
            status: Status::Error,
            message,
            process_id,
            timestamp,
            input_image,
            invoice_count: 0,
            success_count: 0,
            error_count: 0,
            results: Vec::new(),
            error_details,
            source_type: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outcome_set(ok: usize, text: usize, failed: usize) -> Vec<(String, ExtractionOutcome)> {
        let mut v = Vec::new();
        for i in 0..ok {
            v.push((
                format!("rec_{i:02}.png"),
                ExtractionOutcome::Structured(json!({"total": "10.00"})),
            ));
        }
        for i in 0..text {
            v.push((
                format!("txt_{i:02}.png"),
                ExtractionOutcome::PartialText("TOTAL 10.00".into()),
            ));
        }
        for i in 0..failed {
            v.push((
                format!("bad_{i:02}.png"),
                ExtractionOutcome::Failed("ocr error".into()),
            ));
        }
        v
    }

    fn build(outcomes: Vec<(String, ExtractionOutcome)>) -> ResultEnvelope {
        let n = outcomes.len();
        ResultEnvelope::from_outcomes("process_1_1".into(), 1, None, n, n, outcomes)
    }

    #[test]
    fn all_succeed_is_success() {
        let env = build(outcome_set(3, 0, 0));
        assert_eq!(env.status, Status::Success);
        assert_eq!((env.success_count, env.error_count), (3, 0));
    }

    #[test]
    fn partial_text_counts_as_success() {
        let env = build(outcome_set(1, 2, 0));
        assert_eq!(env.status, Status::Success);
        assert_eq!(env.success_count, 3);
    }

    #[test]
    fn mixed_outcomes_are_partial_success() {
        let env = build(outcome_set(2, 0, 1));
        assert_eq!(env.status, Status::PartialSuccess);
        assert_eq!((env.success_count, env.error_count), (2, 1));
    }

    #[test]
    fn all_fail_is_error() {
        let env = build(outcome_set(0, 0, 3));
        assert_eq!(env.status, Status::Error);
    }

    #[test]
    fn empty_outcomes_are_success() {
        // rectification produced nothing to extract
        let env = build(Vec::new());
        assert_eq!(env.status, Status::Success);
        assert_eq!(env.results.len(), 0);
    }

    #[test]
    fn count_invariant_holds() {
        for (ok, text, failed) in [(0, 0, 0), (3, 0, 0), (1, 1, 1), (0, 0, 5), (0, 4, 2)] {
            let env = build(outcome_set(ok, text, failed));
            assert_eq!(env.success_count + env.error_count, env.results.len());
        }
    }

    #[test]
    fn serialised_shape_matches_contract() {
        let env = build(outcome_set(1, 0, 1));
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["status"], "partial_success");
        assert_eq!(v["results"][0]["status"], "success");
        assert_eq!(v["results"][0]["ocr_data"]["total"], "10.00");
        assert_eq!(v["results"][1]["status"], "error");
        assert!(v["results"][1]["error"].is_string());
        // optional diagnostics are omitted, not null
        assert!(v.get("error_details").is_none());
        assert!(v.get("source_type").is_none());
    }

    #[test]
    fn warning_envelope_is_empty() {
        let env = ResultEnvelope::warning("p".into(), 9, Some("a.jpg".into()));
        assert_eq!(env.status, Status::Warning);
        assert_eq!(env.invoice_count, 0);
        assert!(env.results.is_empty());
    }
}
