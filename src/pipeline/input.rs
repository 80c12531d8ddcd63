//! Input normalisation: path, byte payload, or base64 payload → a readable
//! image file.
//!
//! The detection collaborator needs a filesystem path, so payload inputs
//! are written to a managed temp file that is removed automatically when
//! the guard drops — including on panic paths. Base64 payloads are decoded
//! (optionally stripping a `data:image/…;base64,` prefix) and sniffed as an
//! image before any pipeline work starts, so a bad upload fails fast with
//! a typed error instead of a detection failure deep in the run.

use crate::error::InvoiceError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A normalised input — either the caller's own file or a managed temp file.
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input arrived as a payload; written to a temp file kept alive until
    /// processing completes.
    Payload {
        path: PathBuf,
        _file: tempfile::NamedTempFile,
    },
}

impl ResolvedInput {
    /// Path to the image regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Payload { path, .. } => path,
        }
    }
}

/// Validate a caller-supplied path: non-empty, existing, readable.
pub fn resolve_path(input: &str) -> Result<ResolvedInput, InvoiceError> {
    if input.trim().is_empty() {
        return Err(InvoiceError::InvalidInput {
            input: input.to_string(),
            detail: "image reference must not be empty".into(),
        });
    }

    let path = PathBuf::from(input);
    if !path.exists() {
        return Err(InvoiceError::FileNotFound { path });
    }
    match std::fs::File::open(&path) {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(InvoiceError::PermissionDenied { path });
        }
        Err(_) => return Err(InvoiceError::FileNotFound { path }),
    }

    debug!("resolved local image: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// Write a raw byte payload to a managed temp file.
///
/// `filename` is advisory only; the temp file keeps its extension so the
/// image format stays recognisable from the path.
pub fn resolve_bytes(bytes: &[u8], filename: Option<&str>) -> Result<ResolvedInput, InvoiceError> {
    if bytes.is_empty() {
        return Err(InvoiceError::InvalidInput {
            input: String::new(),
            detail: "image payload must not be empty".into(),
        });
    }

    let suffix = filename
        .and_then(|f| Path::new(f).extension())
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_else(|| ".jpg".to_string());

    let mut file = tempfile::Builder::new()
        .prefix("upload_")
        .suffix(&suffix)
        .tempfile()
        .map_err(|e| InvoiceError::Internal(format!("tempfile: {e}")))?;
    file.write_all(bytes)
        .map_err(|e| InvoiceError::Internal(format!("tempfile write: {e}")))?;

    let path = file.path().to_path_buf();
    debug!("payload written to {}", path.display());
    Ok(ResolvedInput::Payload { path, _file: file })
}

/// Decode a base64 payload (optionally data-URI prefixed) and validate it
/// decodes as an image.
///
/// # Returns
/// The decoded bytes and a filename: the caller's, or `upload.{ext}` with
/// the extension sniffed from the image format.
pub fn decode_base64(
    payload: &str,
    filename: Option<&str>,
) -> Result<(Vec<u8>, String), InvoiceError> {
    if payload.is_empty() {
        return Err(InvoiceError::InvalidInput {
            input: String::new(),
            detail: "base64 payload must not be empty".into(),
        });
    }

    // Strip a "data:image/jpeg;base64," style prefix if present.
    let encoded = match payload.split_once("base64,") {
        Some((_, rest)) => rest,
        None => payload,
    };

    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| InvoiceError::Base64Decode {
            detail: e.to_string(),
        })?;

    let format = image::guess_format(&bytes).map_err(|e| InvoiceError::InvalidImage {
        path: PathBuf::from("<base64 payload>"),
        detail: e.to_string(),
    })?;

    let name = match filename {
        Some(f) => f.to_string(),
        None => format!(
            "upload.{}",
            format.extensions_str().first().copied().unwrap_or("jpg")
        ),
    };

    Ok((bytes, name))
}
