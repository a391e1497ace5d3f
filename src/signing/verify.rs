//! Verification of signed overlays.

use std::fs;
use std::path::Path;

use openssl::x509::X509;
use serde::Serialize;

use super::{v1, v2};
use crate::artifact::align::check_alignment;
use crate::error::{OverlayError, Result};

/// Outcome of checking one signed archive.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub v1: SchemeResult,
    pub v2: SchemeResult,
    /// Stored entries whose data is not 4-byte aligned.
    pub misaligned: Vec<String>,
}

/// Result of one signature scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SchemeResult {
    Verified,
    Failed(String),
}

impl SchemeResult {
    fn from_check(result: Result<()>) -> Self {
        match result {
            Ok(()) => SchemeResult::Verified,
            Err(e) => SchemeResult::Failed(e.to_string()),
        }
    }

    pub fn is_verified(&self) -> bool {
        *self == SchemeResult::Verified
    }
}

impl VerifyReport {
    pub fn is_valid(&self) -> bool {
        self.v1.is_verified() && self.v2.is_verified() && self.misaligned.is_empty()
    }
}

/// Check both signature generations against `expected`, and the alignment.
///
/// Fails only when the archive cannot be read at all; scheme failures are
/// reported in the [`VerifyReport`].
pub fn verify(path: &Path, expected: &X509) -> Result<VerifyReport> {
    let archive = fs::read(path)
        .map_err(|e| OverlayError::signing(format!("reading {}: {e}", path.display())))?;
    Ok(VerifyReport {
        v1: SchemeResult::from_check(v1::verify(&archive, expected)),
        v2: SchemeResult::from_check(v2::verify(&archive, expected)),
        misaligned: check_alignment(path)?,
    })
}
