//! Error taxonomy for overlay builds.
//!
//! Every pipeline stage reports one of these kinds. None of them are
//! retried: a failed build is restarted from a freshly recreated workspace.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used throughout the library.
pub type Result<T, E = OverlayError> = std::result::Result<T, E>;

/// Errors produced while building or signing an overlay.
#[derive(Debug, Error)]
pub enum OverlayError {
    /// The overlay request failed validation before any file was touched.
    #[error("invalid overlay request: {0}")]
    InvalidRequest(String),

    /// The configuration file could not be read or parsed.
    #[error("configuration error in '{}': {reason}", .path.display())]
    Config { path: PathBuf, reason: String },

    /// A resource, manifest or workspace file could not be written.
    #[error("failed to write '{}': {source}", .path.display())]
    ResourceWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Installed metadata for the target package could not be read.
    #[error("metadata for package '{package}' unavailable: {reason}")]
    MetadataUnavailable { package: String, reason: String },

    /// An external tool exited non-zero or produced no output.
    #[error("{tool} failed: {reason}\n  command: {command}{}", diagnostics(.status, .stdout, .stderr))]
    ToolInvocation {
        tool: String,
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
        reason: String,
    },

    /// Key material, input archive or digest problems during signing.
    #[error("signing failed: {0}")]
    Signing(String),

    /// A bundled executable, template or keystore could not be materialized.
    #[error("failed to extract asset '{asset}': {reason}")]
    AssetExtraction { asset: String, reason: String },
}

/// Flat view of [`OverlayError`] for callers that only branch on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    Config,
    ResourceWrite,
    MetadataUnavailable,
    ToolInvocation,
    Signing,
    AssetExtraction,
}

impl OverlayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OverlayError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            OverlayError::Config { .. } => ErrorKind::Config,
            OverlayError::ResourceWrite { .. } => ErrorKind::ResourceWrite,
            OverlayError::MetadataUnavailable { .. } => ErrorKind::MetadataUnavailable,
            OverlayError::ToolInvocation { .. } => ErrorKind::ToolInvocation,
            OverlayError::Signing(_) => ErrorKind::Signing,
            OverlayError::AssetExtraction { .. } => ErrorKind::AssetExtraction,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        OverlayError::ResourceWrite {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn signing(reason: impl fmt::Display) -> Self {
        OverlayError::Signing(reason.to_string())
    }

    pub(crate) fn asset(asset: impl Into<String>, reason: impl fmt::Display) -> Self {
        OverlayError::AssetExtraction {
            asset: asset.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<openssl::error::ErrorStack> for OverlayError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        OverlayError::Signing(format!("openssl: {e}"))
    }
}

impl From<zip::result::ZipError> for OverlayError {
    fn from(e: zip::result::ZipError) -> Self {
        OverlayError::Signing(format!("archive: {e}"))
    }
}

struct ToolDiagnostics<'a> {
    status: Option<i32>,
    stdout: &'a str,
    stderr: &'a str,
}

fn diagnostics<'a>(status: &Option<i32>, stdout: &'a str, stderr: &'a str) -> ToolDiagnostics<'a> {
    ToolDiagnostics {
        status: *status,
        stdout,
        stderr,
    }
}

impl fmt::Display for ToolDiagnostics<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "\n  exit status: {code}")?,
            None => write!(f, "\n  exit status: terminated by signal")?,
        }
        if !self.stdout.trim().is_empty() {
            write!(f, "\n  stdout:\n{}", self.stdout.trim_end())?;
        }
        if !self.stderr.trim().is_empty() {
            write!(f, "\n  stderr:\n{}", self.stderr.trim_end())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_failure_message_carries_command_and_output() {
        let err = OverlayError::ToolInvocation {
            tool: "aapt".into(),
            command: "aapt p -M AndroidManifest.xml".into(),
            status: Some(1),
            stdout: String::new(),
            stderr: "res/values/integers.xml:1: error: unbound prefix\n".into(),
            reason: "exited with status 1".into(),
        };

        let msg = err.to_string();
        assert!(msg.contains("aapt p -M AndroidManifest.xml"));
        assert!(msg.contains("unbound prefix"));
        assert!(msg.contains("exit status: 1"));
        assert_eq!(err.kind(), ErrorKind::ToolInvocation);
    }

    #[test]
    fn test_kinds_map_one_to_one() {
        assert_eq!(
            OverlayError::signing("bad key").kind(),
            ErrorKind::Signing
        );
        assert_eq!(
            OverlayError::asset("aapt", "missing").kind(),
            ErrorKind::AssetExtraction
        );
        assert_eq!(
            OverlayError::write("/tmp/x", io::Error::other("disk full")).kind(),
            ErrorKind::ResourceWrite
        );
    }
}
