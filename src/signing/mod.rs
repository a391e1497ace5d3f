//! Signing aligned archives with both signature scheme generations.
//!
//! - [`identity`] - private key and certificate chain from a PKCS#12 keystore
//! - [`v1`] - JAR signature files under `META-INF/`
//! - [`v2`] - APK Signing Block before the central directory
//! - [`verify`] - checks both generations and the alignment property
//!
//! v1 is applied first because it rewrites the archive entries; v2 then
//! digests the finished entries and central directory.

pub mod identity;
pub mod v1;
pub mod v2;
pub mod verify;
pub mod zip_layout;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::info;

use crate::error::{OverlayError, Result};

pub use identity::{KeyAlgorithm, SigningIdentity};
pub use verify::{verify, VerifyReport};

/// Parameters of a signing run.
#[derive(Debug, Clone)]
pub struct SignOptions {
    /// Oldest platform version the signed archive must install on.
    pub min_sdk_version: u32,
    /// Stem of the v1 `.SF` and signature block files.
    pub signer_name: String,
}

impl Default for SignOptions {
    fn default() -> Self {
        Self {
            min_sdk_version: 26,
            signer_name: "overlay".to_string(),
        }
    }
}

/// Sign `input` into `output`.
///
/// The signed archive is written to a temporary file beside `output` and
/// renamed into place, so `output` never holds a partial signature.
pub fn sign(
    input: &Path,
    output: &Path,
    identity: &SigningIdentity,
    options: &SignOptions,
) -> Result<PathBuf> {
    let unsigned = fs::read(input)
        .map_err(|e| OverlayError::signing(format!("reading {}: {e}", input.display())))?;

    let jar_signed = v1::sign(&unsigned, identity, &options.signer_name, options.min_sdk_version)?;
    let signed = v2::sign(&jar_signed, identity)?;

    let dir = output
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut staged = NamedTempFile::new_in(dir).map_err(|e| OverlayError::write(dir, e))?;
    staged
        .write_all(&signed)
        .and_then(|()| staged.as_file().sync_all())
        .map_err(|e| OverlayError::write(staged.path(), e))?;
    staged
        .persist(output)
        .map_err(|e| OverlayError::write(output, e.error))?;

    info!(
        archive = %output.display(),
        bytes = signed.len(),
        sha256 = %hex(&Sha256::digest(&signed)),
        "signed overlay"
    );
    Ok(output.to_path_buf())
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::identity::test_support::rsa_identity;
    use super::*;
    use crate::artifact::align::check_alignment;
    use std::io::Cursor;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    fn aligned_archive(path: &Path) {
        let mut zip = ZipWriter::new(fs::File::create(path).unwrap());
        zip.start_file(
            "AndroidManifest.xml",
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
        )
        .unwrap();
        zip.write_all(b"<manifest/>").unwrap();
        zip.start_file(
            "resources.arsc",
            SimpleFileOptions::default()
                .compression_method(CompressionMethod::Stored)
                .with_alignment(4),
        )
        .unwrap();
        zip.write_all(&[0u8; 256]).unwrap();
        zip.finish().unwrap();
    }

    #[test]
    fn test_sign_produces_verifiable_aligned_archive() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("overlay_UNSIGNED.apk");
        let output = temp.path().join("overlay_SIGNED.apk");
        aligned_archive(&input);
        let identity = rsa_identity();

        sign(&input, &output, &identity, &SignOptions::default()).unwrap();

        let report = verify(&output, identity.certificate()).unwrap();
        assert!(report.is_valid(), "{report:?}");
        assert!(check_alignment(&output).unwrap().is_empty());
    }

    #[test]
    fn test_failed_sign_leaves_no_output() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("corrupt.apk");
        fs::write(&input, b"PK\x03\x04 truncated").unwrap();
        let output = temp.path().join("overlay_SIGNED.apk");

        let err = sign(&input, &output, &rsa_identity(), &SignOptions::default()).unwrap_err();

        assert_eq!(err.kind(), crate::ErrorKind::Signing);
        assert!(!output.exists());
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_sign_overwrites_previous_output() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in.apk");
        let output = temp.path().join("out.apk");
        aligned_archive(&input);
        fs::write(&output, "previous build").unwrap();

        sign(&input, &output, &rsa_identity(), &SignOptions::default()).unwrap();
        assert!(zip::ZipArchive::new(Cursor::new(fs::read(&output).unwrap())).is_ok());
    }

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[0x00, 0xab, 0x7f]), "00ab7f");
    }
}
