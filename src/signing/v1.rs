//! JAR signing (APK signature scheme v1).
//!
//! Adds `META-INF/MANIFEST.MF` with a SHA-256 digest per entry,
//! `META-INF/<SIGNER>.SF` with digests of the manifest and of each of its
//! sections, and a detached PKCS#7 signature of the `.SF` file in
//! `META-INF/<SIGNER>.RSA` (or `.EC`). The `.SF` header announces v2 so
//! installers that understand v2 reject a v1-only downgrade.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::X509;
use sha2::{Digest, Sha256};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use super::identity::SigningIdentity;
use crate::artifact::align::ALIGNMENT;
use crate::error::{OverlayError, Result};

pub const MANIFEST_NAME: &str = "META-INF/MANIFEST.MF";
const CREATED_BY: &str = "1.0 (Android)";
const DIGEST_ATTR: &str = "SHA-256-Digest";
const MAX_LINE: usize = 72;
/// First platform version that verifies SHA-256 JAR signatures.
pub const MIN_SDK_SHA256: u32 = 18;

/// Whether `name` is a JAR signature file that re-signing replaces.
pub fn is_signature_file(name: &str) -> bool {
    let Some(file) = name.strip_prefix("META-INF/") else {
        return false;
    };
    if file.contains('/') {
        return false;
    }
    file == "MANIFEST.MF"
        || [".SF", ".RSA", ".DSA", ".EC"]
            .iter()
            .any(|ext| file.to_ascii_uppercase().ends_with(ext))
}

/// Sign `archive`, returning the re-emitted archive with signature files.
///
/// Stored entries are rewritten on [`ALIGNMENT`] boundaries; compressed
/// entries are copied without recompression.
pub fn sign(
    archive: &[u8],
    identity: &SigningIdentity,
    signer_name: &str,
    min_sdk: u32,
) -> Result<Vec<u8>> {
    if min_sdk < MIN_SDK_SHA256 {
        return Err(OverlayError::signing(format!(
            "minimum SDK {min_sdk} predates SHA-256 JAR signatures (need {MIN_SDK_SHA256})"
        )));
    }
    let signer = signer_file_stem(signer_name)?;

    let mut input = ZipArchive::new(Cursor::new(archive))?;
    let digests = entry_digests(&mut input)?;
    let (manifest, sections) = build_manifest(&digests);
    let signature_file = build_signature_file(&manifest, &sections);
    let block = signature_block(&signature_file, identity)?;

    let mut output = ZipWriter::new(Cursor::new(Vec::new()));
    let stored = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(DateTime::default())
        .with_alignment(ALIGNMENT as u16);
    let deflated = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());

    for index in 0..input.len() {
        let name = input.by_index_raw(index)?.name().to_string();
        if is_signature_file(&name) {
            debug!(entry = %name, "dropping stale signature file");
            continue;
        }
        if input.by_index_raw(index)?.compression() == CompressionMethod::Stored {
            let mut entry = input.by_index(index)?;
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut data)
                .map_err(|e| OverlayError::signing(format!("reading {name}: {e}")))?;
            if entry.is_dir() {
                output.add_directory(name.as_str(), stored)?;
            } else {
                output.start_file(name.as_str(), stored)?;
                write(&mut output, &data)?;
            }
        } else {
            output.raw_copy_file(input.by_index_raw(index)?)?;
        }
    }

    let extension = identity.algorithm().block_extension();
    for (name, content) in [
        (MANIFEST_NAME.to_string(), manifest.as_slice()),
        (format!("META-INF/{signer}.SF"), signature_file.as_slice()),
        (format!("META-INF/{signer}.{extension}"), block.as_slice()),
    ] {
        output.start_file(name.as_str(), deflated)?;
        write(&mut output, content)?;
    }

    Ok(output.finish()?.into_inner())
}

/// Verify the v1 signature of `archive` against `expected`.
pub fn verify(archive: &[u8], expected: &X509) -> Result<()> {
    let mut input = ZipArchive::new(Cursor::new(archive))?;
    let manifest = read_entry(&mut input, MANIFEST_NAME)?;

    let names: Vec<String> = input.file_names().map(str::to_string).collect();
    let sf_name = names
        .iter()
        .find(|name| name.starts_with("META-INF/") && name.ends_with(".SF"))
        .ok_or_else(|| OverlayError::signing("no .SF signature file"))?
        .clone();
    let stem = sf_name.trim_end_matches(".SF");
    let block_name = names
        .iter()
        .find(|name| {
            name.strip_prefix(stem)
                .is_some_and(|ext| ext == ".RSA" || ext == ".EC" || ext == ".DSA")
        })
        .ok_or_else(|| OverlayError::signing(format!("no signature block for {sf_name}")))?
        .clone();
    let signature_file = read_entry(&mut input, &sf_name)?;
    let block = read_entry(&mut input, &block_name)?;

    let sf_sections = parse_sections(&signature_file);
    let sf_main = sf_sections
        .first()
        .ok_or_else(|| OverlayError::signing("empty .SF file"))?;
    if sf_main.attribute("X-Android-APK-Signed").is_none() {
        return Err(OverlayError::signing(".SF does not announce APK signature scheme v2"));
    }
    if sf_main.attribute("SHA-256-Digest-Manifest") != Some(b64_sha256(&manifest).as_str()) {
        return Err(OverlayError::signing("manifest digest mismatch in .SF"));
    }

    let manifest_sections = parse_sections(&manifest);
    let by_name: BTreeMap<&str, &Section> = manifest_sections
        .iter()
        .skip(1)
        .filter_map(|section| section.attribute("Name").map(|name| (name, section)))
        .collect();
    for section in sf_sections.iter().skip(1) {
        let name = section
            .attribute("Name")
            .ok_or_else(|| OverlayError::signing(".SF section without Name"))?;
        let manifest_section = by_name
            .get(name)
            .ok_or_else(|| OverlayError::signing(format!(".SF names {name} missing from manifest")))?;
        if section.attribute(DIGEST_ATTR) != Some(b64_sha256(&manifest_section.raw).as_str()) {
            return Err(OverlayError::signing(format!("manifest section digest mismatch for {name}")));
        }
    }

    let digests = entry_digests(&mut input)?;
    if digests.len() != by_name.len() {
        return Err(OverlayError::signing(format!(
            "manifest covers {} entries, archive has {}",
            by_name.len(),
            digests.len()
        )));
    }
    for (name, digest) in &digests {
        let section = by_name
            .get(name.as_str())
            .ok_or_else(|| OverlayError::signing(format!("entry {name} not in manifest")))?;
        if section.attribute(DIGEST_ATTR) != Some(STANDARD.encode(digest).as_str()) {
            return Err(OverlayError::signing(format!("digest mismatch for {name}")));
        }
    }

    let pkcs7 = Pkcs7::from_der(&block)?;
    let mut certs = Stack::new()?;
    certs.push(expected.clone())?;
    let store = X509StoreBuilder::new()?.build();
    pkcs7
        .verify(
            &certs,
            &store,
            Some(signature_file.as_slice()),
            None,
            Pkcs7Flags::NOVERIFY | Pkcs7Flags::BINARY,
        )
        .map_err(|e| OverlayError::signing(format!("PKCS#7 signature invalid: {e}")))?;
    let signers = pkcs7.signers(&certs, Pkcs7Flags::empty())?;
    let expected_der = expected.to_der()?;
    for signer in &signers {
        if signer.to_der()? != expected_der {
            return Err(OverlayError::signing("v1 signer certificate differs from the expected one"));
        }
    }
    Ok(())
}

/// Name-sorted SHA-256 digests of every non-signature file entry.
fn entry_digests<R: Read + std::io::Seek>(input: &mut ZipArchive<R>) -> Result<BTreeMap<String, [u8; 32]>> {
    let mut digests = BTreeMap::new();
    for index in 0..input.len() {
        let mut entry = input.by_index(index)?;
        let name = entry.name().to_string();
        if entry.is_dir() || is_signature_file(&name) {
            continue;
        }
        let mut hasher = Sha256::new();
        std::io::copy(&mut entry, &mut hasher)
            .map_err(|e| OverlayError::signing(format!("reading {name}: {e}")))?;
        if digests.insert(name.clone(), hasher.finalize().into()).is_some() {
            return Err(OverlayError::signing(format!("duplicate archive entry {name}")));
        }
    }
    Ok(digests)
}

/// Render `MANIFEST.MF`, returning it with each named section's raw bytes.
fn build_manifest(digests: &BTreeMap<String, [u8; 32]>) -> (Vec<u8>, Vec<(String, Vec<u8>)>) {
    let mut manifest = Vec::new();
    push_attribute(&mut manifest, "Manifest-Version", "1.0");
    push_attribute(&mut manifest, "Created-By", CREATED_BY);
    manifest.extend_from_slice(b"\r\n");

    let mut sections = Vec::with_capacity(digests.len());
    for (name, digest) in digests {
        let mut section = Vec::new();
        push_attribute(&mut section, "Name", name);
        push_attribute(&mut section, DIGEST_ATTR, &STANDARD.encode(digest));
        section.extend_from_slice(b"\r\n");
        manifest.extend_from_slice(&section);
        sections.push((name.clone(), section));
    }
    (manifest, sections)
}

fn build_signature_file(manifest: &[u8], sections: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut sf = Vec::new();
    push_attribute(&mut sf, "Signature-Version", "1.0");
    push_attribute(&mut sf, "Created-By", CREATED_BY);
    push_attribute(&mut sf, "SHA-256-Digest-Manifest", &b64_sha256(manifest));
    push_attribute(&mut sf, "X-Android-APK-Signed", "2");
    sf.extend_from_slice(b"\r\n");

    for (name, section) in sections {
        push_attribute(&mut sf, "Name", name);
        push_attribute(&mut sf, DIGEST_ATTR, &b64_sha256(section));
        sf.extend_from_slice(b"\r\n");
    }
    sf
}

fn signature_block(signature_file: &[u8], identity: &SigningIdentity) -> Result<Vec<u8>> {
    let mut extra = Stack::new()?;
    for cert in identity.chain().iter().skip(1) {
        extra.push(cert.clone())?;
    }
    let flags = Pkcs7Flags::DETACHED | Pkcs7Flags::BINARY | Pkcs7Flags::NOATTR | Pkcs7Flags::NOSMIMECAP;
    let pkcs7 = Pkcs7::sign(identity.certificate(), identity.key(), &extra, signature_file, flags)?;
    Ok(pkcs7.to_der()?)
}

/// Signer name as used for `.SF` / block file stems: uppercase, `[A-Z0-9_-]`.
fn signer_file_stem(signer_name: &str) -> Result<String> {
    let stem: String = signer_name
        .chars()
        .map(|c| match c.to_ascii_uppercase() {
            c @ ('A'..='Z' | '0'..='9' | '_' | '-') => c,
            _ => '_',
        })
        .collect();
    if stem.is_empty() {
        return Err(OverlayError::signing("signer name is empty"));
    }
    Ok(stem)
}

/// Append `name: value` wrapped at 72 bytes, continuation lines led by a space.
fn push_attribute(out: &mut Vec<u8>, name: &str, value: &str) {
    let line = format!("{name}: {value}");
    let mut rest = line.as_bytes();
    let mut width = MAX_LINE;
    while !rest.is_empty() {
        let take = width.min(rest.len());
        out.extend_from_slice(&rest[..take]);
        out.extend_from_slice(b"\r\n");
        rest = &rest[take..];
        if !rest.is_empty() {
            out.push(b' ');
            width = MAX_LINE - 1;
        }
    }
}

fn b64_sha256(data: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(data))
}

fn write<W: Write + std::io::Seek>(output: &mut ZipWriter<W>, data: &[u8]) -> Result<()> {
    output
        .write_all(data)
        .map_err(|e| OverlayError::signing(format!("writing archive: {e}")))
}

fn read_entry<R: Read + std::io::Seek>(input: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>> {
    let mut entry = input
        .by_name(name)
        .map_err(|_| OverlayError::signing(format!("{name} missing")))?;
    let mut data = Vec::new();
    entry
        .read_to_end(&mut data)
        .map_err(|e| OverlayError::signing(format!("reading {name}: {e}")))?;
    Ok(data)
}

/// One manifest section: its raw bytes and unwrapped attributes.
struct Section {
    raw: Vec<u8>,
    attributes: Vec<(String, String)>,
}

impl Section {
    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Split a manifest into sections separated by blank lines.
fn parse_sections(bytes: &[u8]) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut raw = Vec::new();
    let mut lines: Vec<Vec<u8>> = Vec::new();

    for line in bytes.split_inclusive(|&b| b == b'\n') {
        raw.extend_from_slice(line);
        let content = line
            .strip_suffix(b"\n")
            .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
            .unwrap_or(line);
        if content.is_empty() {
            sections.push(finish_section(std::mem::take(&mut raw), std::mem::take(&mut lines)));
        } else if content.starts_with(b" ") && !lines.is_empty() {
            if let Some(last) = lines.last_mut() {
                last.extend_from_slice(&content[1..]);
            }
        } else {
            lines.push(content.to_vec());
        }
    }
    if !lines.is_empty() {
        sections.push(finish_section(raw, lines));
    }
    sections
}

fn finish_section(raw: Vec<u8>, lines: Vec<Vec<u8>>) -> Section {
    let attributes = lines
        .iter()
        .filter_map(|line| {
            let line = String::from_utf8_lossy(line);
            let (key, value) = line.split_once(": ")?;
            Some((key.to_string(), value.to_string()))
        })
        .collect();
    Section { raw, attributes }
}
