//! APK Signature Scheme v2.
//!
//! An APK Signing Block is inserted between the last local entry and the
//! central directory. It holds one signer: the chunked SHA-256 digest of
//! the archive contents, the certificate chain, a signature over that
//! signed data, and the signer's public key.
//!
//! All integers are little-endian; "length-prefixed" means a `u32` byte
//! count followed by that many bytes.

use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::sign::{Signer, Verifier};
use openssl::x509::X509;
use sha2::{Digest, Sha256};

use super::identity::SigningIdentity;
use super::zip_layout::{eocd_with_cd_offset, read_u32, read_u64, ZipSections};
use crate::error::{OverlayError, Result};

/// ID of the v2 signature pair inside the APK Signing Block.
pub const BLOCK_ID: u32 = 0x7109_871a;
const MAGIC: &[u8; 16] = b"APK Sig Block 42";
const CHUNK_SIZE: usize = 1 << 20;
/// Block size field + magic at the end of the signing block.
const FOOTER_LEN: usize = 8 + 16;

/// Insert a v2 signing block into `archive`.
///
/// `archive` must not already carry a signing block.
pub fn sign(archive: &[u8], identity: &SigningIdentity) -> Result<Vec<u8>> {
    let sections = ZipSections::locate(archive)?;
    if find_block(archive, &sections).is_some() {
        return Err(OverlayError::signing("archive already carries an APK Signing Block"));
    }

    let digest = contents_digest(&[
        sections.entries(archive),
        sections.central_directory(archive),
        sections.eocd(archive),
    ]);
    let algorithm = identity.algorithm().v2_algorithm_id();

    let mut signed_data = Vec::new();
    let mut digests = Vec::new();
    push_lp(&mut digests, &algorithm_entry(algorithm, &digest));
    push_lp(&mut signed_data, &digests);
    let mut certificates = Vec::new();
    for cert in identity.chain() {
        push_lp(&mut certificates, &cert.to_der()?);
    }
    push_lp(&mut signed_data, &certificates);
    push_lp(&mut signed_data, &[]);

    let mut signer = Signer::new(MessageDigest::sha256(), identity.key())?;
    signer.update(&signed_data)?;
    let signature = signer.sign_to_vec()?;

    let mut signatures = Vec::new();
    push_lp(&mut signatures, &algorithm_entry(algorithm, &signature));

    let mut signer_block = Vec::new();
    push_lp(&mut signer_block, &signed_data);
    push_lp(&mut signer_block, &signatures);
    push_lp(&mut signer_block, &identity.key().public_key_to_der()?);

    let mut signers = Vec::new();
    push_lp(&mut signers, &signer_block);
    let mut value = Vec::new();
    push_lp(&mut value, &signers);

    let block = signing_block(BLOCK_ID, &value);
    let eocd = eocd_with_cd_offset(sections.eocd(archive), sections.cd_offset + block.len())?;

    let mut out = Vec::with_capacity(archive.len() + block.len());
    out.extend_from_slice(sections.entries(archive));
    out.extend_from_slice(&block);
    out.extend_from_slice(sections.central_directory(archive));
    out.extend_from_slice(&eocd);
    Ok(out)
}

/// Verify the v2 signature of `archive` against `expected`.
pub fn verify(archive: &[u8], expected: &X509) -> Result<()> {
    let sections = ZipSections::locate(archive)?;
    let block_start = find_block(archive, &sections)
        .ok_or_else(|| OverlayError::signing("no APK Signing Block"))?;
    let value = find_pair(&archive[block_start + 8..sections.cd_offset - FOOTER_LEN], BLOCK_ID)
        .ok_or_else(|| OverlayError::signing("APK Signing Block has no v2 signature"))?;

    let mut signers = Reader::new(Reader::new(value).lp()?);
    let mut signer = Reader::new(signers.lp()?);
    let signed_data = signer.lp()?;
    let mut signatures = Reader::new(signer.lp()?);
    let public_key_der = signer.lp()?;

    let mut signature_entry = Reader::new(signatures.lp()?);
    let algorithm = signature_entry.u32()?;
    let signature = signature_entry.lp()?;
    let public_key = PKey::public_key_from_der(public_key_der)?;
    let mut verifier = Verifier::new(MessageDigest::sha256(), &public_key)?;
    verifier.update(signed_data)?;
    if !verifier.verify(signature)? {
        return Err(OverlayError::signing("v2 signature does not verify"));
    }

    let mut data = Reader::new(signed_data);
    let mut digests = Reader::new(data.lp()?);
    let mut digest_entry = Reader::new(digests.lp()?);
    if digest_entry.u32()? != algorithm {
        return Err(OverlayError::signing("v2 digest and signature algorithms differ"));
    }
    let recorded = digest_entry.lp()?;
    let mut certificates = Reader::new(data.lp()?);
    let leaf = X509::from_der(certificates.lp()?)?;

    if leaf.to_der()? != expected.to_der()? {
        return Err(OverlayError::signing("v2 signer certificate differs from the expected one"));
    }
    if leaf.public_key()?.public_key_to_der()? != public_key_der {
        return Err(OverlayError::signing("v2 public key does not match its certificate"));
    }

    let eocd = eocd_with_cd_offset(sections.eocd(archive), block_start)?;
    let actual = contents_digest(&[
        &archive[..block_start],
        sections.central_directory(archive),
        &eocd,
    ]);
    if recorded != actual.as_slice() {
        return Err(OverlayError::signing("v2 contents digest mismatch"));
    }
    Ok(())
}

/// Chunked SHA-256 over the three archive sections.
///
/// Each 1 MiB chunk is hashed as `0xa5 || u32 len || chunk`; the result is
/// `SHA-256(0x5a || u32 chunk count || chunk digests...)`.
pub fn contents_digest(sections: &[&[u8]]) -> [u8; 32] {
    let mut chunk_digests = Vec::new();
    let mut count: u32 = 0;
    for section in sections {
        for chunk in section.chunks(CHUNK_SIZE) {
            let mut hasher = Sha256::new();
            hasher.update([0xa5u8]);
            hasher.update((chunk.len() as u32).to_le_bytes());
            hasher.update(chunk);
            chunk_digests.extend_from_slice(&hasher.finalize());
            count += 1;
        }
    }
    let mut top = Sha256::new();
    top.update([0x5au8]);
    top.update(count.to_le_bytes());
    top.update(&chunk_digests);
    top.finalize().into()
}

/// Start offset of the signing block preceding the central directory.
fn find_block(archive: &[u8], sections: &ZipSections) -> Option<usize> {
    let footer = sections.cd_offset.checked_sub(FOOTER_LEN)?;
    if archive.get(footer + 8..sections.cd_offset)? != MAGIC {
        return None;
    }
    let size = usize::try_from(read_u64(archive, footer)?).ok()?;
    if size < FOOTER_LEN {
        return None;
    }
    let start = sections.cd_offset.checked_sub(size.checked_add(8)?)?;
    (read_u64(archive, start)? == size as u64).then_some(start)
}

fn find_pair(mut pairs: &[u8], id: u32) -> Option<&[u8]> {
    while pairs.len() >= 12 {
        let len = usize::try_from(read_u64(pairs, 0)?).ok()?;
        let body = pairs.get(8..8usize.checked_add(len)?)?;
        if read_u32(body, 0)? == id {
            return body.get(4..);
        }
        pairs = &pairs[8 + len..];
    }
    None
}

fn signing_block(id: u32, value: &[u8]) -> Vec<u8> {
    let pair_len = 4 + value.len();
    let size = (8 + pair_len + FOOTER_LEN) as u64;

    let mut block = Vec::with_capacity(8 + size as usize);
    block.extend_from_slice(&size.to_le_bytes());
    block.extend_from_slice(&(pair_len as u64).to_le_bytes());
    block.extend_from_slice(&id.to_le_bytes());
    block.extend_from_slice(value);
    block.extend_from_slice(&size.to_le_bytes());
    block.extend_from_slice(MAGIC);
    block
}

fn algorithm_entry(algorithm: u32, payload: &[u8]) -> Vec<u8> {
    let mut entry = algorithm.to_le_bytes().to_vec();
    push_lp(&mut entry, payload);
    entry
}

fn push_lp(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
}

/// Cursor over length-prefixed v2 structures.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn u32(&mut self) -> Result<u32> {
        let value = read_u32(self.buf, 0).ok_or_else(truncated)?;
        self.buf = &self.buf[4..];
        Ok(value)
    }

    fn lp(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        let data = self.buf.get(..len).ok_or_else(truncated)?;
        self.buf = &self.buf[len..];
        Ok(data)
    }
}

fn truncated() -> OverlayError {
    OverlayError::signing("truncated v2 signature structure")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::identity::test_support::{ec_identity, rsa_identity};
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::{ZipArchive, ZipWriter};

    fn archive() -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file("AndroidManifest.xml", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"<manifest/>").unwrap();
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn test_sign_then_verify_rsa() {
        let identity = rsa_identity();
        let signed = sign(&archive(), &identity).unwrap();
        verify(&signed, identity.certificate()).unwrap();

        // still a readable archive with the block in place
        let mut zip = ZipArchive::new(Cursor::new(&signed)).unwrap();
        assert!(zip.by_name("AndroidManifest.xml").is_ok());
    }

    #[test]
    fn test_sign_then_verify_ec() {
        let identity = ec_identity();
        let signed = sign(&archive(), &identity).unwrap();
        verify(&signed, identity.certificate()).unwrap();
    }

    #[test]
    fn test_block_sits_before_central_directory() {
        let unsigned = archive();
        let before = ZipSections::locate(&unsigned).unwrap();
        let signed = sign(&unsigned, &rsa_identity()).unwrap();
        let after = ZipSections::locate(&signed).unwrap();

        let start = find_block(&signed, &after).unwrap();
        assert_eq!(start, before.cd_offset);
        assert_eq!(&signed[after.cd_offset - 16..after.cd_offset], MAGIC);
        assert_eq!(&signed[..start], before.entries(&unsigned));
    }

    #[test]
    fn test_modified_entry_fails() {
        let identity = rsa_identity();
        let mut signed = sign(&archive(), &identity).unwrap();
        // flip a byte in the first local entry's file name
        signed[31] ^= 0x01;

        let err = verify(&signed, identity.certificate()).unwrap_err();
        assert!(err.to_string().contains("digest mismatch"));
    }

    #[test]
    fn test_resigning_rejected() {
        let identity = rsa_identity();
        let signed = sign(&archive(), &identity).unwrap();
        assert!(sign(&signed, &identity).is_err());
    }

    #[test]
    fn test_wrong_certificate_rejected() {
        let signed = sign(&archive(), &rsa_identity()).unwrap();
        let other = rsa_identity();
        assert!(verify(&signed, other.certificate()).is_err());
    }

    #[test]
    fn test_contents_digest_chunking() {
        let big = vec![7u8; CHUNK_SIZE + 1];
        let split = contents_digest(&[&big[..CHUNK_SIZE], &big[CHUNK_SIZE..]]);
        let whole = contents_digest(&[&big]);
        // same chunk boundaries, same digest
        assert_eq!(split, whole);
        assert_ne!(whole, contents_digest(&[&big[..CHUNK_SIZE]]));
    }
}
