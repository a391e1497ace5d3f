//! Byte-level layout of a ZIP archive's tail.

use crate::error::{OverlayError, Result};

const EOCD_SIGNATURE: u32 = 0x0605_4b50;
const EOCD_MIN_LEN: usize = 22;
const MAX_COMMENT_LEN: usize = u16::MAX as usize;
const CD_OFFSET_FIELD: usize = 16;

/// Where the central directory and end-of-central-directory record sit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZipSections {
    pub cd_offset: usize,
    pub cd_size: usize,
    pub eocd_offset: usize,
}

impl ZipSections {
    /// Locate the sections of `archive` (ZIP64 is not supported).
    pub fn locate(archive: &[u8]) -> Result<Self> {
        if archive.len() < EOCD_MIN_LEN {
            return Err(OverlayError::signing("archive too short for a ZIP"));
        }
        let last = archive.len() - EOCD_MIN_LEN;
        let first = last.saturating_sub(MAX_COMMENT_LEN);
        let eocd_offset = (first..=last)
            .rev()
            .find(|&pos| {
                read_u32(archive, pos) == Some(EOCD_SIGNATURE)
                    && read_u16(archive, pos + 20).map(usize::from) == Some(archive.len() - pos - EOCD_MIN_LEN)
            })
            .ok_or_else(|| OverlayError::signing("no end of central directory record"))?;

        let cd_size = read_u32(archive, eocd_offset + 12).unwrap_or_default();
        let cd_offset = read_u32(archive, eocd_offset + CD_OFFSET_FIELD).unwrap_or_default();
        if cd_offset == u32::MAX || cd_size == u32::MAX {
            return Err(OverlayError::signing("ZIP64 archives are not supported"));
        }
        let (cd_offset, cd_size) = (cd_offset as usize, cd_size as usize);
        if cd_offset + cd_size != eocd_offset {
            return Err(OverlayError::signing(format!(
                "central directory ({cd_offset}+{cd_size}) does not end at the EOCD record ({eocd_offset})"
            )));
        }
        Ok(Self {
            cd_offset,
            cd_size,
            eocd_offset,
        })
    }

    pub fn entries<'a>(&self, archive: &'a [u8]) -> &'a [u8] {
        &archive[..self.cd_offset]
    }

    pub fn central_directory<'a>(&self, archive: &'a [u8]) -> &'a [u8] {
        &archive[self.cd_offset..self.eocd_offset]
    }

    pub fn eocd<'a>(&self, archive: &'a [u8]) -> &'a [u8] {
        &archive[self.eocd_offset..]
    }
}

/// Copy of the EOCD record with its central-directory offset replaced.
pub fn eocd_with_cd_offset(eocd: &[u8], cd_offset: usize) -> Result<Vec<u8>> {
    let offset = u32::try_from(cd_offset)
        .map_err(|_| OverlayError::signing("central directory offset exceeds 4 GiB"))?;
    let mut patched = eocd.to_vec();
    patched
        .get_mut(CD_OFFSET_FIELD..CD_OFFSET_FIELD + 4)
        .ok_or_else(|| OverlayError::signing("truncated EOCD record"))?
        .copy_from_slice(&offset.to_le_bytes());
    Ok(patched)
}

pub(crate) fn read_u16(bytes: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_le_bytes(bytes.get(at..at + 2)?.try_into().ok()?))
}

pub(crate) fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_le_bytes(bytes.get(at..at + 4)?.try_into().ok()?))
}

pub(crate) fn read_u64(bytes: &[u8], at: usize) -> Option<u64> {
    Some(u64::from_le_bytes(bytes.get(at..at + 8)?.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn archive(comment: &str) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file("a.txt", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"hello").unwrap();
        zip.set_comment(comment);
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn test_locate_sections() {
        let bytes = archive("");
        let sections = ZipSections::locate(&bytes).unwrap();

        assert_eq!(sections.eocd_offset, bytes.len() - 22);
        assert_eq!(&sections.central_directory(&bytes)[..4], &[0x50, 0x4b, 0x01, 0x02]);
        assert_eq!(&sections.entries(&bytes)[..4], &[0x50, 0x4b, 0x03, 0x04]);
    }

    #[test]
    fn test_locate_with_comment() {
        let bytes = archive("built by overlay-builder");
        let sections = ZipSections::locate(&bytes).unwrap();
        assert_eq!(sections.eocd(&bytes).len(), 22 + "built by overlay-builder".len());
    }

    #[test]
    fn test_patch_cd_offset() {
        let bytes = archive("");
        let sections = ZipSections::locate(&bytes).unwrap();
        let patched = eocd_with_cd_offset(sections.eocd(&bytes), 0x1234).unwrap();
        assert_eq!(read_u32(&patched, 16), Some(0x1234));
        assert_eq!(patched.len(), 22);
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(ZipSections::locate(b"definitely not a zip archive").is_err());
    }
}
