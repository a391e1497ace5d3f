//! Writes resource entries into a resource-tree directory.
//!
//! Layout: `<root>/<resource_directory>/<file_name>`. Existing files are
//! replaced. Text payloads get exactly one trailing newline appended; image
//! payloads are encoded as PNG at the highest compression setting.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use tracing::debug;

use super::{Payload, ResourceEntry};
use crate::error::{OverlayError, Result};

/// Write every entry under `root`, in order.
///
/// Returns the written file paths in the same order as `resources`.
pub fn materialize(root: &Path, resources: &[ResourceEntry]) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(resources.len());
    for entry in resources {
        written.push(write_entry(root, entry)?);
    }
    debug!(count = written.len(), root = %root.display(), "materialized resource tree");
    Ok(written)
}

fn write_entry(root: &Path, entry: &ResourceEntry) -> Result<PathBuf> {
    let dir = root.join(&entry.resource_directory);
    fs::create_dir_all(&dir).map_err(|e| OverlayError::write(&dir, e))?;

    let path = dir.join(&entry.file_name);
    if path.exists() {
        fs::remove_file(&path).map_err(|e| OverlayError::write(&path, e))?;
    }

    match &entry.payload {
        Payload::Text(content) => write_text(&path, content)?,
        Payload::Image(image) => {
            let file = File::create(&path).map_err(|e| OverlayError::write(&path, e))?;
            let mut writer = BufWriter::new(file);
            let encoder = PngEncoder::new_with_quality(
                &mut writer,
                CompressionType::Best,
                FilterType::Adaptive,
            );
            image.write_with_encoder(encoder).map_err(|e| {
                OverlayError::write(&path, std::io::Error::other(e.to_string()))
            })?;
            writer.flush().map_err(|e| OverlayError::write(&path, e))?;
        }
    }
    Ok(path)
}

/// Write `content` plus a trailing newline as UTF-8.
pub(crate) fn write_text(path: &Path, content: &str) -> Result<()> {
    let file = File::create(path).map_err(|e| OverlayError::write(path, e))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(content.as_bytes())
        .and_then(|()| writer.write_all(b"\n"))
        .and_then(|()| writer.flush())
        .map_err(|e| OverlayError::write(path, e))
}
