//! Archive alignment: stored entries start on 4-byte boundaries.
//!
//! Wraps `zipalign`. The consuming platform memory-maps stored entries
//! such as `resources.arsc` straight from the archive and needs them
//! naturally aligned.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tracing::info;
use zip::{CompressionMethod, ZipArchive};

use super::{remove_stale, ToolRun};
use crate::error::{OverlayError, Result};
use crate::process::{Cmd, CommandRunner};

/// Byte boundary required for stored entries.
pub const ALIGNMENT: u64 = 4;

/// Rewrite `input` into `output` with stored entries aligned.
pub fn align(
    runner: &dyn CommandRunner,
    zipalign: &Path,
    input: &Path,
    output: &Path,
) -> Result<PathBuf> {
    remove_stale(output)?;

    let cmd = Cmd::new(zipalign)
        .arg(ALIGNMENT.to_string())
        .arg_path(input)
        .arg_path(output)
        .error_msg("alignment tool (zipalign) from Android SDK build-tools");
    let archive = ToolRun::execute(&cmd, runner, output)?.require_artifact()?;
    info!(archive = %archive.display(), "aligned overlay");
    Ok(archive)
}

/// Names of stored entries whose data does not start on [`ALIGNMENT`].
///
/// An empty result means the archive satisfies the alignment property.
pub fn check_alignment(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path)
        .map_err(|e| OverlayError::signing(format!("opening {}: {e}", path.display())))?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;

    let mut misaligned = Vec::new();
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;
        if entry.compression() == CompressionMethod::Stored
            && entry.data_start() % ALIGNMENT != 0
        {
            misaligned.push(entry.name().to_string());
        }
    }
    Ok(misaligned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{CommandOutput, LocalRunner};
    use crate::ErrorKind;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    /// Archive whose stored entry lands on an odd offset unless aligned.
    fn write_archive(path: &Path, alignment: u16) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let stored = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .with_alignment(alignment);
        zip.start_file("AndroidManifest.xml", deflated).unwrap();
        zip.write_all(b"<manifest package=\"x\"/>").unwrap();
        zip.start_file("r", stored).unwrap();
        zip.write_all(&[1, 2, 3]).unwrap();
        zip.start_file("resources.arsc", stored).unwrap();
        zip.write_all(&[0u8; 64]).unwrap();
        zip.finish().unwrap();
    }

    #[test]
    fn test_check_alignment_reports_misaligned_stored_entries() {
        let temp = TempDir::new().unwrap();
        let loose = temp.path().join("loose.apk");
        let aligned = temp.path().join("aligned.apk");
        write_archive(&loose, 1);
        write_archive(&aligned, 4);

        let misaligned = check_alignment(&loose).unwrap();
        assert!(!misaligned.is_empty());
        assert!(misaligned.iter().all(|name| name != "AndroidManifest.xml"));
        assert!(check_alignment(&aligned).unwrap().is_empty());
    }

    #[test]
    fn test_align_invokes_tool_with_boundary() {
        struct Recorder;
        impl CommandRunner for Recorder {
            fn run(&self, cmd: &Cmd) -> std::io::Result<CommandOutput> {
                assert_eq!(cmd.get_args()[0], "4");
                fs::copy(&cmd.get_args()[1], &cmd.get_args()[2])?;
                Ok(CommandOutput {
                    status: Some(0),
                    ..Default::default()
                })
            }
        }

        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in.apk");
        write_archive(&input, 4);
        let output = temp.path().join("out.apk");
        fs::write(&output, "stale").unwrap();

        let result = align(&Recorder, Path::new("zipalign"), &input, &output).unwrap();
        assert_eq!(fs::read(result).unwrap(), fs::read(&input).unwrap());
    }

    #[test]
    fn test_align_failure_is_tool_error() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in.apk");
        write_archive(&input, 1);

        let err = align(&LocalRunner, Path::new("false"), &input, &temp.path().join("o.apk"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolInvocation);
    }
}
