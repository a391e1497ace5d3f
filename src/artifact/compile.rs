//! Resource compilation: manifest + resource tree -> unsigned archive.
//!
//! Wraps `aapt p`. The platform's base resource table is always imported;
//! when the overlay targets an application, that application's installed
//! archive is imported too so its private resource identifiers resolve.

use std::path::{Path, PathBuf};

use tracing::info;
use walkdir::WalkDir;

use super::{remove_stale, ToolRun};
use crate::error::{OverlayError, Result};
use crate::process::{Cmd, CommandRunner};

/// Inputs for one resource-compiler run.
#[derive(Debug, Clone)]
pub struct CompileInputs<'a> {
    /// Generated `AndroidManifest.xml`.
    pub manifest: &'a Path,
    /// Root of the materialized resource tree (`res/`).
    pub resource_root: &'a Path,
    /// Platform base resource table (`framework-res.apk`).
    pub framework_res: &'a Path,
    /// Installed archive of the target application, `None` for the platform.
    pub target_archive: Option<&'a Path>,
}

/// Build the `aapt` command line for `inputs`, writing to `output`.
pub fn compile_command(aapt: &Path, inputs: &CompileInputs<'_>, output: &Path) -> Cmd {
    let mut cmd = Cmd::new(aapt)
        .arg("p")
        .arg("-M")
        .arg_path(inputs.manifest)
        .arg("-I")
        .arg_path(inputs.framework_res);
    if let Some(target) = inputs.target_archive {
        cmd = cmd.arg("-I").arg_path(target);
    }
    cmd.arg("-S")
        .arg_path(inputs.resource_root)
        .arg("-F")
        .arg_path(output)
        .error_msg("resource compiler (aapt) from Android SDK build-tools")
}

/// Compile the overlay into an unsigned, unaligned archive at `output`.
///
/// Any file already at `output` is removed first. Fails with
/// [`OverlayError::ToolInvocation`] if `aapt` exits non-zero or leaves no
/// output; the error carries the command line and captured streams.
pub fn compile(
    runner: &dyn CommandRunner,
    aapt: &Path,
    inputs: &CompileInputs<'_>,
    output: &Path,
) -> Result<PathBuf> {
    let resource_files = count_files(inputs.resource_root);
    if resource_files == 0 {
        return Err(OverlayError::InvalidRequest(format!(
            "resource tree {} is empty",
            inputs.resource_root.display()
        )));
    }
    remove_stale(output)?;

    let cmd = compile_command(aapt, inputs, output);
    let archive = ToolRun::execute(&cmd, runner, output)?.require_artifact()?;
    info!(
        archive = %archive.display(),
        resources = resource_files,
        "compiled unsigned overlay"
    );
    Ok(archive)
}

fn count_files(root: &Path) -> usize {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::LocalRunner;
    use crate::ErrorKind;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn inputs_in(temp: &TempDir) -> (PathBuf, PathBuf, PathBuf) {
        let manifest = temp.path().join("AndroidManifest.xml");
        fs::write(&manifest, "<manifest/>").unwrap();
        let res = temp.path().join("res");
        fs::create_dir_all(res.join("values")).unwrap();
        fs::write(res.join("values/integers.xml"), "<resources/>").unwrap();
        let framework = temp.path().join("framework-res.apk");
        fs::write(&framework, "PK").unwrap();
        (manifest, res, framework)
    }

    /// Shell script standing in for `aapt`: writes the `-F` argument.
    fn fake_aapt(temp: &TempDir, body: &str) -> PathBuf {
        let path = temp.path().join("aapt");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    const WRITE_OUTPUT: &str =
        r#"while [ $# -gt 0 ]; do if [ "$1" = "-F" ]; then printf PK > "$2"; fi; shift; done"#;

    #[test]
    fn test_platform_target_imports_framework_only() {
        let temp = TempDir::new().unwrap();
        let (manifest, res, framework) = inputs_in(&temp);
        let inputs = CompileInputs {
            manifest: &manifest,
            resource_root: &res,
            framework_res: &framework,
            target_archive: None,
        };

        let cmd = compile_command(Path::new("aapt"), &inputs, Path::new("out.apk"));
        let imports = cmd.get_args().iter().filter(|a| *a == "-I").count();
        assert_eq!(imports, 1);
        assert_eq!(cmd.get_args()[0], "p");
    }

    #[test]
    fn test_app_target_imports_installed_archive() {
        let inputs = CompileInputs {
            manifest: Path::new("AndroidManifest.xml"),
            resource_root: Path::new("res"),
            framework_res: Path::new("/system/framework/framework-res.apk"),
            target_archive: Some(Path::new("/system/priv-app/SystemUI/SystemUI.apk")),
        };

        let line = compile_command(Path::new("aapt"), &inputs, Path::new("out.apk")).command_line();
        assert_eq!(
            line,
            "aapt p -M AndroidManifest.xml -I /system/framework/framework-res.apk \
             -I /system/priv-app/SystemUI/SystemUI.apk -S res -F out.apk"
        );
    }

    #[test]
    fn test_compile_replaces_stale_output() {
        let temp = TempDir::new().unwrap();
        let (manifest, res, framework) = inputs_in(&temp);
        let aapt = fake_aapt(&temp, WRITE_OUTPUT);
        let out = temp.path().join("overlay_UNSIGNED_UNALIGNED.apk");
        fs::write(&out, "stale archive from an earlier run").unwrap();

        let inputs = CompileInputs {
            manifest: &manifest,
            resource_root: &res,
            framework_res: &framework,
            target_archive: None,
        };
        compile(&LocalRunner, &aapt, &inputs, &out).unwrap();

        assert_eq!(fs::read(&out).unwrap(), b"PK");
    }

    #[test]
    fn test_compile_failure_surfaces_tool_output() {
        let temp = TempDir::new().unwrap();
        let (manifest, res, framework) = inputs_in(&temp);
        let aapt = fake_aapt(
            &temp,
            "echo 'res/values/integers.xml:2: error: Error parsing XML: unbound prefix' >&2; exit 1",
        );
        let out = temp.path().join("out.apk");
        fs::write(&out, "stale").unwrap();

        let inputs = CompileInputs {
            manifest: &manifest,
            resource_root: &res,
            framework_res: &framework,
            target_archive: None,
        };
        let err = compile(&LocalRunner, &aapt, &inputs, &out).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ToolInvocation);
        assert!(err.to_string().contains("unbound prefix"));
        assert!(err.to_string().contains("-S"));
        assert!(!out.exists());
    }

    #[test]
    fn test_empty_resource_tree_rejected() {
        let temp = TempDir::new().unwrap();
        let (manifest, _, framework) = inputs_in(&temp);
        let empty = temp.path().join("empty-res");
        fs::create_dir_all(&empty).unwrap();

        let inputs = CompileInputs {
            manifest: &manifest,
            resource_root: &empty,
            framework_res: &framework,
            target_archive: None,
        };
        let err = compile(&LocalRunner, Path::new("aapt"), &inputs, &temp.path().join("o.apk"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }
}
