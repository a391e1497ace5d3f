//! Manifest stage: target metadata -> `AndroidManifest.xml`.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;
use crate::host::{PackageInfo, PackageInfoSource};
use crate::resource::materialize::write_text;
use crate::resource::xml::{self, ManifestSpec};
use crate::resource::OverlayRequest;

/// Fixed manifest fields that do not depend on the request.
#[derive(Debug, Clone)]
pub struct ManifestSettings {
    pub overlay_permission: String,
    pub overlay_format_version: u32,
}

impl Default for ManifestSettings {
    fn default() -> Self {
        Self {
            overlay_permission: "com.samsung.android.permission.SAMSUNG_OVERLAY_COMPONENT"
                .to_string(),
            overlay_format_version: 100,
        }
    }
}

/// Render the manifest for `request` into `path`, replacing any earlier one.
///
/// Returns the target's metadata alongside the path; the compile stage
/// needs the installed archive location.
pub fn build_manifest(
    path: &Path,
    request: &OverlayRequest,
    packages: &dyn PackageInfoSource,
    settings: &ManifestSettings,
) -> Result<(PathBuf, PackageInfo)> {
    let info = packages.package_info(&request.target_package)?;
    debug!(
        target = %request.target_package,
        version_name = %info.version_name,
        version_code = info.version_code,
        "read target metadata"
    );

    let document = xml::manifest(&ManifestSpec {
        target_package: &request.target_package,
        overlay_package: &request.overlay_package,
        target_version_name: &info.version_name,
        target_version_code: info.version_code,
        overlay_permission: &settings.overlay_permission,
        overlay_format_version: settings.overlay_format_version,
    });
    crate::artifact::remove_stale(path)?;
    write_text(path, &document)?;
    Ok((path.to_path_buf(), info))
}

/// Installed archive to import when compiling, `None` for the platform.
pub fn target_import(request: &OverlayRequest, info: &PackageInfo) -> Option<PathBuf> {
    (!request.targets_platform()).then(|| info.source_dir.clone())
}
