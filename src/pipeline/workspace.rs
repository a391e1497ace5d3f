//! Per-request build workspace.
//!
//! ```text
//! <cache>/<overlay package>/
//!     AndroidManifest.xml
//!     res/<qualifier>/<file>
//!     <overlay package>_UNSIGNED_UNALIGNED.apk
//!     <overlay package>_UNSIGNED.apk
//!     <overlay package>_SIGNED.apk
//! ```

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{OverlayError, Result};

/// Mode applied to the workspace so an elevated tool channel can use it.
pub const WORKSPACE_MODE: u32 = 0o777;

/// Filesystem scope of one build.
#[derive(Debug, Clone)]
pub struct BuildWorkspace {
    root: PathBuf,
    overlay_package: String,
}

impl BuildWorkspace {
    /// Recreate `<parent>/<overlay_package>` empty.
    ///
    /// Anything left by an earlier build of the same overlay is destroyed.
    /// Callers must hold the overlay's build lock.
    pub fn create(parent: &Path, overlay_package: &str) -> Result<Self> {
        let root = parent.join(overlay_package);
        if root.exists() {
            debug!(workspace = %root.display(), "removing previous workspace");
            fs::remove_dir_all(&root).map_err(|e| OverlayError::write(&root, e))?;
        }
        fs::create_dir_all(&root).map_err(|e| OverlayError::write(&root, e))?;
        fs::set_permissions(&root, fs::Permissions::from_mode(WORKSPACE_MODE))
            .map_err(|e| OverlayError::write(&root, e))?;
        Ok(Self {
            root,
            overlay_package: overlay_package.to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> PathBuf {
        self.root.join("AndroidManifest.xml")
    }

    pub fn resource_root(&self) -> PathBuf {
        self.root.join("res")
    }

    pub fn unsigned_unaligned(&self) -> PathBuf {
        self.archive("UNSIGNED_UNALIGNED")
    }

    pub fn unsigned_aligned(&self) -> PathBuf {
        self.archive("UNSIGNED")
    }

    pub fn signed(&self) -> PathBuf {
        self.archive("SIGNED")
    }

    fn archive(&self, stage: &str) -> PathBuf {
        self.root.join(format!("{}_{stage}.apk", self.overlay_package))
    }

    /// Give one stage output the workspace mode.
    pub fn open_artifact(&self, path: &Path) -> Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(WORKSPACE_MODE))
            .map_err(|e| OverlayError::write(path, e))
    }

    /// Open up permissions on everything under the workspace.
    pub fn open_permissions(&self) -> Result<()> {
        for entry in walkdir::WalkDir::new(&self.root) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&self.root).to_path_buf();
                OverlayError::write(path, e.into())
            })?;
            fs::set_permissions(entry.path(), fs::Permissions::from_mode(WORKSPACE_MODE))
                .map_err(|e| OverlayError::write(entry.path(), e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_destroys_stray_files() {
        let temp = TempDir::new().unwrap();
        let stale = temp.path().join("com.example.target.app.overlay.clock");
        fs::create_dir_all(stale.join("res/values")).unwrap();
        fs::write(stale.join("stray.txt"), "left over").unwrap();
        fs::write(stale.join("res/values/old.xml"), "<resources/>").unwrap();

        let ws = BuildWorkspace::create(temp.path(), "com.example.target.app.overlay.clock").unwrap();

        assert_eq!(ws.root(), stale);
        assert_eq!(fs::read_dir(ws.root()).unwrap().count(), 0);
    }

    #[test]
    fn test_artifact_paths() {
        let temp = TempDir::new().unwrap();
        let ws = BuildWorkspace::create(temp.path(), "a.b.overlay.qs").unwrap();

        assert_eq!(ws.manifest(), ws.root().join("AndroidManifest.xml"));
        assert_eq!(ws.resource_root(), ws.root().join("res"));
        assert_eq!(
            ws.unsigned_unaligned().file_name().unwrap(),
            "a.b.overlay.qs_UNSIGNED_UNALIGNED.apk"
        );
        assert_eq!(ws.unsigned_aligned().file_name().unwrap(), "a.b.overlay.qs_UNSIGNED.apk");
        assert_eq!(ws.signed().file_name().unwrap(), "a.b.overlay.qs_SIGNED.apk");
    }

    #[test]
    fn test_artifact_permissions_opened() {
        let temp = TempDir::new().unwrap();
        let ws = BuildWorkspace::create(temp.path(), "a.b.overlay.qs").unwrap();
        fs::write(ws.signed(), "PK").unwrap();
        fs::set_permissions(ws.signed(), fs::Permissions::from_mode(0o600)).unwrap();

        ws.open_artifact(&ws.signed()).unwrap();

        let mode = fs::metadata(ws.signed()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o777);
    }

    #[test]
    fn test_permissions_opened() {
        let temp = TempDir::new().unwrap();
        let ws = BuildWorkspace::create(temp.path(), "a.b.overlay.qs").unwrap();
        fs::create_dir_all(ws.resource_root().join("values")).unwrap();
        fs::write(ws.resource_root().join("values/integers.xml"), "<resources/>").unwrap();

        ws.open_permissions().unwrap();

        let mode = fs::metadata(ws.resource_root().join("values/integers.xml"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o777);
        let root_mode = fs::metadata(ws.root()).unwrap().permissions().mode();
        assert_eq!(root_mode & 0o777, 0o777);
    }
}
