//! Locating the external resource compiler and alignment tool.
//!
//! Resolution order for each tool:
//! 1. Explicit path from configuration
//! 2. Previously extracted copy under `<cache>/bin/`
//! 3. Bundled asset, extracted to `<cache>/bin/` and marked executable
//! 4. System PATH (`which`)

use std::fmt;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use super::assets::{extract_asset, AssetSource};

/// External tools the pipeline drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    /// Resource compiler (`aapt`).
    Aapt,
    /// Archive alignment tool (`zipalign`).
    Zipalign,
}

impl Tool {
    pub const ALL: [Tool; 2] = [Tool::Aapt, Tool::Zipalign];

    /// Executable and asset name.
    pub fn name(self) -> &'static str {
        match self {
            Tool::Aapt => "aapt",
            Tool::Zipalign => "zipalign",
        }
    }

    /// Where to get it when neither bundled nor installed.
    pub fn install_hint(self) -> &'static str {
        match self {
            Tool::Aapt | Tool::Zipalign => "Android SDK build-tools",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolves a tool to an executable path; `None` when it cannot be provided.
pub trait ToolLocator: Send + Sync {
    fn locate(&self, tool: Tool) -> Option<PathBuf>;
}

/// Default locator backed by configuration, bundled assets and `PATH`.
pub struct BundledTools<A> {
    assets: A,
    bin_dir: PathBuf,
    aapt: Option<PathBuf>,
    zipalign: Option<PathBuf>,
    extract_lock: Mutex<()>,
}

impl<A: AssetSource> BundledTools<A> {
    pub fn new(assets: A, cache_dir: &Path) -> Self {
        Self {
            assets,
            bin_dir: cache_dir.join("bin"),
            aapt: None,
            zipalign: None,
            extract_lock: Mutex::new(()),
        }
    }

    /// Use an explicit executable instead of the bundled one.
    pub fn with_override(mut self, tool: Tool, path: Option<PathBuf>) -> Self {
        match tool {
            Tool::Aapt => self.aapt = path,
            Tool::Zipalign => self.zipalign = path,
        }
        self
    }

    fn configured(&self, tool: Tool) -> Option<&PathBuf> {
        match tool {
            Tool::Aapt => self.aapt.as_ref(),
            Tool::Zipalign => self.zipalign.as_ref(),
        }
    }

    fn extracted(&self, tool: Tool) -> Option<PathBuf> {
        let _guard = self
            .extract_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let dest = self.bin_dir.join(tool.name());
        if !dest.is_file() {
            if let Err(e) = extract_asset(&self.assets, tool.name(), &dest, None) {
                debug!(%tool, error = %e, "no bundled executable");
                let _ = fs::remove_file(&dest);
                return None;
            }
        }
        if let Err(e) = fs::set_permissions(&dest, fs::Permissions::from_mode(0o755)) {
            warn!(%tool, path = %dest.display(), error = %e, "cannot mark tool executable");
            return None;
        }
        Some(dest)
    }
}

impl<A: AssetSource> ToolLocator for BundledTools<A> {
    fn locate(&self, tool: Tool) -> Option<PathBuf> {
        if let Some(path) = self.configured(tool) {
            return is_executable(path).then(|| path.clone());
        }
        self.extracted(tool)
            .or_else(|| which::which(tool.name()).ok())
    }
}

/// Check if `path` is a regular file with an execute bit set.
pub fn is_executable(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}
