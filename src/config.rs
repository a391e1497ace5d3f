//! TOML configuration and wiring of the default host collaborators.
//!
//! Every key is optional. Relative paths are resolved against the
//! directory holding the configuration file.
//!
//! ```toml
//! cache_dir = "/data/local/tmp/overlay-builder"
//! namespace = "overlaybuilder"
//! min_sdk_version = 28
//!
//! [signing]
//! keystore = "signing-key.p12"
//!
//! [tools]
//! elevate = ["su", "-c"]
//!
//! [packages."com.android.systemui"]
//! version_name = "11.0.00.3"
//! version_code = 1100000300
//! source_dir = "/system/priv-app/SystemUI/SystemUI.apk"
//!
//! [options]
//! qs_tiles_portrait = 5
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::error::{OverlayError, Result};
use crate::host::{
    BundledTools, ConfiguredPackages, DirAssets, PackageInfo, PackageInfoSource,
    PackageManagerQuery, Tool,
};
use crate::overlay::OverlayOptions;
use crate::pipeline::{BuildSettings, IdentitySource, ManifestSettings, OverlayBuilder};
use crate::process::ElevatedRunner;
use crate::signing::SignOptions;

const APP_DIR: &str = "overlay-builder";

/// Resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// File the configuration was read from, if any.
    pub source: Option<PathBuf>,
    pub cache_dir: PathBuf,
    pub assets_dir: PathBuf,
    pub namespace: String,
    pub min_sdk_version: u32,
    pub framework_res: PathBuf,
    pub overlay_permission: String,
    pub overlay_format_version: u32,
    pub signing: SigningConfig,
    pub tools: ToolsConfig,
    pub packages: BTreeMap<String, PackageInfo>,
    pub options: OverlayOptions,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SigningConfig {
    /// Asset path of the PKCS#12 keystore.
    pub keystore: String,
    pub passphrase: String,
    pub signer_name: String,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            keystore: "signing-key.p12".to_string(),
            passphrase: "overlay".to_string(),
            signer_name: "overlay".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    pub aapt: Option<PathBuf>,
    pub zipalign: Option<PathBuf>,
    /// Privilege wrapper prepended to every tool invocation, e.g. `["su", "-c"]`.
    pub elevate: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigToml {
    cache_dir: Option<PathBuf>,
    assets_dir: Option<PathBuf>,
    namespace: Option<String>,
    min_sdk_version: Option<u32>,
    framework_res: Option<PathBuf>,
    overlay_permission: Option<String>,
    overlay_format_version: Option<u32>,
    #[serde(default)]
    signing: SigningConfig,
    #[serde(default)]
    tools: ToolsConfig,
    #[serde(default)]
    packages: BTreeMap<String, PackageInfo>,
    #[serde(default)]
    options: OverlayOptions,
}

impl Config {
    /// `<config dir>/overlay-builder/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
    }

    /// Load `path`, or the default location when `None`.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_file(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::load_file(&path),
                _ => {
                    debug!("no configuration file, using defaults");
                    Self::resolve(ConfigToml::default(), None)
                }
            },
        }
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| OverlayError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&text, path)
    }

    /// Parse `text` as if read from `path`.
    pub fn from_toml(text: &str, path: &Path) -> Result<Self> {
        let raw: ConfigToml = toml::from_str(text).map_err(|e| OverlayError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::resolve(raw, Some(path))
    }

    fn resolve(raw: ConfigToml, source: Option<&Path>) -> Result<Self> {
        let base = source
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let relative = |path: PathBuf| if path.is_absolute() { path } else { base.join(path) };
        let invalid = |reason: String| OverlayError::Config {
            path: source.map(Path::to_path_buf).unwrap_or_default(),
            reason,
        };

        let namespace = raw.namespace.unwrap_or_else(|| "overlaybuilder".to_string());
        let namespace_valid = namespace
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && namespace.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !namespace_valid {
            return Err(invalid(format!(
                "namespace '{namespace}' must be a single package segment"
            )));
        }
        if raw.tools.elevate.iter().any(String::is_empty) {
            return Err(invalid("tools.elevate must not contain empty words".to_string()));
        }

        let cache_dir = raw
            .cache_dir
            .map(&relative)
            .or_else(|| dirs::cache_dir().map(|dir| dir.join(APP_DIR)))
            .unwrap_or_else(|| std::env::temp_dir().join(APP_DIR));

        Ok(Self {
            source: source.map(Path::to_path_buf),
            cache_dir,
            assets_dir: relative(raw.assets_dir.unwrap_or_else(|| PathBuf::from("assets"))),
            namespace,
            min_sdk_version: raw.min_sdk_version.unwrap_or(SignOptions::default().min_sdk_version),
            framework_res: raw
                .framework_res
                .unwrap_or_else(|| PathBuf::from("/system/framework/framework-res.apk")),
            overlay_permission: raw
                .overlay_permission
                .unwrap_or_else(|| ManifestSettings::default().overlay_permission),
            overlay_format_version: raw
                .overlay_format_version
                .unwrap_or(ManifestSettings::default().overlay_format_version),
            signing: raw.signing,
            tools: ToolsConfig {
                aapt: raw.tools.aapt.map(&relative),
                zipalign: raw.tools.zipalign.map(&relative),
                elevate: raw.tools.elevate,
            },
            packages: raw.packages,
            options: raw.options,
        })
    }

    pub fn assets(&self) -> DirAssets {
        DirAssets::new(&self.assets_dir)
    }

    pub fn runner(&self) -> ElevatedRunner {
        ElevatedRunner::new(self.tools.elevate.clone())
    }

    pub fn tool_locator(&self) -> BundledTools<DirAssets> {
        BundledTools::new(self.assets(), &self.cache_dir)
            .with_override(Tool::Aapt, self.tools.aapt.clone())
            .with_override(Tool::Zipalign, self.tools.zipalign.clone())
    }

    /// Configured package metadata, or the device package manager when none is listed.
    pub fn package_source(&self) -> Arc<dyn PackageInfoSource> {
        if self.packages.is_empty() {
            Arc::new(PackageManagerQuery::new(self.runner()))
        } else {
            Arc::new(ConfiguredPackages::new(self.packages.clone()))
        }
    }

    pub fn build_settings(&self) -> BuildSettings {
        BuildSettings {
            cache_dir: self.cache_dir.clone(),
            framework_res: self.framework_res.clone(),
            manifest: ManifestSettings {
                overlay_permission: self.overlay_permission.clone(),
                overlay_format_version: self.overlay_format_version,
            },
            signing: SignOptions {
                min_sdk_version: self.min_sdk_version,
                signer_name: self.signing.signer_name.clone(),
            },
        }
    }

    /// Builder wired to the configured collaborators.
    pub fn overlay_builder(&self) -> OverlayBuilder {
        OverlayBuilder::new(
            self.build_settings(),
            Arc::new(self.runner()),
            Arc::new(self.tool_locator()),
            self.package_source(),
            IdentitySource::Keystore {
                assets: Arc::new(self.assets()),
                path: self.signing.keystore.clone(),
                passphrase: self.signing.passphrase.clone(),
            },
        )
    }
}
