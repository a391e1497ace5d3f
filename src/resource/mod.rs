//! Resource model for overlay requests.
//!
//! An [`OverlayRequest`] names the target package, the overlay package that
//! will be generated, and the ordered resource files to place in the
//! overlay's resource tree.
//!
//! - [`xml`] - renders value, layout and manifest documents
//! - [`materialize`] - writes entries into a resource-tree directory

pub mod materialize;
pub mod xml;

use std::collections::HashSet;
use std::fmt;

use image::DynamicImage;

use crate::error::{OverlayError, Result};

/// Package identifier meaning "the platform itself".
pub const PLATFORM_PACKAGE: &str = "android";

/// Content of one resource file.
#[derive(Clone)]
pub enum Payload {
    /// XML text, written as UTF-8 with a trailing newline.
    Text(String),
    /// Raster image, written as PNG.
    Image(DynamicImage),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
            Payload::Image(image) => f
                .debug_tuple("Image")
                .field(&(image.width(), image.height()))
                .finish(),
        }
    }
}

/// One file in the overlay's resource tree.
#[derive(Debug, Clone)]
pub struct ResourceEntry {
    /// File name inside the resource directory (e.g. `integers.xml`).
    pub file_name: String,
    /// Resource qualifier directory (e.g. `values`, `values-land`, `layout`).
    pub resource_directory: String,
    pub payload: Payload,
}

impl ResourceEntry {
    pub fn text(
        file_name: impl Into<String>,
        resource_directory: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            resource_directory: resource_directory.into(),
            payload: Payload::Text(content.into()),
        }
    }

    pub fn image(
        file_name: impl Into<String>,
        resource_directory: impl Into<String>,
        image: DynamicImage,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            resource_directory: resource_directory.into(),
            payload: Payload::Image(image),
        }
    }

    /// Path of this entry relative to the resource-tree root.
    pub fn relative_path(&self) -> String {
        format!("{}/{}", self.resource_directory, self.file_name)
    }
}

/// One overlay build job.
#[derive(Debug, Clone)]
pub struct OverlayRequest {
    pub target_package: String,
    pub overlay_package: String,
    /// Order is preserved through materialization.
    pub resources: Vec<ResourceEntry>,
}

impl OverlayRequest {
    pub fn new(
        target_package: impl Into<String>,
        overlay_package: impl Into<String>,
        resources: Vec<ResourceEntry>,
    ) -> Self {
        Self {
            target_package: target_package.into(),
            overlay_package: overlay_package.into(),
            resources,
        }
    }

    /// Whether the target is the platform itself rather than an app.
    pub fn targets_platform(&self) -> bool {
        self.target_package == PLATFORM_PACKAGE
    }

    /// Reject malformed requests before any file is written.
    ///
    /// Two entries sharing `(resource_directory, file_name)` are rejected
    /// rather than resolved by ordering.
    pub fn validate(&self) -> Result<()> {
        if self.target_package != PLATFORM_PACKAGE {
            validate_package_name(&self.target_package, "target package")?;
        }
        validate_package_name(&self.overlay_package, "overlay package")?;
        if self.overlay_package == self.target_package {
            return Err(OverlayError::InvalidRequest(format!(
                "overlay package must differ from target '{}'",
                self.target_package
            )));
        }
        if self.resources.is_empty() {
            return Err(OverlayError::InvalidRequest(format!(
                "overlay '{}' has no resources",
                self.overlay_package
            )));
        }

        let mut seen = HashSet::new();
        for entry in &self.resources {
            validate_segment(&entry.resource_directory, "resource directory")?;
            validate_segment(&entry.file_name, "resource file name")?;
            if !seen.insert((entry.resource_directory.as_str(), entry.file_name.as_str())) {
                return Err(OverlayError::InvalidRequest(format!(
                    "duplicate resource entry '{}'",
                    entry.relative_path()
                )));
            }
        }
        Ok(())
    }
}

/// Derive the overlay package identifier for a target and category tag.
///
/// `com.android.systemui` + `overlaybuilder` + `clock` becomes
/// `com.android.systemui.overlaybuilder.overlay.clock`.
pub fn overlay_package_name(target_package: &str, namespace: &str, tag: &str) -> String {
    format!("{target_package}.{namespace}.overlay.{tag}")
}

/// Check a reverse-domain package identifier (`com.example.app`).
pub fn validate_package_name(name: &str, what: &str) -> Result<()> {
    let segments: Vec<&str> = name.split('.').collect();
    if segments.len() < 2 {
        return Err(OverlayError::InvalidRequest(format!(
            "{what} '{name}' must have at least two segments"
        )));
    }
    for segment in segments {
        let mut chars = segment.chars();
        let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(OverlayError::InvalidRequest(format!(
                "{what} '{name}' has invalid segment '{segment}'"
            )));
        }
    }
    Ok(())
}

fn validate_segment(value: &str, what: &str) -> Result<()> {
    if value.is_empty()
        || value == "."
        || value == ".."
        || value.contains('/')
        || value.contains('\\')
    {
        return Err(OverlayError::InvalidRequest(format!(
            "{what} must be a single path segment, got '{value}'"
        )));
    }
    Ok(())
}
