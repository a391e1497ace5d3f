//! Catalog of the overlays this tool knows how to build.
//!
//! Each [`OverlayKind`] turns user options into an [`OverlayRequest`]
//! against SystemUI. Clock overlays are built from bundled layout
//! templates; quick-settings overlays are generated value documents.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{OverlayError, Result};
use crate::host::assets::read_text_asset;
use crate::host::AssetSource;
use crate::resource::xml::{resource_values, ResourceItem};
use crate::resource::{overlay_package_name, OverlayRequest, ResourceEntry};

/// Package every catalog overlay targets.
pub const SYSTEMUI_PACKAGE: &str = "com.android.systemui";

/// Placeholder visibility in the clock templates, replaced by the AM/PM style.
const AM_PM_PLACEHOLDER: &str = "gone";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverlayKind {
    /// Status-bar clock layout.
    Clock,
    /// Quick-settings header tile count.
    QuickSettings,
}

impl OverlayKind {
    pub const ALL: [OverlayKind; 2] = [OverlayKind::Clock, OverlayKind::QuickSettings];

    /// Category tag, the last segment of the overlay package.
    pub fn tag(self) -> &'static str {
        match self {
            OverlayKind::Clock => "clock",
            OverlayKind::QuickSettings => "qs",
        }
    }

    pub fn target_package(self) -> &'static str {
        SYSTEMUI_PACKAGE
    }

    /// `<target>.<namespace>.overlay.<tag>`
    pub fn overlay_package(self, namespace: &str) -> String {
        overlay_package_name(self.target_package(), namespace, self.tag())
    }

    /// Build the request for this kind from `options`.
    pub fn request(
        self,
        options: &OverlayOptions,
        assets: &dyn AssetSource,
        namespace: &str,
    ) -> Result<OverlayRequest> {
        let resources = match self {
            OverlayKind::Clock => clock_resources(options, assets)?,
            OverlayKind::QuickSettings => quick_settings_resources(options),
        };
        Ok(OverlayRequest::new(
            self.target_package(),
            self.overlay_package(namespace),
            resources,
        ))
    }
}

impl fmt::Display for OverlayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for OverlayKind {
    type Err = OverlayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "clock" => Ok(OverlayKind::Clock),
            "qs" | "quick-settings" | "quick_settings" => Ok(OverlayKind::QuickSettings),
            other => Err(OverlayError::InvalidRequest(format!(
                "unknown overlay kind '{other}' (expected clock or qs)"
            ))),
        }
    }
}

/// How the AM/PM marker next to the clock is shown.
///
/// Values of the `amPmStyle` enum declared in `clock/values/attrs.xml`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmPmStyle {
    Normal,
    Small,
    #[default]
    Gone,
}

impl AmPmStyle {
    pub const ALL: [AmPmStyle; 3] = [AmPmStyle::Normal, AmPmStyle::Small, AmPmStyle::Gone];

    /// Enum name written to `systemui:amPmStyle`.
    pub fn as_str(self) -> &'static str {
        match self {
            AmPmStyle::Normal => "normal",
            AmPmStyle::Small => "small",
            AmPmStyle::Gone => "gone",
        }
    }
}

impl FromStr for AmPmStyle {
    type Err = OverlayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "normal" => Ok(AmPmStyle::Normal),
            "small" => Ok(AmPmStyle::Small),
            "gone" => Ok(AmPmStyle::Gone),
            other => Err(OverlayError::InvalidRequest(format!(
                "unknown AM/PM style '{other}' (expected normal, small or gone)"
            ))),
        }
    }
}

/// User-chosen overlay parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OverlayOptions {
    /// Use the AOSP clock layout instead of the vendor one.
    pub stock_clock: bool,
    pub am_pm_style: AmPmStyle,
    pub qs_tiles_portrait: u32,
    pub qs_tiles_landscape: u32,
}

impl Default for OverlayOptions {
    fn default() -> Self {
        Self {
            stock_clock: false,
            am_pm_style: AmPmStyle::Gone,
            qs_tiles_portrait: 6,
            qs_tiles_landscape: 8,
        }
    }
}

fn clock_resources(options: &OverlayOptions, assets: &dyn AssetSource) -> Result<Vec<ResourceEntry>> {
    let template = if options.stock_clock {
        "clock/layout/qs_status_bar_clock_aosp.xml"
    } else {
        "clock/layout/qs_status_bar_clock_tw.xml"
    };
    let layout = read_text_asset(assets, template)?
        .replace(AM_PM_PLACEHOLDER, options.am_pm_style.as_str());
    let attrs = read_text_asset(assets, "clock/values/attrs.xml")?;

    Ok(vec![
        ResourceEntry::text("qs_status_bar_clock.xml", "layout", layout),
        ResourceEntry::text("attrs.xml", "values", attrs),
    ])
}

fn quick_settings_resources(options: &OverlayOptions) -> Vec<ResourceEntry> {
    let tiles = |count: u32| {
        resource_values(&[ResourceItem::new(
            "integer",
            "quick_qs_tile_num",
            count.to_string(),
        )])
    };
    vec![
        ResourceEntry::text("integers.xml", "values", tiles(options.qs_tiles_portrait)),
        ResourceEntry::text("integers.xml", "values-land", tiles(options.qs_tiles_landscape)),
    ]
}
