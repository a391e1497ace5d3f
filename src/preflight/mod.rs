//! Preflight checks for build validation.
//!
//! Confirms the resource compiler and alignment tool can be provided, and
//! that the signing keystore opens, before a build starts. This turns a
//! missing tool into one clear report instead of a failed compile stage.
//!
//! # Example
//!
//! ```rust,ignore
//! use overlay_builder::{preflight, Config};
//!
//! let config = Config::load(None)?;
//! let report = preflight::run(&config.tool_locator(), &config.assets(), &config.signing.keystore, &config.signing.passphrase);
//! if let Err(e) = report.ensure_ready() {
//!     eprintln!("{e}");
//! }
//! ```

use std::path::PathBuf;

use anyhow::{bail, Result};
use serde::Serialize;

use crate::host::{AssetSource, Tool, ToolLocator};
use crate::signing::SigningIdentity;

/// Result of locating one tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCheck {
    pub tool: &'static str,
    pub path: Option<PathBuf>,
    pub install_hint: &'static str,
}

/// Everything a build needs from the host.
#[derive(Debug, Clone, Serialize)]
pub struct PreflightReport {
    pub tools: Vec<ToolCheck>,
    /// `None` when the keystore opened, otherwise the reason it did not.
    pub keystore_error: Option<String>,
}

impl PreflightReport {
    /// Fail with every missing requirement listed.
    pub fn ensure_ready(&self) -> Result<()> {
        let mut missing: Vec<String> = self
            .tools
            .iter()
            .filter(|check| check.path.is_none())
            .map(|check| format!("  {} (install: {})", check.tool, check.install_hint))
            .collect();
        if let Some(reason) = &self.keystore_error {
            missing.push(format!("  signing keystore: {reason}"));
        }
        if !missing.is_empty() {
            bail!("Missing build requirements:\n{}", missing.join("\n"));
        }
        Ok(())
    }
}

/// Locate every tool and open the keystore.
pub fn run(
    tools: &dyn ToolLocator,
    assets: &dyn AssetSource,
    keystore: &str,
    passphrase: &str,
) -> PreflightReport {
    let tools = Tool::ALL
        .iter()
        .map(|&tool| ToolCheck {
            tool: tool.name(),
            path: tools.locate(tool),
            install_hint: tool.install_hint(),
        })
        .collect();
    let keystore_error = SigningIdentity::load(assets, keystore, passphrase)
        .err()
        .map(|e| e.to_string());
    PreflightReport {
        tools,
        keystore_error,
    }
}
