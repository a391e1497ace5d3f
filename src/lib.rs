//! Builds, aligns and signs resource-only overlay packages.
//!
//! An overlay replaces resources (layouts, attribute values, integers) of
//! a target application at load time without touching the target's own
//! installed archive. This crate drives the whole build:
//!
//! - **Resource model** - [`OverlayRequest`] and its [`ResourceEntry`] list
//! - **XML synthesis** - value, layout and manifest documents
//! - **Materialization** - writing the resource tree into a workspace
//! - **Compile / align** - `aapt` and `zipalign` behind a [`CommandRunner`]
//! - **Signing** - v1 (JAR) and v2 (APK Signing Block) with one identity
//! - **Orchestration** - [`OverlayBuilder`] with a per-overlay build lock
//!
//! # Architecture
//!
//! ```text
//! OverlayKind + OverlayOptions
//!     │
//!     └── OverlayRequest ──► OverlayBuilder
//!                              ├── BuildWorkspace   (<cache>/<overlay package>/)
//!                              ├── materialize      (res/)
//!                              ├── build_manifest   (AndroidManifest.xml)
//!                              ├── compile          (aapt    -> _UNSIGNED_UNALIGNED.apk)
//!                              ├── align            (zipalign -> _UNSIGNED.apk)
//!                              ├── signing::sign    (v1 + v2 -> _SIGNED.apk)
//!                              └── publish          (<cache>/out/<overlay package>.apk)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use overlay_builder::{Config, OverlayKind};
//!
//! let config = Config::load(None)?;
//! let request = OverlayKind::QuickSettings.request(&config.options, &config.assets(), &config.namespace)?;
//! let output = config.overlay_builder().build(&request)?;
//! println!("{}", output.signed_archive.display());
//! ```

pub mod artifact;
pub mod config;
pub mod error;
pub mod host;
pub mod overlay;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod resource;
pub mod signing;

pub use config::Config;
pub use error::{ErrorKind, OverlayError, Result};
pub use overlay::{AmPmStyle, OverlayKind, OverlayOptions};
pub use pipeline::{BuildFailure, BuildOutput, OverlayBuilder, Stage};
pub use process::{CommandOutput, CommandRunner};
pub use resource::{OverlayRequest, Payload, ResourceEntry};
pub use signing::{SignOptions, SigningIdentity};
