//! Host collaborators consumed by the pipeline.
//!
//! - [`assets`] - bundled files (templates, keystore, tool binaries)
//! - [`tools`] - locating the resource compiler and alignment tool
//! - [`packages`] - installed-package metadata
//!
//! Command execution lives in [`crate::process`].

pub mod assets;
pub mod packages;
pub mod tools;

pub use assets::{extract_asset, AesCbcCipher, AssetCipher, AssetSource, DirAssets};
pub use packages::{ConfiguredPackages, PackageInfo, PackageInfoSource, PackageManagerQuery};
pub use tools::{BundledTools, Tool, ToolLocator};
