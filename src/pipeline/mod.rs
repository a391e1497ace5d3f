//! Overlay build orchestration.
//!
//! [`OverlayBuilder::build`] runs one request through every stage, each
//! consuming the previous stage's output file:
//!
//! ```text
//! validate -> lock -> workspace -> materialize -> manifest
//!          -> compile (aapt) -> align (zipalign) -> sign (v1 + v2)
//!          -> publish (<cache>/out/<overlay package>.apk) -> unlock
//! ```
//!
//! A failure at any stage ends the build with a [`BuildFailure`] naming the
//! stage. The workspace is left as it was for inspection; the next build of
//! the same overlay recreates it from scratch. The published archive lives
//! outside the workspace and is only ever replaced by an atomic rename.

pub mod lock;
pub mod manifest;
pub mod workspace;

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::info;

use crate::artifact::align::align;
use crate::artifact::compile::{compile, CompileInputs};
use crate::error::{OverlayError, Result};
use crate::host::{AssetSource, PackageInfoSource, Tool, ToolLocator};
use crate::process::CommandRunner;
use crate::resource::materialize::materialize;
use crate::resource::OverlayRequest;
use crate::signing::{self, SignOptions, SigningIdentity};

pub use lock::BuildLock;
pub use manifest::{build_manifest, ManifestSettings};
pub use workspace::BuildWorkspace;

/// Pipeline stage, reported when a build fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validate,
    Workspace,
    Materialize,
    Manifest,
    Compile,
    Align,
    Sign,
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validate => "validate",
            Stage::Workspace => "workspace",
            Stage::Materialize => "materialize",
            Stage::Manifest => "manifest",
            Stage::Compile => "compile",
            Stage::Align => "align",
            Stage::Sign => "sign",
            Stage::Publish => "publish",
        };
        f.write_str(name)
    }
}

/// A build that stopped at `stage`.
#[derive(Debug, Error)]
#[error("overlay build failed at stage '{stage}'")]
pub struct BuildFailure {
    pub stage: Stage,
    #[source]
    pub error: OverlayError,
}

fn at(stage: Stage) -> impl FnOnce(OverlayError) -> BuildFailure {
    move |error| BuildFailure { stage, error }
}

/// Result of a successful build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildOutput {
    pub overlay_package: String,
    pub target_package: String,
    /// Published copy under `<cache>/out/`, outside the workspace.
    pub signed_archive: PathBuf,
    pub workspace: PathBuf,
    /// Hex SHA-256 of the signed archive.
    pub sha256: String,
}

/// Settings shared by every build of one builder.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    /// Parent of workspaces (`<cache>/<overlay package>`) and `locks/`.
    pub cache_dir: PathBuf,
    /// Platform base resource table imported by every compile.
    pub framework_res: PathBuf,
    pub manifest: ManifestSettings,
    pub signing: SignOptions,
}

impl BuildSettings {
    pub fn locks_dir(&self) -> PathBuf {
        self.cache_dir.join("locks")
    }

    /// Where finished archives are published.
    pub fn outputs_dir(&self) -> PathBuf {
        self.cache_dir.join("out")
    }
}

/// Where the signing identity comes from.
pub enum IdentitySource {
    /// PKCS#12 keystore asset, loaded once per process on first use.
    Keystore {
        assets: Arc<dyn AssetSource>,
        path: String,
        passphrase: String,
    },
    /// An identity already in memory.
    Loaded(Arc<SigningIdentity>),
}

/// Drives overlay requests through the build pipeline.
pub struct OverlayBuilder {
    settings: BuildSettings,
    runner: Arc<dyn CommandRunner>,
    tools: Arc<dyn ToolLocator>,
    packages: Arc<dyn PackageInfoSource>,
    identity: IdentitySource,
}

impl OverlayBuilder {
    pub fn new(
        settings: BuildSettings,
        runner: Arc<dyn CommandRunner>,
        tools: Arc<dyn ToolLocator>,
        packages: Arc<dyn PackageInfoSource>,
        identity: IdentitySource,
    ) -> Self {
        Self {
            settings,
            runner,
            tools,
            packages,
            identity,
        }
    }

    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    /// The signing identity, loading it on first use.
    pub fn identity(&self) -> Result<&SigningIdentity> {
        match &self.identity {
            IdentitySource::Keystore {
                assets,
                path,
                passphrase,
            } => SigningIdentity::shared(assets.as_ref(), path, passphrase),
            IdentitySource::Loaded(identity) => Ok(identity.as_ref()),
        }
    }

    /// Build `request` into a signed overlay archive.
    pub fn build(&self, request: &OverlayRequest) -> std::result::Result<BuildOutput, BuildFailure> {
        self.build_with(request, |_| {})
    }

    /// Build `request`, then hand the published archive path to `on_complete`.
    ///
    /// `on_complete` runs only on success, while the build lock is still
    /// held, so no other build of the same overlay can replace the archive
    /// it is looking at.
    pub fn build_with<F>(
        &self,
        request: &OverlayRequest,
        on_complete: F,
    ) -> std::result::Result<BuildOutput, BuildFailure>
    where
        F: FnOnce(&Path),
    {
        request.validate().map_err(at(Stage::Validate))?;
        info!(
            overlay = %request.overlay_package,
            target = %request.target_package,
            resources = request.resources.len(),
            "building overlay"
        );

        let _lock = self.lock(&request.overlay_package).map_err(at(Stage::Workspace))?;
        let output = self.run_stages(request)?;

        info!(
            archive = %output.signed_archive.display(),
            sha256 = %output.sha256,
            "overlay ready"
        );
        on_complete(&output.signed_archive);
        Ok(output)
    }

    fn lock(&self, overlay_package: &str) -> Result<BuildLock> {
        let locks_dir = self.settings.locks_dir();
        if let Some(lock) = BuildLock::try_acquire(&locks_dir, overlay_package)? {
            return Ok(lock);
        }
        info!(overlay = %overlay_package, "another build of this overlay is running, waiting");
        BuildLock::acquire(&locks_dir, overlay_package)
    }

    fn run_stages(&self, request: &OverlayRequest) -> std::result::Result<BuildOutput, BuildFailure> {
        let workspace = BuildWorkspace::create(&self.settings.cache_dir, &request.overlay_package)
            .map_err(at(Stage::Workspace))?;

        info!(stage = %Stage::Materialize, "stage started");
        materialize(&workspace.resource_root(), &request.resources)
            .map_err(at(Stage::Materialize))?;

        info!(stage = %Stage::Manifest, "stage started");
        let (manifest_path, target) = build_manifest(
            &workspace.manifest(),
            request,
            self.packages.as_ref(),
            &self.settings.manifest,
        )
        .map_err(at(Stage::Manifest))?;
        workspace.open_permissions().map_err(at(Stage::Workspace))?;

        info!(stage = %Stage::Compile, "stage started");
        let aapt = self.locate(Tool::Aapt).map_err(at(Stage::Compile))?;
        let target_archive = manifest::target_import(request, &target);
        let resource_root = workspace.resource_root();
        let inputs = CompileInputs {
            manifest: &manifest_path,
            resource_root: &resource_root,
            framework_res: &self.settings.framework_res,
            target_archive: target_archive.as_deref(),
        };
        let unaligned = compile(
            self.runner.as_ref(),
            &aapt,
            &inputs,
            &workspace.unsigned_unaligned(),
        )
        .map_err(at(Stage::Compile))?;
        workspace.open_artifact(&unaligned).map_err(at(Stage::Compile))?;

        info!(stage = %Stage::Align, "stage started");
        let zipalign = self.locate(Tool::Zipalign).map_err(at(Stage::Align))?;
        let aligned = align(
            self.runner.as_ref(),
            &zipalign,
            &unaligned,
            &workspace.unsigned_aligned(),
        )
        .map_err(at(Stage::Align))?;
        workspace.open_artifact(&aligned).map_err(at(Stage::Align))?;

        info!(stage = %Stage::Sign, "stage started");
        let identity = self.identity().map_err(at(Stage::Sign))?;
        let signed = signing::sign(&aligned, &workspace.signed(), identity, &self.settings.signing)
            .map_err(at(Stage::Sign))?;
        workspace.open_artifact(&signed).map_err(at(Stage::Sign))?;

        info!(stage = %Stage::Publish, "stage started");
        let (published, sha256) = self
            .publish(&signed, &request.overlay_package)
            .map_err(at(Stage::Publish))?;

        Ok(BuildOutput {
            overlay_package: request.overlay_package.clone(),
            target_package: request.target_package.clone(),
            signed_archive: published,
            workspace: workspace.root().to_path_buf(),
            sha256,
        })
    }

    /// Copy `signed` to `<cache>/out/<overlay package>.apk` by atomic rename.
    ///
    /// Returns the published path and the hex SHA-256 of what was published.
    fn publish(&self, signed: &Path, overlay_package: &str) -> Result<(PathBuf, String)> {
        let out_dir = self.settings.outputs_dir();
        fs::create_dir_all(&out_dir).map_err(|e| OverlayError::write(&out_dir, e))?;
        let dest = out_dir.join(format!("{overlay_package}.apk"));

        let bytes = fs::read(signed).map_err(|e| OverlayError::write(signed, e))?;
        let mut staged =
            NamedTempFile::new_in(&out_dir).map_err(|e| OverlayError::write(&out_dir, e))?;
        staged
            .write_all(&bytes)
            .and_then(|()| staged.as_file().sync_all())
            .map_err(|e| OverlayError::write(staged.path(), e))?;
        staged
            .persist(&dest)
            .map_err(|e| OverlayError::write(&dest, e.error))?;

        Ok((dest, signing::hex(&Sha256::digest(&bytes))))
    }

    fn locate(&self, tool: Tool) -> Result<PathBuf> {
        self.tools.locate(tool).ok_or_else(|| {
            OverlayError::asset(
                tool.name(),
                format!("not bundled and not on PATH (install {})", tool.install_hint()),
            )
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Scripted stand-ins for `aapt` and `zipalign`.

    use super::*;
    use crate::host::{ConfiguredPackages, PackageInfo};
    use crate::process::{Cmd, CommandOutput};
    use std::collections::BTreeMap;
    use std::ffi::OsString;
    use std::fs::File;
    use std::io::{self, Read, Write};
    use std::sync::Mutex;
    use walkdir::WalkDir;
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

    /// Locates every tool at its bare name.
    pub struct NamedTools;

    impl ToolLocator for NamedTools {
        fn locate(&self, tool: Tool) -> Option<PathBuf> {
            Some(PathBuf::from(tool.name()))
        }
    }

    /// Emulates `aapt p` and `zipalign 4` with the zip crate.
    #[derive(Default)]
    pub struct ScriptedTools {
        /// Tool name that exits 1 without output.
        pub fail: Option<&'static str>,
        pub commands: Mutex<Vec<String>>,
    }

    impl ScriptedTools {
        pub fn failing(tool: &'static str) -> Self {
            Self {
                fail: Some(tool),
                ..Default::default()
            }
        }
    }

    fn after<'a>(args: &'a [OsString], flag: &str) -> io::Result<&'a OsString> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .ok_or_else(|| io::Error::other(format!("missing {flag}")))
    }

    fn options(method: CompressionMethod) -> SimpleFileOptions {
        SimpleFileOptions::default()
            .compression_method(method)
            .last_modified_time(DateTime::default())
    }

    fn fake_aapt(args: &[OsString]) -> io::Result<()> {
        let manifest = fs::read(after(args, "-M")?)?;
        let res = PathBuf::from(after(args, "-S")?);
        let out = after(args, "-F")?;

        let mut zip = ZipWriter::new(File::create(out)?);
        // 30-byte header + 1-byte name: data starts at offset 31
        zip.start_file("x", options(CompressionMethod::Stored))?;
        zip.write_all(b"abc")?;
        zip.start_file("AndroidManifest.xml", options(CompressionMethod::Deflated))?;
        zip.write_all(&manifest)?;
        zip.start_file("resources.arsc", options(CompressionMethod::Stored))?;
        zip.write_all(&[0x02, 0x00, 0x0c, 0x00, 0x10, 0x00, 0x00, 0x00])?;
        for entry in WalkDir::new(&res).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(&res).map_err(io::Error::other)?;
            zip.start_file(
                format!("res/{}", rel.display()),
                options(CompressionMethod::Deflated),
            )?;
            zip.write_all(&fs::read(entry.path())?)?;
        }
        zip.finish()?;
        Ok(())
    }

    fn fake_zipalign(args: &[OsString]) -> io::Result<()> {
        let mut input = ZipArchive::new(File::open(&args[1])?)?;
        let mut zip = ZipWriter::new(File::create(&args[2])?);
        for index in 0..input.len() {
            let stored = input.by_index_raw(index)?.compression() == CompressionMethod::Stored;
            if stored {
                let mut entry = input.by_index(index)?;
                let name = entry.name().to_string();
                let mut data = Vec::new();
                entry.read_to_end(&mut data)?;
                zip.start_file(name, options(CompressionMethod::Stored).with_alignment(4))?;
                zip.write_all(&data)?;
            } else {
                zip.raw_copy_file(input.by_index_raw(index)?)?;
            }
        }
        zip.finish()?;
        Ok(())
    }

    impl CommandRunner for ScriptedTools {
        fn run(&self, cmd: &Cmd) -> io::Result<CommandOutput> {
            let tool = cmd.tool_name();
            self.commands
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push(cmd.command_line());
            if self.fail == Some(tool.as_str()) {
                return Ok(CommandOutput {
                    status: Some(1),
                    stdout: String::new(),
                    stderr: format!("{tool}: scripted failure"),
                });
            }
            match tool.as_str() {
                "aapt" => fake_aapt(cmd.get_args())?,
                "zipalign" => fake_zipalign(cmd.get_args())?,
                other => return Err(io::Error::new(io::ErrorKind::NotFound, other.to_string())),
            }
            Ok(CommandOutput {
                status: Some(0),
                ..Default::default()
            })
        }
    }

    pub fn systemui_packages() -> ConfiguredPackages {
        let mut map = BTreeMap::new();
        map.insert(
            "com.android.systemui".to_string(),
            PackageInfo {
                version_name: "11.0.00.3".into(),
                version_code: 1_100_000_300,
                source_dir: "/system/priv-app/SystemUI/SystemUI.apk".into(),
            },
        );
        ConfiguredPackages::new(map)
    }

    pub fn builder(
        cache_dir: &Path,
        runner: Arc<ScriptedTools>,
        identity: Arc<SigningIdentity>,
    ) -> OverlayBuilder {
        OverlayBuilder::new(
            BuildSettings {
                cache_dir: cache_dir.to_path_buf(),
                framework_res: "/system/framework/framework-res.apk".into(),
                manifest: ManifestSettings::default(),
                signing: SignOptions::default(),
            },
            runner,
            Arc::new(NamedTools),
            Arc::new(systemui_packages()),
            IdentitySource::Loaded(identity),
        )
    }
}
