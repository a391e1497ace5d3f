//! Installed-package metadata.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{OverlayError, Result};
use crate::process::{Cmd, CommandRunner};

/// What the pipeline needs to know about an installed target package.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageInfo {
    pub version_name: String,
    pub version_code: i64,
    /// Installed archive, imported by the resource compiler.
    pub source_dir: PathBuf,
}

/// Reads metadata for an installed package.
pub trait PackageInfoSource: Send + Sync {
    /// Fails with [`OverlayError::MetadataUnavailable`] if not installed.
    fn package_info(&self, package: &str) -> Result<PackageInfo>;
}

/// Statically configured package metadata, for builds off-device.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredPackages {
    packages: BTreeMap<String, PackageInfo>,
}

impl ConfiguredPackages {
    pub fn new(packages: BTreeMap<String, PackageInfo>) -> Self {
        Self { packages }
    }
}

impl PackageInfoSource for ConfiguredPackages {
    fn package_info(&self, package: &str) -> Result<PackageInfo> {
        self.packages
            .get(package)
            .cloned()
            .ok_or_else(|| OverlayError::MetadataUnavailable {
                package: package.to_string(),
                reason: "package not listed in [packages] configuration".to_string(),
            })
    }
}

/// Queries the device package manager (`pm path`, `dumpsys package`).
pub struct PackageManagerQuery<R> {
    runner: R,
}

impl<R: CommandRunner> PackageManagerQuery<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    fn query(&self, package: &str, cmd: Cmd) -> Result<String> {
        let unavailable = |reason: String| OverlayError::MetadataUnavailable {
            package: package.to_string(),
            reason,
        };
        let output = self
            .runner
            .run(&cmd)
            .map_err(|e| unavailable(format!("running {}: {e}", cmd.command_line())))?;
        if !output.success() {
            return Err(unavailable(format!(
                "{} exited with {:?}: {}",
                cmd.command_line(),
                output.status,
                output.stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

impl<R: CommandRunner> PackageInfoSource for PackageManagerQuery<R> {
    fn package_info(&self, package: &str) -> Result<PackageInfo> {
        let paths = self.query(package, Cmd::new("pm").args(["path", package]))?;
        let dump = self.query(package, Cmd::new("dumpsys").args(["package", package]))?;
        parse_package_info(package, &paths, &dump)
    }
}

/// Parse `pm path` and `dumpsys package` output.
///
/// The base archive is the first `package:` line. The version name is the
/// rest of the first line starting `versionName=`; the version code is the
/// first `versionCode=` token.
pub fn parse_package_info(package: &str, pm_path: &str, dumpsys: &str) -> Result<PackageInfo> {
    let unavailable = |reason: &str| OverlayError::MetadataUnavailable {
        package: package.to_string(),
        reason: reason.to_string(),
    };

    let source_dir = pm_path
        .lines()
        .filter_map(|line| line.trim().strip_prefix("package:"))
        .find(|path| path.ends_with("base.apk"))
        .or_else(|| {
            pm_path
                .lines()
                .find_map(|line| line.trim().strip_prefix("package:"))
        })
        .ok_or_else(|| unavailable("package not installed"))?;

    // versionName runs to the end of its line and may contain spaces
    let version_name = dumpsys
        .lines()
        .find_map(|line| line.trim().strip_prefix("versionName="))
        .map(str::trim)
        .ok_or_else(|| unavailable("no versionName in package dump"))?;
    let version_code = dumpsys
        .split_whitespace()
        .find_map(|token| token.strip_prefix("versionCode="))
        .ok_or_else(|| unavailable("no versionCode in package dump"))?
        .parse::<i64>()
        .map_err(|_| unavailable("versionCode is not a number"))?;

    Ok(PackageInfo {
        version_name: version_name.to_string(),
        version_code,
        source_dir: PathBuf::from(source_dir),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::CommandOutput;
    use crate::ErrorKind;

    const DUMP: &str = "\
Packages:
  Package [com.android.systemui] (4f2c1a):
    userId=10071
    codePath=/system/priv-app/SystemUI
    versionCode=1100000300 minSdk=29 targetSdk=29
    versionName=11.0.00.3
    splits=[base]
";

    #[test]
    fn test_parse_dumpsys() {
        let info = parse_package_info(
            "com.android.systemui",
            "package:/system/priv-app/SystemUI/SystemUI.apk\n",
            DUMP,
        )
        .unwrap();

        assert_eq!(info.version_name, "11.0.00.3");
        assert_eq!(info.version_code, 1_100_000_300);
        assert_eq!(
            info.source_dir,
            PathBuf::from("/system/priv-app/SystemUI/SystemUI.apk")
        );
    }

    #[test]
    fn test_split_install_prefers_base() {
        let info = parse_package_info(
            "com.example.target",
            "package:/data/app/x/split_config.en.apk\npackage:/data/app/x/base.apk\n",
            "versionCode=7 minSdk=26\nversionName=3.2\n",
        )
        .unwrap();
        assert_eq!(info.source_dir, PathBuf::from("/data/app/x/base.apk"));
    }

    #[test]
    fn test_version_name_with_spaces_kept_whole() {
        let info = parse_package_info(
            "com.example.target",
            "package:/data/app/x/base.apk\n",
            "    versionCode=7 minSdk=26\n    versionName=3.2 beta \n",
        )
        .unwrap();
        assert_eq!(info.version_name, "3.2 beta");
        assert_eq!(info.version_code, 7);
    }

    #[test]
    fn test_not_installed() {
        let err = parse_package_info("com.example.absent", "", "").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MetadataUnavailable);
    }

    #[test]
    fn test_configured_packages() {
        let mut map = BTreeMap::new();
        map.insert(
            "com.example.target".to_string(),
            PackageInfo {
                version_name: "3.2".into(),
                version_code: 7,
                source_dir: "/data/app/target/base.apk".into(),
            },
        );
        let packages = ConfiguredPackages::new(map);

        assert_eq!(
            packages.package_info("com.example.target").unwrap().version_code,
            7
        );
        assert_eq!(
            packages.package_info("com.example.other").unwrap_err().kind(),
            ErrorKind::MetadataUnavailable
        );
    }

    struct ScriptedPm;

    impl CommandRunner for ScriptedPm {
        fn run(&self, cmd: &Cmd) -> std::io::Result<CommandOutput> {
            let stdout = match cmd.program().to_str() {
                Some("pm") => "package:/system/priv-app/SystemUI/SystemUI.apk\n",
                Some("dumpsys") => DUMP,
                _ => "",
            };
            Ok(CommandOutput {
                status: Some(0),
                stdout: stdout.to_string(),
                stderr: String::new(),
            })
        }
    }

    #[test]
    fn test_package_manager_query() {
        let info = PackageManagerQuery::new(ScriptedPm)
            .package_info("com.android.systemui")
            .unwrap();
        assert_eq!(info.version_name, "11.0.00.3");
    }
}
