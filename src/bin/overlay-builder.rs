use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use openssl::x509::X509;
use tracing_subscriber::EnvFilter;

use overlay_builder::signing::{self, SignOptions, SigningIdentity};
use overlay_builder::{preflight, AmPmStyle, Config, OverlayKind};

#[derive(Parser)]
#[command(name = "overlay-builder")]
#[command(version, about = "Build, align and sign resource overlays")]
struct Cli {
    /// Configuration file (default: <config dir>/overlay-builder/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build one overlay into a signed archive
    Build {
        /// Overlay kind: clock or qs
        kind: OverlayKind,
        /// Use the AOSP clock layout
        #[arg(long)]
        stock_clock: bool,
        /// AM/PM marker style: normal, small or gone
        #[arg(long)]
        am_pm_style: Option<AmPmStyle>,
        /// Quick-settings tiles in portrait
        #[arg(long)]
        qs_portrait: Option<u32>,
        /// Quick-settings tiles in landscape
        #[arg(long)]
        qs_landscape: Option<u32>,
        /// Print the build result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sign an aligned archive with the configured identity
    Sign {
        input: PathBuf,
        output: PathBuf,
        /// Override the configured minimum platform version
        #[arg(long)]
        min_sdk: Option<u32>,
    },
    /// Check signatures and alignment of a signed archive
    Verify {
        archive: PathBuf,
        /// Expected signer certificate (PEM); defaults to the configured keystore
        #[arg(long)]
        cert: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Check that build tools and the keystore are available
    Preflight {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Build {
            kind,
            stock_clock,
            am_pm_style,
            qs_portrait,
            qs_landscape,
            json,
        } => {
            let mut options = config.options.clone();
            options.stock_clock |= stock_clock;
            if let Some(style) = am_pm_style {
                options.am_pm_style = style;
            }
            if let Some(count) = qs_portrait {
                options.qs_tiles_portrait = count;
            }
            if let Some(count) = qs_landscape {
                options.qs_tiles_landscape = count;
            }
            build(&config, kind, &options, json)
        }
        Commands::Sign {
            input,
            output,
            min_sdk,
        } => sign(&config, &input, &output, min_sdk),
        Commands::Verify {
            archive,
            cert,
            json,
        } => verify(&config, &archive, cert.as_deref(), json),
        Commands::Preflight { json } => run_preflight(&config, json),
    }
}

fn build(
    config: &Config,
    kind: OverlayKind,
    options: &overlay_builder::OverlayOptions,
    json: bool,
) -> Result<()> {
    let request = kind
        .request(options, &config.assets(), &config.namespace)
        .with_context(|| format!("preparing {kind} overlay"))?;
    let output = config.overlay_builder().build(&request)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", output.signed_archive.display());
    }
    Ok(())
}

fn load_identity(config: &Config) -> Result<SigningIdentity> {
    SigningIdentity::load(
        &config.assets(),
        &config.signing.keystore,
        &config.signing.passphrase,
    )
    .with_context(|| format!("loading signing keystore '{}'", config.signing.keystore))
}

fn sign(config: &Config, input: &Path, output: &Path, min_sdk: Option<u32>) -> Result<()> {
    let identity = load_identity(config)?;
    let mut options: SignOptions = config.build_settings().signing;
    if let Some(min_sdk) = min_sdk {
        options.min_sdk_version = min_sdk;
    }
    let signed = signing::sign(input, output, &identity, &options).with_context(|| {
        format!(
            "signing '{}' to '{}'",
            input.display(),
            output.display()
        )
    })?;
    println!("{}", signed.display());
    Ok(())
}

fn verify(config: &Config, archive: &Path, cert: Option<&Path>, json: bool) -> Result<()> {
    let expected = match cert {
        Some(path) => {
            let pem = fs::read(path)
                .with_context(|| format!("reading certificate '{}'", path.display()))?;
            X509::from_pem(&pem)
                .with_context(|| format!("parsing certificate '{}'", path.display()))?
        }
        None => load_identity(config)?.certificate().clone(),
    };

    let report = signing::verify(archive, &expected)
        .with_context(|| format!("verifying '{}'", archive.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("v1: {:?}", report.v1);
        println!("v2: {:?}", report.v2);
        for entry in &report.misaligned {
            println!("misaligned: {entry}");
        }
    }

    if !report.is_valid() {
        bail!("'{}' failed verification", archive.display());
    }
    Ok(())
}

fn run_preflight(config: &Config, json: bool) -> Result<()> {
    let report = preflight::run(
        &config.tool_locator(),
        &config.assets(),
        &config.signing.keystore,
        &config.signing.passphrase,
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for check in &report.tools {
            match &check.path {
                Some(path) => println!("{}: {}", check.tool, path.display()),
                None => println!("{}: missing", check.tool),
            }
        }
    }
    report.ensure_ready()
}
