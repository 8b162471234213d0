use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use passforge_core::bundle::{self, BundleEntry};
use passforge_core::push::NoopNotifier;
use passforge_core::token::generate_auth_token;
use passforge_core::{
    signer, validate, Deadline, ManifestSigner, PassContent, PassTypeCatalog, PassTypeProfile,
    ServiceConfig, Services,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// PassForge CLI - validate, package, sign and publish wallet passes
#[derive(Parser)]
#[command(name = "passforge")]
#[command(about = "Validate, build and publish wallet passes", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "passforge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a pass.json content document
    Validate {
        /// Content document
        content: PathBuf,
    },

    /// Build and sign a .pkpass bundle without publishing it
    Build {
        #[command(flatten)]
        input: PassInput,

        /// Output file
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Build, sign, store and announce a pass update
    Publish {
        #[command(flatten)]
        input: PassInput,

        /// Give up if persisting has not started after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },

    /// Print a fresh authentication token
    Token,
}

#[derive(Args)]
struct PassInput {
    /// Content document
    content: PathBuf,

    /// Bundle asset as NAME=PATH (repeatable)
    #[arg(short, long = "asset", value_parser = parse_asset)]
    assets: Vec<(String, PathBuf)>,

    /// Generate an authentication token when the content has none
    #[arg(long)]
    issue_token: bool,
}

fn parse_asset(raw: &str) -> Result<(String, PathBuf), String> {
    match raw.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected NAME=PATH, got {:?}", raw)),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { content } => {
            let config = load_config(&cli.config)?;
            let content = read_content(&content)?;
            check_content(&content, &config)?;
            println!("{} is valid", content.serial_number);
        }
        Commands::Build { input, out } => {
            let config = load_config(&cli.config)?;
            let signing = config
                .signing
                .as_ref()
                .context("a [signing] section is required to build bundles")?;
            let (content, assets) = prepare(&input, &config)?;
            check_content(&content, &config)?;

            let unsigned = bundle::build_pass(&content, &assets)?;
            let signature = signer::from_config(signing)?.sign(unsigned.manifest_bytes())?;
            let sealed = unsigned.seal(&signature)?;
            std::fs::write(&out, &sealed)
                .with_context(|| format!("cannot write {}", out.display()))?;
            info!(serial = %content.serial_number, bytes = sealed.len(), "Wrote {}", out.display());
        }
        Commands::Publish {
            input,
            timeout_secs,
        } => {
            let config = load_config(&cli.config)?;
            let (content, assets) = prepare(&input, &config)?;
            let services = Services::from_config(&config)?;

            let deadline = Deadline::after(Duration::from_secs(timeout_secs));
            let outcome = services.orchestrator().publish(deadline, &content, &assets)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "serialNumber": outcome.serial_number,
                    "updatedAt": outcome.updated_at.to_rfc3339(),
                    "created": outcome.created,
                    "notified": outcome.notified,
                    "failedNotifications": outcome.failed_notifications,
                    "bundleSize": outcome.bundle_size,
                }))?
            );
        }
        Commands::Token => {
            println!("{}", generate_auth_token());
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<ServiceConfig> {
    if path.exists() {
        ServiceConfig::load(path).with_context(|| format!("cannot load {}", path.display()))
    } else {
        info!("No config file found, using defaults");
        Ok(ServiceConfig::default())
    }
}

fn read_content(path: &Path) -> Result<PassContent> {
    let bytes = std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    Ok(PassContent::from_json(&bytes)?)
}

/// Validate content and check its style against the configured pass types,
/// the same checks `publish` applies before building.
fn check_content(content: &PassContent, config: &ServiceConfig) -> Result<()> {
    validate(content)?;
    let mut catalog = PassTypeCatalog::default();
    for pass_type in &config.pass_types {
        catalog.insert(
            pass_type.identifier.clone(),
            PassTypeProfile::new(pass_type.style, Arc::new(NoopNotifier)),
        );
    }
    catalog.check_style(content)?;
    Ok(())
}

/// Load the content document and assets, filling in the token and web
/// service URL when the document leaves them empty.
fn prepare(input: &PassInput, config: &ServiceConfig) -> Result<(PassContent, Vec<BundleEntry>)> {
    let mut content = read_content(&input.content)?;

    if content.authentication_token.is_empty() {
        if !input.issue_token {
            bail!("content has no authenticationToken; pass --issue-token to generate one");
        }
        content.authentication_token = generate_auth_token();
        eprintln!("issued authentication token {}", content.authentication_token);
    }
    if content.web_service_url.is_empty() {
        content.web_service_url = config.web_service_url.clone();
    }

    let assets = input
        .assets
        .iter()
        .map(|(name, path)| {
            std::fs::read(path)
                .map(|bytes| BundleEntry::new(name.clone(), bytes))
                .with_context(|| format!("cannot read asset {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((content, assets))
}
