use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use meda_builder::sdk::{
    Artifact, Backend, BuildConfig, CommandProvisioner, ImageBuilder, LocalBackend, RawConfig,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "mb_sdk=info,mb_cli=info";

#[derive(Debug, Parser)]
#[command(
    name = "mb-cli",
    version,
    about = "Build VM images with the Meda VM manager"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a full image build.
    Build(BuildArgs),
    /// Check a build file and print the resolved settings.
    Validate(ConfigArgs),
    /// Remove a previously built image from the VM manager.
    Destroy(DestroyArgs),
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    /// Build file (TOML).
    #[arg(long, short)]
    config: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct BuildArgs {
    #[command(flatten)]
    file: ConfigArgs,

    /// Validate the push without uploading anything.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Push the image to the registry even if the build file does not ask for it.
    #[arg(long, default_value_t = false)]
    push: bool,
}

#[derive(Debug, Clone, Args)]
struct DestroyArgs {
    #[command(flatten)]
    file: ConfigArgs,

    /// Image reference to remove, e.g. `ci-runner:latest`.
    #[arg(long)]
    image: String,
}

/// The build file: build settings at the top level plus a `[provision]` table.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BuildFile {
    #[serde(flatten)]
    build: RawConfig,
    provision: ProvisionSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProvisionSection {
    /// Host shell commands; `{{ .MedaVMName }}` and `{{ .MedaVMIP }}` are substituted.
    commands: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Build(args) => build(args).await?,
        Commands::Validate(args) => validate(args)?,
        Commands::Destroy(args) => destroy(args).await?,
    }
    Ok(())
}

async fn build(args: BuildArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut file = load_build_file(&args.file.config)?;
    if args.dry_run {
        file.build.dry_run = Some(true);
    }
    if args.push {
        file.build.push_to_registry = Some(true);
    }
    let config = file.build.prepare()?;
    let provisioner = CommandProvisioner::new(file.provision.commands);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling build");
            on_signal.cancel();
        }
    });

    let mut builder = ImageBuilder::connect(config, provisioner, &cancel)?;
    let artifact = builder.run(&cancel).await?;

    println!("builder_id={}", artifact.builder_id());
    println!("image={}", artifact.image_name());
    if let Some(target) = artifact.pushed_image() {
        println!("pushed_image={target}");
    }
    println!("artifact={artifact}");
    Ok(())
}

fn validate(args: ConfigArgs) -> Result<(), Box<dyn std::error::Error>> {
    let file = load_build_file(&args.config)?;
    let commands = file.provision.commands.len();
    let config = file.build.prepare()?;

    println!("valid=true");
    print_backend(&config);
    println!("base_image={}", config.base_image);
    println!("output_image={}", config.output_image());
    println!("push_to_registry={}", config.push_to_registry);
    if config.push_to_registry {
        println!("publish_target={}", config.publish_target());
    }
    println!("provision_commands={commands}");
    Ok(())
}

async fn destroy(args: DestroyArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.image.trim().is_empty() {
        return Err(invalid_input("--image must not be empty").into());
    }
    let file = load_build_file(&args.file.config)?;
    let config = file.build.prepare()?;

    let artifact = Artifact::new(args.image, None, Arc::new(config));
    artifact.destroy().await?;
    info!(image = artifact.image_name(), "image removed");
    println!("destroyed={}", artifact.image_name());
    Ok(())
}

fn load_build_file(path: &Path) -> Result<BuildFile, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path).map_err(|err| {
        invalid_input(&format!("cannot read build file {}: {err}", path.display()))
    })?;
    let file: BuildFile = toml::from_str(&text)?;
    Ok(file)
}

fn print_backend(config: &BuildConfig) {
    match &config.backend {
        Backend::Local(LocalBackend::Binary(path)) => {
            println!("backend=local");
            println!("meda_binary={}", path.display());
        }
        Backend::Local(LocalBackend::Cargo { source_dir }) => {
            println!("backend=cargo");
            println!("meda_source_dir={}", source_dir.display());
        }
        Backend::Remote(remote) => {
            println!("backend=remote");
            println!("meda_url={}", remote.base_url());
        }
    }
}

fn invalid_input(message: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidInput, message.to_owned())
}
