//! Transport that spawns the Meda CLI for every operation.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{PublishRequest, Transport, VmSpec, find_ipv4};
use crate::config::{DEFAULT_REGISTRY, LocalBackend};
use crate::error::{Error, Result};
use crate::process::{CommandOutput, MedaCommand, contains_denial, run_captured, run_streamed};

/// Drives a local Meda binary (or `cargo run --` in a Meda checkout).
#[derive(Debug, Clone)]
pub struct LocalTransport {
    meda: MedaCommand,
    cancel: CancellationToken,
}

impl LocalTransport {
    pub fn new(backend: &LocalBackend) -> Self {
        Self {
            meda: MedaCommand::new(backend),
            cancel: CancellationToken::new(),
        }
    }

    /// Interrupt streamed subprocesses when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    async fn captured(&self, args: Vec<String>) -> Result<CommandOutput> {
        run_captured(self.meda.command(&args)).await
    }

    async fn streamed(&self, args: Vec<String>) -> Result<CommandOutput> {
        run_streamed(self.meda.command(&args), &self.cancel).await
    }

    /// Run a short subcommand and fail on a non-zero exit.
    async fn checked(&self, action: &str, args: Vec<String>) -> Result<CommandOutput> {
        let output = self.captured(args).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(Error::CommandFailed {
                action: action.to_owned(),
                failure: output.status.to_string(),
                detail: output.combined(),
            })
        }
    }

    /// Run a long subcommand; fail on a non-zero exit or on denial text in stderr.
    async fn scanned(&self, action: String, args: Vec<String>) -> Result<()> {
        let output = self.streamed(args).await?;
        if !output.success() {
            return Err(Error::CommandFailed {
                action,
                failure: output.status.to_string(),
                detail: output.stderr,
            });
        }
        if contains_denial(&output.stderr) {
            return Err(Error::Denied {
                action,
                detail: output.stderr,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        let output = self.captured(images_args()).await?;
        if !output.success() {
            debug!(status = %output.status, "listing images failed, treating as absent");
            return Ok(false);
        }
        Ok(listing_mentions(&output.combined(), image))
    }

    async fn create_image(&self, name: &str) -> Result<()> {
        self.scanned(
            format!("create base image '{name}'"),
            create_image_args(name),
        )
        .await
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        self.scanned(format!("pull image '{image}'"), pull_args(image))
            .await
    }

    async fn create_vm(&self, spec: &VmSpec) -> Result<String> {
        self.checked("create VM", run_args(spec)).await?;
        Ok(spec.name.clone())
    }

    async fn start_vm(&self, vm: &str) -> Result<()> {
        self.checked("start VM", vm_args("start", vm)).await?;
        Ok(())
    }

    async fn stop_vm(&self, vm: &str) -> Result<()> {
        self.checked("stop VM", vm_args("stop", vm)).await?;
        Ok(())
    }

    async fn vm_address(&self, vm: &str) -> Result<Option<String>> {
        let output = self.captured(vm_args("ip", vm)).await?;
        if !output.success() {
            return Ok(None);
        }
        Ok(find_ipv4(&output.combined()))
    }

    async fn snapshot(&self, vm: &str, name: &str, tag: &str) -> Result<String> {
        self.checked("create image", snapshot_args(vm, name, tag))
            .await?;
        Ok(format!("{name}:{tag}"))
    }

    async fn publish(&self, request: &PublishRequest) -> Result<()> {
        self.scanned("push image".to_owned(), push_args(request))
            .await
    }

    async fn delete_vm(&self, vm: &str) -> Result<()> {
        self.checked("delete VM", vm_args("delete", vm)).await?;
        Ok(())
    }

    async fn delete_image(&self, image: &str) -> Result<()> {
        self.checked(
            "remove image",
            vec!["images".to_owned(), "rm".to_owned(), image.to_owned()],
        )
        .await?;
        Ok(())
    }
}

fn images_args() -> Vec<String> {
    vec!["images".to_owned()]
}

fn pull_args(image: &str) -> Vec<String> {
    vec!["pull".to_owned(), image.to_owned()]
}

fn create_image_args(name: &str) -> Vec<String> {
    vec!["create-image".to_owned(), name.to_owned()]
}

fn vm_args(verb: &str, vm: &str) -> Vec<String> {
    vec![verb.to_owned(), vm.to_owned()]
}

fn run_args(spec: &VmSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_owned(),
        spec.base_image.clone(),
        "--name".to_owned(),
        spec.name.clone(),
        "--memory".to_owned(),
        spec.memory.clone(),
        "--cpus".to_owned(),
        spec.cpus.to_string(),
        "--disk".to_owned(),
        spec.disk.clone(),
        "--no-start".to_owned(),
    ];

    if let Some(user_data) = &spec.user_data {
        args.push("--user-data".to_owned());
        args.push(user_data.display().to_string());
    }

    args
}

fn snapshot_args(vm: &str, name: &str, tag: &str) -> Vec<String> {
    vec![
        "create-image".to_owned(),
        name.to_owned(),
        "--tag".to_owned(),
        tag.to_owned(),
        "--from-vm".to_owned(),
        vm.to_owned(),
    ]
}

fn push_args(request: &PublishRequest) -> Vec<String> {
    // The CLI resolves the tag itself and wants the bare image name.
    let mut args = vec![
        "push".to_owned(),
        request.name.clone(),
        request.target.clone(),
    ];

    if !request.registry.is_empty() && request.registry != DEFAULT_REGISTRY {
        args.push("--registry".to_owned());
        args.push(request.registry.clone());
    }

    if request.dry_run {
        args.push("--dry-run".to_owned());
    }

    args
}

/// Whether an `images` listing names `image`, alone or as `image:tag`.
fn listing_mentions(listing: &str, image: &str) -> bool {
    listing.split_whitespace().any(|token| {
        token == image
            || token
                .strip_prefix(image)
                .is_some_and(|rest| rest.starts_with(':'))
    })
}
