use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::artifact::Artifact;
use crate::config::{BuildConfig, REGISTRY_TOKEN_ENV};
use crate::error::{Error, Result};
use crate::provision::Provisioner;
use crate::state::BuildContext;
use crate::steps::{CleanupVm, Step, StepAction, StepEnv, forward_steps};
use crate::transport::{self, Transport};

/// Where a build is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Pending,
    Running,
    Succeeded,
    Halted,
    Cancelled,
}

/// Runs the build sequence against one VM manager.
///
/// # Example
///
/// ```no_run
/// use mb_sdk::{CommandProvisioner, ImageBuilder, RawConfig};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> mb_sdk::Result<()> {
/// let config = RawConfig {
///     vm_name: Some("ubuntu".into()),
///     base_image: Some("ubuntu-base:latest".into()),
///     output_image_name: Some("ci-runner".into()),
///     ..Default::default()
/// }
/// .prepare()?;
///
/// let cancel = CancellationToken::new();
/// let provisioner = CommandProvisioner::new(vec!["echo hello from {{ .MedaVMIP }}".into()]);
/// let mut builder = ImageBuilder::connect(config, provisioner, &cancel)?;
/// let artifact = builder.run(&cancel).await?;
/// println!("{artifact}");
/// # Ok(())
/// # }
/// ```
pub struct ImageBuilder {
    config: Arc<BuildConfig>,
    transport: Arc<dyn Transport>,
    provisioner: Arc<dyn Provisioner>,
    steps: Vec<Box<dyn Step>>,
    registry_token: Option<String>,
    phase: BuildPhase,
}

impl ImageBuilder {
    /// Create a builder with an explicit transport.
    ///
    /// The registry credential is read from the environment now.
    pub fn new(
        config: BuildConfig,
        transport: Arc<dyn Transport>,
        provisioner: impl Provisioner + 'static,
    ) -> Self {
        Self {
            config: Arc::new(config),
            transport,
            provisioner: Arc::new(provisioner),
            steps: forward_steps(),
            registry_token: std::env::var(REGISTRY_TOKEN_ENV).ok(),
            phase: BuildPhase::Pending,
        }
    }

    /// Create a builder with the transport `config` selects.
    pub fn connect(
        config: BuildConfig,
        provisioner: impl Provisioner + 'static,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let transport = transport::connect(&config, cancel.clone())?;
        Ok(Self::new(config, transport, provisioner))
    }

    /// Override the registry credential.
    pub fn registry_token(mut self, token: Option<String>) -> Self {
        self.registry_token = token;
        self
    }

    /// Replace the forward step sequence. [`CleanupVm`] always runs after it.
    pub fn steps(mut self, steps: Vec<Box<dyn Step>>) -> Self {
        self.steps = steps;
        self
    }

    pub fn phase(&self) -> BuildPhase {
        self.phase
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Run the build with a fresh, timestamp-qualified VM name.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<Artifact> {
        let mut ctx = BuildContext::for_config(&self.config);
        self.run_with(&mut ctx, cancel).await
    }

    /// Run the build against a caller-supplied context.
    ///
    /// Steps run in order until one halts or `cancel` fires. The cleanup hooks
    /// of every step that ran are then called in reverse order, and the VM is
    /// deleted regardless of the outcome.
    pub async fn run_with(
        &mut self,
        ctx: &mut BuildContext,
        cancel: &CancellationToken,
    ) -> Result<Artifact> {
        self.phase = BuildPhase::Running;
        info!(vm = ctx.vm_name(), "build started");

        let env = StepEnv {
            config: &self.config,
            transport: self.transport.as_ref(),
            provisioner: self.provisioner.as_ref(),
            cancel,
            registry_token: self.registry_token.as_deref(),
        };

        let mut ran = 0;
        let mut cancelled = false;
        for step in &self.steps {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            info!(step = step.name(), "running step");
            let action = step.run(ctx, &env).await;
            ran += 1;

            match action {
                StepAction::Continue => {}
                StepAction::Halt(err) => {
                    warn!(step = step.name(), error = %err, "step failed");
                    ctx.record_error(err);
                    break;
                }
                StepAction::Cancelled => {
                    cancelled = true;
                    break;
                }
            }
        }
        if !cancelled && ctx.error().is_none() && cancel.is_cancelled() {
            cancelled = true;
        }

        for step in self.steps[..ran].iter().rev() {
            step.cleanup(ctx, &env).await;
        }
        CleanupVm.run(ctx, &env).await;

        if let Some(err) = ctx.take_error() {
            self.phase = BuildPhase::Halted;
            return Err(err);
        }
        if cancelled {
            self.phase = BuildPhase::Cancelled;
            info!(vm = ctx.vm_name(), "build cancelled");
            return Err(Error::Cancelled);
        }

        let Some(image) = ctx.image_name() else {
            self.phase = BuildPhase::Halted;
            return Err(Error::MissingState("image_name"));
        };
        let artifact = Artifact::new(
            image,
            ctx.pushed_image().map(str::to_owned),
            self.config.clone(),
        );
        self.phase = BuildPhase::Succeeded;
        info!(artifact = %artifact, "build finished");
        Ok(artifact)
    }
}

impl std::fmt::Debug for ImageBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageBuilder")
            .field("config", &self.config)
            .field("steps", &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}
