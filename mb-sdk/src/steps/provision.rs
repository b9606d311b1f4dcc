use async_trait::async_trait;
use tracing::{info, warn};

use super::{Step, StepAction, StepEnv};
use crate::config::CommType;
use crate::error::Error;
use crate::provision::ProvisionTarget;
use crate::state::BuildContext;

/// Generate a temporary key pair when the communicator has no credential.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateKeyPair;

#[async_trait]
impl Step for GenerateKeyPair {
    fn name(&self) -> &'static str {
        "generate-key-pair"
    }

    async fn run(&self, ctx: &mut BuildContext, env: &StepEnv<'_>) -> StepAction {
        if !env.config.comm.needs_key_pair() {
            return StepAction::Continue;
        }

        let target = ProvisionTarget::new(&env.config.comm, ctx.generated_vars());
        match env.provisioner.generate_key_pair(&target).await {
            Ok(pair) => {
                info!(key = %pair.private_key_file.display(), "generated temporary key pair");
                ctx.set_key_pair(pair);
                StepAction::Continue
            }
            Err(err) => StepAction::halt(err),
        }
    }

    async fn cleanup(&self, ctx: &mut BuildContext, _env: &StepEnv<'_>) {
        let Some(pair) = ctx.key_pair() else {
            return;
        };
        for path in [pair.private_key_file.clone(), pair.public_key_file()] {
            if let Err(err) = tokio::fs::remove_file(&path).await
                && err.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %path.display(), error = %err, "failed to remove key file");
            }
        }
    }
}

/// Hand the booted VM to the provisioning collaborator.
#[derive(Debug, Clone, Copy, Default)]
pub struct Provision;

#[async_trait]
impl Step for Provision {
    fn name(&self) -> &'static str {
        "provision"
    }

    async fn run(&self, ctx: &mut BuildContext, env: &StepEnv<'_>) -> StepAction {
        if env.config.comm.kind == CommType::None {
            info!("communicator disabled, skipping provisioning");
            return StepAction::Continue;
        }
        if ctx.vm_ip().is_none() {
            return StepAction::Halt(Error::MissingState("vm_ip"));
        }

        let mut target = ProvisionTarget::new(&env.config.comm, ctx.generated_vars());
        if let Some(pair) = ctx.key_pair() {
            target.private_key_file = Some(pair.private_key_file.clone());
        }

        info!(host = %target.host, user = %target.username, "provisioning VM");
        match env.provisioner.provision(&target, env.cancel).await {
            Ok(()) => StepAction::Continue,
            Err(err @ (Error::Cancelled | Error::Provision(_))) => StepAction::halt(err),
            Err(err) => StepAction::Halt(Error::Provision(err.to_string())),
        }
    }
}
