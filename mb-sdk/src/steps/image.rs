use async_trait::async_trait;
use tracing::info;

use super::{Step, StepAction, StepEnv};
use crate::config::REGISTRY_TOKEN_ENV;
use crate::error::Error;
use crate::state::BuildContext;
use crate::transport::PublishRequest;

/// Capture the stopped VM's disk as `output_image_name:output_tag`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotImage;

#[async_trait]
impl Step for SnapshotImage {
    fn name(&self) -> &'static str {
        "snapshot-image"
    }

    async fn run(&self, ctx: &mut BuildContext, env: &StepEnv<'_>) -> StepAction {
        let config = env.config;
        info!(
            vm = ctx.vm_name(),
            image = %config.output_image(),
            "creating image from VM"
        );
        match env
            .transport
            .snapshot(ctx.vm_name(), &config.output_image_name, &config.output_tag)
            .await
        {
            Ok(image) => {
                ctx.set_image_name(image);
                StepAction::Continue
            }
            Err(err) => StepAction::halt(err),
        }
    }
}

/// Push the snapshot to the configured registry, when enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishImage;

#[async_trait]
impl Step for PublishImage {
    fn name(&self) -> &'static str {
        "publish-image"
    }

    async fn run(&self, ctx: &mut BuildContext, env: &StepEnv<'_>) -> StepAction {
        let config = env.config;
        if !config.push_to_registry {
            info!("registry push disabled, skipping");
            return StepAction::Continue;
        }

        if config.requires_registry_credential()
            && env.registry_token.is_none_or(|token| token.is_empty())
        {
            return StepAction::Halt(Error::MissingCredential {
                registry: config.registry.clone(),
                var: REGISTRY_TOKEN_ENV,
            });
        }

        let Some(image) = ctx.image_name().map(str::to_owned) else {
            return StepAction::Halt(Error::MissingState("image_name"));
        };

        let request = PublishRequest {
            name: config.output_image_name.clone(),
            image,
            target: config.publish_target(),
            registry: config.registry.clone(),
            dry_run: config.dry_run,
        };
        info!(
            image = %request.image,
            target = %request.target,
            dry_run = request.dry_run,
            "pushing image"
        );

        match env.transport.publish(&request).await {
            Ok(()) => {
                ctx.set_pushed_image(request.target);
                StepAction::Continue
            }
            Err(err) => StepAction::halt(err),
        }
    }
}
