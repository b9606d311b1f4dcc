use async_trait::async_trait;
use tracing::info;

use super::{Step, StepAction, StepEnv};
use crate::error::Result;
use crate::state::BuildContext;
use crate::transport::Transport;

/// Base images that are built on top of another base image.
const PREREQUISITES: [(&str, &str); 1] = [("ubuntu-base", "ubuntu")];

/// Make sure the configured base image exists on the backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct PullOrCreateBaseImage;

/// `reference` without its `:tag`.
pub fn base_image_name(reference: &str) -> &str {
    // Only a colon after the last slash is a tag separator (`host:5000/img`).
    let start = reference.rfind('/').map_or(0, |i| i + 1);
    match reference[start..].find(':') {
        Some(i) => &reference[..start + i],
        None => reference,
    }
}

/// The base image `name` has to be created from, if any.
pub fn prerequisite_of(name: &str) -> Option<&'static str> {
    PREREQUISITES
        .iter()
        .find(|(image, _)| *image == name)
        .map(|(_, needs)| *needs)
}

/// Pull registry references, create everything else locally.
async fn fetch(transport: &dyn Transport, reference: &str) -> Result<()> {
    let name = base_image_name(reference);
    if reference.contains('/') {
        info!(image = reference, "pulling base image");
        transport.pull_image(reference).await
    } else {
        info!(image = name, "creating base image");
        transport.create_image(name).await
    }
}

#[async_trait]
impl Step for PullOrCreateBaseImage {
    fn name(&self) -> &'static str {
        "pull-or-create-base-image"
    }

    async fn run(&self, _ctx: &mut BuildContext, env: &StepEnv<'_>) -> StepAction {
        let reference = env.config.base_image.as_str();
        let name = base_image_name(reference);

        let result: Result<()> = async {
            if env.transport.image_exists(name).await? {
                info!(image = name, "base image present");
                return Ok(());
            }
            if let Some(needs) = prerequisite_of(name) {
                if env.transport.image_exists(needs).await? {
                    info!(image = needs, "prerequisite image present");
                } else {
                    fetch(env.transport, needs).await?;
                }
            }
            fetch(env.transport, reference).await
        }
        .await;

        match result {
            Ok(()) => StepAction::Continue,
            Err(err) => StepAction::halt(err),
        }
    }
}
