//! Build steps.
//!
//! Each step does one lifecycle action through the [`Transport`] and reports
//! back with a [`StepAction`]. Steps never pick a transport themselves.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::BuildConfig;
use crate::error::Error;
use crate::provision::Provisioner;
use crate::state::BuildContext;
use crate::transport::Transport;

mod base_image;
mod image;
mod provision;
mod vm;
mod wait;

pub use base_image::{PullOrCreateBaseImage, base_image_name, prerequisite_of};
pub use image::{PublishImage, SnapshotImage};
pub use provision::{GenerateKeyPair, Provision};
pub use vm::{CleanupVm, CreateVm, StartVm, StopVm};
pub use wait::WaitForReady;

/// What the orchestrator should do after a step.
#[derive(Debug)]
pub enum StepAction {
    Continue,
    /// Stop forward progress; the build fails with this error.
    Halt(Error),
    /// The cancellation token fired while the step ran.
    Cancelled,
}

impl StepAction {
    /// `Halt`, or `Cancelled` when the error is a cancellation.
    pub fn halt(err: Error) -> Self {
        match err {
            Error::Cancelled => StepAction::Cancelled,
            err => StepAction::Halt(err),
        }
    }
}

/// Collaborators available to every step.
#[derive(Clone, Copy)]
pub struct StepEnv<'a> {
    pub config: &'a BuildConfig,
    pub transport: &'a dyn Transport,
    pub provisioner: &'a dyn Provisioner,
    pub cancel: &'a CancellationToken,
    /// Value of the registry credential, if set.
    pub registry_token: Option<&'a str>,
}

/// One action in the build sequence.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &mut BuildContext, env: &StepEnv<'_>) -> StepAction;

    /// Undo side effects of [`run`](Self::run). Called in reverse order once
    /// the forward sequence has stopped, for every step that ran.
    async fn cleanup(&self, _ctx: &mut BuildContext, _env: &StepEnv<'_>) {}
}

/// The forward sequence, in execution order. [`CleanupVm`] is not included.
pub fn forward_steps() -> Vec<Box<dyn Step>> {
    vec![
        Box::new(PullOrCreateBaseImage),
        Box::new(CreateVm),
        Box::new(StartVm),
        Box::new(WaitForReady::default()),
        Box::new(GenerateKeyPair),
        Box::new(Provision),
        Box::new(StopVm),
        Box::new(SnapshotImage),
        Box::new(PublishImage),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halt_maps_cancellation() {
        assert!(matches!(StepAction::halt(Error::Cancelled), StepAction::Cancelled));
        assert!(matches!(
            StepAction::halt(Error::Other("x".to_owned())),
            StepAction::Halt(Error::Other(_))
        ));
    }

    #[test]
    fn test_forward_order() {
        let names: Vec<_> = forward_steps().iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            [
                "pull-or-create-base-image",
                "create-vm",
                "start-vm",
                "wait-for-ready",
                "generate-key-pair",
                "provision",
                "stop-vm",
                "snapshot-image",
                "publish-image",
            ]
        );
    }
}
