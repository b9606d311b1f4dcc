use async_trait::async_trait;
use tracing::info;

use super::{Step, StepAction, StepEnv};
use crate::state::BuildContext;
use crate::transport::VmSpec;

/// Create the build VM, stopped.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateVm;

#[async_trait]
impl Step for CreateVm {
    fn name(&self) -> &'static str {
        "create-vm"
    }

    async fn run(&self, ctx: &mut BuildContext, env: &StepEnv<'_>) -> StepAction {
        let spec = VmSpec::from_config(ctx.vm_name(), env.config);
        info!(
            vm = %spec.name,
            base_image = %spec.base_image,
            memory = %spec.memory,
            cpus = spec.cpus,
            disk = %spec.disk,
            "creating VM"
        );
        match env.transport.create_vm(&spec).await {
            Ok(id) => {
                info!(vm = %id, "VM created");
                StepAction::Continue
            }
            Err(err) => StepAction::halt(err),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StartVm;

#[async_trait]
impl Step for StartVm {
    fn name(&self) -> &'static str {
        "start-vm"
    }

    async fn run(&self, ctx: &mut BuildContext, env: &StepEnv<'_>) -> StepAction {
        info!(vm = ctx.vm_name(), "starting VM");
        match env.transport.start_vm(ctx.vm_name()).await {
            Ok(()) => StepAction::Continue,
            Err(err) => StepAction::halt(err),
        }
    }
}

/// Stop the VM before it is snapshotted. Failure is only an advisory.
#[derive(Debug, Clone, Copy, Default)]
pub struct StopVm;

#[async_trait]
impl Step for StopVm {
    fn name(&self) -> &'static str {
        "stop-vm"
    }

    async fn run(&self, ctx: &mut BuildContext, env: &StepEnv<'_>) -> StepAction {
        info!(vm = ctx.vm_name(), "stopping VM");
        if let Err(err) = env.transport.stop_vm(ctx.vm_name()).await {
            ctx.advise(format!("failed to stop VM: {err}"));
        }
        StepAction::Continue
    }
}

/// Delete the build VM. Always runs last, whatever happened before.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupVm;

#[async_trait]
impl Step for CleanupVm {
    fn name(&self) -> &'static str {
        "cleanup-vm"
    }

    async fn run(&self, ctx: &mut BuildContext, env: &StepEnv<'_>) -> StepAction {
        info!(vm = ctx.vm_name(), "deleting VM");
        if let Err(err) = env.transport.delete_vm(ctx.vm_name()).await {
            ctx.advise(format!("failed to delete VM: {err}"));
        }
        StepAction::Continue
    }
}
