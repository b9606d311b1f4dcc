use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Step, StepAction, StepEnv};
use crate::error::Error;
use crate::poll::{PollError, Poller};
use crate::state::BuildContext;

const READY_POLL_INTERVAL: Duration = Duration::from_secs(10);
const READY_TIMEOUT: Duration = Duration::from_secs(300);

/// Wait until the VM reports an IPv4 address.
#[derive(Debug, Clone, Copy)]
pub struct WaitForReady {
    poller: Poller,
}

impl WaitForReady {
    pub fn new(poller: Poller) -> Self {
        Self { poller }
    }
}

impl Default for WaitForReady {
    fn default() -> Self {
        Self::new(Poller::new(READY_POLL_INTERVAL, READY_TIMEOUT))
    }
}

#[async_trait]
impl Step for WaitForReady {
    fn name(&self) -> &'static str {
        "wait-for-ready"
    }

    async fn run(&self, ctx: &mut BuildContext, env: &StepEnv<'_>) -> StepAction {
        let vm = ctx.vm_name().to_owned();
        info!(vm = %vm, timeout_secs = self.poller.timeout().as_secs(), "waiting for VM address");

        let result = self
            .poller
            .poll(env.cancel, |attempt| {
                let vm = vm.as_str();
                async move {
                    match env.transport.vm_address(vm).await {
                        Ok(address) => address,
                        Err(err) => {
                            debug!(vm, attempt, error = %err, "address not available yet");
                            None
                        }
                    }
                }
            })
            .await;

        match result {
            Ok(ip) => {
                info!(vm = %vm, ip = %ip, "VM is ready");
                ctx.set_vm_ip(ip);
                StepAction::Continue
            }
            Err(PollError::Cancelled) => StepAction::Cancelled,
            Err(PollError::TimedOut { attempts }) => {
                debug!(vm = %vm, attempts, "gave up waiting for address");
                StepAction::Halt(Error::ReadyTimeout {
                    vm,
                    timeout: self.poller.timeout(),
                })
            }
        }
    }
}
