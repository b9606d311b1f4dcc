//! The VM-manager contract every build step talks to.
//!
//! [`connect`] picks the implementation once from the [`BuildConfig`]; steps
//! only ever see `&dyn Transport`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{Backend, BuildConfig};
use crate::error::Result;

pub mod local;
pub mod remote;

pub use local::LocalTransport;
pub use remote::RemoteTransport;

/// Parameters for creating a VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmSpec {
    pub name: String,
    pub base_image: String,
    pub memory: String,
    pub cpus: u32,
    pub disk: String,
    pub user_data: Option<PathBuf>,
}

impl VmSpec {
    pub fn from_config(name: impl Into<String>, config: &BuildConfig) -> Self {
        Self {
            name: name.into(),
            base_image: config.base_image.clone(),
            memory: config.memory.clone(),
            cpus: config.cpus,
            disk: config.disk_size.clone(),
            user_data: config.user_data_file.clone(),
        }
    }
}

/// Parameters for pushing an image to a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    /// Local image name without tag.
    pub name: String,
    /// Local image reference, `name:tag`.
    pub image: String,
    /// Fully qualified target coordinate.
    pub target: String,
    pub registry: String,
    pub dry_run: bool,
}

/// Operations the build needs from the VM manager.
///
/// VMs are created stopped; `create_vm` never boots the machine.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether the backend already knows `image` (a bare name, no tag).
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Build a base image locally.
    async fn create_image(&self, name: &str) -> Result<()>;

    /// Pull an image from a registry.
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Create a VM in the stopped state. Returns its identifier.
    async fn create_vm(&self, spec: &VmSpec) -> Result<String>;

    async fn start_vm(&self, vm: &str) -> Result<()>;

    async fn stop_vm(&self, vm: &str) -> Result<()>;

    /// The VM's IPv4 address, or `None` while it has none.
    async fn vm_address(&self, vm: &str) -> Result<Option<String>>;

    /// Capture a VM's disk as `name:tag`. Returns the image reference.
    async fn snapshot(&self, vm: &str, name: &str, tag: &str) -> Result<String>;

    async fn publish(&self, request: &PublishRequest) -> Result<()>;

    async fn delete_vm(&self, vm: &str) -> Result<()>;

    async fn delete_image(&self, image: &str) -> Result<()>;
}

/// Build the transport selected by `config`.
///
/// `cancel` lets long-running subprocesses be interrupted.
pub fn connect(config: &BuildConfig, cancel: CancellationToken) -> Result<Arc<dyn Transport>> {
    let transport: Arc<dyn Transport> = match &config.backend {
        Backend::Local(local) => Arc::new(LocalTransport::new(local).with_cancellation(cancel)),
        Backend::Remote(remote) => Arc::new(RemoteTransport::new(remote)?),
    };
    Ok(transport)
}

/// Validate one line of backend output as an IPv4 address.
///
/// The whole trimmed line must be four dot-separated decimal integers.
pub fn parse_ipv4_line(line: &str) -> Option<&str> {
    let line = line.trim();
    let parts: Vec<&str> = line.split('.').collect();
    if parts.len() != 4 {
        return None;
    }
    let all_numeric = parts.iter().all(|part| {
        !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()) && part.parse::<u32>().is_ok()
    });
    all_numeric.then_some(line)
}

/// First line of `output` that is a valid IPv4 address.
pub fn find_ipv4(output: &str) -> Option<String> {
    output.lines().find_map(parse_ipv4_line).map(str::to_owned)
}
