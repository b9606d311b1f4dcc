//! Shared test doubles for the build flow tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mb_sdk::{
    BuildConfig, Error, KeyPair, ProvisionTarget, Provisioner, PublishRequest, RawConfig, Result,
    Transport, VmSpec,
};
use tokio_util::sync::CancellationToken;

/// Transport that records every call and answers from canned state.
#[derive(Default)]
pub struct MockTransport {
    calls: Mutex<Vec<String>>,
    images: Mutex<Vec<String>>,
    address: Mutex<Option<String>>,
    failures: Mutex<HashMap<&'static str, String>>,
    published: Mutex<Vec<PublishRequest>>,
    created: Mutex<Vec<VmSpec>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A backend that already has `images` and hands out `ip`.
    pub fn with_images(images: &[&str], ip: Option<&str>) -> Arc<Self> {
        let mock = Self::default();
        *mock.images.lock().unwrap() = images.iter().map(|s| s.to_string()).collect();
        *mock.address.lock().unwrap() = ip.map(str::to_owned);
        Arc::new(mock)
    }

    /// Make operation `op` fail with `message`.
    pub fn fail(&self, op: &'static str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(op, message.to_owned());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose operation is `op`.
    pub fn calls_to(&self, op: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.split_whitespace().next() == Some(op))
            .collect()
    }

    pub fn ops(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.split_whitespace().next().map(str::to_owned))
            .collect()
    }

    pub fn published(&self) -> Vec<PublishRequest> {
        self.published.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<VmSpec> {
        self.created.lock().unwrap().clone()
    }

    fn record(&self, op: &'static str, arg: &str) -> Result<()> {
        self.calls.lock().unwrap().push(format!("{op} {arg}"));
        match self.failures.lock().unwrap().get(op) {
            Some(message) => Err(Error::Other(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        self.record("image_exists", image)?;
        Ok(self.images.lock().unwrap().iter().any(|i| i == image))
    }

    async fn create_image(&self, name: &str) -> Result<()> {
        self.record("create_image", name)?;
        self.images.lock().unwrap().push(name.to_owned());
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        self.record("pull_image", image)?;
        self.images.lock().unwrap().push(image.to_owned());
        Ok(())
    }

    async fn create_vm(&self, spec: &VmSpec) -> Result<String> {
        self.record("create_vm", &spec.name)?;
        self.created.lock().unwrap().push(spec.clone());
        Ok(spec.name.clone())
    }

    async fn start_vm(&self, vm: &str) -> Result<()> {
        self.record("start_vm", vm)
    }

    async fn stop_vm(&self, vm: &str) -> Result<()> {
        self.record("stop_vm", vm)
    }

    async fn vm_address(&self, vm: &str) -> Result<Option<String>> {
        self.record("vm_address", vm)?;
        Ok(self.address.lock().unwrap().clone())
    }

    async fn snapshot(&self, vm: &str, name: &str, tag: &str) -> Result<String> {
        self.record("snapshot", &format!("{vm} {name}:{tag}"))?;
        Ok(format!("{name}:{tag}"))
    }

    async fn publish(&self, request: &PublishRequest) -> Result<()> {
        self.record("publish", &request.target)?;
        self.published.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn delete_vm(&self, vm: &str) -> Result<()> {
        self.record("delete_vm", vm)
    }

    async fn delete_image(&self, image: &str) -> Result<()> {
        self.record("delete_image", image)
    }
}

/// Provisioner that records targets and optionally fails.
#[derive(Clone, Default)]
pub struct MockProvisioner {
    pub targets: Arc<Mutex<Vec<ProvisionTarget>>>,
    pub key_requests: Arc<Mutex<u32>>,
    pub fail_with: Option<String>,
    pub key_dir: Option<PathBuf>,
}

#[async_trait]
impl Provisioner for MockProvisioner {
    async fn generate_key_pair(&self, target: &ProvisionTarget) -> Result<KeyPair> {
        *self.key_requests.lock().unwrap() += 1;
        let dir = self.key_dir.clone().unwrap_or_else(std::env::temp_dir);
        let pair = KeyPair {
            private_key_file: dir.join(format!("{}_key", target.vars.vm_name)),
            public_key: "ssh-ed25519 AAAA test".to_owned(),
        };
        std::fs::write(&pair.private_key_file, "private")?;
        std::fs::write(pair.public_key_file(), &pair.public_key)?;
        Ok(pair)
    }

    async fn provision(&self, target: &ProvisionTarget, cancel: &CancellationToken) -> Result<()> {
        self.targets.lock().unwrap().push(target.clone());
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match &self.fail_with {
            Some(message) => Err(Error::Provision(message.clone())),
            None => Ok(()),
        }
    }
}

/// A remote-backend config; no binary lookup happens.
pub fn raw_config() -> RawConfig {
    RawConfig {
        use_api: Some(true),
        vm_name: Some("ubuntu".to_owned()),
        base_image: Some("ubuntu-base:latest".to_owned()),
        output_image_name: Some("ci-runner".to_owned()),
        organization: Some("acme".to_owned()),
        ..RawConfig::default()
    }
}

pub fn config() -> BuildConfig {
    raw_config().prepare().unwrap()
}
