//! The provisioning collaborator.
//!
//! The build hands a booted VM to a [`Provisioner`] and only cares whether it
//! succeeded. [`CommandProvisioner`] is the stock implementation: it runs
//! shell commands on the host with the VM's name and address substituted in,
//! and shells out to `ssh-keygen` for temporary key pairs.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::CommConfig;
use crate::error::{Error, Result};
use crate::process::{run_captured, run_streamed};

/// Substitution key for the VM name.
pub const VM_NAME_VAR: &str = "MedaVMName";
/// Substitution key for the VM address.
pub const VM_IP_VAR: &str = "MedaVMIP";

/// Environment variable carrying the VM name into provisioning commands.
pub const VM_NAME_ENV: &str = "MEDA_VM_NAME";
/// Environment variable carrying the VM address into provisioning commands.
pub const VM_IP_ENV: &str = "MEDA_VM_IP";

/// Values the build exposes to provisioning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedVars {
    pub vm_name: String,
    pub vm_ip: String,
}

impl GeneratedVars {
    /// Named values, in declaration order.
    pub fn pairs(&self) -> [(&'static str, &str); 2] {
        [(VM_NAME_VAR, &self.vm_name), (VM_IP_VAR, &self.vm_ip)]
    }

    /// Environment variables for child processes.
    pub fn env(&self) -> [(&'static str, &str); 2] {
        [(VM_NAME_ENV, &self.vm_name), (VM_IP_ENV, &self.vm_ip)]
    }

    /// Replace `{{ .MedaVMName }}` / `{{ .MedaVMIP }}` (spacing optional) in `template`.
    pub fn substitute(&self, template: &str) -> String {
        let mut out = template.to_owned();
        for (key, value) in self.pairs() {
            out = out
                .replace(&format!("{{{{ .{key} }}}}"), value)
                .replace(&format!("{{{{.{key}}}}}"), value);
        }
        out
    }
}

/// A key pair generated for the duration of one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key_file: PathBuf,
    pub public_key: String,
}

impl KeyPair {
    pub fn public_key_file(&self) -> PathBuf {
        let mut path = self.private_key_file.clone().into_os_string();
        path.push(".pub");
        PathBuf::from(path)
    }
}

/// Everything provisioning needs to reach the VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key_file: Option<PathBuf>,
    pub timeout: Duration,
    pub handshake_attempts: u32,
    pub disable_agent_forwarding: bool,
    pub vars: GeneratedVars,
}

impl ProvisionTarget {
    /// Connection settings from `comm`, aimed at the VM described by `vars`.
    pub fn new(comm: &CommConfig, vars: GeneratedVars) -> Self {
        Self {
            host: vars.vm_ip.clone(),
            port: comm.port,
            username: comm.username.clone(),
            password: comm.password.clone(),
            private_key_file: comm.private_key_file.clone(),
            timeout: comm.timeout,
            handshake_attempts: comm.handshake_attempts,
            disable_agent_forwarding: comm.disable_agent_forwarding,
            vars,
        }
    }
}

/// External provisioning step.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create a temporary key pair for `target`.
    async fn generate_key_pair(&self, target: &ProvisionTarget) -> Result<KeyPair>;

    /// Provision the booted VM. Must return [`Error::Cancelled`] when `cancel` fires.
    async fn provision(&self, target: &ProvisionTarget, cancel: &CancellationToken) -> Result<()>;
}

/// Runs host shell commands against the VM.
#[derive(Debug, Clone, Default)]
pub struct CommandProvisioner {
    commands: Vec<String>,
    key_dir: Option<PathBuf>,
}

impl CommandProvisioner {
    pub fn new(commands: Vec<String>) -> Self {
        Self {
            commands,
            key_dir: None,
        }
    }

    /// Directory for temporary key pairs. Defaults to the system temp dir.
    pub fn key_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.key_dir = Some(dir.into());
        self
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    fn command(&self, line: &str, vars: &GeneratedVars) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(vars.substitute(line))
            .envs(vars.env())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Provisioner for CommandProvisioner {
    async fn generate_key_pair(&self, target: &ProvisionTarget) -> Result<KeyPair> {
        let dir = self.key_dir.clone().unwrap_or_else(std::env::temp_dir);
        let private_key_file = dir.join(format!("{}_ed25519", target.vars.vm_name));
        let key_pair = KeyPair {
            private_key_file,
            public_key: String::new(),
        };

        // ssh-keygen refuses to overwrite without a prompt.
        for path in [key_pair.private_key_file.clone(), key_pair.public_key_file()] {
            if path.exists() {
                tokio::fs::remove_file(&path).await?;
            }
        }

        let mut cmd = Command::new("ssh-keygen");
        cmd.args(["-q", "-t", "ed25519", "-N", "", "-C"])
            .arg(format!("packer-{}", target.vars.vm_name))
            .arg("-f")
            .arg(&key_pair.private_key_file)
            .stdin(std::process::Stdio::null());

        let output = run_captured(cmd).await?;
        if !output.success() {
            return Err(Error::CommandFailed {
                action: "generate key pair".to_owned(),
                failure: output.status.to_string(),
                detail: output.combined(),
            });
        }

        let public_key = tokio::fs::read_to_string(key_pair.public_key_file()).await?;
        Ok(KeyPair {
            public_key: public_key.trim().to_owned(),
            ..key_pair
        })
    }

    async fn provision(&self, target: &ProvisionTarget, cancel: &CancellationToken) -> Result<()> {
        for line in &self.commands {
            info!(command = %line, host = %target.host, "provisioning");
            let output = run_streamed(self.command(line, &target.vars), cancel).await?;
            if !output.success() {
                return Err(Error::Provision(format!(
                    "`{line}` exited with {}: {}",
                    output.status,
                    output.stderr.trim()
                )));
            }
        }
        Ok(())
    }
}
