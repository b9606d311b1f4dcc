//! Build configuration: raw deserialized input, defaults, and validation.
//!
//! [`RawConfig`] mirrors the build file; every field is optional.
//! [`RawConfig::prepare`] applies defaults, validates, and produces an
//! immutable [`BuildConfig`].

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::binary::BinaryResolver;
use crate::error::{Error, Result};

/// Registry used when none is configured.
pub const DEFAULT_REGISTRY: &str = "ghcr.io";

/// Credential variable required when pushing to [`DEFAULT_REGISTRY`].
pub const REGISTRY_TOKEN_ENV: &str = "GITHUB_TOKEN";

const DEFAULT_BINARY: &str = "meda";
const DEV_MODE_BINARY: &str = "cargo";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 7777;
const DEFAULT_MEMORY: &str = "1G";
const DEFAULT_CPUS: u32 = 2;
const DEFAULT_DISK_SIZE: &str = "10G";
const DEFAULT_TAG: &str = "latest";
const DEFAULT_SSH_PORT: u16 = 22;
const DEFAULT_SSH_USERNAME: &str = "cirun";
const DEFAULT_SSH_PASSWORD: &str = "cirun";
const DEFAULT_SSH_TIMEOUT_SECS: u64 = 300;
const SSH_HANDSHAKE_ATTEMPTS: u32 = 10;

/// Build parameters as written in the build file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub use_api: Option<bool>,
    pub meda_binary: Option<String>,
    pub meda_source_dir: Option<PathBuf>,
    pub meda_sha256: Option<String>,
    pub meda_host: Option<String>,
    pub meda_port: Option<u16>,

    pub vm_name: Option<String>,
    pub base_image: Option<String>,
    pub memory: Option<String>,
    pub cpus: Option<u32>,
    pub disk_size: Option<String>,
    pub user_data_file: Option<PathBuf>,

    pub output_image_name: Option<String>,
    pub output_tag: Option<String>,
    pub registry: Option<String>,
    pub organization: Option<String>,

    pub push_to_registry: Option<bool>,
    pub dry_run: Option<bool>,

    pub communicator: RawCommConfig,
}

/// Communicator settings as written in the build file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawCommConfig {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub ssh_port: Option<u16>,
    pub ssh_username: Option<String>,
    pub ssh_password: Option<String>,
    pub ssh_private_key_file: Option<PathBuf>,
    pub ssh_timeout_secs: Option<u64>,
    pub ssh_temporary_key_pair: Option<bool>,
}

/// Validated, defaulted build parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    pub backend: Backend,

    pub vm_name: String,
    pub base_image: String,
    pub memory: String,
    pub cpus: u32,
    pub disk_size: String,
    pub user_data_file: Option<PathBuf>,

    pub output_image_name: String,
    pub output_tag: String,
    pub registry: String,
    pub organization: String,

    pub push_to_registry: bool,
    pub dry_run: bool,

    pub comm: CommConfig,
}

/// The one transport a build talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Spawn the Meda binary for every operation.
    Local(LocalBackend),
    /// Call the Meda REST service.
    Remote(RemoteBackend),
}

/// How the local Meda CLI is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalBackend {
    /// A resolved Meda executable.
    Binary(PathBuf),
    /// `cargo run --` inside a Meda source checkout.
    Cargo { source_dir: PathBuf },
}

/// Address of the Meda REST service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBackend {
    pub host: String,
    pub port: u16,
}

impl RemoteBackend {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// How the provisioning collaborator reaches the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommType {
    Ssh,
    None,
}

/// Validated communicator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommConfig {
    pub kind: CommType,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key_file: Option<PathBuf>,
    pub timeout: Duration,
    pub handshake_attempts: u32,
    pub disable_agent_forwarding: bool,
}

impl CommConfig {
    /// Whether the build must generate a temporary key pair before provisioning.
    pub fn needs_key_pair(&self) -> bool {
        self.kind == CommType::Ssh && self.password.is_none() && self.private_key_file.is_none()
    }
}

impl BuildConfig {
    /// `name:tag` of the image the build produces.
    pub fn output_image(&self) -> String {
        format!("{}:{}", self.output_image_name, self.output_tag)
    }

    /// Fully qualified registry coordinate: `registry[/organization]/name:tag`.
    pub fn publish_target(&self) -> String {
        if self.organization.is_empty() {
            format!(
                "{}/{}:{}",
                self.registry, self.output_image_name, self.output_tag
            )
        } else {
            format!(
                "{}/{}/{}:{}",
                self.registry, self.organization, self.output_image_name, self.output_tag
            )
        }
    }

    /// Whether pushing requires [`REGISTRY_TOKEN_ENV`] to be set.
    pub fn requires_registry_credential(&self) -> bool {
        self.registry.contains(DEFAULT_REGISTRY)
    }
}

impl RawConfig {
    /// Apply defaults and validate. All validation failures are reported together.
    pub fn prepare(self) -> Result<BuildConfig> {
        let mut errs = Vec::new();

        let vm_name = required(self.vm_name, "vm_name", &mut errs);
        let base_image = required(self.base_image, "base_image", &mut errs);
        let output_image_name = required(self.output_image_name, "output_image_name", &mut errs);

        let backend = if self.use_api.unwrap_or(false) {
            Some(Backend::Remote(RemoteBackend {
                host: non_empty(self.meda_host).unwrap_or_else(|| DEFAULT_HOST.to_owned()),
                port: self
                    .meda_port
                    .filter(|port| *port != 0)
                    .unwrap_or(DEFAULT_PORT),
            }))
        } else {
            let binary = non_empty(self.meda_binary).unwrap_or_else(|| DEFAULT_BINARY.to_owned());
            if binary == DEV_MODE_BINARY {
                match self.meda_source_dir.or_else(default_source_dir) {
                    Some(source_dir) => Some(Backend::Local(LocalBackend::Cargo { source_dir })),
                    None => {
                        errs.push("failed to get meda directory: home directory unknown".to_owned());
                        None
                    }
                }
            } else {
                let mut resolver = BinaryResolver::new(binary);
                if let Some(sha256) = self.meda_sha256 {
                    resolver = resolver.expected_sha256(sha256);
                }
                match resolver.resolve() {
                    Ok(path) => Some(Backend::Local(LocalBackend::Binary(path))),
                    Err(e) => {
                        errs.push(e.to_string());
                        None
                    }
                }
            }
        };

        let comm = self.communicator.prepare(&mut errs);

        if !errs.is_empty() {
            return Err(Error::InvalidConfig(errs));
        }
        let Some(backend) = backend else {
            return Err(Error::InvalidConfig(vec!["no backend selected".to_owned()]));
        };

        Ok(BuildConfig {
            backend,
            vm_name,
            base_image,
            memory: non_empty(self.memory).unwrap_or_else(|| DEFAULT_MEMORY.to_owned()),
            cpus: self.cpus.filter(|c| *c != 0).unwrap_or(DEFAULT_CPUS),
            disk_size: non_empty(self.disk_size).unwrap_or_else(|| DEFAULT_DISK_SIZE.to_owned()),
            user_data_file: self
                .user_data_file
                .filter(|p| !p.as_os_str().is_empty()),
            output_image_name,
            output_tag: non_empty(self.output_tag).unwrap_or_else(|| DEFAULT_TAG.to_owned()),
            registry: non_empty(self.registry).unwrap_or_else(|| DEFAULT_REGISTRY.to_owned()),
            organization: self.organization.unwrap_or_default(),
            push_to_registry: self.push_to_registry.unwrap_or(false),
            dry_run: self.dry_run.unwrap_or(false),
            comm,
        })
    }
}

impl RawCommConfig {
    fn prepare(self, errs: &mut Vec<String>) -> CommConfig {
        let kind = match self.kind.as_deref() {
            None | Some("") | Some("ssh") => CommType::Ssh,
            Some("none") => CommType::None,
            Some(other) => {
                errs.push(format!("unsupported communicator type: {other}"));
                CommType::None
            }
        };

        let private_key_file = self
            .ssh_private_key_file
            .filter(|p| !p.as_os_str().is_empty());
        let temporary_key_pair = self.ssh_temporary_key_pair.unwrap_or(false);
        let password = match non_empty(self.ssh_password) {
            Some(password) => Some(password),
            None if private_key_file.is_none() && !temporary_key_pair => {
                Some(DEFAULT_SSH_PASSWORD.to_owned())
            }
            None => None,
        };

        CommConfig {
            kind,
            port: self
                .ssh_port
                .filter(|p| *p != 0)
                .unwrap_or(DEFAULT_SSH_PORT),
            username: non_empty(self.ssh_username)
                .unwrap_or_else(|| DEFAULT_SSH_USERNAME.to_owned()),
            password,
            private_key_file,
            timeout: Duration::from_secs(
                self.ssh_timeout_secs
                    .filter(|t| *t != 0)
                    .unwrap_or(DEFAULT_SSH_TIMEOUT_SECS),
            ),
            handshake_attempts: SSH_HANDSHAKE_ATTEMPTS,
            disable_agent_forwarding: true,
        }
    }
}

fn required(value: Option<String>, field: &str, errs: &mut Vec<String>) -> String {
    match non_empty(value) {
        Some(value) => value,
        None => {
            errs.push(format!("{field} is required"));
            String::new()
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn default_source_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join("meda"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote_raw() -> RawConfig {
        RawConfig {
            use_api: Some(true),
            vm_name: Some("ubuntu".to_owned()),
            base_image: Some("ubuntu-base:latest".to_owned()),
            output_image_name: Some("ci-runner".to_owned()),
            ..RawConfig::default()
        }
    }

    #[test]
    fn test_defaults_applied() {
        let config = remote_raw().prepare().unwrap();
        assert_eq!(
            config.backend,
            Backend::Remote(RemoteBackend {
                host: "127.0.0.1".to_owned(),
                port: 7777,
            })
        );
        assert_eq!(config.memory, "1G");
        assert_eq!(config.cpus, 2);
        assert_eq!(config.disk_size, "10G");
        assert_eq!(config.output_tag, "latest");
        assert_eq!(config.registry, "ghcr.io");
        assert_eq!(config.organization, "");
        assert!(!config.push_to_registry);
        assert!(!config.dry_run);
        assert_eq!(config.comm.kind, CommType::Ssh);
        assert_eq!(config.comm.port, 22);
        assert_eq!(config.comm.username, "cirun");
        assert_eq!(config.comm.password.as_deref(), Some("cirun"));
        assert_eq!(config.comm.timeout, Duration::from_secs(300));
        assert_eq!(config.comm.handshake_attempts, 10);
        assert!(config.comm.disable_agent_forwarding);
        assert!(!config.comm.needs_key_pair());
    }

    #[test]
    fn test_missing_required_fields_reported_together() {
        let raw = RawConfig {
            use_api: Some(true),
            ..RawConfig::default()
        };
        match raw.prepare().unwrap_err() {
            Error::InvalidConfig(errs) => {
                assert!(errs.contains(&"vm_name is required".to_owned()));
                assert!(errs.contains(&"base_image is required".to_owned()));
                assert!(errs.contains(&"output_image_name is required".to_owned()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_local_binary_fails_validation() {
        let raw = RawConfig {
            use_api: Some(false),
            meda_binary: Some("/nonexistent/meda-binary".to_owned()),
            ..remote_raw()
        };
        match raw.prepare().unwrap_err() {
            Error::InvalidConfig(errs) => {
                assert!(errs.iter().any(|e| e.contains("meda binary not found")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_cargo_dev_mode_uses_source_dir() {
        let raw = RawConfig {
            use_api: Some(false),
            meda_binary: Some("cargo".to_owned()),
            meda_source_dir: Some(PathBuf::from("/src/meda")),
            ..remote_raw()
        };
        let config = raw.prepare().unwrap();
        assert_eq!(
            config.backend,
            Backend::Local(LocalBackend::Cargo {
                source_dir: PathBuf::from("/src/meda"),
            })
        );
    }

    #[test]
    fn test_zero_values_fall_back_to_defaults() {
        let raw = RawConfig {
            meda_port: Some(0),
            cpus: Some(0),
            memory: Some(String::new()),
            ..remote_raw()
        };
        let config = raw.prepare().unwrap();
        assert_eq!(config.cpus, 2);
        assert_eq!(config.memory, "1G");
        match config.backend {
            Backend::Remote(remote) => assert_eq!(remote.base_url(), "http://127.0.0.1:7777"),
            other => panic!("unexpected backend: {other:?}"),
        }
    }

    #[test]
    fn test_temporary_key_pair_requires_generation() {
        let mut raw = remote_raw();
        raw.communicator.ssh_temporary_key_pair = Some(true);
        let config = raw.prepare().unwrap();
        assert_eq!(config.comm.password, None);
        assert!(config.comm.needs_key_pair());
    }

    #[test]
    fn test_private_key_file_suppresses_default_password() {
        let mut raw = remote_raw();
        raw.communicator.ssh_private_key_file = Some(PathBuf::from("/keys/id_ed25519"));
        let config = raw.prepare().unwrap();
        assert_eq!(config.comm.password, None);
        assert!(!config.comm.needs_key_pair());
    }

    #[test]
    fn test_unknown_communicator_rejected() {
        let mut raw = remote_raw();
        raw.communicator.kind = Some("winrm".to_owned());
        assert!(matches!(raw.prepare(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_publish_target_with_and_without_organization() {
        let mut config = remote_raw().prepare().unwrap();
        assert_eq!(config.output_image(), "ci-runner:latest");
        assert_eq!(config.publish_target(), "ghcr.io/ci-runner:latest");

        config.organization = "acme".to_owned();
        config.output_tag = "v2".to_owned();
        assert_eq!(config.publish_target(), "ghcr.io/acme/ci-runner:v2");
        assert!(config.requires_registry_credential());

        config.registry = "registry.example.com".to_owned();
        assert!(!config.requires_registry_credential());
    }

    #[test]
    fn test_deserialize_from_json_value() {
        let raw: RawConfig = serde_json::from_value(serde_json::json!({
            "use_api": true,
            "vm_name": "ubuntu",
            "base_image": "ubuntu",
            "output_image_name": "out",
            "cpus": 4,
            "communicator": { "type": "none" }
        }))
        .unwrap();
        let config = raw.prepare().unwrap();
        assert_eq!(config.cpus, 4);
        assert_eq!(config.comm.kind, CommType::None);
        assert!(!config.comm.needs_key_pair());
    }
}
