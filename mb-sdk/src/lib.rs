//! Build VM images by driving the Meda VM manager.
//!
//! A build takes a base image, boots a VM from it, hands the VM to a
//! [`Provisioner`], snapshots the result into a new image and optionally
//! pushes that image to a registry. The VM is deleted at the end whether the
//! build succeeded or not.
//!
//! Meda is reached through a [`Transport`]: either the local `meda` CLI
//! ([`LocalTransport`]) or its REST API ([`RemoteTransport`], built on
//! [`mb_api`]). The configuration picks one; the steps never care which.
//!
//! # Quick Start
//!
//! ```no_run
//! use mb_sdk::{CommandProvisioner, ImageBuilder, RawConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> mb_sdk::Result<()> {
//! let config = RawConfig {
//!     use_api: Some(true),
//!     vm_name: Some("ubuntu".into()),
//!     base_image: Some("ubuntu-base:latest".into()),
//!     output_image_name: Some("ci-runner".into()),
//!     push_to_registry: Some(true),
//!     organization: Some("acme".into()),
//!     ..Default::default()
//! }
//! .prepare()?;
//!
//! let cancel = CancellationToken::new();
//! let provisioner = CommandProvisioner::new(vec![
//!     "ssh cirun@{{ .MedaVMIP }} 'sudo apt-get update'".into(),
//! ]);
//! let artifact = ImageBuilder::connect(config, provisioner, &cancel)?
//!     .run(&cancel)
//!     .await?;
//!
//! // "Meda image: ci-runner:latest (pushed to ghcr.io/acme/ci-runner:latest)"
//! println!("{artifact}");
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod binary;
pub mod builder;
pub mod config;
pub mod error;
pub mod poll;
pub mod process;
pub mod provision;
pub mod state;
pub mod steps;
pub mod transport;

pub use artifact::{Artifact, BUILDER_ID};
pub use builder::{BuildPhase, ImageBuilder};
pub use config::{
    Backend, BuildConfig, CommConfig, CommType, LocalBackend, RawCommConfig, RawConfig,
    RemoteBackend,
};
pub use error::{Error, Result};
pub use poll::{PollError, Poller};
pub use provision::{CommandProvisioner, GeneratedVars, KeyPair, ProvisionTarget, Provisioner};
pub use state::BuildContext;
pub use transport::{LocalTransport, PublishRequest, RemoteTransport, Transport, VmSpec};

/// Re-export API types for convenience.
pub use mb_api::types;
