//! Build VM images with the Meda VM manager.
//!
//! This crate provides two modules:
//!
//! - [`api`]: Low-level typed client for the Meda REST API, generated via progenitor
//! - [`sdk`]: The build orchestration: config, transports, steps, artifacts
//!
//! # Quick Start
//!
//! ```no_run
//! use meda_builder::sdk::{CommandProvisioner, ImageBuilder, RawConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> meda_builder::sdk::Result<()> {
//! let config = RawConfig {
//!     vm_name: Some("ubuntu".into()),
//!     base_image: Some("ubuntu-base:latest".into()),
//!     output_image_name: Some("ci-runner".into()),
//!     ..Default::default()
//! }
//! .prepare()?;
//!
//! let cancel = CancellationToken::new();
//! let artifact = ImageBuilder::connect(config, CommandProvisioner::default(), &cancel)?
//!     .run(&cancel)
//!     .await?;
//! println!("{artifact}");
//! # Ok(())
//! # }
//! ```

/// Low-level typed API client generated via progenitor.
///
/// Use this for calls the build sequence does not make, such as listing VMs'
/// images directly.
pub use mb_api as api;

/// Build orchestration for Meda VM images.
///
/// This module provides:
/// - [`sdk::RawConfig`] / [`sdk::BuildConfig`]: Build file input and its validated form
/// - [`sdk::ImageBuilder`]: Runs the build sequence
/// - [`sdk::Transport`]: The local CLI and REST backends
/// - [`sdk::Artifact`]: The produced image
pub use mb_sdk as sdk;
