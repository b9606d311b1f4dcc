//! The result of a successful build.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::BuildConfig;
use crate::error::Result;
use crate::transport::{self, Transport};

/// Identifies artifacts produced by this builder.
pub const BUILDER_ID: &str = "meda.vm";

/// A produced image, and where it was pushed.
#[derive(Debug, Clone)]
pub struct Artifact {
    image_name: String,
    pushed_image: Option<String>,
    config: Arc<BuildConfig>,
}

impl Artifact {
    pub fn new(
        image_name: impl Into<String>,
        pushed_image: Option<String>,
        config: Arc<BuildConfig>,
    ) -> Self {
        Self {
            image_name: image_name.into(),
            pushed_image,
            config,
        }
    }

    pub fn builder_id(&self) -> &'static str {
        BUILDER_ID
    }

    /// The image reference, `name:tag`.
    pub fn id(&self) -> &str {
        &self.image_name
    }

    /// Images live inside the VM manager; there are no files on the host.
    pub fn files(&self) -> &[String] {
        &[]
    }

    pub fn image_name(&self) -> &str {
        &self.image_name
    }

    pub fn pushed_image(&self) -> Option<&str> {
        self.pushed_image.as_deref()
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Named state values: `image_name`, `pushed_image`, `registry`, `organization`.
    pub fn state(&self, name: &str) -> Option<&str> {
        match name {
            "image_name" => Some(&self.image_name),
            "pushed_image" => Some(self.pushed_image.as_deref().unwrap_or_default()),
            "registry" => Some(&self.config.registry),
            "organization" => Some(&self.config.organization),
            _ => None,
        }
    }

    /// Remove the image from the VM manager.
    pub async fn destroy(&self) -> Result<()> {
        let transport = transport::connect(&self.config, CancellationToken::new())?;
        self.destroy_with(transport.as_ref()).await
    }

    /// Remove the image through an existing transport.
    pub async fn destroy_with(&self, transport: &dyn Transport) -> Result<()> {
        info!(image = %self.image_name, "removing image");
        transport.delete_image(&self.image_name).await
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Meda image: {}", self.image_name)?;
        if let Some(target) = &self.pushed_image {
            write!(f, " (pushed to {target})")?;
        }
        Ok(())
    }
}
