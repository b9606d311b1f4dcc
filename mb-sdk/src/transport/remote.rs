//! Transport over the Meda REST API.

use async_trait::async_trait;
use mb_api::Client;
use mb_api::types::{
    CreateImageRequest, CreateVmRequest, OperationStatus, PullImageRequest, PushImageRequest,
};
use tracing::debug;

use super::{PublishRequest, Transport, VmSpec, parse_ipv4_line};
use crate::config::RemoteBackend;
use crate::error::{Error, Result};
use crate::process::contains_denial;

const BASE_IMAGE_TAG: &str = "latest";

/// Talks to a Meda server at `http://{host}:{port}`.
pub struct RemoteTransport {
    client: Client,
    base_url: String,
}

impl RemoteTransport {
    pub fn new(backend: &RemoteBackend) -> Result<Self> {
        let base_url = backend.base_url();
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            client: Client::new_with_client(&base_url, http),
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl std::fmt::Debug for RemoteTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTransport")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Turn a client error into an SDK error, reading the body of non-2xx replies.
async fn api_error(action: &'static str, err: mb_api::Error<()>) -> Error {
    match err {
        mb_api::Error::UnexpectedResponse(response) => {
            let status = response.status().as_u16();
            let detail = response.text().await.unwrap_or_default();
            Error::ApiStatus {
                action,
                status,
                detail,
            }
        }
        other => Error::Api(other),
    }
}

/// Reject an operation whose status carries a failure flag or denial text.
fn check_status(action: &str, status: &OperationStatus) -> Result<()> {
    let message = status.message.clone().unwrap_or_default();
    if contains_denial(&message) {
        return Err(Error::Denied {
            action: action.to_owned(),
            detail: message,
        });
    }
    if status.success == Some(false) {
        return Err(Error::CommandFailed {
            action: action.to_owned(),
            failure: "server reported failure".to_owned(),
            detail: message,
        });
    }
    Ok(())
}

#[async_trait]
impl Transport for RemoteTransport {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.client.list_images().send().await {
            Ok(images) => Ok(images.into_inner().iter().any(|info| info.name == image)),
            Err(err) => {
                debug!(error = %err, "listing images failed, treating as absent");
                Ok(false)
            }
        }
    }

    async fn create_image(&self, name: &str) -> Result<()> {
        let status = self
            .client
            .create_image()
            .body(CreateImageRequest {
                name: name.to_owned(),
                tag: BASE_IMAGE_TAG.to_owned(),
                from_vm: None,
            })
            .send()
            .await;
        let status = match status {
            Ok(status) => status.into_inner(),
            Err(err) => return Err(api_error("create base image", err).await),
        };
        check_status(&format!("create base image '{name}'"), &status)
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let status = self
            .client
            .pull_image()
            .body(PullImageRequest {
                image: image.to_owned(),
            })
            .send()
            .await;
        let status = match status {
            Ok(status) => status.into_inner(),
            Err(err) => return Err(api_error("pull image", err).await),
        };
        check_status(&format!("pull image '{image}'"), &status)
    }

    async fn create_vm(&self, spec: &VmSpec) -> Result<String> {
        let result = self
            .client
            .create_vm()
            .body(CreateVmRequest {
                name: spec.name.clone(),
                base_image: spec.base_image.clone(),
                memory: spec.memory.clone(),
                cpus: spec.cpus,
                disk: spec.disk.clone(),
                force: false,
                user_data: spec
                    .user_data
                    .as_ref()
                    .map(|path| path.display().to_string()),
            })
            .send()
            .await;
        match result {
            Ok(info) => Ok(info.into_inner().name),
            Err(err) => Err(api_error("create VM", err).await),
        }
    }

    async fn start_vm(&self, vm: &str) -> Result<()> {
        match self.client.start_vm().name(vm).send().await {
            Ok(_) => Ok(()),
            Err(err) => Err(api_error("start VM", err).await),
        }
    }

    async fn stop_vm(&self, vm: &str) -> Result<()> {
        match self.client.stop_vm().name(vm).send().await {
            Ok(_) => Ok(()),
            Err(err) => Err(api_error("stop VM", err).await),
        }
    }

    async fn vm_address(&self, vm: &str) -> Result<Option<String>> {
        match self.client.get_vm_ip().name(vm).send().await {
            Ok(address) => Ok(address
                .into_inner()
                .ip
                .as_deref()
                .and_then(parse_ipv4_line)
                .map(str::to_owned)),
            Err(err) => {
                debug!(vm, error = %err, "address lookup failed");
                Ok(None)
            }
        }
    }

    async fn snapshot(&self, vm: &str, name: &str, tag: &str) -> Result<String> {
        let status = self
            .client
            .create_image()
            .body(CreateImageRequest {
                name: name.to_owned(),
                tag: tag.to_owned(),
                from_vm: Some(vm.to_owned()),
            })
            .send()
            .await;
        match status {
            Ok(status) => {
                let status = status.into_inner();
                if status.success == Some(false) {
                    return Err(Error::CommandFailed {
                        action: "create image".to_owned(),
                        failure: "server reported failure".to_owned(),
                        detail: status.message.unwrap_or_default(),
                    });
                }
                Ok(format!("{name}:{tag}"))
            }
            Err(err) => Err(api_error("create image", err).await),
        }
    }

    async fn publish(&self, request: &PublishRequest) -> Result<()> {
        let status = self
            .client
            .push_image()
            .body(PushImageRequest {
                name: request.image.clone(),
                image: request.target.clone(),
                registry: request.registry.clone(),
                dry_run: request.dry_run,
            })
            .send()
            .await;
        let status = match status {
            Ok(status) => status.into_inner(),
            Err(err) => return Err(api_error("push image", err).await),
        };
        check_status("push image", &status)
    }

    async fn delete_vm(&self, vm: &str) -> Result<()> {
        match self.client.delete_vm().name(vm).send().await {
            Ok(_) => Ok(()),
            Err(err) => Err(api_error("delete VM", err).await),
        }
    }

    async fn delete_image(&self, image: &str) -> Result<()> {
        match self.client.delete_image().name(image).send().await {
            Ok(_) => Ok(()),
            Err(err) => Err(api_error("remove image", err).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(success: Option<bool>, message: Option<&str>) -> OperationStatus {
        OperationStatus {
            success,
            message: message.map(str::to_owned),
        }
    }

    #[test]
    fn test_base_url_from_backend() {
        let transport = RemoteTransport::new(&RemoteBackend {
            host: "10.1.2.3".to_owned(),
            port: 8080,
        })
        .unwrap();
        assert_eq!(transport.base_url(), "http://10.1.2.3:8080");
    }

    #[test]
    fn test_check_status_accepts_plain_success() {
        assert!(check_status("push image", &status(Some(true), Some("pushed"))).is_ok());
        assert!(check_status("push image", &status(None, None)).is_ok());
    }

    #[test]
    fn test_check_status_flags_denial_even_on_success() {
        let err = check_status(
            "push image",
            &status(Some(true), Some("registry said: access DENIED")),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Denied { .. }));
    }

    #[test]
    fn test_check_status_reports_failure() {
        let err = check_status("pull image", &status(Some(false), Some("no such image")))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "pull image failed: server reported failure - no such image"
        );
    }
}
