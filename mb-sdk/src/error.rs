use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors returned by the Meda build SDK.
#[derive(Debug, Error)]
pub enum Error {
    /// API error from the Meda REST service.
    #[error("API error: {0}")]
    Api(#[from] mb_api::Error<()>),

    /// The Meda REST service answered with a non-success status.
    #[error("{action} failed: HTTP {status}{}", detail_suffix(.detail))]
    ApiStatus {
        action: &'static str,
        status: u16,
        detail: String,
    },

    /// HTTP/network error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to spawn a process.
    #[error("failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A backend command exited unsuccessfully.
    ///
    /// `failure` is the mechanical failure (e.g. `exit status: 1`), `detail`
    /// the captured diagnostic text.
    #[error("{action} failed: {failure}{}", detail_suffix(.detail))]
    CommandFailed {
        action: String,
        failure: String,
        detail: String,
    },

    /// The backend reported success but its output carried an authorization denial.
    #[error("{action} was denied by the registry{}", detail_suffix(.detail))]
    Denied { action: String, detail: String },

    /// A credential required by the target registry is not set.
    #[error(
        "{var} environment variable is required for pushing to {registry}. \
         Please set it with: export {var}=your_token"
    )]
    MissingCredential { registry: String, var: &'static str },

    /// The VM never reported a usable network address.
    #[error("timeout waiting for VM {vm} to be ready after {}s", .timeout.as_secs())]
    ReadyTimeout { vm: String, timeout: Duration },

    /// The build was cancelled from outside.
    #[error("build was cancelled")]
    Cancelled,

    /// The provisioning collaborator reported a failure.
    #[error("provisioning failed: {0}")]
    Provision(String),

    /// Configuration failed validation.
    #[error("validation errors: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    /// A value the build relies on was never recorded.
    #[error("missing build state: {0}")]
    MissingState(&'static str),

    /// Meda binary was not found in the configured locations.
    #[error("meda binary not found: {binary} (searched {} candidates)", .searched.len())]
    BinaryNotFound {
        binary: String,
        searched: Vec<PathBuf>,
    },

    /// Resolved binary path exists but is not executable.
    #[error("binary is not executable: {}", .0.display())]
    BinaryNotExecutable(PathBuf),

    /// Binary checksum did not match expected SHA256.
    #[error(
        "checksum mismatch for {}: expected {expected}, got {actual}",
        .path.display()
    )]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Expected SHA256 value is malformed.
    #[error("invalid sha256 value: {0}")]
    InvalidSha256(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

fn detail_suffix(detail: &str) -> String {
    let detail = detail.trim();
    if detail.is_empty() {
        String::new()
    } else {
        format!(" - {detail}")
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_concatenates_detail() {
        let err = Error::CommandFailed {
            action: "create base image 'ubuntu'".to_owned(),
            failure: "exit status: 1".to_owned(),
            detail: "\n  disk full\n".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "create base image 'ubuntu' failed: exit status: 1 - disk full"
        );
    }

    #[test]
    fn test_command_failed_without_detail() {
        let err = Error::CommandFailed {
            action: "start VM".to_owned(),
            failure: "exit status: 2".to_owned(),
            detail: "   ".to_owned(),
        };
        assert_eq!(err.to_string(), "start VM failed: exit status: 2");
    }

    #[test]
    fn test_missing_credential_message() {
        let err = Error::MissingCredential {
            registry: "ghcr.io".to_owned(),
            var: "GITHUB_TOKEN",
        };
        let msg = err.to_string();
        assert!(msg.starts_with("GITHUB_TOKEN environment variable is required"));
        assert!(msg.contains("ghcr.io"));
    }
}
