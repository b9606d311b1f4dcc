//! Locating the Meda binary for the local transport.
//!
//! Resolution order: the `MEDA_BIN` override, then the configured name. A
//! value that looks like a path is used as-is; a bare name is searched on
//! `PATH`. The first existing candidate must be executable and, when a
//! checksum is configured, match it.

use std::env;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Environment variable that overrides the configured Meda binary.
pub const BINARY_ENV_OVERRIDE: &str = "MEDA_BIN";

/// Resolves the Meda binary to an executable path.
#[derive(Debug, Clone)]
pub struct BinaryResolver {
    binary: String,
    env_override: Option<&'static str>,
    expected_sha256: Option<String>,
}

impl BinaryResolver {
    /// Create a resolver for `binary` (a bare name or a path).
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            env_override: Some(BINARY_ENV_OVERRIDE),
            expected_sha256: None,
        }
    }

    /// Disable the `MEDA_BIN` override.
    pub fn ignore_env(mut self) -> Self {
        self.env_override = None;
        self
    }

    /// Optional expected SHA256 of the resolved binary.
    pub fn expected_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.expected_sha256 = Some(sha256.into());
        self
    }

    /// Resolve the binary path.
    pub fn resolve(&self) -> Result<PathBuf> {
        let overridden = self
            .env_override
            .and_then(env::var_os)
            .filter(|value| !value.is_empty())
            .map(|value| value.to_string_lossy().into_owned());

        let mut searched: Vec<PathBuf> = Vec::new();
        for name in overridden.iter().chain(std::iter::once(&self.binary)) {
            for candidate in candidates(name) {
                if searched.contains(&candidate) {
                    continue;
                }
                searched.push(candidate.clone());
                if candidate.is_file() {
                    return self.accept(candidate);
                }
            }
        }

        Err(Error::BinaryNotFound {
            binary: self.binary.clone(),
            searched,
        })
    }

    fn accept(&self, path: PathBuf) -> Result<PathBuf> {
        if !is_executable(&path)? {
            return Err(Error::BinaryNotExecutable(path));
        }
        if let Some(expected) = &self.expected_sha256 {
            let expected =
                normalize_sha256(expected).ok_or_else(|| Error::InvalidSha256(expected.clone()))?;
            let actual = sha256_file(&path)?;
            if actual != expected {
                return Err(Error::ChecksumMismatch {
                    path,
                    expected,
                    actual,
                });
            }
        }
        Ok(path)
    }
}

/// A path is taken literally; a bare name expands to every `PATH` entry.
fn candidates(binary: &str) -> Vec<PathBuf> {
    let path = Path::new(binary);
    if path.is_absolute() || path.components().count() > 1 {
        return vec![path.to_path_buf()];
    }
    env::var_os("PATH")
        .map(|dirs| env::split_paths(&dirs).map(|dir| dir.join(binary)).collect())
        .unwrap_or_default()
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    io::copy(&mut File::open(path)?, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Lowercase hex digest, with an optional `sha256:` prefix stripped.
fn normalize_sha256(raw: &str) -> Option<String> {
    let hex = raw.strip_prefix("sha256:").unwrap_or(raw);
    (hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit()))
        .then(|| hex.to_ascii_lowercase())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::PermissionsExt;
    Ok(path.metadata()?.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> io::Result<bool> {
    Ok(true)
}
