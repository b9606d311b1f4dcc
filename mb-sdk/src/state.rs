//! Per-build mutable state shared by the steps.

use chrono::Utc;
use tracing::warn;

use crate::config::BuildConfig;
use crate::error::Error;
use crate::provision::{GeneratedVars, KeyPair};

/// What the steps of one build have learned so far.
///
/// Values are written once by the step that produces them and read by later
/// steps. Nothing is cleared while the build runs.
#[derive(Debug)]
pub struct BuildContext {
    vm_name: String,
    vm_ip: Option<String>,
    key_pair: Option<KeyPair>,
    image_name: Option<String>,
    pushed_image: Option<String>,
    error: Option<Error>,
    warnings: Vec<String>,
}

impl BuildContext {
    /// Context for a VM called exactly `vm_name`.
    pub fn new(vm_name: impl Into<String>) -> Self {
        Self {
            vm_name: vm_name.into(),
            vm_ip: None,
            key_pair: None,
            image_name: None,
            pushed_image: None,
            error: None,
            warnings: Vec::new(),
        }
    }

    /// Context with a fresh `packer-{vm_name}-{unix millis}` VM name.
    pub fn for_config(config: &BuildConfig) -> Self {
        Self::new(format!(
            "packer-{}-{}",
            config.vm_name,
            Utc::now().timestamp_millis()
        ))
    }

    pub fn vm_name(&self) -> &str {
        &self.vm_name
    }

    pub fn vm_ip(&self) -> Option<&str> {
        self.vm_ip.as_deref()
    }

    pub fn set_vm_ip(&mut self, ip: impl Into<String>) {
        self.vm_ip = Some(ip.into());
    }

    pub fn key_pair(&self) -> Option<&KeyPair> {
        self.key_pair.as_ref()
    }

    pub fn set_key_pair(&mut self, key_pair: KeyPair) {
        self.key_pair = Some(key_pair);
    }

    /// `name:tag` of the snapshot, once taken.
    pub fn image_name(&self) -> Option<&str> {
        self.image_name.as_deref()
    }

    pub fn set_image_name(&mut self, image: impl Into<String>) {
        self.image_name = Some(image.into());
    }

    /// Registry coordinate the image was pushed to.
    pub fn pushed_image(&self) -> Option<&str> {
        self.pushed_image.as_deref()
    }

    pub fn set_pushed_image(&mut self, target: impl Into<String>) {
        self.pushed_image = Some(target.into());
    }

    /// The error that halted the build, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Record the halting error. Only the first one sticks.
    pub fn record_error(&mut self, err: Error) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    pub(crate) fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }

    /// Record a non-fatal problem.
    pub fn advise(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(vm = %self.vm_name, "{message}");
        self.warnings.push(message);
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// `MedaVMName` / `MedaVMIP` for provisioning.
    pub fn generated_vars(&self) -> GeneratedVars {
        GeneratedVars {
            vm_name: self.vm_name.clone(),
            vm_ip: self.vm_ip.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_error_sticks() {
        let mut ctx = BuildContext::new("vm");
        ctx.record_error(Error::Other("first".to_owned()));
        ctx.record_error(Error::Other("second".to_owned()));
        assert_eq!(ctx.error().unwrap().to_string(), "first");
    }

    #[test]
    fn test_advisories_accumulate() {
        let mut ctx = BuildContext::new("vm");
        ctx.advise("stop failed");
        ctx.advise("delete failed");
        assert_eq!(ctx.warnings(), ["stop failed", "delete failed"]);
        assert!(ctx.error().is_none());
    }

    #[test]
    fn test_generated_vars() {
        let mut ctx = BuildContext::new("packer-ubuntu-1");
        assert_eq!(ctx.generated_vars().vm_ip, "");
        ctx.set_vm_ip("10.0.0.9");
        let vars = ctx.generated_vars();
        assert_eq!(vars.vm_name, "packer-ubuntu-1");
        assert_eq!(vars.vm_ip, "10.0.0.9");
    }

    #[test]
    fn test_vm_name_is_timestamp_qualified() {
        let config = crate::config::RawConfig {
            use_api: Some(true),
            vm_name: Some("ubuntu".to_owned()),
            base_image: Some("ubuntu-base".to_owned()),
            output_image_name: Some("ci-runner".to_owned()),
            ..Default::default()
        }
        .prepare()
        .unwrap();

        let before = Utc::now().timestamp_millis();
        let ctx = BuildContext::for_config(&config);
        let after = Utc::now().timestamp_millis();

        let stamp: i64 = ctx
            .vm_name()
            .strip_prefix("packer-ubuntu-")
            .unwrap()
            .parse()
            .unwrap();
        assert!((before..=after).contains(&stamp));
    }

    #[test]
    fn test_builds_within_one_second_get_distinct_names() {
        let config = crate::config::RawConfig {
            use_api: Some(true),
            vm_name: Some("ubuntu".to_owned()),
            base_image: Some("ubuntu-base".to_owned()),
            output_image_name: Some("ci-runner".to_owned()),
            ..Default::default()
        }
        .prepare()
        .unwrap();

        let first = BuildContext::for_config(&config);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = BuildContext::for_config(&config);
        assert_ne!(first.vm_name(), second.vm_name());
    }
}
