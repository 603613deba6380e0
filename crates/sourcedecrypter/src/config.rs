//! Secret encryption configuration and run options

use crate::paths::ContainmentPolicy;
use crate::rewrite::RewriteMode;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Encrypted secrets and the files they are rendered into.
///
/// Unknown fields are ignored so the block can sit inside a larger
/// application configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SecretEncryption {
    /// Secret name -> ciphertext
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub encrypted_secrets: BTreeMap<String, String>,

    /// Paths relative to the application directory, processed in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decryption_targets: Vec<String>,
}

impl SecretEncryption {
    /// Create an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an encrypted secret.
    #[must_use]
    pub fn with_secret(mut self, name: impl Into<String>, ciphertext: impl Into<String>) -> Self {
        self.encrypted_secrets
            .insert(name.into(), ciphertext.into());
        self
    }

    /// Append a decryption target.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.decryption_targets.push(target.into());
        self
    }

    /// Parse from YAML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the document does not parse.
    pub fn from_yaml_str(source: &str) -> Result<Self> {
        serde_yaml::from_str(source).map_err(|e| Error::invalid_config(e.to_string(), None))
    }

    /// Parse from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the document does not parse.
    pub fn from_json_str(source: &str) -> Result<Self> {
        serde_json::from_str(source).map_err(|e| Error::invalid_config(e.to_string(), None))
    }

    /// Load from a file; `.json` files are JSON, anything else YAML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the file cannot be read or parsed.
    pub fn from_path(path: &Path) -> Result<Self> {
        Self::from_path_at(path, None)
    }

    /// Load the block at a dot-separated `section` (e.g. `spec.encryption`)
    /// of a configuration file, or the whole document when `section` is
    /// `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the file cannot be read or parsed
    /// or the section does not exist.
    pub fn from_path_at(path: &Path, section: Option<&str>) -> Result<Self> {
        let invalid = |message: String| Error::invalid_config(message, Some(path.to_path_buf()));

        let source = std::fs::read_to_string(path)
            .map_err(|e| invalid(format!("failed to read {}: {e}", path.display())))?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let document: serde_json::Value = if source.trim().is_empty() {
            serde_json::Value::Null
        } else if is_json {
            serde_json::from_str(&source).map_err(|e| invalid(e.to_string()))?
        } else {
            serde_yaml::from_str(&source).map_err(|e| invalid(e.to_string()))?
        };

        let mut block = &document;
        if let Some(section) = section {
            for key in section.split('.').filter(|k| !k.is_empty()) {
                block = block
                    .get(key)
                    .ok_or_else(|| invalid(format!("section '{section}' not found")))?;
            }
        }

        let config: Self = match block {
            // An empty document or section means nothing to decrypt.
            serde_json::Value::Null => Self::default(),
            value => Self::deserialize(value).map_err(|e| invalid(e.to_string()))?,
        };

        tracing::debug!(
            path = %path.display(),
            secrets = config.encrypted_secrets.len(),
            targets = config.decryption_targets.len(),
            "Loaded secret encryption configuration"
        );
        Ok(config)
    }
}

/// Options for one decryption run.
#[derive(Debug, Clone, Default)]
pub struct DecryptOptions {
    /// How targets are rewritten
    pub mode: RewriteMode,
    /// Handling of targets outside the application directory
    pub containment: ContainmentPolicy,
    /// Checked before each secret and each target
    pub cancellation: Option<CancellationToken>,
}

impl DecryptOptions {
    /// Default options: atomic rewrite, warn on escaping targets, no cancellation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the rewrite mode.
    #[must_use]
    pub fn with_mode(mut self, mode: RewriteMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the containment policy.
    #[must_use]
    pub fn with_containment(mut self, containment: ContainmentPolicy) -> Self {
        self.containment = containment;
        self
    }

    /// Set the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}
