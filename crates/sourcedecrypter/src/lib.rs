//! Secret decryption for deployment sources
//!
//! Decrypts a set of named ciphertext secrets once, exposes the plaintexts to
//! a template pass under the `encryptedSecrets` namespace, and rewrites each
//! declared target file with its placeholders resolved.
//!
//! The decryption algorithm itself is supplied by the caller through the
//! [`SecretDecrypter`] capability.
//!
//! # Example
//!
//! ```no_run
//! use sourcedecrypter::{CommandDecrypter, SecretEncryption, decrypt_secrets};
//! use std::path::Path;
//!
//! let encryption = SecretEncryption::new()
//!     .with_secret("db_password", "ENC1")
//!     .with_target("config.yaml");
//!
//! // config.yaml: `password: {{ encryptedSecrets.db_password }}`
//! let decrypter = CommandDecrypter::new("my-kms-decrypt", vec!["--stdin".to_string()]);
//! decrypt_secrets(Path::new("./app"), &encryption, &decrypter)?;
//! # Ok::<(), sourcedecrypter::Error>(())
//! ```
//!
//! # Failure semantics
//!
//! Every error aborts the run. Targets are processed in declared order, so
//! when target `n` fails, targets before it have been rewritten and targets
//! after it are untouched.

mod config;
mod decrypter;
mod error;
mod orchestrator;
pub mod paths;
pub mod rewrite;
mod secrets;
pub mod template;

pub use config::{DecryptOptions, SecretEncryption};
pub use decrypter::{
    CommandDecrypter, CommandDecrypterConfig, CommandDecrypterError, DecrypterError,
    SecretDecrypter,
};
pub use error::{Error, Result};
pub use orchestrator::{SourceDecrypter, decrypt_secrets, decrypt_secrets_with};
pub use paths::ContainmentPolicy;
pub use rewrite::RewriteMode;
pub use secrets::{DecryptedSecrets, LookupError, RenderContext, SECRETS_NAMESPACE, SecureSecret};
pub use template::{ParseError, RenderError, Template};

/// Cancellation token accepted by [`DecryptOptions`].
pub use tokio_util::sync::CancellationToken;
