//! Error types for secret decryption runs.

use crate::decrypter::DecrypterError;
use crate::template::{ParseError, RenderError};
use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for decryption runs.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can abort a decryption run.
///
/// Every variant names the phase that failed and, where one exists, the
/// secret or target involved. Secret plaintext never appears in a message.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Decryption targets were declared without any encrypted secret.
    #[error("No encrypted secret was specified to decrypt {targets:?}")]
    #[diagnostic(
        code(sourcedecrypter::config::no_secrets),
        help("Add at least one entry to `encryptedSecrets` or remove `decryptionTargets`")
    )]
    Configuration {
        /// The declared decryption targets
        targets: Vec<String>,
    },

    /// The configuration document could not be read or parsed.
    #[error("Invalid secret encryption configuration: {message}")]
    #[diagnostic(code(sourcedecrypter::config::invalid))]
    InvalidConfig {
        /// The error message
        message: String,
        /// The configuration file, when one was involved
        path: Option<PathBuf>,
    },

    /// The decrypter failed for one secret.
    #[error("Failed to decrypt secret '{name}'")]
    #[diagnostic(
        code(sourcedecrypter::decrypt),
        help("Check that the ciphertext was produced for this deployment's key")
    )]
    Decryption {
        /// Name of the secret that failed
        name: String,
        /// Cause reported by the decrypter
        #[source]
        source: DecrypterError,
    },

    /// A target's content is not a valid template.
    #[error("Failed to parse decryption target {target}")]
    #[diagnostic(
        code(sourcedecrypter::template::parse),
        help("Placeholders are Handlebars expressions such as `{{{{ encryptedSecrets.NAME }}}}`; blocks and partials are not supported")
    )]
    TemplateParse {
        /// The declared target path
        target: String,
        /// The parse failure
        #[source]
        source: ParseError,
    },

    /// Rendering a target failed, including references to undefined secrets.
    #[error("Failed to render decryption target {target}")]
    #[diagnostic(
        code(sourcedecrypter::template::render),
        help("Every placeholder must reference a secret declared under `encryptedSecrets`")
    )]
    Render {
        /// The declared target path
        target: String,
        /// The render failure
        #[source]
        source: RenderError,
    },

    /// Rendering failed in place, and closing the truncated target failed too.
    #[error("Failed to render decryption target {target} ({render}), and closing it also failed")]
    #[diagnostic(code(sourcedecrypter::template::render_and_close))]
    RenderAndClose {
        /// The declared target path
        target: String,
        /// The render failure
        render: RenderError,
        /// The close failure
        #[source]
        close: std::io::Error,
    },

    /// The target's current content could not be read.
    #[error("Failed to read decryption target {target}")]
    #[diagnostic(code(sourcedecrypter::io::read))]
    TargetRead {
        /// The declared target path
        target: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The target (or its replacement file) could not be opened for writing.
    #[error("Failed to open decryption target {target}")]
    #[diagnostic(code(sourcedecrypter::io::open))]
    FileOpen {
        /// The declared target path
        target: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Writing rendered output failed.
    #[error("Failed to write decryption target {target}")]
    #[diagnostic(code(sourcedecrypter::io::write))]
    FileWrite {
        /// The declared target path
        target: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Flushing and closing the written file failed; data may not be durable.
    #[error("Failed to close decryption target {target}")]
    #[diagnostic(code(sourcedecrypter::io::close))]
    FileClose {
        /// The declared target path
        target: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Moving the rendered file over the target failed.
    #[error("Failed to replace decryption target {target}")]
    #[diagnostic(code(sourcedecrypter::io::replace))]
    FileReplace {
        /// The declared target path
        target: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A target resolves outside the application root.
    #[error("Decryption target {target} resolves outside the application root {}", .root.display())]
    #[diagnostic(
        code(sourcedecrypter::path::escape),
        help("Targets must be relative paths inside the application directory")
    )]
    PathEscape {
        /// The declared target path
        target: String,
        /// The application root
        root: PathBuf,
    },

    /// The run was cancelled between steps.
    #[error("Secret decryption was cancelled")]
    #[diagnostic(code(sourcedecrypter::cancelled))]
    Cancelled,
}

impl Error {
    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            path,
        }
    }

    /// The declared target this error concerns, if any.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::TemplateParse { target, .. }
            | Self::Render { target, .. }
            | Self::RenderAndClose { target, .. }
            | Self::TargetRead { target, .. }
            | Self::FileOpen { target, .. }
            | Self::FileWrite { target, .. }
            | Self::FileClose { target, .. }
            | Self::FileReplace { target, .. }
            | Self::PathEscape { target, .. } => Some(target),
            Self::Configuration { .. }
            | Self::InvalidConfig { .. }
            | Self::Decryption { .. }
            | Self::Cancelled => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_configuration_error_names_targets() {
        let err = Error::Configuration {
            targets: vec!["config.yaml".to_string(), "app.env".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("config.yaml"));
        assert!(msg.contains("app.env"));
        assert!(err.target().is_none());
    }

    #[test]
    fn test_decryption_error_names_secret_and_cause() {
        let err = Error::Decryption {
            name: "db_password".to_string(),
            source: "bad padding".into(),
        };
        assert!(err.to_string().contains("db_password"));
        let cause = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(cause.as_deref(), Some("bad padding"));
    }

    #[test]
    fn test_file_errors_are_distinct_per_step() {
        let open = Error::FileOpen {
            target: "a.yaml".to_string(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        let close = Error::FileClose {
            target: "a.yaml".to_string(),
            source: io::Error::other("EIO"),
        };
        assert!(open.to_string().contains("open"));
        assert!(close.to_string().contains("close"));
        assert_eq!(open.target(), Some("a.yaml"));
        assert_eq!(close.target(), Some("a.yaml"));
    }

    #[test]
    fn test_path_escape_message() {
        let err = Error::PathEscape {
            target: "../etc/passwd".to_string(),
            root: PathBuf::from("/srv/app"),
        };
        let msg = err.to_string();
        assert!(msg.contains("../etc/passwd"));
        assert!(msg.contains("/srv/app"));
    }

    #[test]
    fn test_invalid_config_helper() {
        let err = Error::invalid_config("expected a mapping", None);
        assert_eq!(
            err.to_string(),
            "Invalid secret encryption configuration: expected a mapping"
        );
    }

    #[test]
    fn test_diagnostic_code() {
        let err = Error::Cancelled;
        let code = err.code().map(|c| c.to_string());
        assert_eq!(code.as_deref(), Some("sourcedecrypter::cancelled"));
    }
}
