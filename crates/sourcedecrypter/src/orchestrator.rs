//! Decrypt-then-rewrite orchestration
//!
//! One run validates the configuration, decrypts every secret exactly once,
//! and then renders and rewrites each target in declared order, stopping at
//! the first failure.

use crate::config::{DecryptOptions, SecretEncryption};
use crate::decrypter::SecretDecrypter;
use crate::paths::{self, ContainmentPolicy};
use crate::rewrite;
use crate::secrets::{DecryptedSecrets, RenderContext};
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::instrument;

/// Decrypt secrets into the targets under `app_dir` with default options.
///
/// # Errors
///
/// See [`decrypt_secrets_with`].
pub fn decrypt_secrets(
    app_dir: &Path,
    encryption: &SecretEncryption,
    decrypter: &dyn SecretDecrypter,
) -> Result<()> {
    decrypt_secrets_with(app_dir, encryption, decrypter, &DecryptOptions::default())
}

/// Decrypt secrets into the targets under `app_dir`.
///
/// - No targets: returns immediately without decrypting or touching files.
/// - Targets but no secrets: [`Error::Configuration`].
/// - Otherwise every secret is decrypted before any file is touched, then
///   targets are processed in order.
///
/// # Errors
///
/// Returns the first failure. Targets before the failing one have been
/// rewritten; targets after it are untouched.
#[instrument(
    name = "decrypt_secrets",
    skip_all,
    fields(app_dir = %app_dir.display(), targets = encryption.decryption_targets.len())
)]
pub fn decrypt_secrets_with(
    app_dir: &Path,
    encryption: &SecretEncryption,
    decrypter: &dyn SecretDecrypter,
    options: &DecryptOptions,
) -> Result<()> {
    let targets = &encryption.decryption_targets;
    if targets.is_empty() {
        tracing::debug!("No decryption targets declared");
        return Ok(());
    }
    if encryption.encrypted_secrets.is_empty() {
        return Err(Error::Configuration {
            targets: targets.clone(),
        });
    }

    tracing::info!(
        secrets = encryption.encrypted_secrets.len(),
        targets = targets.len(),
        "Decrypting secrets into targets"
    );
    paths::check_targets(app_dir, targets, options.containment)?;

    let secrets = DecryptedSecrets::decrypt_all(
        &encryption.encrypted_secrets,
        decrypter,
        options.cancellation.as_ref(),
    )?;
    let context = RenderContext::new(&secrets);

    let mut referenced = BTreeSet::new();
    for target in targets {
        if options.is_cancelled() {
            return Err(Error::Cancelled);
        }
        process_target(app_dir, target, &context, options, &mut referenced)?;
    }

    for name in secrets.names().filter(|name| !referenced.contains(*name)) {
        tracing::warn!(secret = %name, "Encrypted secret is not referenced by any decryption target");
    }

    tracing::info!(
        targets = targets.len(),
        secrets = secrets.len(),
        mode = %options.mode,
        "Decrypted secrets into targets"
    );
    Ok(())
}

fn process_target(
    app_dir: &Path,
    target: &str,
    context: &RenderContext<'_>,
    options: &DecryptOptions,
    referenced: &mut BTreeSet<String>,
) -> Result<()> {
    let path = paths::resolve_target(app_dir, target);
    if options.containment == ContainmentPolicy::Enforce {
        paths::verify_canonical(app_dir, target, &path)?;
    }

    let template = rewrite::load_template(target, &path)?;
    referenced.extend(template.referenced_secrets().map(str::to_string));

    rewrite::rewrite(target, &path, &template, context, options.mode)?;
    tracing::debug!(target_path = %target, "Processed decryption target");
    Ok(())
}

/// A decrypter bundled with run options.
///
/// ```no_run
/// use sourcedecrypter::{CommandDecrypter, DecryptOptions, RewriteMode, SecretEncryption, SourceDecrypter};
/// use std::path::Path;
///
/// let runner = SourceDecrypter::new(CommandDecrypter::new("decrypt-tool", vec![]))
///     .with_options(DecryptOptions::new().with_mode(RewriteMode::InPlace));
/// let encryption = SecretEncryption::new().with_secret("k", "ENC").with_target("app.yaml");
/// runner.run(Path::new("./app"), &encryption)?;
/// # Ok::<(), sourcedecrypter::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct SourceDecrypter<D> {
    decrypter: D,
    options: DecryptOptions,
}

impl<D: SecretDecrypter> SourceDecrypter<D> {
    /// Wrap `decrypter` with default options.
    #[must_use]
    pub fn new(decrypter: D) -> Self {
        Self {
            decrypter,
            options: DecryptOptions::default(),
        }
    }

    /// Replace the run options.
    #[must_use]
    pub fn with_options(mut self, options: DecryptOptions) -> Self {
        self.options = options;
        self
    }

    /// The run options.
    #[must_use]
    pub fn options(&self) -> &DecryptOptions {
        &self.options
    }

    /// The wrapped decrypter.
    #[must_use]
    pub fn decrypter(&self) -> &D {
        &self.decrypter
    }

    /// Run once for `app_dir`.
    ///
    /// # Errors
    ///
    /// See [`decrypt_secrets_with`].
    pub fn run(&self, app_dir: &Path, encryption: &SecretEncryption) -> Result<()> {
        decrypt_secrets_with(app_dir, encryption, &self.decrypter, &self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DecrypterError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    impl SecretDecrypter for Counting {
        fn decrypt(&self, ciphertext: &str) -> std::result::Result<String, DecrypterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("plain-{ciphertext}"))
        }
    }

    #[test]
    fn test_no_targets_is_noop() {
        let decrypter = Counting::default();
        let encryption = SecretEncryption::new().with_secret("a", "1");
        decrypt_secrets(Path::new("/does/not/exist"), &encryption, &decrypter).unwrap();
        assert_eq!(decrypter.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_targets_without_secrets_fail_before_decrypting() {
        let decrypter = Counting::default();
        let encryption = SecretEncryption::new().with_target("a.yaml");
        let err = decrypt_secrets(Path::new("/does/not/exist"), &encryption, &decrypter).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert_eq!(decrypter.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_enforced_containment_fails_before_decrypting() {
        let decrypter = Counting::default();
        let encryption = SecretEncryption::new()
            .with_secret("a", "1")
            .with_target("../outside.yaml");
        let options = DecryptOptions::new().with_containment(ContainmentPolicy::Enforce);
        let err = decrypt_secrets_with(Path::new("/srv/app"), &encryption, &decrypter, &options)
            .unwrap_err();
        assert!(matches!(err, Error::PathEscape { .. }));
        assert_eq!(decrypter.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_source_decrypter_runs_with_options() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.env"), "A={{ encryptedSecrets.a }}").unwrap();

        let runner = SourceDecrypter::new(Counting::default())
            .with_options(DecryptOptions::new().with_mode(rewrite::RewriteMode::InPlace));
        let encryption = SecretEncryption::new()
            .with_secret("a", "1")
            .with_target("a.env");
        runner.run(dir.path(), &encryption).unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.env")).unwrap(),
            "A=plain-1"
        );
        assert_eq!(runner.decrypter().calls.load(Ordering::SeqCst), 1);
        assert_eq!(runner.options().mode, rewrite::RewriteMode::InPlace);
    }
}
