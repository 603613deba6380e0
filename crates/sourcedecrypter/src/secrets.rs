//! Decrypted secret map and the render context built from it
//!
//! - [`SecureSecret`]: plaintext wrapper that zeroes on drop and never prints
//! - [`DecryptedSecrets`]: every declared secret, decrypted exactly once
//! - [`RenderContext`]: the only data a template may reference, with strict lookup

use crate::decrypter::SecretDecrypter;
use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Namespace under which decrypted secrets are visible to templates.
pub const SECRETS_NAMESPACE: &str = "encryptedSecrets";

/// A decrypted secret value with automatic memory zeroing on drop.
///
/// Debug and Display output is `[REDACTED]`; [`expose`](Self::expose) must be
/// called explicitly to read the plaintext.
#[derive(Clone)]
pub struct SecureSecret {
    inner: SecretString,
}

impl SecureSecret {
    /// Move a plaintext into secure storage.
    #[must_use]
    pub fn new(value: String) -> Self {
        Self {
            inner: SecretString::from(value),
        }
    }

    /// Expose the plaintext.
    ///
    /// The caller must not log or persist the returned value anywhere except
    /// the rendered target.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.inner.expose_secret()
    }

    /// Length of the plaintext in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.expose_secret().len()
    }

    /// Whether the plaintext is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.expose_secret().is_empty()
    }
}

impl std::fmt::Debug for SecureSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl std::fmt::Display for SecureSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Secret name to plaintext, built fresh for one run and dropped at its end.
#[derive(Default, Clone)]
pub struct DecryptedSecrets {
    secrets: BTreeMap<String, SecureSecret>,
}

impl DecryptedSecrets {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decrypt every entry of `encrypted` exactly once.
    ///
    /// Secrets are decrypted in name order. The first failure aborts and is
    /// returned with the failing secret's name. The cancellation token, when
    /// given, is checked before each secret.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decryption`] for a decrypter failure and
    /// [`Error::Cancelled`] when the token fires.
    pub fn decrypt_all(
        encrypted: &BTreeMap<String, String>,
        decrypter: &dyn SecretDecrypter,
        cancellation: Option<&CancellationToken>,
    ) -> Result<Self> {
        let mut decrypted = Self::new();
        for (name, ciphertext) in encrypted {
            if cancellation.is_some_and(CancellationToken::is_cancelled) {
                return Err(Error::Cancelled);
            }
            let plaintext = decrypter
                .decrypt(ciphertext)
                .map_err(|source| Error::Decryption {
                    name: name.clone(),
                    source,
                })?;
            tracing::debug!(secret = %name, "Decrypted secret");
            decrypted.insert(name.clone(), SecureSecret::new(plaintext));
        }
        Ok(decrypted)
    }

    /// Insert a decrypted secret, replacing any previous value.
    pub fn insert(&mut self, name: String, value: SecureSecret) {
        self.secrets.insert(name, value);
    }

    /// Get a secret by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SecureSecret> {
        self.secrets.get(name)
    }

    /// Whether a secret with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.secrets.contains_key(name)
    }

    /// Number of secrets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Secret names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.secrets.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for DecryptedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptedSecrets")
            .field("count", &self.secrets.len())
            .field("names", &self.secrets.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Why a template reference could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    /// The reference does not start with the secrets namespace.
    #[error("no such key \"{name}\": only \"{SECRETS_NAMESPACE}\" is defined")]
    UnknownNamespace {
        /// The first path segment
        name: String,
    },

    /// The referenced secret is not declared.
    #[error("\"{name}\" is not a declared encrypted secret")]
    UndefinedSecret {
        /// The missing secret name
        name: String,
    },

    /// The reference names a map, not a single value.
    #[error("\"{path}\" is not a single value")]
    NotAValue {
        /// The reference as written
        path: String,
    },

    /// The reference descends below a secret value.
    #[error("\"{path}\" descends into secret \"{name}\", which is a string")]
    NotAMap {
        /// The reference as written
        path: String,
        /// The secret that was indexed into
        name: String,
    },
}

/// The data visible to templates: `encryptedSecrets -> {name: plaintext}`.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    encrypted_secrets: &'a DecryptedSecrets,
}

impl<'a> RenderContext<'a> {
    /// Expose `secrets` under [`SECRETS_NAMESPACE`].
    #[must_use]
    pub fn new(secrets: &'a DecryptedSecrets) -> Self {
        Self {
            encrypted_secrets: secrets,
        }
    }

    /// The secrets behind the namespace.
    #[must_use]
    pub fn secrets(&self) -> &'a DecryptedSecrets {
        self.encrypted_secrets
    }

    /// Resolve a reference path strictly.
    ///
    /// Only `[SECRETS_NAMESPACE, name]` with a declared `name` resolves. Every
    /// other path is an error; nothing ever falls back to an empty value.
    ///
    /// # Errors
    ///
    /// Returns a [`LookupError`] describing why the path does not resolve.
    pub fn lookup<S: AsRef<str>>(&self, path: &[S]) -> std::result::Result<&'a str, LookupError> {
        let joined = || {
            let segments: Vec<&str> = path.iter().map(AsRef::as_ref).collect();
            segments.join(".")
        };

        match path {
            [] => Err(LookupError::NotAValue {
                path: "this".to_string(),
            }),
            [namespace, ..] if namespace.as_ref() != SECRETS_NAMESPACE => {
                Err(LookupError::UnknownNamespace {
                    name: namespace.as_ref().to_string(),
                })
            }
            [_] => Err(LookupError::NotAValue { path: joined() }),
            [_, name, rest @ ..] => {
                let name = name.as_ref();
                let secret =
                    self.encrypted_secrets
                        .get(name)
                        .ok_or_else(|| LookupError::UndefinedSecret {
                            name: name.to_string(),
                        })?;
                if rest.is_empty() {
                    Ok(secret.expose())
                } else {
                    Err(LookupError::NotAMap {
                        path: joined(),
                        name: name.to_string(),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DecrypterError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Upper {
        calls: AtomicUsize,
    }

    impl SecretDecrypter for Upper {
        fn decrypt(&self, ciphertext: &str) -> std::result::Result<String, DecrypterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if ciphertext == "bad" {
                return Err("corrupt ciphertext".into());
            }
            Ok(ciphertext.to_uppercase())
        }
    }

    fn encrypted(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn sample() -> DecryptedSecrets {
        let mut secrets = DecryptedSecrets::new();
        secrets.insert(
            "db_password".to_string(),
            SecureSecret::new("s3cr3t".to_string()),
        );
        secrets
    }

    #[test]
    fn secure_secret_is_redacted() {
        let secret = SecureSecret::new("hunter2-password".to_string());
        assert_eq!(format!("{secret:?}"), "[REDACTED]");
        assert_eq!(format!("{secret}"), "[REDACTED]");
        assert_eq!(secret.expose(), "hunter2-password");
        assert_eq!(secret.len(), 16);
        assert!(!secret.is_empty());
    }

    #[test]
    fn decrypt_all_calls_decrypter_once_per_secret() {
        let decrypter = Upper {
            calls: AtomicUsize::new(0),
        };
        let secrets =
            DecryptedSecrets::decrypt_all(&encrypted(&[("a", "x"), ("b", "y")]), &decrypter, None)
                .unwrap();

        assert_eq!(decrypter.calls.load(Ordering::SeqCst), 2);
        assert_eq!(secrets.len(), 2);
        assert_eq!(secrets.get("a").unwrap().expose(), "X");
        assert_eq!(secrets.names().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn decrypt_all_stops_at_first_failure() {
        let decrypter = Upper {
            calls: AtomicUsize::new(0),
        };
        let err = DecryptedSecrets::decrypt_all(
            &encrypted(&[("a", "bad"), ("b", "y")]),
            &decrypter,
            None,
        )
        .unwrap_err();

        match err {
            Error::Decryption { name, source } => {
                assert_eq!(name, "a");
                assert_eq!(source.to_string(), "corrupt ciphertext");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(decrypter.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn decrypt_all_honors_cancellation() {
        let decrypter = Upper {
            calls: AtomicUsize::new(0),
        };
        let token = CancellationToken::new();
        token.cancel();
        let err = DecryptedSecrets::decrypt_all(&encrypted(&[("a", "x")]), &decrypter, Some(&token))
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(decrypter.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn decrypted_secrets_debug_hides_values() {
        let debug = format!("{:?}", sample());
        assert!(debug.contains("db_password"));
        assert!(!debug.contains("s3cr3t"));
    }

    #[test]
    fn lookup_resolves_declared_secret() {
        let secrets = sample();
        let ctx = RenderContext::new(&secrets);
        assert_eq!(ctx.lookup(&["encryptedSecrets", "db_password"]), Ok("s3cr3t"));
    }

    #[test]
    fn lookup_rejects_undefined_secret() {
        let secrets = sample();
        let ctx = RenderContext::new(&secrets);
        assert_eq!(
            ctx.lookup(&["encryptedSecrets", "api_key"]),
            Err(LookupError::UndefinedSecret {
                name: "api_key".to_string()
            })
        );
    }

    #[test]
    fn lookup_rejects_other_namespaces() {
        let secrets = sample();
        let ctx = RenderContext::new(&secrets);
        assert!(matches!(
            ctx.lookup(&["secrets", "db_password"]),
            Err(LookupError::UnknownNamespace { .. })
        ));
    }

    #[test]
    fn lookup_never_resolves_whole_maps() {
        let secrets = sample();
        let ctx = RenderContext::new(&secrets);
        let empty: [&str; 0] = [];
        assert!(matches!(ctx.lookup(&empty), Err(LookupError::NotAValue { .. })));
        assert!(matches!(
            ctx.lookup(&["encryptedSecrets"]),
            Err(LookupError::NotAValue { .. })
        ));
    }

    #[test]
    fn lookup_rejects_fields_of_a_secret() {
        let secrets = sample();
        let ctx = RenderContext::new(&secrets);
        let err = ctx
            .lookup(&["encryptedSecrets", "db_password", "len"])
            .unwrap_err();
        assert!(matches!(err, LookupError::NotAMap { .. }));
        assert!(!err.to_string().contains("s3cr3t"));
    }
}
