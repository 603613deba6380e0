//! Decrypter capability and the command-backed implementation

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;

/// Error returned by a [`SecretDecrypter`] implementation.
pub type DecrypterError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Capability that turns one ciphertext into its plaintext.
///
/// The decrypter is always passed in by the caller. Sharing one instance
/// across concurrent runs is allowed; the implementation is then responsible
/// for its own thread safety.
pub trait SecretDecrypter: Send + Sync {
    /// Decrypt a single ciphertext.
    ///
    /// # Errors
    ///
    /// Returns the implementation's failure, which is reported as the cause of
    /// [`Error::Decryption`](crate::Error::Decryption).
    fn decrypt(&self, ciphertext: &str) -> Result<String, DecrypterError>;
}

impl<T: SecretDecrypter + ?Sized> SecretDecrypter for &T {
    fn decrypt(&self, ciphertext: &str) -> Result<String, DecrypterError> {
        (**self).decrypt(ciphertext)
    }
}

impl<T: SecretDecrypter + ?Sized> SecretDecrypter for Box<T> {
    fn decrypt(&self, ciphertext: &str) -> Result<String, DecrypterError> {
        (**self).decrypt(ciphertext)
    }
}

impl<T: SecretDecrypter + ?Sized> SecretDecrypter for Arc<T> {
    fn decrypt(&self, ciphertext: &str) -> Result<String, DecrypterError> {
        (**self).decrypt(ciphertext)
    }
}

/// Configuration for [`CommandDecrypter`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandDecrypterConfig {
    /// Program to execute
    pub command: String,

    /// Arguments to pass to the program
    #[serde(default)]
    pub args: Vec<String>,
}

/// Errors from running the decryption command
#[derive(Debug, thiserror::Error)]
pub enum CommandDecrypterError {
    /// The program could not be started.
    #[error("Failed to execute command '{command}': {source}")]
    Spawn {
        /// The program
        command: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Feeding the ciphertext to the program failed.
    #[error("Failed to write ciphertext to command '{command}': {source}")]
    Stdin {
        /// The program
        command: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The program exited unsuccessfully.
    #[error("Command '{command}' failed ({status}): {stderr}")]
    Failed {
        /// The program
        command: String,
        /// Exit status description
        status: String,
        /// Captured standard error
        stderr: String,
    },

    /// The program printed something that is not UTF-8.
    #[error("Command '{command}' produced non UTF-8 output")]
    NonUtf8 {
        /// The program
        command: String,
    },
}

/// Decrypts by running an external program once per ciphertext.
///
/// The ciphertext is written to the program's stdin and its stdout, minus one
/// trailing line ending, is the plaintext.
#[derive(Debug, Clone)]
pub struct CommandDecrypter {
    config: CommandDecrypterConfig,
}

impl CommandDecrypter {
    /// Create a decrypter for `command` with `args`
    #[must_use]
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            config: CommandDecrypterConfig {
                command: command.into(),
                args,
            },
        }
    }

    /// Create a decrypter from its serialized configuration
    #[must_use]
    pub fn from_config(config: CommandDecrypterConfig) -> Self {
        Self { config }
    }

    /// The configured program and arguments
    #[must_use]
    pub fn config(&self) -> &CommandDecrypterConfig {
        &self.config
    }

    fn run(&self, ciphertext: &str) -> Result<String, CommandDecrypterError> {
        let command = &self.config.command;
        let mut child = Command::new(command)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CommandDecrypterError::Spawn {
                command: command.clone(),
                source,
            })?;

        // stdin is fed from its own thread; the child may fill stdout first.
        let stdin = child.stdin.take();
        let input = ciphertext.as_bytes().to_vec();
        let writer = std::thread::spawn(move || -> std::io::Result<()> {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&input)?;
            }
            Ok(())
        });

        let output = child
            .wait_with_output()
            .map_err(|source| CommandDecrypterError::Spawn {
                command: command.clone(),
                source,
            })?;

        match writer.join() {
            Ok(Ok(())) => {}
            // The program may legitimately exit without reading all input.
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
            Ok(Err(source)) => {
                return Err(CommandDecrypterError::Stdin {
                    command: command.clone(),
                    source,
                });
            }
            Err(_) => {
                return Err(CommandDecrypterError::Stdin {
                    command: command.clone(),
                    source: std::io::Error::other("stdin writer thread panicked"),
                });
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CommandDecrypterError::Failed {
                command: command.clone(),
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        let mut plaintext =
            String::from_utf8(output.stdout).map_err(|_| CommandDecrypterError::NonUtf8 {
                command: command.clone(),
            })?;
        if plaintext.ends_with('\n') {
            plaintext.pop();
            if plaintext.ends_with('\r') {
                plaintext.pop();
            }
        }
        Ok(plaintext)
    }
}

impl SecretDecrypter for CommandDecrypter {
    fn decrypt(&self, ciphertext: &str) -> Result<String, DecrypterError> {
        self.run(ciphertext).map_err(Into::into)
    }
}
