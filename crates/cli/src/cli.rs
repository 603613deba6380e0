use crate::tracing::{LogLevel, TracingFormat};
use clap::{Parser, ValueEnum};
use sourcedecrypter::{ContainmentPolicy, RewriteMode};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sourcedecrypt")]
#[command(about = "Decrypt encrypted secrets and render them into an application's configuration files")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    #[arg(
        long,
        help = "Application directory that decryption targets are relative to",
        default_value = "."
    )]
    pub app_dir: PathBuf,

    #[arg(
        long,
        env = "SOURCEDECRYPT_CONFIG",
        help = "YAML or JSON file holding encryptedSecrets and decryptionTargets"
    )]
    pub config: PathBuf,

    #[arg(
        long,
        help = "Dot-separated key of the encryption block inside the config file (e.g. spec.encryption)"
    )]
    pub section: Option<String>,

    #[arg(
        long,
        env = "SOURCEDECRYPT_COMMAND",
        help = "Command that reads a ciphertext on stdin and writes the plaintext to stdout"
    )]
    pub decrypt_command: String,

    #[arg(
        long = "decrypt-arg",
        help = "Argument passed to the decrypt command (repeatable)",
        allow_hyphen_values = true
    )]
    pub decrypt_args: Vec<String>,

    #[arg(long, help = "How targets are rewritten", default_value = "atomic", value_enum)]
    pub mode: Mode,

    #[arg(long, help = "Fail when a target resolves outside the application directory")]
    pub enforce_containment: bool,

    #[arg(long, value_name = "SECS", help = "Cancel the run after this many seconds")]
    pub timeout: Option<u64>,

    #[arg(
        short = 'l',
        long,
        help = "Set logging level",
        default_value = "warn",
        value_enum
    )]
    pub level: LogLevel,

    #[arg(long, help = "Log output format", default_value = "compact", value_enum)]
    pub log_format: TracingFormat,

    #[arg(
        long,
        value_name = "DIRECTIVES",
        help = "Tracing filter directives (e.g. sourcedecrypter=trace); overrides RUST_LOG and --level"
    )]
    pub log_filter: Option<String>,
}

/// Rewrite mode as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Write a temporary file and rename it over the target
    Atomic,
    /// Truncate the target and write into it directly
    InPlace,
}

impl From<Mode> for RewriteMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Atomic => Self::Atomic,
            Mode::InPlace => Self::InPlace,
        }
    }
}

impl Cli {
    pub fn containment(&self) -> ContainmentPolicy {
        if self.enforce_containment {
            ContainmentPolicy::Enforce
        } else {
            ContainmentPolicy::Warn
        }
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}
