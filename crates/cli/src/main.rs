//! `sourcedecrypt`: decrypt an application's secrets into its configuration files

mod cli;
mod tracing;

use crate::cli::Cli;
use crate::tracing::TracingConfig;
use sourcedecrypter::{
    CancellationToken, CommandDecrypter, DecryptOptions, SecretEncryption, SourceDecrypter,
};
use std::time::Duration;

fn main() -> miette::Result<()> {
    let cli = cli::parse();

    crate::tracing::init_tracing(TracingConfig {
        format: cli.log_format,
        level: cli.level.into(),
        filter: cli.log_filter.clone(),
    })?;

    run(cli)
}

fn run(cli: Cli) -> miette::Result<()> {
    let _span = ::tracing::info_span!(
        "sourcedecrypt",
        correlation_id = %crate::tracing::correlation_id(),
        app_dir = %cli.app_dir.display(),
    )
    .entered();

    let encryption = SecretEncryption::from_path_at(&cli.config, cli.section.as_deref())?;

    let token = CancellationToken::new();
    if let Some(secs) = cli.timeout {
        spawn_watchdog(token.clone(), Duration::from_secs(secs));
    }

    let options = DecryptOptions::new()
        .with_mode(cli.mode.into())
        .with_containment(cli.containment())
        .with_cancellation(token);
    let runner = SourceDecrypter::new(CommandDecrypter::new(cli.decrypt_command, cli.decrypt_args))
        .with_options(options);

    runner.run(&cli.app_dir, &encryption)?;
    Ok(())
}

/// Cancel `token` once `timeout` has elapsed.
///
/// The thread is detached; it dies with the process if the run finishes first.
fn spawn_watchdog(token: CancellationToken, timeout: Duration) {
    std::thread::spawn(move || {
        std::thread::sleep(timeout);
        if !token.is_cancelled() {
            ::tracing::warn!(timeout_secs = timeout.as_secs(), "Timed out; cancelling run");
            token.cancel();
        }
    });
}
