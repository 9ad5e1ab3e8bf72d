use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

/// Logs to stderr. `RUST_LOG` overrides `default_level`.
pub fn init_tracing(default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);

    if subscriber.try_init().is_err() {
        tracing::debug!("a tracing subscriber was already installed");
    }
}
