use anyhow::Result;
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "warn";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber: `RUST_LOG`-filtered diagnostics on stderr.
pub fn init_logging() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter())
        .with_ansi(atty::is(atty::Stream::Stderr))
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    debug!("logging initialized");
    Ok(())
}
