// Tracing subscriber setup shared by every binary built on these crates.

use tracing_subscriber::EnvFilter;

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per event, for log shippers.
    Json,
}

/// Level directive for a `-v` count: 0=warn, 1=info, 2=debug, 3+=trace.
pub fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install a human-readable subscriber on stderr. `RUST_LOG` wins over
/// `verbosity` when set.
pub fn init_tracing(verbosity: u8) {
    init_tracing_with(verbosity, LogFormat::Text);
}

/// Install a subscriber with the given format.
///
/// A second call is a no-op: the first installed subscriber stays.
pub fn init_tracing_with(verbosity: u8, format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_for(verbosity)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
