use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the process-wide subscriber. Filter comes from `RUST_LOG`,
/// defaulting to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    // A second init (tests, embedded use) is harmless.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .try_init();
}
