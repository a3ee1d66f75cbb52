// ABOUTME: Shared logging setup for the ghcert server and CLI
// ABOUTME: init() logs everything at INFO, init_for() keeps other crates at WARN

use tracing_subscriber::EnvFilter;

/// Standard logging to stderr. Default: INFO level, RUST_LOG override.
/// Used by the issuance server.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();
}

/// Crate-filtered logging to stderr. Default: `level` for the named crate, WARN for
/// everything else. The CLI uses this so reqwest/hyper chatter stays out of the
/// terminal while its own progress is still visible with `RUST_LOG`.
pub fn init_for(crate_name: &str, level: tracing::Level) {
    let directive = format!("{crate_name}={level}");
    let filter = EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into())
        .add_directive(
            directive
                .parse()
                .unwrap_or_else(|_| tracing::Level::INFO.into()),
        );

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
