// Logging setup
// Events are emitted with `tracing` throughout the crate; this installs the
// global subscriber. The filter comes from RUSTYSHARD_LOG, for example
// `RUSTYSHARD_LOG=debug` or `RUSTYSHARD_LOG=warn,rustyshard::route=debug`.

use tracing_subscriber::{fmt, EnvFilter};

/// Variable holding the filter directives
pub const ENV_VAR: &str = "RUSTYSHARD_LOG";

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env(ENV_VAR).unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install a compact subscriber at `info` unless RUSTYSHARD_LOG says otherwise
pub fn init() {
    init_with_default("info");
}

/// Install a compact subscriber with the given default level
///
/// Only the first installation takes effect; later calls are no-ops.
pub fn init_with_default(default_level: &str) {
    let subscriber = fmt()
        .with_env_filter(filter(default_level))
        .with_target(true)
        // Shard replies land on backend worker threads
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .compact();

    let _ = subscriber.try_init();
}

/// Install a JSON subscriber for log collectors
pub fn init_json() {
    let subscriber = fmt()
        .with_env_filter(filter("info"))
        .with_target(true)
        .with_writer(std::io::stderr)
        .json();

    let _ = subscriber.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        init();
        init_with_default("debug");
        init_json();
    }
}
