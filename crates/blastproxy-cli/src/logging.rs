//! Tracing subscriber setup

use blastproxy_core::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber
///
/// `RUST_LOG` wins over the configured level; `--verbose` raises the
/// configured level to debug.
pub fn init(config: &LoggingConfig, verbose: bool) {
    let mut config = config.clone();
    if verbose {
        config.merge(LoggingConfig {
            level: "debug".to_string(),
            format: String::new(),
        });
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "blastproxy={0},blastproxy_core={0}",
            config.level
        ))
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match config.format.as_str() {
        "json" => builder.json().try_init(),
        "compact" => builder.compact().try_init(),
        _ => builder.pretty().try_init(),
    };

    if let Err(e) = result {
        eprintln!("Failed to initialize logging: {}", e);
    }
}
