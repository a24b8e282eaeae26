use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_LEVEL: &str = "info";

/// Build the log filter; `RUST_LOG` wins over `level`, and an unparseable
/// `level` falls back to info
#[must_use]
pub fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
}

/// Install the global subscriber. Calling it twice is harmless.
pub fn init(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(filter(level))
        .with(fmt::layer().with_target(true))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init("debug");
        init("not a level [");
    }

    #[test]
    fn test_filter_accepts_directives() {
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(filter("edgesync=debug").to_string().contains("edgesync=debug"));
        }
    }
}
