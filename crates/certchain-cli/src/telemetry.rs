//! Logging initialization.
//!
//! Logs go to stderr so command results on stdout stay machine readable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// `log_level` is an `EnvFilter` directive such as `info` or
/// `certchain_core=debug,warn`. `RUST_LOG` takes precedence when set.
pub fn init_telemetry(log_level: &str, json_format: bool) -> anyhow::Result<()> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = build_filter(log_level, rust_log.as_deref())?;

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init()?;
    }

    Ok(())
}

/// Directives from `rust_log` if non-empty, else `log_level`.
fn build_filter(log_level: &str, rust_log: Option<&str>) -> anyhow::Result<EnvFilter> {
    let directives = match rust_log {
        Some(directives) if !directives.is_empty() => directives,
        _ => log_level,
    };
    Ok(EnvFilter::try_new(directives)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_is_rejected() {
        assert!(build_filter("certchain_core=loud", None).is_err());
        assert!(build_filter("info", Some("certchain_core=loud")).is_err());
    }

    #[test]
    fn test_rust_log_takes_precedence() {
        let filter = build_filter("info", Some("certchain_core=trace")).unwrap();
        assert_eq!(filter.to_string(), "certchain_core=trace");

        let filter = build_filter("warn", Some("")).unwrap();
        assert_eq!(filter.to_string(), "warn");
    }

    #[test]
    fn test_second_init_fails_cleanly() {
        // only one global subscriber per process
        let first = init_telemetry("info", false);
        let second = init_telemetry("info", true);
        assert!(first.is_err() || second.is_err());
    }
}
